//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::serde::TaskId;

/// Errors produced by scheduler components.
///
/// Work-unit failures never show up here: they are classified into a
/// [`TaskResult`](crate::core::TaskResult) and recorded in the execution log.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No task with this id exists in the store.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The operation is not allowed while the task is executing.
    #[error("task {0} is running")]
    TaskRunning(TaskId),
    /// A submission or reschedule request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Payload registry failure (unknown type, decode, cipher).
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Platform scheduler adapter failure.
    #[error("platform adapter error: {0}")]
    Platform(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from the payload registry.
///
/// These point at configuration or versioning problems rather than at a
/// runtime failure of the task itself.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The persisted type id has no registration in this build.
    #[error("unknown payload type `{0}`")]
    UnknownPayloadType(String),
    /// Two registrations share a type id.
    #[error("payload type `{0}` is already registered")]
    DuplicateType(String),
    /// Serializing the payload failed.
    #[error("failed to encode payload `{type_id}`: {reason}")]
    Encode {
        /// Registered type id.
        type_id: String,
        /// Underlying serializer message.
        reason: String,
    },
    /// Deserializing the payload failed.
    #[error("failed to decode payload `{type_id}`: {reason}")]
    Decode {
        /// Registered type id.
        type_id: String,
        /// Underlying deserializer message.
        reason: String,
    },
    /// Stored data is encrypted but no cipher is configured.
    #[error("payload is encrypted but no cipher is configured")]
    MissingCipher,
    /// Stored data carries a cipher marker version this build cannot read.
    #[error("unsupported payload cipher version `{0}`")]
    UnsupportedCipherVersion(String),
    /// The cipher rejected the data.
    #[error("payload cipher failure: {0}")]
    Cipher(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
