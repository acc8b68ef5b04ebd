//! Payload registry: stable type ids, serialization, optional encryption at
//! rest and the work-unit factory.
//!
//! Registration happens once at startup; after the registry is handed to the
//! scheduler it is shared behind an `Arc` and never mutated again.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::error::RegistryError;
use super::work::{AttemptContext, TaskError, TaskPayload, TaskResult, WorkUnit, Worker};

/// Prefix marking encrypted payload data.
pub const CIPHER_MARKER: &str = "enc:";

/// Envelope version written by this build.
pub const CIPHER_VERSION: &str = "v1";

/// Symmetric cipher used to protect payload data at rest.
///
/// Key management is the implementor's concern; the registry only frames
/// the output as `enc:v1:<base64>` so that plaintext rows written before
/// encryption was enabled stay readable.
pub trait PayloadCipher: Send + Sync {
    /// Encrypt serialized payload bytes.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RegistryError>;
    /// Decrypt bytes previously produced by [`PayloadCipher::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, RegistryError>;
}

/// Output of [`PayloadRegistry::serialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedPayload {
    /// Registered type id.
    pub type_id: String,
    /// Serialized (and possibly sealed) payload.
    pub data: String,
}

trait ErasedBinding: Send + Sync {
    fn instantiate(&self, type_id: &str, json: &str) -> Result<Box<dyn WorkUnit>, RegistryError>;
}

struct TypedBinding<P, W> {
    worker: Arc<W>,
    _payload: PhantomData<fn() -> P>,
}

impl<P, W> ErasedBinding for TypedBinding<P, W>
where
    P: TaskPayload,
    W: Worker<P>,
{
    fn instantiate(&self, type_id: &str, json: &str) -> Result<Box<dyn WorkUnit>, RegistryError> {
        let payload: P = decode_json(type_id, json)?;
        Ok(Box::new(BoundWork {
            worker: Arc::clone(&self.worker),
            payload,
        }))
    }
}

struct BoundWork<P, W> {
    worker: Arc<W>,
    payload: P,
}

#[async_trait]
impl<P, W> WorkUnit for BoundWork<P, W>
where
    P: TaskPayload,
    W: Worker<P>,
{
    async fn run(self: Box<Self>, ctx: AttemptContext) -> Result<TaskResult, TaskError> {
        let Self { worker, payload } = *self;
        worker.run(payload, ctx).await
    }
}

fn decode_json<P: TaskPayload>(type_id: &str, json: &str) -> Result<P, RegistryError> {
    serde_json::from_str(json).map_err(|err| RegistryError::Decode {
        type_id: type_id.to_string(),
        reason: err.to_string(),
    })
}

/// Registry of payload types keyed by stable string id.
#[derive(Default)]
pub struct PayloadRegistry {
    bindings: HashMap<String, Arc<dyn ErasedBinding>>,
    cipher: Option<Arc<dyn PayloadCipher>>,
}

impl fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("types", &self.registered_types())
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

impl PayloadRegistry {
    /// Empty registry without a cipher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal every serialized payload with `cipher`.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn PayloadCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Bind payload type `P` to `worker`.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateType`] if `P::TYPE_ID` is already bound.
    pub fn register<P, W>(&mut self, worker: W) -> Result<(), RegistryError>
    where
        P: TaskPayload,
        W: Worker<P>,
    {
        if self.bindings.contains_key(P::TYPE_ID) {
            return Err(RegistryError::DuplicateType(P::TYPE_ID.to_string()));
        }
        let binding = TypedBinding::<P, W> {
            worker: Arc::new(worker),
            _payload: PhantomData,
        };
        self.bindings
            .insert(P::TYPE_ID.to_string(), Arc::new(binding));
        Ok(())
    }

    /// Whether `type_id` has a binding.
    pub fn is_registered(&self, type_id: &str) -> bool {
        self.bindings.contains_key(type_id)
    }

    /// Registered type ids, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.bindings.keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether payloads are sealed on write.
    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    /// Serialize `payload` to its persisted form.
    ///
    /// # Errors
    /// Unknown type, encode failure or cipher failure.
    pub fn serialize<P: TaskPayload>(&self, payload: &P) -> Result<SerializedPayload, RegistryError> {
        if !self.is_registered(P::TYPE_ID) {
            return Err(RegistryError::UnknownPayloadType(P::TYPE_ID.to_string()));
        }
        let json = serde_json::to_string(payload).map_err(|err| RegistryError::Encode {
            type_id: P::TYPE_ID.to_string(),
            reason: err.to_string(),
        })?;
        Ok(SerializedPayload {
            type_id: P::TYPE_ID.to_string(),
            data: self.seal(json)?,
        })
    }

    /// Decode persisted data back into `P`.
    ///
    /// # Errors
    /// Unknown type id, a type id that does not belong to `P`, a missing or
    /// failing cipher, or a decode failure.
    pub fn deserialize<P: TaskPayload>(&self, type_id: &str, data: &str) -> Result<P, RegistryError> {
        if !self.is_registered(type_id) {
            return Err(RegistryError::UnknownPayloadType(type_id.to_string()));
        }
        if type_id != P::TYPE_ID {
            return Err(RegistryError::Decode {
                type_id: type_id.to_string(),
                reason: format!("stored type does not match `{}`", P::TYPE_ID),
            });
        }
        let json = self.open(data)?;
        decode_json(type_id, &json)
    }

    /// Build the work unit for a persisted payload.
    ///
    /// # Errors
    /// Same conditions as [`PayloadRegistry::deserialize`].
    pub fn instantiate(&self, type_id: &str, data: &str) -> Result<Box<dyn WorkUnit>, RegistryError> {
        let binding = self
            .bindings
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownPayloadType(type_id.to_string()))?;
        let json = self.open(data)?;
        binding.instantiate(type_id, &json)
    }

    fn seal(&self, json: String) -> Result<String, RegistryError> {
        let Some(cipher) = &self.cipher else {
            return Ok(json);
        };
        let sealed = cipher.encrypt(json.as_bytes())?;
        Ok(format!(
            "{CIPHER_MARKER}{CIPHER_VERSION}:{}",
            BASE64.encode(sealed)
        ))
    }

    fn open(&self, data: &str) -> Result<String, RegistryError> {
        let Some(envelope) = data.strip_prefix(CIPHER_MARKER) else {
            return Ok(data.to_string());
        };
        let (version, body) = envelope.split_once(':').unwrap_or((envelope, ""));
        if version != CIPHER_VERSION {
            return Err(RegistryError::UnsupportedCipherVersion(version.to_string()));
        }
        let cipher = self.cipher.as_ref().ok_or(RegistryError::MissingCipher)?;
        let sealed = BASE64
            .decode(body)
            .map_err(|err| RegistryError::Cipher(format!("invalid envelope: {err}")))?;
        let plain = cipher.decrypt(&sealed)?;
        String::from_utf8(plain)
            .map_err(|err| RegistryError::Cipher(format!("decrypted payload is not utf-8: {err}")))
    }
}
