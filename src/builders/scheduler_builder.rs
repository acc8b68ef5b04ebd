//! Wiring of store, registry, platform adapter, telemetry and clock into a
//! [`TaskScheduler`].

use std::sync::Arc;

use crate::config::{SchedulerConfig, StoreBackendConfig};
use crate::core::{
    NoopTelemetrySink, PayloadCipher, PayloadRegistry, PlatformScheduler, RegistryError,
    SchedulerError, TaskPayload, TaskScheduler, TaskStore, TelemetrySink, Worker,
};
use crate::infra::platform::InMemoryPlatformScheduler;
use crate::infra::store::{FileTaskStore, InMemoryTaskStore};
use crate::util::clock::{Clock, SystemClock};

/// Builder for [`TaskScheduler`].
///
/// Unset collaborators default to the store selected by
/// [`SchedulerConfig::store`], an in-memory platform adapter, a no-op
/// telemetry sink and the system clock.
///
/// ```rust,ignore
/// let scheduler = SchedulerBuilder::new()
///     .with_config(SchedulerConfig::from_env()?)
///     .register::<SyncContacts, _>(ContactSyncWorker)?
///     .with_platform(Arc::new(timer))
///     .build()?;
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: PayloadRegistry,
    cipher: Option<Arc<dyn PayloadCipher>>,
    store: Option<Arc<dyn TaskStore>>,
    platform: Option<Arc<dyn PlatformScheduler>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    clock: Option<Arc<dyn Clock>>,
    rng_seed: Option<u64>,
}

impl SchedulerBuilder {
    /// Builder with default configuration and an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind payload type `P` to `worker`.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateType`] if `P` is already registered.
    pub fn register<P, W>(mut self, worker: W) -> Result<Self, RegistryError>
    where
        P: TaskPayload,
        W: Worker<P>,
    {
        self.registry.register::<P, W>(worker)?;
        Ok(self)
    }

    /// Encrypt payloads at rest with `cipher`.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn PayloadCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use `store` instead of the configured backend.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `platform` as the wake-up adapter.
    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn PlatformScheduler>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Send lifecycle events to `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed jitter and flex draws.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate configuration and assemble the scheduler.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidConfig`] for invalid configuration or when
    /// `encrypt_payloads` is set without a cipher; [`SchedulerError::Backend`]
    /// if the file store cannot be opened.
    pub fn build(self) -> Result<TaskScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;
        if self.config.encrypt_payloads && self.cipher.is_none() {
            return Err(SchedulerError::InvalidConfig(
                "encrypt_payloads is set but no cipher was provided".into(),
            ));
        }

        let registry = match self.cipher {
            Some(cipher) => self.registry.with_cipher(cipher),
            None => self.registry,
        };
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => match &self.config.store {
                StoreBackendConfig::InMemory => Arc::new(InMemoryTaskStore::new()),
                StoreBackendConfig::File { path } => Arc::new(FileTaskStore::open(path)?),
            },
        };

        tracing::info!(
            payload_types = ?registry.registered_types(),
            encrypted = registry.has_cipher(),
            watchdog_interval_ms = self.config.watchdog_interval_ms,
            "task scheduler built"
        );

        Ok(TaskScheduler::from_parts(
            store,
            Arc::new(registry),
            self.platform
                .unwrap_or_else(|| Arc::new(InMemoryPlatformScheduler::new())),
            self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetrySink)),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            self.config,
            self.rng_seed,
        ))
    }
}
