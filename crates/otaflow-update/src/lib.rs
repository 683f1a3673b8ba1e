//! Update orchestration for otaflow
//!
//! Provides:
//! - Range downloads over HTTP(S) and local files with size ceilings and progress
//! - An in-process event bus decoupling background work from observers
//! - Durable tracking of in-flight downloads and updates
//! - Payload preparation for streaming and non-streaming installs
//! - The incremental/full fallback state machine driving the update engine

pub mod config_fetch;
pub mod device;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod payload;
pub mod prepare;
pub mod store;
pub mod tasks;

pub use config_fetch::{ConfigDownloadService, ConfigFetcher};
pub use device::{DeviceInfo, StaticDevice, SystemPropertyDevice, VersionOverride};
pub use download::{ByteRange, DownloadOutcome, DownloadProgress, RangeDownloader};
pub use engine::{
    EngineErrorCode, EngineStatus, EngineUpdate, PackageVerifier, UpdateEngine,
    UpdateEngineClient, ZipSignatureVerifier,
};
pub use error::{
    DownloadError, EngineError, FetchError, OrchestratorError, PrepareError, StoreError,
    VerifyError,
};
pub use events::{EventBus, UpdateEvent, UpdateListener};
pub use orchestrator::{OrchestratorDeps, OrchestratorState, UpdateOrchestrator};
pub use payload::PayloadSpec;
pub use prepare::{PayloadPreparer, PrepareService, PrepareStep};
pub use store::{
    ActiveDownload, ActiveUpdate, DownloadStatus, JsonFileStore, KeyValueStore, MemoryStore,
    OperationStore, UpdateStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
