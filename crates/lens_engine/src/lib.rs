//! TruthLens engine: analysis API client, result cache and job polling.
mod api;
mod cache;
mod clock;
mod export;
mod persist;
mod poller;
mod storage;
mod types;

pub use api::{AnalysisApi, ApiSettings, ReqwestAnalysisApi};
pub use cache::{
    CacheEntry, CacheEvent, CacheSettings, CacheTier, ResultCache, TierExpiry, DATA_KEY,
    DEFAULT_TTL, EXPIRY_KEY, ORIGIN_KEY,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use export::{export_cached_json, export_filename, export_job, ExportError, ExportSummary};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use poller::{Accepted, JobPoller};
pub use storage::{storage_filename, FileStore, MemoryStore, StorageBackend, StorageError};
pub use types::{ApiError, ExportFormat, FailureKind};
