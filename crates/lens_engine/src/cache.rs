//! Single-slot cache for the most recent analysis result.
//!
//! The result is written to every configured tier in priority order. Durable
//! tiers carry an expiry and are ignored once it passes; session tiers hold a
//! plain copy that lives as long as the store itself. Every failure here is
//! logged and swallowed: a missed cache read only costs a new request.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lens_core::AnalysisResult;
use lens_logging::{lens_debug, lens_info, lens_warn};
use tokio::sync::broadcast;

use crate::clock::{duration_millis, Clock, SystemClock};
use crate::storage::{FileStore, MemoryStore, StorageBackend, StorageError};

/// Serialized result payload.
pub const DATA_KEY: &str = "analysis_data";
/// Expiry of the durable copy, epoch milliseconds.
pub const EXPIRY_KEY: &str = "analysis_data_expiry";
/// Location the result was produced for.
pub const ORIGIN_KEY: &str = "analysis_data_origin";

pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierExpiry {
    /// Entries carry an expiry and are treated as absent once it passes.
    Enforced,
    /// Entries stay valid for the lifetime of the store.
    Session,
}

#[derive(Clone)]
pub struct CacheTier {
    backend: Arc<dyn StorageBackend>,
    expiry: TierExpiry,
}

impl CacheTier {
    pub fn durable(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            expiry: TierExpiry::Enforced,
        }
    }

    pub fn session(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            expiry: TierExpiry::Session,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: AnalysisResult,
    pub saved_at_millis: i64,
    pub expires_at_millis: i64,
    pub origin_url: String,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        now_millis <= self.expires_at_millis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A result was written to at least one tier.
    Saved {
        origin_url: String,
        expires_at_millis: i64,
        tiers: Vec<String>,
    },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// Origin recorded when `save` is not given one.
    pub default_origin: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            default_origin: "truthlens://local".to_string(),
        }
    }
}

pub struct ResultCache {
    tiers: Vec<CacheTier>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    events: broadcast::Sender<CacheEvent>,
}

impl ResultCache {
    pub fn new(tiers: Vec<CacheTier>, clock: Arc<dyn Clock>, settings: CacheSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tiers,
            clock,
            settings,
            events,
        }
    }

    /// Durable files under `dir` backed by an in-process session copy.
    pub fn with_dir(dir: PathBuf, settings: CacheSettings) -> Self {
        Self::new(
            vec![
                CacheTier::durable(Arc::new(FileStore::new(dir))),
                CacheTier::session(Arc::new(MemoryStore::new())),
            ],
            Arc::new(SystemClock),
            settings,
        )
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Best-effort write of `result` to every tier. Never fails.
    pub fn save(&self, result: &AnalysisResult, origin_url: Option<&str>) {
        let payload = match serde_json::to_string(result) {
            Ok(text) => text,
            Err(err) => {
                lens_warn!("Result not cached: serialization failed: {}", err);
                return;
            }
        };
        let saved_at = self.clock.now_millis();
        let expires_at = saved_at.saturating_add(duration_millis(self.settings.ttl));
        let origin_url = origin_url
            .unwrap_or(&self.settings.default_origin)
            .to_string();

        let mut written = Vec::new();
        for tier in &self.tiers {
            let outcome = match tier.expiry {
                TierExpiry::Enforced => {
                    write_durable(tier.backend.as_ref(), &payload, expires_at, &origin_url)
                }
                TierExpiry::Session => write_session(tier.backend.as_ref(), &payload),
            };
            match outcome {
                Ok(()) => written.push(tier.backend.name().to_string()),
                Err(err) => lens_warn!(
                    "Cache tier {} rejected result ({} bytes): {}",
                    tier.backend.name(),
                    payload.len(),
                    err
                ),
            }
        }

        if written.is_empty() {
            lens_warn!("Result was not cached in any tier");
            return;
        }
        lens_info!(
            "Cached result for {} in [{}] until {}",
            origin_url,
            written.join(", "),
            expires_at
        );
        let _ = self.events.send(CacheEvent::Saved {
            origin_url,
            expires_at_millis: expires_at,
            tiers: written,
        });
    }

    /// First usable payload in tier order, or `None`. Never fails.
    pub fn load(&self) -> Option<AnalysisResult> {
        let now = self.clock.now_millis();
        let ttl = duration_millis(self.settings.ttl);
        self.tiers.iter().find_map(|tier| match tier.expiry {
            TierExpiry::Enforced => {
                read_durable(tier.backend.as_ref(), now, ttl).map(|entry| entry.payload)
            }
            TierExpiry::Session => read_payload(tier.backend.as_ref()),
        })
    }

    /// Full entry from the first durable tier holding an unexpired copy.
    pub fn entry(&self) -> Option<CacheEntry> {
        let now = self.clock.now_millis();
        let ttl = duration_millis(self.settings.ttl);
        self.tiers
            .iter()
            .filter(|tier| tier.expiry == TierExpiry::Enforced)
            .find_map(|tier| read_durable(tier.backend.as_ref(), now, ttl))
    }

    /// Removes the result from every tier. Idempotent.
    pub fn clear(&self) {
        for tier in &self.tiers {
            let keys: &[&str] = match tier.expiry {
                TierExpiry::Enforced => &[DATA_KEY, EXPIRY_KEY, ORIGIN_KEY],
                TierExpiry::Session => &[DATA_KEY],
            };
            for key in keys {
                if let Err(err) = tier.backend.remove(key) {
                    lens_warn!(
                        "Failed to remove {} from cache tier {}: {}",
                        key,
                        tier.backend.name(),
                        err
                    );
                }
            }
        }
        lens_debug!("Cleared cached result");
        let _ = self.events.send(CacheEvent::Cleared);
    }
}

/// Writes all durable keys; the expiry goes last so a partial write is never valid.
/// On failure the tier is emptied so an older copy cannot shadow the new one.
fn write_durable(
    backend: &dyn StorageBackend,
    payload: &str,
    expires_at: i64,
    origin_url: &str,
) -> Result<(), StorageError> {
    let outcome = backend
        .set(DATA_KEY, payload)
        .and_then(|()| backend.set(ORIGIN_KEY, origin_url))
        .and_then(|()| backend.set(EXPIRY_KEY, &expires_at.to_string()));
    if outcome.is_err() {
        for key in [EXPIRY_KEY, DATA_KEY, ORIGIN_KEY] {
            let _ = backend.remove(key);
        }
    }
    outcome
}

/// A session copy that cannot be replaced is dropped rather than left stale.
fn write_session(backend: &dyn StorageBackend, payload: &str) -> Result<(), StorageError> {
    let outcome = backend.set(DATA_KEY, payload);
    if outcome.is_err() {
        let _ = backend.remove(DATA_KEY);
    }
    outcome
}

fn read_durable(backend: &dyn StorageBackend, now: i64, ttl: i64) -> Option<CacheEntry> {
    let expires_at = match backend.get(EXPIRY_KEY) {
        Ok(Some(raw)) => match raw.trim().parse::<i64>() {
            Ok(value) => value,
            Err(err) => {
                lens_warn!(
                    "Ignoring cache tier {}: bad expiry {:?}: {}",
                    backend.name(),
                    raw,
                    err
                );
                return None;
            }
        },
        Ok(None) => return None,
        Err(err) => {
            lens_warn!("Cache tier {} unreadable: {}", backend.name(), err);
            return None;
        }
    };
    let payload = read_payload(backend)?;
    let origin_url = backend.get(ORIGIN_KEY).ok().flatten().unwrap_or_default();
    let entry = CacheEntry {
        payload,
        saved_at_millis: expires_at.saturating_sub(ttl),
        expires_at_millis: expires_at,
        origin_url,
    };
    if !entry.is_valid_at(now) {
        lens_debug!("Cache tier {} holds an expired result", backend.name());
        return None;
    }
    Some(entry)
}

fn read_payload(backend: &dyn StorageBackend) -> Option<AnalysisResult> {
    let raw = match backend.get(DATA_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            lens_warn!("Cache tier {} unreadable: {}", backend.name(), err);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(result) => Some(result),
        Err(err) => {
            lens_warn!(
                "Ignoring malformed result in cache tier {}: {}",
                backend.name(),
                err
            );
            None
        }
    }
}
