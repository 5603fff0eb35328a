//! Provider registry module.
//!
//! Bookkeeping the fallback router consults before every provider call:
//! - Provider descriptors (capabilities, limits, credentials)
//! - Quota tracking per provider with minute and daily windows
//! - Persistence of usage counters
//! - Circuit breaking for fault tolerance
//! - Skip diagnostics for a single fetch

mod circuit_breaker;
mod descriptor;
mod persistence;
mod quota;
mod skip_reason;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use descriptor::ProviderDescriptor;
pub use persistence::{
    JsonFileStore, MemoryStore, PersistentStore, UsageRecord, UsageSnapshot,
    DEFAULT_USAGE_NAMESPACE,
};
pub use quota::{QuotaStatus, QuotaTracker};
pub use skip_reason::{AttemptOutcome, FetchDiagnostics, ProviderAttempt, SkipReason};
