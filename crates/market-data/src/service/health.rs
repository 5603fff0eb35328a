use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{CircuitState, QuotaStatus};
use crate::router::FallbackRouter;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every configured real provider is closed and has quota.
    Healthy,
    /// Some real provider is still usable.
    Degraded,
    /// Only synthetic data is being served.
    Fallback,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub enabled: bool,
    pub has_credential: bool,
    pub synthetic: bool,
    pub circuit: CircuitState,
    pub failure_count: u32,
    pub average_latency_ms: u64,
    pub quota: Option<QuotaStatus>,
    /// Whether the router would try this provider right now.
    pub available: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub generated_at: DateTime<Utc>,
    pub providers: Vec<ProviderHealth>,
    pub queue_depth: usize,
    pub pending_batches: usize,
}

impl HealthReport {
    pub fn collect(
        router: &FallbackRouter,
        queue_depth: usize,
        pending_batches: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let breaker = router.breaker();
        let quota = router.quota();
        // Applies any due Open -> HalfOpen transitions first
        let metrics = breaker.metrics();

        let providers: Vec<ProviderHealth> = router
            .provider_ids()
            .into_iter()
            .filter_map(|id| {
                let descriptor = quota.descriptor(&id)?;
                let status = quota.status(&id);
                let circuit = breaker.state(&id);
                let (failure_count, average_latency_ms) = metrics
                    .iter()
                    .find(|m| m.provider == id)
                    .map(|m| (m.failure_count, m.average_latency_ms))
                    .unwrap_or((0, 0));
                let has_quota = status.as_ref().map_or(false, |s| s.remaining > 0);
                let available = descriptor.enabled
                    && descriptor.has_credential
                    && has_quota
                    && circuit != CircuitState::Open;
                Some(ProviderHealth {
                    provider: id,
                    enabled: descriptor.enabled,
                    has_credential: descriptor.has_credential,
                    synthetic: descriptor.synthetic,
                    circuit,
                    failure_count,
                    average_latency_ms,
                    quota: status,
                    available,
                })
            })
            .collect();

        let configured: Vec<&ProviderHealth> = providers
            .iter()
            .filter(|p| !p.synthetic && p.enabled && p.has_credential)
            .collect();
        let usable = configured.iter().filter(|p| p.available).count();
        let status = if usable == 0 {
            HealthStatus::Fallback
        } else if usable == configured.len()
            && configured.iter().all(|p| p.circuit == CircuitState::Closed)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            generated_at: now,
            providers,
            queue_depth,
            pending_batches,
        }
    }

    /// One-line form for the periodic log.
    pub fn summary(&self) -> String {
        let providers: Vec<String> = self
            .providers
            .iter()
            .map(|p| {
                let remaining = p
                    .quota
                    .as_ref()
                    .map(|q| q.remaining.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("{}={}/{}", p.provider, p.circuit, remaining)
            })
            .collect();
        format!(
            "{:?}: {} (queue {}, batches {})",
            self.status,
            providers.join(", "),
            self.queue_depth,
            self.pending_batches
        )
    }
}
