//! Per-walk record of which providers were skipped, failed or answered.

use std::fmt;

use serde::Serialize;

use crate::models::ProviderId;

/// Why the router passed over a provider without calling it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Listed in the strategy but no adapter is registered.
    NotRegistered,
    UnsupportedDataType,
    Disabled,
    /// Provider needs an API key and none is configured.
    MissingCredential,
    /// Minute or daily window used up.
    QuotaExhausted,
    CircuitOpen,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRegistered => "not registered",
            Self::UnsupportedDataType => "unsupported data type",
            Self::Disabled => "disabled",
            Self::MissingCredential => "missing credential",
            Self::QuotaExhausted => "quota exhausted",
            Self::CircuitOpen => "circuit open",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Skipped { reason: SkipReason },
    Failed { error: String },
    Succeeded,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Attempts in strategy order for one routed request.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, provider_id: ProviderId, outcome: AttemptOutcome) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome,
        });
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.push(provider_id, AttemptOutcome::Skipped { reason });
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: String) {
        self.push(provider_id, AttemptOutcome::Failed { error });
    }

    pub fn record_success(&mut self, provider_id: ProviderId) {
        self.push(provider_id, AttemptOutcome::Succeeded);
    }

    /// One line such as `finnhub skipped (circuit open) -> mock ok`.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers in strategy".to_string();
        }
        self.attempts
            .iter()
            .map(|a| match &a.outcome {
                AttemptOutcome::Skipped { reason } => {
                    format!("{} skipped ({})", a.provider_id, reason)
                }
                AttemptOutcome::Failed { error } => format!("{} failed ({})", a.provider_id, error),
                AttemptOutcome::Succeeded => format!("{} ok", a.provider_id),
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// True when no provider was called at all.
    pub fn all_skipped(&self) -> bool {
        self.attempts
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::Skipped { .. }))
    }

    /// Providers that were called, in order.
    pub fn called(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| !matches!(a.outcome, AttemptOutcome::Skipped { .. }))
            .map(|a| a.provider_id.as_ref())
            .collect()
    }
}
