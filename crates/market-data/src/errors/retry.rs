/// How the router treats a provider failure.
///
/// | Class                 | Keep walking? | Breaker failure? |
/// |-----------------------|---------------|------------------|
/// | `Never`               | no            | no               |
/// | `FailoverWithPenalty` | yes           | yes              |
/// | `NextProvider`        | yes           | no               |
/// | `CircuitOpen`         | yes           | no               |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// The request itself is invalid; no other provider will do better.
    Never,

    /// Throttling, quota, timeouts and upstream errors.
    FailoverWithPenalty,

    /// This provider cannot serve the request but is otherwise healthy.
    NextProvider,

    /// Skipped by its breaker; nothing new to record.
    CircuitOpen,
}

impl RetryClass {
    /// Whether the walk should stop at this failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// Whether the failure counts toward tripping the provider's breaker.
    pub fn penalizes(&self) -> bool {
        matches!(self, Self::FailoverWithPenalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_failover_penalizes() {
        assert!(RetryClass::FailoverWithPenalty.penalizes());
        assert!(!RetryClass::NextProvider.penalizes());
        assert!(!RetryClass::CircuitOpen.penalizes());
        assert!(RetryClass::Never.is_terminal());
        assert!(!RetryClass::FailoverWithPenalty.is_terminal());
    }
}
