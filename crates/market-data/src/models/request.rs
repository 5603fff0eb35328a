use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_type::DataType;

/// Request priority. Ordered `Low < Medium < High < Critical`.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// One step lower, saturating at `Low`.
    pub fn degrade(self) -> Self {
        match self {
            Self::Critical => Self::High,
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

/// A caller's request for one symbol and data type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub symbol: String,
    pub data_type: DataType,
    #[serde(default)]
    pub priority: Priority,
    /// Oldest cached value the caller will accept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<Duration>,
    /// Whether synthetic data is acceptable when every real path fails.
    #[serde(default)]
    pub fallback_acceptable: bool,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, data_type: DataType) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            data_type,
            priority: Priority::default(),
            max_age: None,
            fallback_acceptable: false,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn fallback_acceptable(mut self, acceptable: bool) -> Self {
        self.fallback_acceptable = acceptable;
        self
    }

    pub fn cache_key(&self) -> String {
        self.data_type.cache_key(&self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_priority_degrade_saturates() {
        assert_eq!(Priority::Critical.degrade(), Priority::High);
        assert_eq!(Priority::Low.degrade(), Priority::Low);
    }

    #[test]
    fn test_request_builder() {
        let request = FetchRequest::new(" aapl ", DataType::Quote)
            .priority(Priority::High)
            .fallback_acceptable(true);

        assert_eq!(request.symbol, "AAPL");
        assert_eq!(request.priority, Priority::High);
        assert!(request.fallback_acceptable);
        assert_eq!(request.cache_key(), "quote:AAPL");
    }
}
