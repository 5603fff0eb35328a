use serde::{Deserialize, Serialize};

use crate::models::DataType;

/// Static description of a provider: what it serves and how much of it.
///
/// Built at start-up from configuration plus the adapter's capabilities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: String,
    /// Data types the provider serves, in the order it is best at them.
    pub data_types: Vec<DataType>,
    pub daily_limit: u32,
    pub minute_limit: Option<u32>,
    pub enabled: bool,
    pub has_credential: bool,
    /// Maximum symbols per quote call.
    pub batch_size: usize,
    /// Relative cost of one call, used when ranking batch providers.
    pub cost_per_call: f64,
    /// Synthetic providers serve batches only when no real provider qualifies.
    #[serde(default)]
    pub synthetic: bool,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, data_types: &[DataType], daily_limit: u32) -> Self {
        Self {
            id: id.into(),
            data_types: data_types.to_vec(),
            daily_limit,
            minute_limit: None,
            enabled: true,
            has_credential: true,
            batch_size: 1,
            cost_per_call: 1.0,
            synthetic: false,
        }
    }

    pub fn minute_limit(mut self, limit: u32) -> Self {
        self.minute_limit = Some(limit);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn has_credential(mut self, has_credential: bool) -> Self {
        self.has_credential = has_credential;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }

    pub fn supports(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }

    /// Symbols one call may carry for `data_type`.
    pub fn batch_size_for(&self, data_type: DataType) -> usize {
        if data_type.is_quote_like() {
            self.batch_size.max(1)
        } else {
            1
        }
    }
}
