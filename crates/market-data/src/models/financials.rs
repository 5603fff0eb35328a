use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementPeriod {
    #[default]
    Annual,
    Quarterly,
}

/// One reporting period of an income/balance/cash-flow summary.
///
/// Providers fill what they have; values are in the statement currency.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialStatement {
    /// Fiscal period end (YYYY-MM-DD)
    pub fiscal_date: String,
    pub period: StatementPeriod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gross_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_assets: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_liabilities: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_cash_flow: Option<f64>,
}

/// Financial statements for a symbol, newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub symbol: String,
    pub currency: String,
    pub statements: Vec<FinancialStatement>,
}

impl Financials {
    pub fn latest(&self) -> Option<&FinancialStatement> {
        self.statements.first()
    }
}
