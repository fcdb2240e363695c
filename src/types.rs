// src/types.rs
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shares represented by one option contract.
pub const OPTION_MULTIPLIER: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "OPT")]
    Option,
    #[serde(other)]
    Other,
}

impl SecurityType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Stock => "STK",
            Self::Option => "OPT",
            Self::Other => "?",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identity of an instrument inside one cycle. Stock and option legs of the
/// same underlying share `symbol` and differ by `sec_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractKey {
    pub symbol: String,
    pub sec_type: SecurityType,
}

impl ContractKey {
    pub fn new(symbol: impl Into<String>, sec_type: SecurityType) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type,
        }
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.sec_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

fn default_exchange() -> String {
    "SMART".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// A fully specified contract as the broker reports it (positions) or needs it
/// (market data, orders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub sec_type: SecurityType,
    #[serde(default)]
    pub con_id: Option<i64>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub right: Option<OptionRight>,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Contract {
    pub fn stock(symbol: &str, exchange: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::Stock,
            con_id: None,
            expiry: None,
            strike: None,
            right: None,
            exchange: exchange.to_string(),
            currency: currency.to_string(),
        }
    }

    pub fn option(symbol: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::Option,
            con_id: None,
            expiry: Some(expiry),
            strike: Some(strike),
            right: Some(right),
            exchange: default_exchange(),
            currency: default_currency(),
        }
    }

    pub fn key(&self) -> ContractKey {
        ContractKey::new(self.symbol.clone(), self.sec_type)
    }

    /// Human-readable description (e.g., "NVDA 140C 2026-03-20", "NVDA STK").
    pub fn display_name(&self) -> String {
        match (self.strike, self.right, self.expiry) {
            (Some(strike), Some(right), Some(expiry)) => {
                format!("{} {}{} {}", self.symbol, strike, right, expiry)
            }
            _ => format!("{} {}", self.symbol, self.sec_type),
        }
    }
}

/// One decoded position record, for any account the session can see.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub account: String,
    pub contract: Contract,
    /// Signed: long positive, short negative.
    pub quantity: i64,
}

/// Basis of an option computation tick. Only `Last` is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickType {
    Bid,
    Ask,
    Last,
    Model,
}

/// An accepted delta for the option leg at `sequence`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GreekSample {
    pub sequence: usize,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionLeg {
    pub contract: Contract,
    pub held_quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAggregate {
    pub symbol: String,
    pub current_stock_quantity: i64,
    /// Sum of `delta × held_quantity` over the symbol's option legs.
    pub delta_weighted_quantity: Decimal,
    pub option_legs: usize,
    pub target_stock_quantity: i64,
}

impl SymbolAggregate {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            current_stock_quantity: 0,
            delta_weighted_quantity: Decimal::ZERO,
            option_legs: 0,
            target_stock_quantity: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn action(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// A hedge adjustment for one symbol. Quantity is always positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
}

/// An intent bound to the broker order id it was submitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub intent: OrderIntent,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

impl OrderType {
    pub fn code(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValue {
    pub tag: String,
    pub value: String,
}

/// Venue execution-algorithm annotation. Passed through to the broker untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoHint {
    pub strategy: String,
    pub params: Vec<TagValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub account: String,
    pub order_type: OrderType,
    pub action: Side,
    pub quantity: u64,
    pub algo: AlgoHint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    #[test]
    fn test_contract_key_equality_is_structural() {
        let a = ContractKey::new(String::from("ABC"), SecurityType::Stock);
        let b = ContractKey::new("ABC", SecurityType::Stock);
        let c = ContractKey::new("ABC", SecurityType::Option);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<ContractKey> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_option_display_name() {
        let expiry = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let opt = Contract::option("nvda", expiry, dec!(140), OptionRight::Call);
        assert_eq!(opt.display_name(), "NVDA 140C 2026-03-20");

        let stk = Contract::stock("nvda", "SMART", "USD");
        assert_eq!(stk.display_name(), "NVDA STK");
        assert_eq!(stk.key(), ContractKey::new("NVDA", SecurityType::Stock));
        assert_eq!(stk.key().to_string(), "NVDA:STK");
        assert_ne!(stk.key(), opt.key());
    }

    #[test]
    fn test_market_order_code() {
        assert_eq!(OrderType::Market.code(), "MKT");
    }
}
