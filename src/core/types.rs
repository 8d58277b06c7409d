use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ModelError, ModelResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Year(pub i32);

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Year {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits
            .parse::<i32>()
            .map(Year)
            .map_err(|_| format!("invalid year label {s:?}"))
    }
}

impl Serialize for Year {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.0)
    }
}

struct YearVisitor;

impl Visitor<'_> for YearVisitor {
    type Value = Year;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a year as an integer or a string starting with digits")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Year, E> {
        i32::try_from(v)
            .map(Year)
            .map_err(|_| E::custom(format!("year {v} out of range")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Year, E> {
        i32::try_from(v)
            .map(Year)
            .map_err(|_| E::custom(format!("year {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Year, E> {
        if v.fract() == 0.0 && v.abs() < i32::MAX as f64 {
            Ok(Year(v as i32))
        } else {
            Err(E::custom(format!("year {v} is not an integer")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Year, E> {
        v.parse::<Year>().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Year {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(YearVisitor)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItem {
    TotalRevenue,
    #[serde(alias = "revenue_gr")]
    RevenueGrowth,
    EconomicEarnings,
    EarningsMargin,
    #[serde(alias = "ic")]
    InvestedCapital,
    #[serde(alias = "ic_gr")]
    IcGrowth,
    #[serde(alias = "ic_chg")]
    IcChange,
    Aroic,
    #[serde(alias = "fcf")]
    FreeCashFlow,
    #[serde(alias = "fcf_gr")]
    FcfGrowth,
}

impl LineItem {
    pub const ALL: [LineItem; 10] = [
        LineItem::TotalRevenue,
        LineItem::RevenueGrowth,
        LineItem::EconomicEarnings,
        LineItem::EarningsMargin,
        LineItem::InvestedCapital,
        LineItem::IcGrowth,
        LineItem::IcChange,
        LineItem::Aroic,
        LineItem::FreeCashFlow,
        LineItem::FcfGrowth,
    ];

    pub const DRIVERS: [LineItem; 3] = [
        LineItem::RevenueGrowth,
        LineItem::EarningsMargin,
        LineItem::IcGrowth,
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        let item = match key.trim() {
            "total_revenue" => LineItem::TotalRevenue,
            "revenue_growth" | "revenue_gr" => LineItem::RevenueGrowth,
            "economic_earnings" => LineItem::EconomicEarnings,
            "earnings_margin" => LineItem::EarningsMargin,
            "invested_capital" | "ic" => LineItem::InvestedCapital,
            "ic_growth" | "ic_gr" => LineItem::IcGrowth,
            "ic_change" | "ic_chg" => LineItem::IcChange,
            "aroic" => LineItem::Aroic,
            "free_cash_flow" | "fcf" => LineItem::FreeCashFlow,
            "fcf_growth" | "fcf_gr" => LineItem::FcfGrowth,
            _ => return None,
        };
        Some(item)
    }

    pub fn is_driver(self) -> bool {
        Self::DRIVERS.contains(&self)
    }

    pub fn key(self) -> &'static str {
        match self {
            LineItem::TotalRevenue => "total_revenue",
            LineItem::RevenueGrowth => "revenue_growth",
            LineItem::EconomicEarnings => "economic_earnings",
            LineItem::EarningsMargin => "earnings_margin",
            LineItem::InvestedCapital => "invested_capital",
            LineItem::IcGrowth => "ic_growth",
            LineItem::IcChange => "ic_change",
            LineItem::Aroic => "aroic",
            LineItem::FreeCashFlow => "free_cash_flow",
            LineItem::FcfGrowth => "fcf_growth",
        }
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One line item across the ladder's years. Undefined cells (NaN) travel as
/// JSON `null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<f64>);

impl Row {
    pub fn zeros(len: usize) -> Self {
        Row(vec![0.0; len])
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|v| v.is_finite().then_some(*v)))
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(Row(cells
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect()))
    }
}

fn default_shareholder_ratio() -> f64 {
    100.0
}

fn default_interim_conversion() -> f64 {
    0.33
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationParameters {
    #[serde(default = "default_shareholder_ratio")]
    pub shareholder_ratio: f64,
    pub discount_rate: f64,
    #[serde(default)]
    pub total_debt: f64,
    #[serde(
        default,
        alias = "marketInvestment",
        deserialize_with = "lenient_amount"
    )]
    pub market_investments: f64,
    #[serde(alias = "marketCapitalization")]
    pub market_cap: f64,
    #[serde(default = "default_interim_conversion")]
    pub interim_conversion: f64,
    #[serde(default)]
    pub shares_outstanding: Option<f64>,
    #[serde(default)]
    pub current_share_price: Option<f64>,
}

impl ValuationParameters {
    pub fn validate(&self) -> ModelResult<()> {
        for (name, value) in [
            ("shareholderRatio", self.shareholder_ratio),
            ("discountRate", self.discount_rate),
            ("totalDebt", self.total_debt),
            ("marketInvestments", self.market_investments),
            ("marketCap", self.market_cap),
            ("interimConversion", self.interim_conversion),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::validation(format!(
                    "{name} must be a finite number >= 0"
                )));
            }
        }

        if self.shareholder_ratio > 100.0 {
            return Err(ModelError::validation(
                "shareholderRatio must be between 0 and 100",
            ));
        }

        if self.interim_conversion > 1.0 {
            return Err(ModelError::validation(
                "interimConversion must be between 0 and 1",
            ));
        }

        for (name, value) in [
            ("sharesOutstanding", self.shares_outstanding),
            ("currentSharePrice", self.current_share_price),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ModelError::validation(format!("{name} must be > 0")));
                }
            }
        }

        Ok(())
    }

    pub fn share_count(&self) -> Option<f64> {
        if let Some(shares) = self.shares_outstanding {
            return Some(shares);
        }
        self.current_share_price
            .filter(|price| *price > 0.0)
            .map(|price| self.market_cap / price)
            .filter(|shares| *shares > 0.0)
    }
}

fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("amount out of range")),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(0.0),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid amount {s:?}"))),
        other => Err(de::Error::custom(format!("invalid amount {other}"))),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationSource {
    Local,
    Remote,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseValue {
    pub source: ValuationSource,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub enterprise_value: EnterpriseValue,
    pub equity_value: f64,
    pub price_per_share: Option<f64>,
    pub upside: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityResult {
    pub source: ValuationSource,
    pub growth_axis: Vec<f64>,
    pub margin_axis: Vec<f64>,
    /// `None` where upside is undefined (zero market cap).
    pub matrix: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssumptionSet {
    #[serde(alias = "revenue_growth", alias = "revenue_gr")]
    pub revenue_growth: BTreeMap<Year, f64>,
    #[serde(alias = "earnings_margin")]
    pub earnings_margin: BTreeMap<Year, f64>,
    #[serde(alias = "ic_growth", alias = "ic_gr")]
    pub ic_growth: BTreeMap<Year, f64>,
}

impl AssumptionSet {
    pub fn driver(&self, item: LineItem) -> Option<&BTreeMap<Year, f64>> {
        match item {
            LineItem::RevenueGrowth => Some(&self.revenue_growth),
            LineItem::EarningsMargin => Some(&self.earnings_margin),
            LineItem::IcGrowth => Some(&self.ic_growth),
            _ => None,
        }
    }
}
