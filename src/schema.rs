//! Canonical customer schema: column vocabulary, aliases, defaults, and records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a segment produced by clustering
pub type SegmentId = usize;

/// Sentinel used for categorical columns missing from an upload
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Canonical column vocabulary.
///
/// Declaration order is significant: when an uploaded column name matches the
/// aliases of more than one canonical column, the first one declared wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "ID")]
    Id,
    Education,
    #[serde(rename = "Marital_Status")]
    MaritalStatus,
    Income,
    MntWines,
    MntFruits,
    MntMeatProducts,
    MntFishProducts,
    MntSweetProducts,
    MntGoldProds,
    NumWebPurchases,
    NumCatalogPurchases,
    NumStorePurchases,
    AcceptedCmp1,
    AcceptedCmp2,
    AcceptedCmp3,
    AcceptedCmp4,
    AcceptedCmp5,
}

impl Column {
    pub const ALL: [Column; 18] = [
        Column::Id,
        Column::Education,
        Column::MaritalStatus,
        Column::Income,
        Column::MntWines,
        Column::MntFruits,
        Column::MntMeatProducts,
        Column::MntFishProducts,
        Column::MntSweetProducts,
        Column::MntGoldProds,
        Column::NumWebPurchases,
        Column::NumCatalogPurchases,
        Column::NumStorePurchases,
        Column::AcceptedCmp1,
        Column::AcceptedCmp2,
        Column::AcceptedCmp3,
        Column::AcceptedCmp4,
        Column::AcceptedCmp5,
    ];

    /// Columns that must be present for a dataset to be accepted
    pub const REQUIRED: [Column; 3] = [Column::Income, Column::MntWines, Column::NumWebPurchases];

    /// The six spending categories summed into total spending
    pub const SPENDING: [Column; 6] = [
        Column::MntWines,
        Column::MntFruits,
        Column::MntMeatProducts,
        Column::MntFishProducts,
        Column::MntSweetProducts,
        Column::MntGoldProds,
    ];

    /// The five binary campaign acceptance flags
    pub const CAMPAIGNS: [Column; 5] = [
        Column::AcceptedCmp1,
        Column::AcceptedCmp2,
        Column::AcceptedCmp3,
        Column::AcceptedCmp4,
        Column::AcceptedCmp5,
    ];

    /// Canonical column name
    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::Education => "Education",
            Column::MaritalStatus => "Marital_Status",
            Column::Income => "Income",
            Column::MntWines => "MntWines",
            Column::MntFruits => "MntFruits",
            Column::MntMeatProducts => "MntMeatProducts",
            Column::MntFishProducts => "MntFishProducts",
            Column::MntSweetProducts => "MntSweetProducts",
            Column::MntGoldProds => "MntGoldProds",
            Column::NumWebPurchases => "NumWebPurchases",
            Column::NumCatalogPurchases => "NumCatalogPurchases",
            Column::NumStorePurchases => "NumStorePurchases",
            Column::AcceptedCmp1 => "AcceptedCmp1",
            Column::AcceptedCmp2 => "AcceptedCmp2",
            Column::AcceptedCmp3 => "AcceptedCmp3",
            Column::AcceptedCmp4 => "AcceptedCmp4",
            Column::AcceptedCmp5 => "AcceptedCmp5",
        }
    }

    /// Accepted lowercase aliases, not including the lowercased canonical name
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Column::Id => &["id", "customer_id", "customerid", "cust_id"],
            Column::Education => &["education", "edu", "education_level"],
            Column::MaritalStatus => &["marital_status", "maritalstatus", "marital", "marriage_status"],
            Column::Income => &["income", "yearly_income", "annual_income", "salary"],
            Column::MntWines => &["mntwines", "mnt_wines", "wines", "wine_amount"],
            Column::MntFruits => &["mntfruits", "mnt_fruits", "fruits", "fruit_amount"],
            Column::MntMeatProducts => &["mntmeatproducts", "mnt_meat_products", "meat", "meat_amount"],
            Column::MntFishProducts => &["mntfishproducts", "mnt_fish_products", "fish", "fish_amount"],
            Column::MntSweetProducts => &["mntsweetproducts", "mnt_sweet_products", "sweets", "sweet_amount"],
            Column::MntGoldProds => &["mntgoldprods", "mnt_gold_prods", "gold", "gold_amount"],
            Column::NumWebPurchases => &["numwebpurchases", "num_web_purchases", "web_purchases", "online_purchases"],
            Column::NumCatalogPurchases => &["numcatalogpurchases", "num_catalog_purchases", "catalog_purchases"],
            Column::NumStorePurchases => &["numstorepurchases", "num_store_purchases", "store_purchases"],
            Column::AcceptedCmp1 => &["acceptedcmp1", "accepted_cmp1", "campaign1", "cmp1"],
            Column::AcceptedCmp2 => &["acceptedcmp2", "accepted_cmp2", "campaign2", "cmp2"],
            Column::AcceptedCmp3 => &["acceptedcmp3", "accepted_cmp3", "campaign3", "cmp3"],
            Column::AcceptedCmp4 => &["acceptedcmp4", "accepted_cmp4", "campaign4", "cmp4"],
            Column::AcceptedCmp5 => &["acceptedcmp5", "accepted_cmp5", "campaign5", "cmp5"],
        }
    }

    /// Whether `candidate` (already trimmed and lowercased) names this column
    pub fn matches(self, candidate: &str) -> bool {
        self.name().eq_ignore_ascii_case(candidate) || self.aliases().contains(&candidate)
    }

    /// Resolve a raw column name against the vocabulary, first match wins
    pub fn resolve(raw: &str) -> Option<Column> {
        let normalized = raw.trim().to_lowercase();
        Column::ALL.into_iter().find(|column| column.matches(&normalized))
    }

    pub fn is_required(self) -> bool {
        Column::REQUIRED.contains(&self)
    }

    /// Whether values in this column are read as numbers
    pub fn is_numeric(self) -> bool {
        !matches!(self, Column::Id | Column::Education | Column::MaritalStatus)
    }

    /// Value filled in when the column is absent from an uploaded row.
    ///
    /// Required columns and the identifier have no default.
    pub fn default_value(self) -> Option<FieldValue> {
        match self {
            Column::Id => None,
            c if c.is_required() => None,
            Column::Education | Column::MaritalStatus => Some(FieldValue::Text(UNKNOWN_CATEGORY.to_string())),
            _ => Some(FieldValue::Number(0.0)),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value as produced by a dataset source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view of the value; null or unparseable text counts as 0.
    ///
    /// Non-finite numbers are passed through unchanged.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Null => 0.0,
            FieldValue::Number(n) => *n,
            FieldValue::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    /// Finite numeric reading of the value, if it has one
    pub fn to_number(&self) -> Option<f64> {
        let number = match self {
            FieldValue::Null => return None,
            FieldValue::Number(n) => *n,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        number.is_finite().then_some(number)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Customer attributes keyed by canonical column
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord(BTreeMap<Column, FieldValue>);

impl CanonicalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: Column, value: impl Into<FieldValue>) {
        self.0.insert(column, value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: Column) -> Option<&FieldValue> {
        self.0.get(&column)
    }

    pub fn contains(&self, column: Column) -> bool {
        self.0.contains_key(&column)
    }

    /// Numeric value of a column, missing or null counts as 0
    pub fn number(&self, column: Column) -> f64 {
        self.0.get(&column).map(FieldValue::as_f64).unwrap_or(0.0)
    }

    pub fn text(&self, column: Column) -> Option<String> {
        self.0.get(&column).and_then(FieldValue::as_text)
    }

    pub fn total_spending(&self) -> f64 {
        Column::SPENDING.iter().map(|&c| self.number(c)).sum()
    }

    pub fn total_campaigns(&self) -> f64 {
        Column::CAMPAIGNS.iter().map(|&c| self.number(c)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Column, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Column, FieldValue)> for CanonicalRecord {
    fn from_iter<I: IntoIterator<Item = (Column, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A stored customer with an optional segment label from the last clustering run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub record: CanonicalRecord,
    #[serde(default)]
    pub segment: Option<SegmentId>,
}

impl Customer {
    /// Wrap a canonical record, taking the id from its ID column when present
    pub fn from_record(record: CanonicalRecord) -> Self {
        let id = record
            .text(Column::Id)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            id,
            record,
            segment: None,
        }
    }
}

/// Conditions for customer queries; every set condition must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerFilter {
    pub segment: Option<SegmentId>,
    /// Matched case-insensitively
    pub marital_status: Option<String>,
    /// Matched case-insensitively
    pub education: Option<String>,
    pub min_income: Option<f64>,
    pub max_income: Option<f64>,
}

impl CustomerFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        let text_matches = |column: Column, wanted: &Option<String>| match wanted {
            Some(wanted) => customer
                .record
                .text(column)
                .is_some_and(|value| value.trim().eq_ignore_ascii_case(wanted.trim())),
            None => true,
        };
        let income = customer.record.number(Column::Income);

        self.segment.map_or(true, |segment| customer.segment == Some(segment))
            && text_matches(Column::MaritalStatus, &self.marital_status)
            && text_matches(Column::Education, &self.education)
            && self.min_income.map_or(true, |min| income >= min)
            && self.max_income.map_or(true, |max| income <= max)
    }
}
