//! Structured cost queries: `{key, value, operator}` filters, paging and sort.
//!
//! The same [`CostQuery`] is evaluated in memory by [`CostQuery::matches`]
//! and translated to SQL by the PostgreSQL store, so both backends agree on
//! filter semantics.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{parse_timestamp, CostRecord};

/// Comparison operator of a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Not,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Not => "IS DISTINCT FROM",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Not => ord != Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Gte => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Lte => ord != Ordering::Greater,
        }
    }
}

/// Filter operand.
///
/// JSON strings always decode as `Text`; [`Filter::typed_value`] converts
/// them for timestamp and numeric columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(dt)
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

/// Filterable cost record columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostField {
    CostId,
    JobId,
    JobTaskId,
    DataSourceId,
    DomainId,
    OriginalCost,
    OriginalCurrency,
    UsageQuantity,
    Provider,
    RegionCode,
    Product,
    Account,
    UsageType,
    Resource,
    BilledAt,
    CreatedAt,
}

impl CostField {
    /// Column name in the `costs` table (identical to the JSON key).
    pub fn column(&self) -> &'static str {
        match self {
            CostField::CostId => "cost_id",
            CostField::JobId => "job_id",
            CostField::JobTaskId => "job_task_id",
            CostField::DataSourceId => "data_source_id",
            CostField::DomainId => "domain_id",
            CostField::OriginalCost => "original_cost",
            CostField::OriginalCurrency => "original_currency",
            CostField::UsageQuantity => "usage_quantity",
            CostField::Provider => "provider",
            CostField::RegionCode => "region_code",
            CostField::Product => "product",
            CostField::Account => "account",
            CostField::UsageType => "usage_type",
            CostField::Resource => "resource",
            CostField::BilledAt => "billed_at",
            CostField::CreatedAt => "created_at",
        }
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, CostField::BilledAt | CostField::CreatedAt)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CostField::OriginalCost | CostField::UsageQuantity)
    }
}

impl FromStr for CostField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "cost_id" => CostField::CostId,
            "job_id" => CostField::JobId,
            "job_task_id" => CostField::JobTaskId,
            "data_source_id" => CostField::DataSourceId,
            "domain_id" => CostField::DomainId,
            "original_cost" => CostField::OriginalCost,
            "original_currency" => CostField::OriginalCurrency,
            "usage_quantity" => CostField::UsageQuantity,
            "provider" => CostField::Provider,
            "region_code" => CostField::RegionCode,
            "product" => CostField::Product,
            "account" => CostField::Account,
            "usage_type" => CostField::UsageType,
            "resource" => CostField::Resource,
            "billed_at" => CostField::BilledAt,
            "created_at" => CostField::CreatedAt,
            other => return Err(CoreError::UnknownField(other.to_string())),
        };
        Ok(field)
    }
}

impl fmt::Display for CostField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Borrowed view of a record's field for comparison.
enum FieldRef<'a> {
    Text(&'a str),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Missing,
}

fn field_ref(record: &CostRecord, field: CostField) -> FieldRef<'_> {
    fn opt_text(v: &Option<String>) -> FieldRef<'_> {
        v.as_deref().map(FieldRef::Text).unwrap_or(FieldRef::Missing)
    }
    match field {
        CostField::CostId => FieldRef::Text(&record.cost_id),
        CostField::JobId => FieldRef::Text(&record.job_id),
        CostField::JobTaskId => FieldRef::Text(&record.job_task_id),
        CostField::DataSourceId => FieldRef::Text(&record.data_source_id),
        CostField::DomainId => FieldRef::Text(&record.domain_id),
        CostField::OriginalCost => FieldRef::Number(record.original_cost),
        CostField::OriginalCurrency => FieldRef::Text(&record.original_currency),
        CostField::UsageQuantity => record
            .usage_quantity
            .map(FieldRef::Number)
            .unwrap_or(FieldRef::Missing),
        CostField::Provider => opt_text(&record.provider),
        CostField::RegionCode => opt_text(&record.region_code),
        CostField::Product => opt_text(&record.product),
        CostField::Account => opt_text(&record.account),
        CostField::UsageType => opt_text(&record.usage_type),
        CostField::Resource => opt_text(&record.resource),
        CostField::BilledAt => FieldRef::Timestamp(record.billed_at),
        CostField::CreatedAt => FieldRef::Timestamp(record.created_at),
    }
}

/// One `{k, v, o}` filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "k", alias = "key")]
    pub key: String,
    #[serde(rename = "v", alias = "value")]
    pub value: FilterValue,
    #[serde(rename = "o", alias = "operator", default = "default_operator")]
    pub operator: Operator,
}

fn default_operator() -> Operator {
    Operator::Eq
}

impl Filter {
    pub fn new(key: impl Into<String>, value: impl Into<FilterValue>, operator: Operator) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operator,
        }
    }

    pub fn field(&self) -> Result<CostField, CoreError> {
        self.key.parse()
    }

    /// Operand coerced to the column's type (e.g. RFC 3339 text for `billed_at`).
    pub fn typed_value(&self) -> Result<FilterValue, CoreError> {
        let field = self.field()?;
        match (&self.value, field) {
            (FilterValue::Text(s), f) if f.is_timestamp() => parse_timestamp(s).map(FilterValue::Timestamp),
            (FilterValue::Text(s), f) if f.is_numeric() => s
                .parse::<f64>()
                .map(FilterValue::Number)
                .map_err(|_| CoreError::Validation(format!("filter '{}' expects a number, got '{}'", self.key, s))),
            (FilterValue::Timestamp(_), f) if !f.is_timestamp() => Err(CoreError::Validation(format!(
                "filter '{}' does not accept a timestamp",
                self.key
            ))),
            (FilterValue::Number(_), f) if !f.is_numeric() => Err(CoreError::Validation(format!(
                "filter '{}' does not accept a number",
                self.key
            ))),
            (value, _) => Ok(value.clone()),
        }
    }

    /// Evaluate against a record. Missing optional fields only satisfy `not`.
    pub fn matches(&self, record: &CostRecord) -> Result<bool, CoreError> {
        let field = self.field()?;
        let value = self.typed_value()?;
        let ord = match (field_ref(record, field), &value) {
            (FieldRef::Missing, _) => return Ok(self.operator == Operator::Not),
            (FieldRef::Text(a), FilterValue::Text(b)) => a.cmp(b.as_str()),
            (FieldRef::Number(a), FilterValue::Number(b)) => match a.partial_cmp(b) {
                Some(o) => o,
                None => return Ok(self.operator == Operator::Not),
            },
            (FieldRef::Timestamp(a), FilterValue::Timestamp(b)) => a.cmp(b),
            _ => {
                return Err(CoreError::Validation(format!(
                    "filter '{}' operand type does not match the column",
                    self.key
                )))
            }
        };
        Ok(self.operator.accepts(ord))
    }
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub start: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: String,
    #[serde(default)]
    pub desc: bool,
}

/// Conjunction of filters with optional paging and sort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostQuery {
    #[serde(default)]
    pub filter: Vec<Filter>,
    #[serde(default)]
    pub page: Option<Page>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

impl CostQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>, operator: Operator) -> Self {
        self.filter.push(Filter::new(key, value, operator));
        self
    }

    pub fn eq(self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.with(key, value, Operator::Eq)
    }

    pub fn not(self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.with(key, value, Operator::Not)
    }

    pub fn gte(self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.with(key, value, Operator::Gte)
    }

    pub fn page(mut self, start: usize, limit: usize) -> Self {
        self.page = Some(Page { start, limit });
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, desc: bool) -> Self {
        self.sort = Some(Sort { key: key.into(), desc });
        self
    }

    /// Fail early on unknown keys or mistyped operands.
    pub fn validate(&self) -> Result<(), CoreError> {
        for f in &self.filter {
            f.typed_value()?;
        }
        if let Some(sort) = &self.sort {
            sort.key.parse::<CostField>()?;
        }
        if let Some(page) = &self.page {
            if page.start == 0 || page.limit == 0 {
                return Err(CoreError::Validation("page start and limit must be >= 1".into()));
            }
        }
        Ok(())
    }

    /// Whether a record satisfies every filter.
    pub fn matches(&self, record: &CostRecord) -> Result<bool, CoreError> {
        for f in &self.filter {
            if !f.matches(record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Order two records by the sort key (`created_at` ascending by default).
    pub fn compare(&self, a: &CostRecord, b: &CostRecord) -> Ordering {
        let (field, desc) = match &self.sort {
            Some(sort) => (sort.key.parse().unwrap_or(CostField::CreatedAt), sort.desc),
            None => (CostField::CreatedAt, false),
        };
        let ord = match (field_ref(a, field), field_ref(b, field)) {
            (FieldRef::Text(x), FieldRef::Text(y)) => x.cmp(y),
            (FieldRef::Number(x), FieldRef::Number(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (FieldRef::Timestamp(x), FieldRef::Timestamp(y)) => x.cmp(&y),
            (FieldRef::Missing, FieldRef::Missing) => Ordering::Equal,
            (FieldRef::Missing, _) => Ordering::Less,
            (_, FieldRef::Missing) => Ordering::Greater,
            _ => Ordering::Equal,
        };
        if desc {
            ord.reverse()
        } else {
            ord
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
