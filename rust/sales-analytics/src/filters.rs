//! Global filter contract shared by every aggregation endpoint, and the
//! predicate builder that turns it into positional SQL.

use crate::{
    error::{Result, ServiceError},
    query::SqlBindValue,
};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";
const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// Raw query-string shape. Every field is optional here so a missing date can
/// be reported as a validation error instead of an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub product_category: Option<String>,
    #[serde(default)]
    pub marketing_channel: Option<String>,
    #[serde(default)]
    pub customer_segment: Option<String>,
}

/// Half-open calendar window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// The window of identical length ending where this one starts. Clamped
    /// to the earliest representable date instead of overflowing.
    pub fn preceding(&self) -> DateWindow {
        let span = self.end.signed_duration_since(self.start);
        DateWindow {
            start: self
                .start
                .checked_sub_signed(span)
                .unwrap_or(NaiveDate::MIN),
            end: self.start,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    pub window: DateWindow,
    pub country: Option<String>,
    pub product_category: Option<String>,
    pub marketing_channel: Option<String>,
    pub customer_segment: Option<String>,
}

/// The closed set of optional equality filters, in predicate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Country,
    ProductCategory,
    MarketingChannel,
    CustomerSegment,
}

impl FilterField {
    pub const ALL: [FilterField; 4] = [
        FilterField::Country,
        FilterField::ProductCategory,
        FilterField::MarketingChannel,
        FilterField::CustomerSegment,
    ];

    pub fn column(self) -> &'static str {
        match self {
            FilterField::Country => "country",
            FilterField::ProductCategory => "product_category",
            FilterField::MarketingChannel => "marketing_channel",
            FilterField::CustomerSegment => "customer_segment",
        }
    }

    pub fn param_name(self) -> &'static str {
        match self {
            FilterField::Country => "country",
            FilterField::ProductCategory => "productCategory",
            FilterField::MarketingChannel => "marketingChannel",
            FilterField::CustomerSegment => "customerSegment",
        }
    }
}

impl FilterSet {
    pub fn from_query(query: FilterQuery) -> Result<Self> {
        let (Some(start), Some(end)) = (present(query.start_date), present(query.end_date)) else {
            return Err(ServiceError::InvalidRequest(
                "startDate and endDate are required".into(),
            ));
        };

        Ok(Self {
            window: DateWindow {
                start: parse_date("startDate", &start)?,
                end: parse_date("endDate", &end)?,
            },
            country: present(query.country),
            product_category: present(query.product_category),
            marketing_channel: present(query.marketing_channel),
            customer_segment: present(query.customer_segment),
        })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.window.start
    }

    pub fn end_date(&self) -> NaiveDate {
        self.window.end
    }

    pub fn value(&self, field: FilterField) -> Option<&str> {
        match field {
            FilterField::Country => self.country.as_deref(),
            FilterField::ProductCategory => self.product_category.as_deref(),
            FilterField::MarketingChannel => self.marketing_channel.as_deref(),
            FilterField::CustomerSegment => self.customer_segment.as_deref(),
        }
    }

    /// Same categorical filters over a different window.
    pub fn with_window(&self, window: DateWindow) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }

    /// Canonical parameter map used for cache keys. Sorted by name, absent
    /// filters omitted.
    pub fn cache_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("startDate", format_date(self.window.start));
        params.insert("endDate", format_date(self.window.end));
        for field in FilterField::ALL {
            if let Some(value) = self.value(field) {
                params.insert(field.param_name(), value.to_string());
            }
        }
        params
    }
}

/// Positional predicate for one aggregation statement. `$1`/`$2` are always
/// the window bounds; optional filters follow from `$3` with no gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    window: DateWindow,
    fragment: String,
    values: Vec<String>,
}

impl Predicate {
    /// `AND <column> = $n` clauses, or empty when no filter applies.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn filter_values(&self) -> &[String] {
        &self.values
    }

    /// Placeholder index the next appended bind must use.
    pub fn next_placeholder(&self) -> usize {
        self.values.len() + 3
    }

    pub fn bind_values(&self) -> Vec<SqlBindValue> {
        let mut binds = Vec::with_capacity(self.values.len() + 2);
        binds.push(SqlBindValue::Date(self.window.start));
        binds.push(SqlBindValue::Date(self.window.end));
        binds.extend(self.values.iter().cloned().map(SqlBindValue::Text));
        binds
    }
}

/// Builds the predicate for `filters`, skipping the fields in `excluded`
/// (the grouping dimension of the calling query).
pub fn build_predicate(filters: &FilterSet, excluded: &[FilterField]) -> Predicate {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    for field in FilterField::ALL {
        if excluded.contains(&field) {
            continue;
        }
        if let Some(value) = filters.value(field) {
            values.push(value.to_string());
            clauses.push(format!("{} = ${}", field.column(), values.len() + 2));
        }
    }

    let fragment = if clauses.is_empty() {
        String::new()
    } else {
        format!("AND {}", clauses.join(" AND "))
    };

    Predicate {
        window: filters.window,
        fragment,
        values,
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(name: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .filter(|date| (MIN_YEAR..=MAX_YEAR).contains(&date.year()))
        .ok_or_else(|| {
            ServiceError::InvalidRequest(format!("{name} must be a date in YYYY-MM-DD format"))
        })
}

fn present(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
