//! Response rows for the analytics endpoints.
//!
//! Field names serialize in camelCase, except the KPI summary and top-customer
//! rows which keep their snake_case column names. Every type also deserializes
//! so cached bodies can be decoded back into the same shape.

use crate::pagination::PaginationMeta;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, pagination: PaginationMeta) -> Self {
        Self { data, pagination }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Headline figures for the requested window compared with the window of the
/// same length immediately before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub revenue_current: f64,
    pub profit_current: f64,
    pub orders_current: i64,
    pub aov_current: Option<f64>,
    pub profit_margin_current: Option<f64>,
    pub revenue_delta_pct: Option<f64>,
    pub profit_delta_pct: Option<f64>,
    pub orders_delta_pct: Option<f64>,
    pub nps_pct_current: Option<f64>,
    pub nps_avg_score_current: Option<f64>,
    pub current_period: PeriodWindow,
    pub previous_period: PeriodWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRevenue {
    pub date: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRevenue {
    pub category: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub units: i64,
    pub avg_price: f64,
    pub margin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRevenue {
    pub customer_id: String,
    pub name: String,
    pub frequency: i64,
    pub monetary: f64,
    pub clv: f64,
}

/// Revenue for a `"Country - Region"` location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRevenue {
    pub location: String,
    pub revenue: f64,
    pub orders: i64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryRevenue {
    pub country: String,
    pub revenue: f64,
    pub orders: i64,
    pub profit: f64,
    pub revenue_share: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeRangeRevenue {
    pub age_range: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub avg_satisfaction: String,
    pub margin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenderRevenue {
    pub gender: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub avg_satisfaction: String,
    pub margin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuRevenue {
    pub sku: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub units: i64,
    pub avg_price: f64,
    pub margin: String,
}

/// One bucket of a fixed distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCount {
    pub range: String,
    pub count: i64,
}

pub type ClvBucket = RangeCount;
pub type NpsBucket = RangeCount;
pub type CsatBucket = RangeCount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub channel: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub abandonment: i64,
    pub abandonment_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPerformance {
    pub channel: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub abandonment: i64,
    pub abandonment_rate: String,
    pub aov: String,
    pub profit_margin: String,
    pub revenue_share: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingPerformance {
    pub location: String,
    pub revenue: f64,
    pub orders: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRetention {
    pub cohort: String,
    pub total_customers: i64,
    pub repeat_customers: i64,
    pub avg_orders_per_customer: String,
    pub retention_rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAffinity {
    pub pair: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountBucket {
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_discount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountImpact {
    pub with_discount: DiscountBucket,
    pub without_discount: DiscountBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalPerformance {
    pub country: String,
    pub region: String,
    pub orders: i64,
    pub revenue: f64,
    pub profit: f64,
    pub margin: String,
    pub customers_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionByCategory {
    pub category: String,
    #[serde(rename = "avgNPS")]
    pub avg_nps: String,
    #[serde(rename = "avgCSAT")]
    pub avg_csat: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodStats {
    pub method: String,
    pub orders: i64,
    pub revenue: f64,
    pub avg_transaction_value: String,
    pub success_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPerformance {
    pub segment: String,
    pub customers_count: i64,
    pub orders: i64,
    pub revenue: f64,
    #[serde(rename = "avgCLV")]
    pub avg_clv: String,
    pub margin: String,
}

/// Distinct values available for each optional filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFacets {
    pub countries: Vec<String>,
    pub categories: Vec<String>,
    pub channels: Vec<String>,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdate {
    pub last_updated: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn acronym_fields_keep_their_wire_names() {
        let row = SatisfactionByCategory {
            category: "Books".into(),
            avg_nps: "8.5".into(),
            avg_csat: "7.0".into(),
            revenue: 1200.0,
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!({"category": "Books", "avgNPS": "8.5", "avgCSAT": "7.0", "revenue": 1200.0})
        );
    }

    #[test]
    fn discount_average_is_omitted_for_undiscounted_orders() {
        let impact = DiscountImpact {
            with_discount: DiscountBucket {
                orders: 2,
                revenue: 300.0,
                profit: 40.0,
                avg_discount: Some("12.50".into()),
            },
            without_discount: DiscountBucket {
                orders: 1,
                revenue: 100.0,
                profit: 20.0,
                avg_discount: None,
            },
        };
        let value = serde_json::to_value(&impact).unwrap();
        assert_eq!(value["withDiscount"]["avgDiscount"], json!("12.50"));
        assert!(value["withoutDiscount"].get("avgDiscount").is_none());

        let decoded: DiscountImpact = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, impact);
    }

    #[test]
    fn kpi_and_customer_rows_keep_snake_case_names() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let summary = KpiSummary {
            revenue_current: 600.0,
            profit_current: 150.0,
            orders_current: 3,
            aov_current: Some(200.0),
            profit_margin_current: Some(0.25),
            revenue_delta_pct: Some(50.0),
            profit_delta_pct: None,
            orders_delta_pct: Some(200.0),
            nps_pct_current: None,
            nps_avg_score_current: None,
            current_period: PeriodWindow {
                start_date: day(1),
                end_date: day(31),
            },
            previous_period: PeriodWindow {
                start_date: day(1),
                end_date: day(1),
            },
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["revenue_delta_pct"], json!(50.0));
        assert_eq!(value["aov_current"], json!(200.0));
        assert_eq!(value["profit_delta_pct"], json!(null));
        assert_eq!(value["current_period"]["start_date"], json!("2024-01-01"));
        assert!(value.get("revenueDeltaPct").is_none());

        let customer = CustomerRevenue {
            customer_id: "C1".into(),
            name: "Ada Lovelace".into(),
            frequency: 2,
            monetary: 300.0,
            clv: 400.0,
        };
        assert_eq!(
            serde_json::to_value(&customer).unwrap(),
            json!({
                "customer_id": "C1",
                "name": "Ada Lovelace",
                "frequency": 2,
                "monetary": 300.0,
                "clv": 400.0
            })
        );
    }

    #[test]
    fn last_update_renders_calendar_date() {
        let update = LastUpdate {
            last_updated: NaiveDate::from_ymd_opt(2024, 1, 20),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"lastUpdated": "2024-01-20"})
        );
    }
}
