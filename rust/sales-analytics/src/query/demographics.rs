//! Revenue split by customer age range and by gender.

use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::{AgeRangeRevenue, GenderRevenue},
    normalize::{complete_bins, decimal_string, float_or_zero, int_or_zero},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) const AGE_RANGES: [&str; 6] = ["18-24", "25-34", "35-44", "45-54", "55-64", "65+"];

pub(super) fn age_ranges_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH aged AS (
  SELECT CASE
           WHEN customer_age <= 24 THEN '18-24'
           WHEN customer_age <= 34 THEN '25-34'
           WHEN customer_age <= 44 THEN '35-44'
           WHEN customer_age <= 54 THEN '45-54'
           WHEN customer_age <= 64 THEN '55-64'
           ELSE '65+'
         END AS age_range,
         total_amount,
         total_profit,
         customer_satisfaction_score
  FROM sales
  WHERE {} AND customer_age IS NOT NULL
)
SELECT age_range AS label,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       AVG(customer_satisfaction_score)::text AS avg_satisfaction,
       CASE
         WHEN SUM(total_amount) > 0
           THEN ROUND(SUM(total_profit) / NULLIF(SUM(total_amount), 0) * 100, 2)
         ELSE 0
       END::text AS margin
FROM aged
GROUP BY age_range",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn age_ranges(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<AgeRangeRevenue>> {
    let rows: Vec<DemographicRow> = age_ranges_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(complete_age_ranges(rows))
}

pub(super) fn genders_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT customer_gender AS label,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       AVG(customer_satisfaction_score)::text AS avg_satisfaction,
       CASE
         WHEN SUM(total_amount) > 0
           THEN ROUND(SUM(total_profit) / NULLIF(SUM(total_amount), 0) * 100, 2)
         ELSE 0
       END::text AS margin
FROM sales
WHERE {} AND customer_gender IS NOT NULL
GROUP BY customer_gender
ORDER BY SUM(total_amount) DESC NULLS LAST, customer_gender",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn genders(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<GenderRevenue>> {
    let rows: Vec<DemographicRow> = genders_statement(predicate).into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let figures = row.figures();
            GenderRevenue {
                gender: row.label.unwrap_or_default(),
                orders: figures.orders,
                revenue: figures.revenue,
                profit: figures.profit,
                avg_satisfaction: figures.avg_satisfaction,
                margin: figures.margin,
            }
        })
        .collect())
}

fn complete_age_ranges(rows: Vec<DemographicRow>) -> Vec<AgeRangeRevenue> {
    let models = rows
        .into_iter()
        .map(|row| {
            let figures = row.figures();
            AgeRangeRevenue {
                age_range: row.label.unwrap_or_default(),
                orders: figures.orders,
                revenue: figures.revenue,
                profit: figures.profit,
                avg_satisfaction: figures.avg_satisfaction,
                margin: figures.margin,
            }
        })
        .collect();

    complete_bins(
        &AGE_RANGES,
        models,
        |row| row.age_range.as_str(),
        |label| AgeRangeRevenue {
            age_range: label.to_string(),
            orders: 0,
            revenue: 0.0,
            profit: 0.0,
            avg_satisfaction: decimal_string(None),
            margin: decimal_string(None),
        },
    )
}

#[derive(Debug, QueryableByName)]
struct DemographicRow {
    #[diesel(sql_type = Nullable<Text>)]
    label: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_satisfaction: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    margin: Option<String>,
}

struct Figures {
    orders: i64,
    revenue: f64,
    profit: f64,
    avg_satisfaction: String,
    margin: String,
}

impl DemographicRow {
    fn figures(&self) -> Figures {
        Figures {
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            avg_satisfaction: decimal_string(self.avg_satisfaction.as_deref()),
            margin: decimal_string(self.margin.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(label: &str, orders: &str, revenue: &str) -> DemographicRow {
        DemographicRow {
            label: Some(label.into()),
            orders: Some(orders.into()),
            revenue: Some(revenue.into()),
            profit: Some("10".into()),
            avg_satisfaction: Some("8.3333".into()),
            margin: Some("12.5".into()),
        }
    }

    #[test]
    fn age_ranges_are_completed_in_order() {
        let completed = complete_age_ranges(vec![row("65+", "1", "40"), row("25-34", "3", "300")]);
        let labels: Vec<_> = completed.iter().map(|r| r.age_range.as_str()).collect();
        assert_eq!(labels, AGE_RANGES.to_vec());

        assert_eq!(completed[1].orders, 3);
        assert_eq!(completed[1].avg_satisfaction, "8.33");
        assert_eq!(completed[1].margin, "12.50");
        assert_eq!(completed[0].orders, 0);
        assert_eq!(completed[0].margin, "0.00");
        assert_eq!(completed[5].revenue, 40.0);
    }

    #[test]
    fn age_thresholds_are_inclusive() {
        let filters = crate::filters::FilterSet::from_query(crate::filters::FilterQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            ..Default::default()
        })
        .unwrap();
        let predicate = crate::query::Metric::RevenueByAgeRange.predicate(&filters);
        let (sql, _) = age_ranges_statement(&predicate).to_sql_and_params();
        assert!(sql.contains("customer_age <= 24 THEN '18-24'"));
        assert!(sql.contains("ELSE '65+'"));
    }
}
