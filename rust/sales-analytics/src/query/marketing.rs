use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::{
        CohortRetention, DiscountBucket, DiscountImpact, MarketingPerformance, ProductAffinity,
    },
    normalize::{decimal_string, float_or_zero, int_or_zero},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) fn performance_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT CONCAT(country, ' - ', COALESCE(region, 'Unknown')) AS location,
       SUM(total_amount)::text AS revenue,
       COUNT(*)::text AS orders
FROM sales
WHERE {} AND country IS NOT NULL
GROUP BY country, region
ORDER BY SUM(total_amount) DESC NULLS LAST, location
LIMIT 10",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn performance(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<MarketingPerformance>> {
    let rows: Vec<LocationRow> = performance_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| MarketingPerformance {
            location: row.location.unwrap_or_default(),
            revenue: float_or_zero(row.revenue.as_deref()),
            orders: int_or_zero(row.orders.as_deref()),
        })
        .collect())
}

/// Customers are assigned to the month of their first purchase inside the
/// window; a repeat customer has more than one order in the window.
pub(super) fn cohort_statement(predicate: &Predicate) -> Statement {
    let clause = window_clause(predicate);
    let sql = format!(
        "WITH customer_orders AS (
  SELECT customer_id,
         TO_CHAR(MIN(transaction_date), 'YYYY-MM') AS cohort_month,
         COUNT(*) AS order_count
  FROM sales
  WHERE {clause} AND customer_id IS NOT NULL
  GROUP BY customer_id
),
cohort_stats AS (
  SELECT cohort_month,
         COUNT(*) AS total_customers,
         SUM(CASE WHEN order_count > 1 THEN 1 ELSE 0 END) AS repeat_customers,
         AVG(order_count) AS avg_orders_per_customer
  FROM customer_orders
  GROUP BY cohort_month
)
SELECT cohort_month AS cohort,
       total_customers::text AS total_customers,
       repeat_customers::text AS repeat_customers,
       CASE
         WHEN total_customers > 0
           THEN ROUND(repeat_customers::numeric / total_customers * 100, 2)
         ELSE 0
       END::text AS retention_rate,
       avg_orders_per_customer::text AS avg_orders_per_customer
FROM cohort_stats
ORDER BY cohort_month ASC"
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn cohort_retention(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<CohortRetention>> {
    let rows: Vec<CohortRow> = cohort_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(CohortRow::into_model).collect())
}

/// Unordered category pairs bought by the same customer. The lexicographic
/// `<` join both removes mirrored pairs and fixes the label order.
pub(super) fn affinity_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH customer_products AS (
  SELECT DISTINCT customer_id, product_category
  FROM sales
  WHERE {}
    AND customer_id IS NOT NULL
    AND product_category IS NOT NULL
),
product_pairs AS (
  SELECT cp1.customer_id,
         cp1.product_category || ' + ' || cp2.product_category AS pair
  FROM customer_products cp1
  JOIN customer_products cp2
    ON cp1.customer_id = cp2.customer_id
   AND cp1.product_category < cp2.product_category
)
SELECT pair, COUNT(DISTINCT customer_id)::text AS count
FROM product_pairs
GROUP BY pair
ORDER BY COUNT(DISTINCT customer_id) DESC, pair
LIMIT 10",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn product_affinities(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<ProductAffinity>> {
    let rows: Vec<AffinityRow> = affinity_statement(predicate).into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| ProductAffinity {
            pair: row.pair.unwrap_or_default(),
            count: int_or_zero(row.count.as_deref()),
        })
        .collect())
}

/// Discounted and undiscounted orders aggregated side by side in one row.
pub(super) fn discount_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT
  SUM(CASE WHEN discount_applied > 0 THEN 1 ELSE 0 END)::text AS with_orders,
  SUM(CASE WHEN discount_applied > 0 THEN total_amount ELSE 0 END)::text AS with_revenue,
  SUM(CASE WHEN discount_applied > 0 THEN total_profit ELSE 0 END)::text AS with_profit,
  AVG(CASE WHEN discount_applied > 0 THEN discount_applied END)::text AS with_avg_discount,
  SUM(CASE WHEN discount_applied = 0 OR discount_applied IS NULL THEN 1 ELSE 0 END)::text AS without_orders,
  SUM(CASE WHEN discount_applied = 0 OR discount_applied IS NULL THEN total_amount ELSE 0 END)::text AS without_revenue,
  SUM(CASE WHEN discount_applied = 0 OR discount_applied IS NULL THEN total_profit ELSE 0 END)::text AS without_profit
FROM sales
WHERE {}",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn discount_impact(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<DiscountImpact> {
    let rows: Vec<DiscountRow> = discount_statement(predicate).into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .next()
        .map(DiscountRow::into_model)
        .unwrap_or_else(DiscountRow::empty_model))
}

#[derive(Debug, QueryableByName)]
struct LocationRow {
    #[diesel(sql_type = Nullable<Text>)]
    location: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
}

#[derive(Debug, QueryableByName)]
struct CohortRow {
    #[diesel(sql_type = Nullable<Text>)]
    cohort: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    total_customers: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    repeat_customers: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    retention_rate: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_orders_per_customer: Option<String>,
}

impl CohortRow {
    fn into_model(self) -> CohortRetention {
        CohortRetention {
            cohort: self.cohort.unwrap_or_default(),
            total_customers: int_or_zero(self.total_customers.as_deref()),
            repeat_customers: int_or_zero(self.repeat_customers.as_deref()),
            avg_orders_per_customer: decimal_string(self.avg_orders_per_customer.as_deref()),
            retention_rate: decimal_string(self.retention_rate.as_deref()),
        }
    }
}

#[derive(Debug, QueryableByName)]
struct AffinityRow {
    #[diesel(sql_type = Nullable<Text>)]
    pair: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    count: Option<String>,
}

#[derive(Debug, Default, QueryableByName)]
struct DiscountRow {
    #[diesel(sql_type = Nullable<Text>)]
    with_orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    with_revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    with_profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    with_avg_discount: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    without_orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    without_revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    without_profit: Option<String>,
}

impl DiscountRow {
    fn into_model(self) -> DiscountImpact {
        DiscountImpact {
            with_discount: DiscountBucket {
                orders: int_or_zero(self.with_orders.as_deref()),
                revenue: float_or_zero(self.with_revenue.as_deref()),
                profit: float_or_zero(self.with_profit.as_deref()),
                avg_discount: Some(decimal_string(self.with_avg_discount.as_deref())),
            },
            without_discount: DiscountBucket {
                orders: int_or_zero(self.without_orders.as_deref()),
                revenue: float_or_zero(self.without_revenue.as_deref()),
                profit: float_or_zero(self.without_profit.as_deref()),
                avg_discount: None,
            },
        }
    }

    fn empty_model() -> DiscountImpact {
        DiscountRow::default().into_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filters::{FilterQuery, FilterSet},
        query::Metric,
    };
    use pretty_assertions::assert_eq;

    fn january(query: FilterQuery) -> FilterSet {
        FilterSet::from_query(FilterQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            ..query
        })
        .unwrap()
    }

    #[test]
    fn affinity_pairs_are_canonical() {
        let filters = january(FilterQuery {
            product_category: Some("Clothing".into()),
            ..FilterQuery::default()
        });
        let (sql, params) =
            affinity_statement(&Metric::ProductAffinities.predicate(&filters)).to_sql_and_params();

        assert!(sql.contains("cp1.product_category < cp2.product_category"));
        assert!(sql.contains("cp1.product_category || ' + ' || cp2.product_category"));
        assert!(sql.contains("COUNT(DISTINCT customer_id)"));
        assert!(!sql.contains("product_category = $"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn cohort_statement_aggregates_twice() {
        let filters = january(FilterQuery {
            country: Some("USA".into()),
            ..FilterQuery::default()
        });
        let (sql, params) =
            cohort_statement(&Metric::CohortRetention.predicate(&filters)).to_sql_and_params();

        assert!(sql.contains("TO_CHAR(MIN(transaction_date), 'YYYY-MM')"));
        assert!(sql.contains("order_count > 1"));
        assert!(sql.contains("AND country = $3 AND customer_id IS NOT NULL"), "{sql}");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn cohort_rates_are_fixed_two_decimal_strings() {
        let row = CohortRow {
            cohort: Some("2024-01".into()),
            total_customers: Some("3".into()),
            repeat_customers: Some("1".into()),
            retention_rate: Some("33.33".into()),
            avg_orders_per_customer: Some("1.3333333333333333".into()),
        };
        assert_eq!(
            row.into_model(),
            CohortRetention {
                cohort: "2024-01".into(),
                total_customers: 3,
                repeat_customers: 1,
                avg_orders_per_customer: "1.33".into(),
                retention_rate: "33.33".into(),
            }
        );
    }

    #[test]
    fn discount_impact_without_rows_is_all_zero() {
        let impact = DiscountRow::empty_model();
        assert_eq!(impact.with_discount.orders, 0);
        assert_eq!(impact.with_discount.avg_discount.as_deref(), Some("0.00"));
        assert_eq!(impact.without_discount.revenue, 0.0);
        assert_eq!(impact.without_discount.avg_discount, None);
    }

    #[test]
    fn discount_statement_has_no_group_by() {
        let filters = january(FilterQuery::default());
        let (sql, _) =
            discount_statement(&Metric::DiscountImpact.predicate(&filters)).to_sql_and_params();
        assert!(!sql.contains("GROUP BY"));
        assert!(sql.contains("discount_applied = 0 OR discount_applied IS NULL"));
    }
}
