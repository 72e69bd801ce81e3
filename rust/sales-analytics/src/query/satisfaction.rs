use super::{
    customers::{complete_ranges, BucketCountRow},
    window_clause, Statement,
};
use crate::{
    error::Result,
    filters::Predicate,
    models::{CsatBucket, NpsBucket, SatisfactionByCategory},
    normalize::{fixed, float_or_zero},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) const NPS_RANGES: [&str; 3] = ["Detractors (0-6)", "Passives (7-8)", "Promoters (9-10)"];
pub(super) const CSAT_RANGES: [&str; 4] = ["1-3", "4-6", "7-8", "9-10"];

pub(super) fn category_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT product_category AS category,
       AVG(net_promoter_score)::text AS avg_nps,
       AVG(customer_satisfaction_score)::text AS avg_csat,
       SUM(total_amount)::text AS revenue
FROM sales
WHERE {} AND product_category IS NOT NULL
GROUP BY product_category
HAVING AVG(net_promoter_score) IS NOT NULL
    OR AVG(customer_satisfaction_score) IS NOT NULL
ORDER BY SUM(total_amount) DESC NULLS LAST, product_category",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn by_category(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<SatisfactionByCategory>> {
    let rows: Vec<CategoryRow> = category_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(CategoryRow::into_model).collect())
}

pub(super) fn nps_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH nps_bins AS (
  SELECT CASE
           WHEN net_promoter_score <= 6 THEN 1
           WHEN net_promoter_score <= 8 THEN 2
           WHEN net_promoter_score <= 10 THEN 3
         END AS bucket
  FROM sales
  WHERE {} AND net_promoter_score IS NOT NULL
)
SELECT bucket::text AS bucket, COUNT(*)::text AS count
FROM nps_bins
WHERE bucket IS NOT NULL
GROUP BY bucket",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn nps_distribution(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<NpsBucket>> {
    let rows: Vec<BucketCountRow> = nps_statement(predicate).into_query().load(conn).await?;
    Ok(complete_ranges(&NPS_RANGES, rows))
}

pub(super) fn csat_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH csat_bins AS (
  SELECT CASE
           WHEN customer_satisfaction_score <= 3 THEN 1
           WHEN customer_satisfaction_score <= 6 THEN 2
           WHEN customer_satisfaction_score <= 8 THEN 3
           WHEN customer_satisfaction_score <= 10 THEN 4
         END AS bucket
  FROM sales
  WHERE {} AND customer_satisfaction_score IS NOT NULL
)
SELECT bucket::text AS bucket, COUNT(*)::text AS count
FROM csat_bins
WHERE bucket IS NOT NULL
GROUP BY bucket",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn csat_distribution(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<CsatBucket>> {
    let rows: Vec<BucketCountRow> = csat_statement(predicate).into_query().load(conn).await?;
    Ok(complete_ranges(&CSAT_RANGES, rows))
}

#[derive(Debug, QueryableByName)]
struct CategoryRow {
    #[diesel(sql_type = Nullable<Text>)]
    category: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_nps: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_csat: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
}

impl CategoryRow {
    fn into_model(self) -> SatisfactionByCategory {
        SatisfactionByCategory {
            category: self.category.unwrap_or_default(),
            avg_nps: fixed(float_or_zero(self.avg_nps.as_deref()), 1),
            avg_csat: fixed(float_or_zero(self.avg_csat.as_deref()), 1),
            revenue: float_or_zero(self.revenue.as_deref()),
        }
    }
}
