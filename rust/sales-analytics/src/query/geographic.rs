use super::{window_clause, SqlBindValue, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::RegionalPerformance,
    normalize::{decimal_string, float_or_zero, int_or_zero},
    pagination::PageRequest,
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Number of country/region groups; must group exactly like [`page_statement`].
pub(super) fn count_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT COUNT(*)::text AS total
FROM (
  SELECT 1
  FROM sales
  WHERE {} AND country IS NOT NULL
  GROUP BY country, region
) AS region_groups",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn count(conn: &mut AsyncPgConnection, predicate: &Predicate) -> Result<i64> {
    let rows: Vec<CountRow> = count_statement(predicate).into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .next()
        .map(|row| int_or_zero(row.total.as_deref()))
        .unwrap_or(0))
}

pub(super) fn page_statement(predicate: &Predicate, page: &PageRequest) -> Statement {
    let limit_idx = predicate.next_placeholder();
    let offset_idx = limit_idx + 1;
    let sql = format!(
        "SELECT country,
       COALESCE(region, 'Unknown') AS region,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       CASE
         WHEN SUM(total_amount) > 0
           THEN ROUND(SUM(total_profit) / NULLIF(SUM(total_amount), 0) * 100, 2)
         ELSE 0
       END::text AS margin,
       COUNT(DISTINCT customer_id)::text AS customers_count
FROM sales
WHERE {} AND country IS NOT NULL
GROUP BY country, region
ORDER BY SUM(total_amount) DESC NULLS LAST, country, region
LIMIT ${limit_idx} OFFSET ${offset_idx}",
        window_clause(predicate)
    );

    let mut binds = predicate.bind_values();
    binds.push(SqlBindValue::BigInt(page.limit));
    binds.push(SqlBindValue::BigInt(page.offset()));
    Statement::new(sql, binds)
}

pub(super) async fn page(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
    page: &PageRequest,
) -> Result<Vec<RegionalPerformance>> {
    let rows: Vec<RegionRow> = page_statement(predicate, page)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(RegionRow::into_model).collect())
}

#[derive(Debug, QueryableByName)]
struct CountRow {
    #[diesel(sql_type = Nullable<Text>)]
    total: Option<String>,
}

#[derive(Debug, QueryableByName)]
struct RegionRow {
    #[diesel(sql_type = Nullable<Text>)]
    country: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    region: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    margin: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    customers_count: Option<String>,
}

impl RegionRow {
    fn into_model(self) -> RegionalPerformance {
        RegionalPerformance {
            country: self.country.unwrap_or_default(),
            region: self.region.unwrap_or_else(|| "Unknown".to_string()),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            margin: decimal_string(self.margin.as_deref()),
            customers_count: int_or_zero(self.customers_count.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filters::{FilterQuery, FilterSet},
        query::{BindParam, Metric},
    };
    use pretty_assertions::assert_eq;

    fn predicate(query: FilterQuery) -> Predicate {
        let filters = FilterSet::from_query(FilterQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            ..query
        })
        .unwrap();
        Metric::RegionalPerformance.predicate(&filters)
    }

    #[test]
    fn paging_placeholders_follow_window_when_unfiltered() {
        let page = PageRequest { page: 3, limit: 25 };
        let (sql, params) = page_statement(&predicate(FilterQuery::default()), &page)
            .to_sql_and_params();

        assert!(sql.ends_with("LIMIT $3 OFFSET $4"), "{sql}");
        assert_eq!(&params[2..], &[BindParam::Int(25), BindParam::Int(50)]);
    }

    #[test]
    fn count_and_page_share_filters() {
        let query = FilterQuery {
            country: Some("USA".into()),
            customer_segment: Some("Premium".into()),
            ..FilterQuery::default()
        };
        let (count_sql, count_params) = count_statement(&predicate(query.clone())).to_sql_and_params();
        let (page_sql, page_params) =
            page_statement(&predicate(query), &PageRequest::first(20)).to_sql_and_params();

        assert!(count_sql.contains("AND customer_segment = $3"));
        assert!(page_sql.contains("AND customer_segment = $3"));
        assert!(!page_sql.contains("country = $"));
        assert_eq!(count_params, page_params[..count_params.len()].to_vec());
        assert!(page_sql.contains("GROUP BY country, region"));
        assert!(count_sql.contains("GROUP BY country, region"));
    }

    #[test]
    fn missing_region_is_reported_as_unknown() {
        let row = RegionRow {
            country: Some("Canada".into()),
            region: None,
            orders: Some("2".into()),
            revenue: Some("500".into()),
            profit: Some("125".into()),
            margin: Some("25".into()),
            customers_count: Some("2".into()),
        };
        let model = row.into_model();
        assert_eq!(model.region, "Unknown");
        assert_eq!(model.margin, "25.00");
    }
}
