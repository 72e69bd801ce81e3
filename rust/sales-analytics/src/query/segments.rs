use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::SegmentPerformance,
    normalize::{decimal_string, float_or_zero, int_or_zero},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) fn performance_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT customer_segment AS segment,
       COUNT(DISTINCT customer_id)::text AS customers_count,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       AVG(customer_lifetime_value)::text AS avg_clv,
       CASE
         WHEN SUM(total_amount) > 0
           THEN ROUND(SUM(total_profit) / NULLIF(SUM(total_amount), 0) * 100, 2)
         ELSE 0
       END::text AS margin
FROM sales
WHERE {} AND customer_segment IS NOT NULL
GROUP BY customer_segment
ORDER BY SUM(total_amount) DESC NULLS LAST, customer_segment",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn performance(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<SegmentPerformance>> {
    let rows: Vec<SegmentRow> = performance_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(SegmentRow::into_model).collect())
}

#[derive(Debug, QueryableByName)]
struct SegmentRow {
    #[diesel(sql_type = Nullable<Text>)]
    segment: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    customers_count: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_clv: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    margin: Option<String>,
}

impl SegmentRow {
    fn into_model(self) -> SegmentPerformance {
        SegmentPerformance {
            segment: self.segment.unwrap_or_default(),
            customers_count: int_or_zero(self.customers_count.as_deref()),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            avg_clv: decimal_string(self.avg_clv.as_deref()),
            margin: decimal_string(self.margin.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_clv_renders_two_decimals() {
        let row = SegmentRow {
            segment: Some("Premium".into()),
            customers_count: Some("2".into()),
            orders: Some("5".into()),
            revenue: Some("1000".into()),
            avg_clv: Some("1500".into()),
            margin: Some("18.456".into()),
        };
        let model = row.into_model();
        assert_eq!(model.avg_clv, "1500.00");
        assert_eq!(model.margin, "18.46");
        assert_eq!(model.customers_count, 2);
    }
}
