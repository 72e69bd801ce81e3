use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::SkuRevenue,
    normalize::{decimal_string, float_or_zero, int_or_zero, round_to},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

const TOP_SKUS: i64 = 20;

pub(super) fn skus_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT product_sku AS sku,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       COALESCE(SUM(quantity), 0)::text AS units,
       ROUND(SUM(total_amount) / NULLIF(SUM(quantity), 0), 2)::text AS avg_price,
       CASE
         WHEN SUM(total_amount) > 0
           THEN ROUND(SUM(total_profit) / NULLIF(SUM(total_amount), 0) * 100, 2)
         ELSE 0
       END::text AS margin
FROM sales
WHERE {} AND product_sku IS NOT NULL
GROUP BY product_sku
ORDER BY SUM(total_amount) DESC NULLS LAST, product_sku
LIMIT {TOP_SKUS}",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn skus(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<SkuRevenue>> {
    let rows: Vec<SkuRow> = skus_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(SkuRow::into_model).collect())
}

#[derive(Debug, QueryableByName)]
struct SkuRow {
    #[diesel(sql_type = Nullable<Text>)]
    sku: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    units: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_price: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    margin: Option<String>,
}

impl SkuRow {
    fn into_model(self) -> SkuRevenue {
        SkuRevenue {
            sku: self.sku.unwrap_or_default(),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            units: int_or_zero(self.units.as_deref()),
            avg_price: round_to(float_or_zero(self.avg_price.as_deref()), 2),
            margin: decimal_string(self.margin.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantity_leaves_average_price_at_zero() {
        let row = SkuRow {
            sku: Some("SKU-001".into()),
            orders: Some("1".into()),
            revenue: Some("99.99".into()),
            profit: Some("20".into()),
            units: Some("0".into()),
            avg_price: None,
            margin: Some("20.0020002".into()),
        };
        let model = row.into_model();
        assert_eq!(model.avg_price, 0.0);
        assert_eq!(model.margin, "20.00");
    }
}
