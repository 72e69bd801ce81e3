use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::PaymentMethodStats,
    normalize::{decimal_string, float_or_zero, int_or_zero, percent_label},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Every stored sale is a settled transaction, so the success rate is fixed.
pub(super) fn methods_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT payment_method AS method,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       ROUND(SUM(total_amount) / NULLIF(COUNT(*), 0), 2)::text AS avg_transaction_value,
       100.0::text AS success_rate
FROM sales
WHERE {} AND payment_method IS NOT NULL
GROUP BY payment_method
ORDER BY SUM(total_amount) DESC NULLS LAST, payment_method",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn methods(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<PaymentMethodStats>> {
    let rows: Vec<PaymentRow> = methods_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(PaymentRow::into_model).collect())
}

#[derive(Debug, QueryableByName)]
struct PaymentRow {
    #[diesel(sql_type = Nullable<Text>)]
    method: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_transaction_value: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    success_rate: Option<String>,
}

impl PaymentRow {
    fn into_model(self) -> PaymentMethodStats {
        PaymentMethodStats {
            method: self.method.unwrap_or_default(),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            avg_transaction_value: decimal_string(self.avg_transaction_value.as_deref()),
            success_rate: percent_label(float_or_zero(self.success_rate.as_deref())),
        }
    }
}
