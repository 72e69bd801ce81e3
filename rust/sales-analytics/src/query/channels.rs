use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::{ChannelMix, ChannelPerformance},
    normalize::{decimal_string, fixed, float_or_zero, int_or_zero, ratio},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

const CHANNEL_COLUMNS: &str = "marketing_channel AS channel,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       SUM(CASE WHEN cart_abandonment = 'Yes' THEN 1 ELSE 0 END)::text AS abandonment,
       ROUND(
         SUM(CASE WHEN cart_abandonment = 'Yes' THEN 1 ELSE 0 END)::numeric
           / NULLIF(COUNT(*), 0) * 100,
         2
       )::text AS abandonment_rate";

pub(super) fn mix_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT {CHANNEL_COLUMNS}
FROM sales
WHERE {} AND marketing_channel IS NOT NULL
GROUP BY marketing_channel
ORDER BY SUM(total_amount) DESC NULLS LAST, marketing_channel",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn mix(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<ChannelMix>> {
    let rows: Vec<ChannelRow> = mix_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(ChannelRow::into_mix).collect())
}

/// Channel mix plus order value, margin and share of total revenue. Shares
/// are derived in-process from the same rows.
pub(super) fn performance_statement(predicate: &Predicate) -> Statement {
    mix_statement(predicate)
}

pub(super) async fn performance(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<ChannelPerformance>> {
    let rows: Vec<ChannelRow> = performance_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(channel_performance(rows.into_iter().map(ChannelRow::into_mix).collect()))
}

fn channel_performance(mix: Vec<ChannelMix>) -> Vec<ChannelPerformance> {
    let total_revenue: f64 = mix.iter().map(|row| row.revenue).sum();

    mix.into_iter()
        .map(|row| {
            let aov = ratio(row.revenue, row.orders as f64).unwrap_or(0.0);
            let margin = ratio(row.profit, row.revenue).unwrap_or(0.0) * 100.0;
            let share = ratio(row.revenue, total_revenue).unwrap_or(0.0) * 100.0;
            ChannelPerformance {
                channel: row.channel,
                orders: row.orders,
                revenue: row.revenue,
                profit: row.profit,
                abandonment: row.abandonment,
                abandonment_rate: row.abandonment_rate,
                aov: fixed(aov, 2),
                profit_margin: fixed(margin, 2),
                revenue_share: fixed(share, 2),
            }
        })
        .collect()
}

#[derive(Debug, QueryableByName)]
struct ChannelRow {
    #[diesel(sql_type = Nullable<Text>)]
    channel: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    abandonment: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    abandonment_rate: Option<String>,
}

impl ChannelRow {
    fn into_mix(self) -> ChannelMix {
        ChannelMix {
            channel: self.channel.unwrap_or_default(),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            abandonment: int_or_zero(self.abandonment.as_deref()),
            abandonment_rate: decimal_string(self.abandonment_rate.as_deref()),
        }
    }
}
