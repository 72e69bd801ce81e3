//! Headline KPIs for a window and its immediately preceding window.
//!
//! Both windows run the same statement with different date binds; deltas are
//! derived in-process once both have returned.

use super::{window_clause, Statement};
use crate::{
    error::{Result, ServiceError},
    filters::{DateWindow, Predicate},
    models::{KpiSummary, PeriodWindow},
    normalize::{float_or_null, int_or_zero, percent_delta, ratio, round_to},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) fn statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit,
       COUNT(*)::text AS orders,
       AVG(net_promoter_score)::text AS avg_nps_score,
       SUM(CASE WHEN net_promoter_score BETWEEN 9 AND 10 THEN 1 ELSE 0 END)::text AS nps_promoters,
       SUM(CASE WHEN net_promoter_score BETWEEN 0 AND 6 THEN 1 ELSE 0 END)::text AS nps_detractors,
       COUNT(net_promoter_score)::text AS nps_responses
FROM sales
WHERE {}",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

/// Aggregates of one window. Sums stay `None` when the window has no rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct KpiWindow {
    pub(super) revenue: Option<f64>,
    pub(super) profit: Option<f64>,
    pub(super) orders: i64,
    pub(super) avg_nps_score: Option<f64>,
    pub(super) nps_promoters: i64,
    pub(super) nps_detractors: i64,
    pub(super) nps_responses: i64,
}

pub(super) async fn window(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<KpiWindow> {
    let rows: Vec<KpiRow> = statement(predicate).into_query().load(conn).await?;
    Ok(rows
        .into_iter()
        .next()
        .map(KpiRow::into_window)
        .unwrap_or_default())
}

pub(super) fn summarize(
    requested: DateWindow,
    current: KpiWindow,
    previous: KpiWindow,
) -> Result<KpiSummary> {
    if current.orders == 0 && current.revenue.is_none() {
        return Err(ServiceError::NotFound(
            "No KPIs found for the given parameters".into(),
        ));
    }

    let revenue = current.revenue.unwrap_or(0.0);
    let profit = current.profit.unwrap_or(0.0);
    let orders = current.orders as f64;
    let preceding = requested.preceding();

    let nps_pct_current = (current.nps_responses > 0).then(|| {
        let responses = current.nps_responses as f64;
        let promoters = current.nps_promoters as f64 / responses;
        let detractors = current.nps_detractors as f64 / responses;
        round_to((promoters - detractors) * 100.0, 2)
    });

    Ok(KpiSummary {
        revenue_current: revenue,
        profit_current: profit,
        orders_current: current.orders,
        aov_current: ratio(revenue, orders).map(|aov| round_to(aov, 2)),
        profit_margin_current: ratio(profit, revenue).map(|margin| round_to(margin, 4)),
        revenue_delta_pct: percent_delta(current.revenue, previous.revenue),
        profit_delta_pct: percent_delta(current.profit, previous.profit),
        orders_delta_pct: percent_delta(Some(orders), Some(previous.orders as f64)),
        nps_pct_current,
        nps_avg_score_current: current.avg_nps_score.map(|score| round_to(score, 2)),
        current_period: PeriodWindow {
            start_date: requested.start,
            end_date: requested.end,
        },
        previous_period: PeriodWindow {
            start_date: preceding.start,
            end_date: preceding.end,
        },
    })
}

#[derive(Debug, QueryableByName)]
struct KpiRow {
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    avg_nps_score: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    nps_promoters: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    nps_detractors: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    nps_responses: Option<String>,
}

impl KpiRow {
    fn into_window(self) -> KpiWindow {
        KpiWindow {
            revenue: float_or_null(self.revenue.as_deref()),
            profit: float_or_null(self.profit.as_deref()),
            orders: int_or_zero(self.orders.as_deref()),
            avg_nps_score: float_or_null(self.avg_nps_score.as_deref()),
            nps_promoters: int_or_zero(self.nps_promoters.as_deref()),
            nps_detractors: int_or_zero(self.nps_detractors.as_deref()),
            nps_responses: int_or_zero(self.nps_responses.as_deref()),
        }
    }
}
