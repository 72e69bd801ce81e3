use crate::{
    error::Result,
    models::LastUpdate,
    schema::sales::dsl::{sales, transaction_date},
};
use chrono::NaiveDate;
use diesel::{dsl::max, prelude::*};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Most recent transaction date; `None` on an empty table.
pub(super) async fn last_update(conn: &mut AsyncPgConnection) -> Result<LastUpdate> {
    let last_updated: Option<NaiveDate> = sales
        .select(max(transaction_date))
        .first(conn)
        .await?;
    Ok(LastUpdate { last_updated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::pg::Pg;

    #[test]
    fn last_update_selects_the_latest_transaction_date() {
        let query = sales.select(max(transaction_date));
        let sql = diesel::debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains("max(\"sales\".\"transaction_date\")"), "{sql}");
    }
}
