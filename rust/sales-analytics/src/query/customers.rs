use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::{ClvBucket, RangeCount},
    normalize::{complete_bins, int_or_zero},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) const CLV_RANGES: [&str; 5] = ["$0-500", "$500-1K", "$1K-2K", "$2K-3K", "$3K+"];

/// Each customer is counted once, by the lifetime value recorded on their
/// transactions in the window. Buckets come back as 1-based ordinals into
/// [`CLV_RANGES`].
pub(super) fn clv_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH unique_customers AS (
  SELECT DISTINCT customer_id, customer_lifetime_value
  FROM sales
  WHERE {}
    AND customer_id IS NOT NULL
    AND customer_lifetime_value IS NOT NULL
),
clv_bins AS (
  SELECT CASE
           WHEN customer_lifetime_value < 500 THEN 1
           WHEN customer_lifetime_value < 1000 THEN 2
           WHEN customer_lifetime_value < 2000 THEN 3
           WHEN customer_lifetime_value < 3000 THEN 4
           ELSE 5
         END AS bucket
  FROM unique_customers
)
SELECT bucket::text AS bucket, COUNT(*)::text AS count
FROM clv_bins
GROUP BY bucket",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn clv_distribution(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<ClvBucket>> {
    let rows: Vec<BucketCountRow> = clv_statement(predicate).into_query().load(conn).await?;
    Ok(complete_ranges(&CLV_RANGES, rows))
}

/// Ordinal bucket and its population, shared by every binned distribution.
#[derive(Debug, QueryableByName)]
pub(super) struct BucketCountRow {
    #[diesel(sql_type = Nullable<Text>)]
    pub(super) bucket: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub(super) count: Option<String>,
}

/// Maps 1-based bucket ordinals onto `labels` and fills absent buckets with
/// zero counts. Ordinals outside the label list are dropped.
pub(super) fn complete_ranges(labels: &[&str], rows: Vec<BucketCountRow>) -> Vec<RangeCount> {
    let counted = rows
        .into_iter()
        .filter_map(|row| {
            let ordinal = int_or_zero(row.bucket.as_deref());
            let label = usize::try_from(ordinal - 1)
                .ok()
                .and_then(|index| labels.get(index))?;
            Some(RangeCount {
                range: (*label).to_string(),
                count: int_or_zero(row.count.as_deref()),
            })
        })
        .collect();

    complete_bins(
        labels,
        counted,
        |bucket| bucket.range.as_str(),
        |label| RangeCount {
            range: label.to_string(),
            count: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filters::{FilterQuery, FilterSet},
        query::Metric,
    };
    use pretty_assertions::assert_eq;

    fn row(bucket: &str, count: &str) -> BucketCountRow {
        BucketCountRow {
            bucket: Some(bucket.into()),
            count: Some(count.into()),
        }
    }

    #[test]
    fn missing_clv_ranges_are_zero_filled_in_order() {
        let buckets = complete_ranges(&CLV_RANGES, vec![row("5", "1"), row("1", "2")]);
        let ranges: Vec<_> = buckets.iter().map(|b| b.range.as_str()).collect();
        let counts: Vec<_> = buckets.iter().map(|b| b.count).collect();

        assert_eq!(ranges, CLV_RANGES.to_vec());
        assert_eq!(counts, vec![2, 0, 0, 0, 1]);
    }

    #[test]
    fn empty_result_still_lists_every_range() {
        let buckets = complete_ranges(&CLV_RANGES, Vec::new());
        assert_eq!(buckets.len(), 5);
        assert!(buckets.iter().all(|b| b.count == 0));
    }

    #[test]
    fn out_of_range_ordinals_are_ignored() {
        let buckets = complete_ranges(&["1-3", "4-6"], vec![row("0", "7"), row("3", "9")]);
        assert_eq!(
            buckets,
            vec![
                RangeCount {
                    range: "1-3".into(),
                    count: 0
                },
                RangeCount {
                    range: "4-6".into(),
                    count: 0
                },
            ]
        );
    }

    #[test]
    fn thresholds_are_exclusive_upper_bounds() {
        let filters = FilterSet::from_query(FilterQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            ..FilterQuery::default()
        })
        .unwrap();
        let predicate = Metric::ClvDistribution.predicate(&filters);
        let (sql, _) = clv_statement(&predicate).to_sql_and_params();
        assert!(sql.contains("customer_lifetime_value < 500 THEN 1"));
        assert!(sql.contains("customer_lifetime_value < 3000 THEN 4"));
        assert!(sql.contains("ELSE 5"));
        assert!(sql.contains("SELECT DISTINCT customer_id"));
    }
}
