use crate::{
    error::Result,
    models::FilterFacets,
    schema::sales::dsl::{
        country as col_country, customer_segment as col_customer_segment,
        marketing_channel as col_marketing_channel, product_category as col_product_category,
        sales,
    },
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Sorted distinct non-null values of one text column of `sales`.
macro_rules! distinct_values {
    ($column:expr) => {
        sales
            .select($column)
            .filter($column.is_not_null())
            .distinct()
            .order($column.asc())
    };
}

pub(super) async fn load(conn: &mut AsyncPgConnection) -> Result<FilterFacets> {
    let countries: Vec<Option<String>> = distinct_values!(col_country).load(conn).await?;
    let categories: Vec<Option<String>> = distinct_values!(col_product_category).load(conn).await?;
    let channels: Vec<Option<String>> = distinct_values!(col_marketing_channel).load(conn).await?;
    let segments: Vec<Option<String>> = distinct_values!(col_customer_segment).load(conn).await?;

    Ok(FilterFacets {
        countries: present(countries),
        categories: present(categories),
        channels: present(channels),
        segments: present(segments),
    })
}

fn present(values: Vec<Option<String>>) -> Vec<String> {
    values
        .into_iter()
        .flatten()
        .filter(|value| !value.trim().is_empty())
        .collect()
}
