use super::{window_clause, Statement};
use crate::{
    error::Result,
    filters::Predicate,
    models::{CategoryRevenue, CountryRevenue, CustomerRevenue, DailyRevenue, LocationRevenue},
    normalize::{decimal_string, float_or_zero, int_or_zero, round_to},
};
use diesel::{
    deserialize::QueryableByName,
    sql_types::{Nullable, Text},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(super) fn trends_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT transaction_date::text AS date,
       COUNT(*)::text AS orders,
       SUM(total_amount)::text AS revenue,
       SUM(total_profit)::text AS profit
FROM sales
WHERE {}
GROUP BY transaction_date
ORDER BY transaction_date ASC",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn trends(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<DailyRevenue>> {
    let rows: Vec<TrendRow> = trends_statement(predicate).into_query().load(conn).await?;
    Ok(rows.into_iter().map(TrendRow::into_model).collect())
}

pub(super) fn categories_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT product_category AS category,
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
WHERE {} AND product_category IS NOT NULL
GROUP BY product_category
ORDER BY SUM(total_amount) DESC NULLS LAST, product_category",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn categories(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<CategoryRevenue>> {
    let rows: Vec<CategoryRow> = categories_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(CategoryRow::into_model).collect())
}

pub(super) fn top_customers_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT customer_id,
       TRIM(CONCAT(COALESCE(first_name, ''), ' ', COALESCE(last_name, ''))) AS name,
       COUNT(*)::text AS frequency,
       SUM(total_amount)::text AS monetary,
       MAX(customer_lifetime_value)::text AS clv
FROM sales
WHERE {} AND customer_id IS NOT NULL
GROUP BY customer_id, first_name, last_name
ORDER BY SUM(total_amount) DESC NULLS LAST, customer_id
LIMIT 20",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn top_customers(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<CustomerRevenue>> {
    let rows: Vec<CustomerRow> = top_customers_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(CustomerRow::into_model).collect())
}

pub(super) fn top_regions_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "SELECT CONCAT(country, ' - ', COALESCE(region, 'Unknown')) AS location,
       SUM(total_amount)::text AS revenue,
       COUNT(*)::text AS orders,
       SUM(total_profit)::text AS profit
FROM sales
WHERE {} AND country IS NOT NULL
GROUP BY country, region
ORDER BY SUM(total_amount) DESC NULLS LAST, location
LIMIT 10",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn top_regions(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<LocationRevenue>> {
    let rows: Vec<LocationRow> = top_regions_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(LocationRow::into_model).collect())
}

pub(super) fn countries_statement(predicate: &Predicate) -> Statement {
    let sql = format!(
        "WITH country_stats AS (
  SELECT country,
         SUM(total_amount) AS revenue,
         COUNT(*) AS orders,
         SUM(total_profit) AS profit
  FROM sales
  WHERE {} AND country IS NOT NULL
  GROUP BY country
),
total_revenue AS (
  SELECT SUM(revenue) AS total FROM country_stats
)
SELECT cs.country,
       cs.revenue::text AS revenue,
       cs.orders::text AS orders,
       cs.profit::text AS profit,
       CASE
         WHEN tr.total > 0 THEN ROUND(cs.revenue / tr.total * 100, 2)
         ELSE 0
       END::text AS revenue_share
FROM country_stats cs
CROSS JOIN total_revenue tr
ORDER BY cs.revenue DESC NULLS LAST, cs.country",
        window_clause(predicate)
    );
    Statement::filtered(sql, predicate)
}

pub(super) async fn countries(
    conn: &mut AsyncPgConnection,
    predicate: &Predicate,
) -> Result<Vec<CountryRevenue>> {
    let rows: Vec<CountryRow> = countries_statement(predicate)
        .into_query()
        .load(conn)
        .await?;
    Ok(rows.into_iter().map(CountryRow::into_model).collect())
}

#[derive(Debug, QueryableByName)]
struct TrendRow {
    #[diesel(sql_type = Nullable<Text>)]
    date: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
}

impl TrendRow {
    fn into_model(self) -> DailyRevenue {
        DailyRevenue {
            date: self.date.unwrap_or_default(),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
        }
    }
}

#[derive(Debug, QueryableByName)]
struct CategoryRow {
    #[diesel(sql_type = Nullable<Text>)]
    category: Option<String>,
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

impl CategoryRow {
    fn into_model(self) -> CategoryRevenue {
        CategoryRevenue {
            category: self.category.unwrap_or_default(),
            orders: int_or_zero(self.orders.as_deref()),
            revenue: float_or_zero(self.revenue.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            units: int_or_zero(self.units.as_deref()),
            avg_price: round_to(float_or_zero(self.avg_price.as_deref()), 2),
            margin: decimal_string(self.margin.as_deref()),
        }
    }
}

#[derive(Debug, QueryableByName)]
struct CustomerRow {
    #[diesel(sql_type = Nullable<Text>)]
    customer_id: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    frequency: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    monetary: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    clv: Option<String>,
}

impl CustomerRow {
    fn into_model(self) -> CustomerRevenue {
        CustomerRevenue {
            customer_id: self.customer_id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            frequency: int_or_zero(self.frequency.as_deref()),
            monetary: float_or_zero(self.monetary.as_deref()),
            clv: float_or_zero(self.clv.as_deref()),
        }
    }
}

#[derive(Debug, QueryableByName)]
struct LocationRow {
    #[diesel(sql_type = Nullable<Text>)]
    location: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
}

impl LocationRow {
    fn into_model(self) -> LocationRevenue {
        LocationRevenue {
            location: self.location.unwrap_or_default(),
            revenue: float_or_zero(self.revenue.as_deref()),
            orders: int_or_zero(self.orders.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
        }
    }
}

#[derive(Debug, QueryableByName)]
struct CountryRow {
    #[diesel(sql_type = Nullable<Text>)]
    country: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    orders: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    profit: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    revenue_share: Option<String>,
}

impl CountryRow {
    fn into_model(self) -> CountryRevenue {
        CountryRevenue {
            country: self.country.unwrap_or_default(),
            revenue: float_or_zero(self.revenue.as_deref()),
            orders: int_or_zero(self.orders.as_deref()),
            profit: float_or_zero(self.profit.as_deref()),
            revenue_share: decimal_string(self.revenue_share.as_deref()),
        }
    }
}
