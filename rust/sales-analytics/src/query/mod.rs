mod channels;
mod customers;
mod demographics;
mod facets;
mod geographic;
mod kpis;
mod marketing;
mod metadata;
mod payments;
mod products;
mod revenue;
mod satisfaction;
mod segments;

use crate::{
    cache::{self, ResponseCache},
    config::AppConfig,
    db::{PgPool, SalesConnectionManager},
    error::{Result, ServiceError},
    filters::{build_predicate, FilterField, FilterSet, Predicate},
    models::{
        AgeRangeRevenue, CategoryRevenue, ChannelMix, ChannelPerformance, ClvBucket,
        CohortRetention, CountryRevenue, CsatBucket, CustomerRevenue, DailyRevenue,
        DiscountImpact, FilterFacets, GenderRevenue, KpiSummary, LastUpdate, LocationRevenue,
        MarketingPerformance, NpsBucket, Paginated, PaymentMethodStats, ProductAffinity,
        RegionalPerformance, SatisfactionByCategory, SegmentPerformance, SkuRevenue,
    },
    pagination::PageRequest,
};
use bb8::PooledConnection;
use chrono::NaiveDate;
use diesel::{
    pg::Pg,
    query_builder::{BoxedSqlQuery, SqlQuery},
    sql_query,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, future::Future, sync::Arc};
use tracing::{debug, error};

/// Positional bind value for a raw aggregation statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlBindValue {
    Date(NaiveDate),
    Text(String),
    BigInt(i64),
}

impl SqlBindValue {
    fn apply<'a>(
        &self,
        query: BoxedSqlQuery<'a, Pg, SqlQuery>,
    ) -> BoxedSqlQuery<'a, Pg, SqlQuery> {
        use diesel::sql_types::{Date, Int8, Text};
        match self {
            SqlBindValue::Date(value) => query.bind::<Date, _>(*value),
            SqlBindValue::Text(value) => query.bind::<Text, _>(value.clone()),
            SqlBindValue::BigInt(value) => query.bind::<Int8, _>(*value),
        }
    }

    fn into_bind_param(self) -> BindParam {
        match self {
            SqlBindValue::Date(value) => BindParam::Date(crate::filters::format_date(value)),
            SqlBindValue::Text(value) => BindParam::Text(value),
            SqlBindValue::BigInt(value) => BindParam::Int(value),
        }
    }
}

/// Serialisable form of a bind value, used when a statement is rendered
/// rather than executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum BindParam {
    Date(String),
    Text(String),
    Int(i64),
}

/// A statement as it would be sent to the database, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<BindParam>,
}

/// SQL text plus its positional binds.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    sql: String,
    binds: Vec<SqlBindValue>,
}

impl Statement {
    fn new(sql: String, binds: Vec<SqlBindValue>) -> Self {
        Self { sql, binds }
    }

    /// Statement whose only binds are the predicate's.
    fn filtered(sql: String, predicate: &Predicate) -> Self {
        Self::new(sql, predicate.bind_values())
    }

    fn into_query(self) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        let mut query = sql_query(self.sql).into_boxed::<Pg>();
        for bind in &self.binds {
            query = bind.apply(query);
        }
        query
    }

    fn render(&self) -> RenderedStatement {
        let (sql, params) = self.to_sql_and_params();
        RenderedStatement { sql, params }
    }

    pub(crate) fn to_sql_and_params(&self) -> (String, Vec<BindParam>) {
        (
            self.sql.clone(),
            self.binds
                .iter()
                .cloned()
                .map(SqlBindValue::into_bind_param)
                .collect(),
        )
    }
}

/// `WHERE` body shared by every windowed aggregation.
fn window_clause(predicate: &Predicate) -> String {
    let mut clause =
        String::from("transaction_date >= $1::DATE AND transaction_date < $2::DATE");
    if !predicate.fragment().is_empty() {
        clause.push(' ');
        clause.push_str(predicate.fragment());
    }
    clause
}

/// Every aggregation the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Kpis,
    RevenueTrends,
    RevenueByCategory,
    TopCustomers,
    TopRegions,
    RevenueByCountry,
    RevenueByAgeRange,
    RevenueByGender,
    RevenueBySku,
    ClvDistribution,
    ChannelMix,
    ChannelPerformance,
    MarketingPerformance,
    CohortRetention,
    ProductAffinities,
    DiscountImpact,
    RegionalPerformance,
    SatisfactionByCategory,
    NpsDistribution,
    CsatDistribution,
    PaymentMethods,
    SegmentPerformance,
    FilterFacets,
    LastUpdate,
}

impl Metric {
    pub const ALL: [Metric; 24] = [
        Metric::Kpis,
        Metric::RevenueTrends,
        Metric::RevenueByCategory,
        Metric::TopCustomers,
        Metric::TopRegions,
        Metric::RevenueByCountry,
        Metric::RevenueByAgeRange,
        Metric::RevenueByGender,
        Metric::RevenueBySku,
        Metric::ClvDistribution,
        Metric::ChannelMix,
        Metric::ChannelPerformance,
        Metric::MarketingPerformance,
        Metric::CohortRetention,
        Metric::ProductAffinities,
        Metric::DiscountImpact,
        Metric::RegionalPerformance,
        Metric::SatisfactionByCategory,
        Metric::NpsDistribution,
        Metric::CsatDistribution,
        Metric::PaymentMethods,
        Metric::SegmentPerformance,
        Metric::FilterFacets,
        Metric::LastUpdate,
    ];

    /// Cache key prefix; `None` for uncached metrics.
    pub fn namespace(self) -> Option<&'static str> {
        let namespace = match self {
            Metric::Kpis => "kpis:v1",
            Metric::RevenueTrends => "revenue:trends",
            Metric::RevenueByCategory => "revenue:categories",
            Metric::TopCustomers => "revenue:customers",
            Metric::TopRegions => "revenue:regions",
            Metric::RevenueByCountry => "revenue:country",
            Metric::RevenueByAgeRange => "revenue:age-ranges",
            Metric::RevenueByGender => "revenue:genders",
            Metric::RevenueBySku => "revenue:skus",
            Metric::ClvDistribution => "customer:clv:distribution",
            Metric::ChannelMix => "channel:mix",
            Metric::ChannelPerformance => "channel:performance",
            Metric::MarketingPerformance => "marketing:performance",
            Metric::CohortRetention => "marketing:cohort-retention",
            Metric::ProductAffinities => "marketing:product-affinities",
            Metric::DiscountImpact => "marketing:discount-impact",
            Metric::RegionalPerformance => "geographic:regional",
            Metric::SatisfactionByCategory => "satisfaction:category",
            Metric::NpsDistribution => "satisfaction:nps:distribution",
            Metric::CsatDistribution => "satisfaction:csat:distribution",
            Metric::PaymentMethods => "payment:methods",
            Metric::SegmentPerformance => "segment:performance",
            Metric::FilterFacets => "filters:v1",
            Metric::LastUpdate => return None,
        };
        Some(namespace)
    }

    /// Optional filters left out of the predicate because the metric groups
    /// by that column.
    pub fn excluded_filters(self) -> &'static [FilterField] {
        match self {
            Metric::RevenueByCategory
            | Metric::ProductAffinities
            | Metric::SatisfactionByCategory => &[FilterField::ProductCategory],
            Metric::TopRegions
            | Metric::RevenueByCountry
            | Metric::MarketingPerformance
            | Metric::RegionalPerformance => &[FilterField::Country],
            Metric::ChannelMix | Metric::ChannelPerformance => &[FilterField::MarketingChannel],
            Metric::SegmentPerformance => &[FilterField::CustomerSegment],
            _ => &[],
        }
    }

    pub fn predicate(self, filters: &FilterSet) -> Predicate {
        build_predicate(filters, self.excluded_filters())
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::Kpis => "kpis",
            Metric::RevenueTrends => "revenue_trends",
            Metric::RevenueByCategory => "revenue_by_category",
            Metric::TopCustomers => "top_customers",
            Metric::TopRegions => "top_regions",
            Metric::RevenueByCountry => "revenue_by_country",
            Metric::RevenueByAgeRange => "revenue_by_age_range",
            Metric::RevenueByGender => "revenue_by_gender",
            Metric::RevenueBySku => "revenue_by_sku",
            Metric::ClvDistribution => "clv_distribution",
            Metric::ChannelMix => "channel_mix",
            Metric::ChannelPerformance => "channel_performance",
            Metric::MarketingPerformance => "marketing_performance",
            Metric::CohortRetention => "cohort_retention",
            Metric::ProductAffinities => "product_affinities",
            Metric::DiscountImpact => "discount_impact",
            Metric::RegionalPerformance => "regional_performance",
            Metric::SatisfactionByCategory => "satisfaction_by_category",
            Metric::NpsDistribution => "nps_distribution",
            Metric::CsatDistribution => "csat_distribution",
            Metric::PaymentMethods => "payment_methods",
            Metric::SegmentPerformance => "segment_performance",
            Metric::FilterFacets => "filter_facets",
            Metric::LastUpdate => "last_update",
        }
    }

    /// Renders the statements this metric issues for `filters` without
    /// touching the database. Facets and last-update use the query builder
    /// directly and render nothing.
    pub fn render(self, filters: &FilterSet) -> Vec<RenderedStatement> {
        self.statements(filters)
            .iter()
            .map(Statement::render)
            .collect()
    }

    /// Statements this metric issues for `filters`, in execution order.
    fn statements(self, filters: &FilterSet) -> Vec<Statement> {
        let predicate = self.predicate(filters);
        match self {
            Metric::Kpis => vec![
                kpis::statement(&predicate),
                kpis::statement(&self.predicate(&filters.with_window(filters.window.preceding()))),
            ],
            Metric::RevenueTrends => vec![revenue::trends_statement(&predicate)],
            Metric::RevenueByCategory => vec![revenue::categories_statement(&predicate)],
            Metric::TopCustomers => vec![revenue::top_customers_statement(&predicate)],
            Metric::TopRegions => vec![revenue::top_regions_statement(&predicate)],
            Metric::RevenueByCountry => vec![revenue::countries_statement(&predicate)],
            Metric::RevenueByAgeRange => vec![demographics::age_ranges_statement(&predicate)],
            Metric::RevenueByGender => vec![demographics::genders_statement(&predicate)],
            Metric::RevenueBySku => vec![products::skus_statement(&predicate)],
            Metric::ClvDistribution => vec![customers::clv_statement(&predicate)],
            Metric::ChannelMix => vec![channels::mix_statement(&predicate)],
            Metric::ChannelPerformance => vec![channels::performance_statement(&predicate)],
            Metric::MarketingPerformance => vec![marketing::performance_statement(&predicate)],
            Metric::CohortRetention => vec![marketing::cohort_statement(&predicate)],
            Metric::ProductAffinities => vec![marketing::affinity_statement(&predicate)],
            Metric::DiscountImpact => vec![marketing::discount_statement(&predicate)],
            Metric::RegionalPerformance => {
                let page = PageRequest::first(20);
                vec![
                    geographic::count_statement(&predicate),
                    geographic::page_statement(&predicate, &page),
                ]
            }
            Metric::SatisfactionByCategory => vec![satisfaction::category_statement(&predicate)],
            Metric::NpsDistribution => vec![satisfaction::nps_statement(&predicate)],
            Metric::CsatDistribution => vec![satisfaction::csat_statement(&predicate)],
            Metric::PaymentMethods => vec![payments::methods_statement(&predicate)],
            Metric::SegmentPerformance => vec![segments::performance_statement(&predicate)],
            Metric::FilterFacets | Metric::LastUpdate => Vec::new(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Connection<'a> = PooledConnection<'a, SalesConnectionManager>;

/// Runs aggregations against the pool, consulting the response cache first.
#[derive(Clone)]
pub struct AnalyticsEngine {
    pool: PgPool,
    config: Arc<AppConfig>,
    cache: Arc<dyn ResponseCache>,
}

impl AnalyticsEngine {
    pub fn new(pool: PgPool, config: Arc<AppConfig>, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            pool,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    async fn connection(&self) -> Result<Connection<'_>> {
        self.pool.get().await.map_err(|err| {
            error!(error = ?err, "failed to acquire database connection");
            ServiceError::Internal(anyhow::anyhow!("{err:?}"))
        })
    }

    async fn bounded<T>(&self, metric: Metric, work: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => {
                error!(%metric, timeout_secs = limit.as_secs(), "aggregation timed out");
                Err(ServiceError::Internal(anyhow::anyhow!(
                    "{metric} exceeded {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    async fn cached<T, Fut>(
        &self,
        metric: Metric,
        filters: Option<&FilterSet>,
        extras: &[(&str, String)],
        work: Fut,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        let Some(namespace) = metric.namespace() else {
            return self.bounded(metric, work).await;
        };
        let key = match filters {
            Some(filters) => cache::cache_key(namespace, filters, extras),
            None => namespace.to_string(),
        };
        debug!(%metric, %key, "resolving aggregation");

        cache::get_or_compute(self.cache.as_ref(), &key, self.config.cache_ttl, move || {
            self.bounded(metric, work)
        })
        .await
    }

    /// Both windows run in sequence on one pooled connection, so a request
    /// never holds a connection while waiting for another.
    pub async fn kpis(&self, filters: &FilterSet) -> Result<KpiSummary> {
        let metric = Metric::Kpis;
        self.cached(metric, Some(filters), &[], async {
            let current_predicate = metric.predicate(filters);
            let previous_predicate =
                metric.predicate(&filters.with_window(filters.window.preceding()));

            let mut conn = self.connection().await?;
            let current = kpis::window(&mut conn, &current_predicate).await?;
            let previous = kpis::window(&mut conn, &previous_predicate).await?;

            kpis::summarize(filters.window, current, previous)
        })
        .await
    }

    pub async fn revenue_trends(&self, filters: &FilterSet) -> Result<Vec<DailyRevenue>> {
        let metric = Metric::RevenueTrends;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            revenue::trends(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn revenue_by_category(&self, filters: &FilterSet) -> Result<Vec<CategoryRevenue>> {
        let metric = Metric::RevenueByCategory;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            revenue::categories(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn top_customers(&self, filters: &FilterSet) -> Result<Vec<CustomerRevenue>> {
        let metric = Metric::TopCustomers;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            revenue::top_customers(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn top_regions(&self, filters: &FilterSet) -> Result<Vec<LocationRevenue>> {
        let metric = Metric::TopRegions;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            revenue::top_regions(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn revenue_by_country(&self, filters: &FilterSet) -> Result<Vec<CountryRevenue>> {
        let metric = Metric::RevenueByCountry;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            revenue::countries(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn revenue_by_age_range(&self, filters: &FilterSet) -> Result<Vec<AgeRangeRevenue>> {
        let metric = Metric::RevenueByAgeRange;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            demographics::age_ranges(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn revenue_by_gender(&self, filters: &FilterSet) -> Result<Vec<GenderRevenue>> {
        let metric = Metric::RevenueByGender;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            demographics::genders(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn revenue_by_sku(&self, filters: &FilterSet) -> Result<Vec<SkuRevenue>> {
        let metric = Metric::RevenueBySku;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            products::skus(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn clv_distribution(&self, filters: &FilterSet) -> Result<Vec<ClvBucket>> {
        let metric = Metric::ClvDistribution;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            customers::clv_distribution(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn channel_mix(&self, filters: &FilterSet) -> Result<Vec<ChannelMix>> {
        let metric = Metric::ChannelMix;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            channels::mix(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn channel_performance(
        &self,
        filters: &FilterSet,
    ) -> Result<Vec<ChannelPerformance>> {
        let metric = Metric::ChannelPerformance;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            channels::performance(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn marketing_performance(
        &self,
        filters: &FilterSet,
    ) -> Result<Vec<MarketingPerformance>> {
        let metric = Metric::MarketingPerformance;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            marketing::performance(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn cohort_retention(&self, filters: &FilterSet) -> Result<Vec<CohortRetention>> {
        let metric = Metric::CohortRetention;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            marketing::cohort_retention(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn product_affinities(&self, filters: &FilterSet) -> Result<Vec<ProductAffinity>> {
        let metric = Metric::ProductAffinities;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            marketing::product_affinities(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn discount_impact(&self, filters: &FilterSet) -> Result<DiscountImpact> {
        let metric = Metric::DiscountImpact;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            marketing::discount_impact(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    /// Count and page statements share one pooled connection.
    pub async fn regional_performance(
        &self,
        filters: &FilterSet,
        page: PageRequest,
    ) -> Result<Paginated<RegionalPerformance>> {
        let metric = Metric::RegionalPerformance;
        let extras = [
            ("limit", page.limit.to_string()),
            ("page", page.page.to_string()),
        ];
        self.cached(metric, Some(filters), &extras, async {
            let predicate = metric.predicate(filters);
            let mut conn = self.connection().await?;
            let total = geographic::count(&mut conn, &predicate).await?;
            let rows = geographic::page(&mut conn, &predicate, &page).await?;

            Ok(Paginated::new(rows, page.meta(total)))
        })
        .await
    }

    pub async fn satisfaction_by_category(
        &self,
        filters: &FilterSet,
    ) -> Result<Vec<SatisfactionByCategory>> {
        let metric = Metric::SatisfactionByCategory;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            satisfaction::by_category(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn nps_distribution(&self, filters: &FilterSet) -> Result<Vec<NpsBucket>> {
        let metric = Metric::NpsDistribution;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            satisfaction::nps_distribution(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn csat_distribution(&self, filters: &FilterSet) -> Result<Vec<CsatBucket>> {
        let metric = Metric::CsatDistribution;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            satisfaction::csat_distribution(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn payment_methods(&self, filters: &FilterSet) -> Result<Vec<PaymentMethodStats>> {
        let metric = Metric::PaymentMethods;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            payments::methods(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn segment_performance(
        &self,
        filters: &FilterSet,
    ) -> Result<Vec<SegmentPerformance>> {
        let metric = Metric::SegmentPerformance;
        self.cached(metric, Some(filters), &[], async {
            let mut conn = self.connection().await?;
            segments::performance(&mut conn, &metric.predicate(filters)).await
        })
        .await
    }

    pub async fn filter_facets(&self) -> Result<FilterFacets> {
        self.cached(Metric::FilterFacets, None, &[], async {
            let mut conn = self.connection().await?;
            facets::load(&mut conn).await
        })
        .await
    }

    pub async fn last_update(&self) -> Result<LastUpdate> {
        self.cached(Metric::LastUpdate, None, &[], async {
            let mut conn = self.connection().await?;
            metadata::last_update(&mut conn).await
        })
        .await
    }
}
