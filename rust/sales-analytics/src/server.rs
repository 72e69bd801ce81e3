use crate::{
    cache,
    config::AppConfig,
    db,
    error::{Result, ServiceError},
    filters::{FilterQuery, FilterSet},
    models::{
        AgeRangeRevenue, CategoryRevenue, ChannelMix, ChannelPerformance, ClvBucket,
        CohortRetention, CountryRevenue, CsatBucket, CustomerRevenue, DailyRevenue, DataEnvelope,
        DiscountImpact, FilterFacets, GenderRevenue, KpiSummary, LastUpdate, LocationRevenue,
        MarketingPerformance, NpsBucket, Paginated, PaymentMethodStats, ProductAffinity,
        RegionalPerformance, SatisfactionByCategory, SegmentPerformance, SkuRevenue,
    },
    pagination::{PageQuery, PageRequest},
    query::AnalyticsEngine,
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

type Data<T> = Result<Json<DataEnvelope<T>>>;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_pool(&config).await?;
        let cache = cache::from_config(&config).await;
        let config = Arc::new(config);
        let engine = AnalyticsEngine::new(pool, Arc::clone(&config), cache);
        let state = AppState::new(Arc::clone(&config), engine);

        Ok(Self { config, state })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "sales analytics listening");
        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/kpis", get(kpis))
        .route("/revenue", get(revenue_trends))
        .route("/revenue/categories", get(revenue_by_category))
        .route("/revenue/top-customers", get(top_customers))
        .route("/revenue/top-regions", get(top_regions))
        .route("/revenue/countries", get(revenue_by_country))
        .route("/revenue/age-ranges", get(revenue_by_age_range))
        .route("/revenue/genders", get(revenue_by_gender))
        .route("/revenue/skus", get(revenue_by_sku))
        .route("/customers/clv-distribution", get(clv_distribution))
        .route("/channels/mix", get(channel_mix))
        .route("/channels/performance", get(channel_performance))
        .route("/marketing/performance", get(marketing_performance))
        .route("/marketing/cohort-retention", get(cohort_retention))
        .route("/marketing/product-affinities", get(product_affinities))
        .route("/marketing/discount-impact", get(discount_impact))
        .route("/geographic/regional", get(regional_performance))
        .route("/satisfaction", get(satisfaction_by_category))
        .route("/satisfaction/nps-distribution", get(nps_distribution))
        .route("/satisfaction/csat-distribution", get(csat_distribution))
        .route("/payments", get(payment_methods))
        .route("/segments", get(segment_performance))
        .route("/filters", get(filter_facets))
        .route("/metadata/last-update", get(last_update));

    Router::new()
        .route("/healthz", get(health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Authenticates the caller, then decodes the shared filters.
fn authorize(state: &AppState, headers: &HeaderMap, query: FilterQuery) -> Result<FilterSet> {
    enforce_api_token(headers, &state.config)?;
    FilterSet::from_query(query)
}

fn data<T>(value: T) -> Data<T> {
    Ok(Json(DataEnvelope::new(value)))
}

async fn kpis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<KpiSummary> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.kpis(&filters).await?)
}

async fn revenue_trends(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<DailyRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_trends(&filters).await?)
}

async fn revenue_by_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<CategoryRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_by_category(&filters).await?)
}

async fn top_customers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<CustomerRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.top_customers(&filters).await?)
}

async fn top_regions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<LocationRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.top_regions(&filters).await?)
}

async fn revenue_by_country(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<CountryRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_by_country(&filters).await?)
}

async fn revenue_by_age_range(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<AgeRangeRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_by_age_range(&filters).await?)
}

async fn revenue_by_gender(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<GenderRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_by_gender(&filters).await?)
}

async fn revenue_by_sku(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<SkuRevenue>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.revenue_by_sku(&filters).await?)
}

async fn clv_distribution(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<ClvBucket>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.clv_distribution(&filters).await?)
}

async fn channel_mix(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<ChannelMix>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.channel_mix(&filters).await?)
}

async fn channel_performance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<ChannelPerformance>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.channel_performance(&filters).await?)
}

async fn marketing_performance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<MarketingPerformance>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.marketing_performance(&filters).await?)
}

async fn cohort_retention(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<CohortRetention>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.cohort_retention(&filters).await?)
}

async fn product_affinities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<ProductAffinity>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.product_affinities(&filters).await?)
}

async fn discount_impact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<DiscountImpact> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.discount_impact(&filters).await?)
}

async fn regional_performance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
    Query(paging): Query<PageQuery>,
) -> Result<Json<Paginated<RegionalPerformance>>> {
    let filters = authorize(&state, &headers, query)?;
    let page = PageRequest::resolve(&paging, &state.config)?;
    Ok(Json(state.engine.regional_performance(&filters, page).await?))
}

async fn satisfaction_by_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<SatisfactionByCategory>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.satisfaction_by_category(&filters).await?)
}

async fn nps_distribution(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<NpsBucket>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.nps_distribution(&filters).await?)
}

async fn csat_distribution(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<CsatBucket>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.csat_distribution(&filters).await?)
}

async fn payment_methods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<PaymentMethodStats>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.payment_methods(&filters).await?)
}

async fn segment_performance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Data<Vec<SegmentPerformance>> {
    let filters = authorize(&state, &headers, query)?;
    data(state.engine.segment_performance(&filters).await?)
}

async fn filter_facets(State(state): State<AppState>, headers: HeaderMap) -> Data<FilterFacets> {
    enforce_api_token(&headers, &state.config)?;
    data(state.engine.filter_facets().await?)
}

async fn last_update(State(state): State<AppState>, headers: HeaderMap) -> Data<LastUpdate> {
    enforce_api_token(&headers, &state.config)?;
    data(state.engine.last_update().await?)
}

fn enforce_api_token(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_token {
        let provided = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token);

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}
