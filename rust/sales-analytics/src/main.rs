use sales_analytics::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    sales_analytics::run().await
}
