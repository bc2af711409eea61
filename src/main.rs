use rask_metrics_exporter::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await
}
