use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use covid_ql::{api, config::Config, QueryEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(config.log_level()?)
        .compact()
        .init();

    info!("Starting covid-ql...");

    // Load the case table once; the engine shares it read-only from here on
    let source = config.table_source();
    let table = source
        .load()
        .await
        .with_context(|| format!("Failed to load case table from {}", source.describe()))?;
    info!(
        rows = table.num_rows(),
        first = ?table.first_date().map(|d| d.column_name()),
        last = ?table.last_date().map(|d| d.column_name()),
        "Case table loaded"
    );

    let engine = QueryEngine::new(table);

    api::serve(engine, config.bind).await?;

    Ok(())
}
