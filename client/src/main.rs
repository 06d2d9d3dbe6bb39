//! `fieldsync` - inspect and maintain a local FieldSync store.
//!
//! ```text
//! fieldsync status     counts by sync state
//! fieldsync failed     rejected records with their reasons
//! fieldsync export     full snapshot of the local store as JSON
//! fieldsync requeue    put every failed record back in the queue
//! ```

use fieldsync_client::{db, survey_schema, Config, LocalStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: fieldsync <status|failed|export|requeue>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "status".into());

    tracing::debug!(database = %config.database_url, "opening local store");
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    let local = LocalStore::open(survey_schema(), pool).await?;

    let reset = local.recover().await?;
    if !reset.is_empty() {
        tracing::warn!(records = reset.len(), "reset interrupted replays to pending");
    }

    let output = match command.as_str() {
        "status" => serde_json::to_string_pretty(&local.summary().await)?,
        "failed" => serde_json::to_string_pretty(&local.failed_records().await)?,
        "export" => local.export_snapshot().await.to_json_pretty()?,
        "requeue" => {
            let requeued = local.requeue_failed().await?;
            tracing::info!(records = requeued.len(), "requeued failed records");
            serde_json::to_string_pretty(&local.summary().await)?
        }
        other => {
            eprintln!("unknown command '{}'\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    println!("{}", output);
    Ok(())
}
