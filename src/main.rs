mod activation;
mod bootstrap;
mod config;
mod consolidator;
mod delegation;
mod engine;
mod error;
mod intent;
mod ledger;
mod poll;
mod scheduler;
#[cfg(test)]
mod test_support;
mod units;
mod watcher;

use anyhow::{bail, Context};
use dotenv::dotenv;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::CreateIntentRequest;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let app = bootstrap::build(&config).await?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        // Daemon mode: reconcile on the configured interval until
        // interrupted
        None => {
            info!("🔄 payment engine starting");
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = app.scheduler.start(shutdown_rx);

            tokio::signal::ctrl_c().await?;
            info!("shutdown requested, letting the current cycle finish");
            let _ = shutdown_tx.send(true);
            handle.await?;
            info!("✅ payment engine stopped");
        }
        Some("create") => {
            let amount: Decimal = args
                .next()
                .context("usage: engine create <amount> [memo]")?
                .parse()
                .context("amount must be a decimal")?;
            let view = app
                .engine
                .create_intent(CreateIntentRequest {
                    expected_amount: amount,
                    memo: args.next(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Some("show") => {
            let id = parse_intent_id(args.next())?;
            let view = app.engine.get_intent(id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Some("reconcile") => {
            let id = parse_intent_id(args.next())?;
            let summary = app.engine.force_reconcile(id).await?;
            println!(
                "matched={} unmatched={} consolidated={} failed={}",
                summary.matched, summary.unmatched, summary.consolidated, summary.failed
            );
            let view = app.engine.get_intent(id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Some("cycle") => {
            let summary = app.engine.trigger_cycle_now().await?;
            println!(
                "matched={} unmatched={} consolidated={} failed={} errors={}",
                summary.matched,
                summary.unmatched,
                summary.consolidated,
                summary.failed,
                summary.errors
            );
        }
        Some(other) => {
            bail!("unknown command '{other}' (expected create, show, reconcile or cycle)")
        }
    }

    Ok(())
}

fn parse_intent_id(arg: Option<String>) -> anyhow::Result<Uuid> {
    let raw = arg.context("an intent id is required")?;
    Uuid::parse_str(&raw).context("intent id must be a UUID")
}
