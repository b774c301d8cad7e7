//! Indexer pipeline binary
//!
//! `serve` exposes every configured indexer as a Torznab/Newznab endpoint;
//! `search`, `caps` and `list` query the pipeline from the command line.

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use indexer_pipeline::app::{AppState, build_app};
use indexer_pipeline::cli::{CliOptions, Command};
use indexer_pipeline::config::Config;
use indexer_pipeline::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let options = CliOptions::from_args()?;
    let state = AppState::build(config).await?;

    match &options.command {
        Command::Serve => serve(state).await,
        Command::List => {
            for indexer in state.manager.list() {
                println!(
                    "{}\t{}\t{}\t{}",
                    indexer.id(),
                    indexer.name(),
                    indexer.definition.implementation,
                    indexer.protocol
                );
            }
            Ok(())
        }
        Command::Caps { indexer } => {
            let caps = state
                .manager
                .capabilities(indexer)
                .await
                .with_context(|| format!("Failed to load capabilities of {}", indexer))?;
            println!("{}", serde_json::to_string_pretty(&*caps)?);
            Ok(())
        }
        Command::Search { indexers, .. } => {
            let Some(criteria) = options.command.criteria() else {
                bail!("not a search command");
            };
            let ids = (!indexers.is_empty()).then_some(indexers.as_slice());

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let results = state.manager.search(&criteria, ids, &cancel).await;
            for result in &results {
                match &result.error {
                    Some(e) => eprintln!("{}: error after {}ms: {}", result.indexer_name, result.elapsed_ms, e),
                    None => eprintln!(
                        "{}: {} releases in {}ms",
                        result.indexer_name,
                        result.releases.len(),
                        result.elapsed_ms
                    ),
                }
            }
            let releases: Vec<_> = results.iter().flat_map(|r| &r.releases).collect();
            println!("{}", serde_json::to_string_pretty(&releases)?);
            Ok(())
        }
    }
}

async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.listen_addr;
    let app = build_app(&state);

    tracing::info!("Listening on {}", addr);
    if state.config.api_key.is_none() {
        tracing::warn!("API_KEY is not set, the Torznab endpoints accept any apikey");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
