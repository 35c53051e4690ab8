use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cache;
mod cli;
mod config;
mod corpus;
mod images;
mod interactions;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use app::{AppFactory, RecommendRequest};
use cli::Command;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // also installs the log -> tracing bridge
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("logging already initialized: {err}");
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let config = AppFactory::load_config()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_command(config, args.command))
}

async fn run_command(config: config::Config, command: Command) -> anyhow::Result<()> {
    if let Command::Serve { addr } = command {
        let addr = addr.unwrap_or_else(|| config.server.listen_addr.clone());
        return web::start_daemon(config, addr).await;
    }

    let service = AppFactory::create_service(&config)?;

    match command {
        Command::Recommend {
            text,
            image,
            top_k,
            weight_text,
            category,
            user,
        } => {
            let timeout = Duration::from_secs(config.source.request_timeout_secs);
            let image = match image {
                Some(source) => {
                    images::load_query_image(&reqwest::Client::new(), &source, timeout).await
                }
                None => None,
            };

            let needs_text = text.as_deref().is_some_and(|t| !t.trim().is_empty());
            let models = &config.models;
            service
                .activate_models(
                    models.text_model.as_deref().filter(|_| needs_text),
                    models.image_model.as_deref().filter(|_| image.is_some()),
                )
                .await;

            let recommendation = service
                .recommend(RecommendRequest {
                    text,
                    image,
                    top_k,
                    weight_text,
                    category,
                    user_id: user,
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&recommendation)?);
        }

        Command::Categories { force } => {
            let index = service.categories(force).await;
            if index.categories().is_empty() {
                log::warn!("corpus has no categories");
            }
            println!("{}", serde_json::to_string_pretty(index.as_ref())?);
        }

        Command::Browse { category } => {
            let item = service.browse(&category).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }

        Command::Serve { .. } => {}
    }

    service.flush_interactions().await;

    Ok(())
}
