//! HTTP server exposing each generator's endpoint.
//!
//! Every configured generator answers `GET <endpoint>`; path segments declared as
//! `:name` in the endpoint become path parameters, the query string becomes the query
//! parameters, and `?format=` picks the output format (`rss` when absent).

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, RawQuery};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Args;
use tokio::sync::{Notify, oneshot};

use super::AppContext;
use crate::converter::{Converter, DEFAULT_FORMAT};
use crate::core::FeedgenError;
use crate::generator::{FeedGenerators, Parameters, parse_query};

pub const DEFAULT_PORT: u16 = 8080;

/// How often `--watch` checks the configuration file.
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Command to serve every configured generator over HTTP.
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Port to listen on; falls back to `PORT`, then 8080
    #[arg(short, long, env = "FEEDGEN_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Reload the configuration and restart the server when the file changes
    #[arg(short, long)]
    watch: bool,
}

enum Stop {
    Interrupted,
    Reload,
}

impl ServeCommand {
    fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|port| port.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub async fn execute(self, context: &AppContext) -> Result<()> {
        let address = format!("{}:{}", self.bind, self.port());
        let reload = Arc::new(Notify::new());
        let watcher = self
            .watch
            .then(|| tokio::spawn(watch_config(context.config_path.clone(), Arc::clone(&reload))));

        let outcome = serve_until_interrupted(context, &address, &reload).await;
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        outcome
    }
}

async fn serve_until_interrupted(
    context: &AppContext,
    address: &str,
    reload: &Arc<Notify>,
) -> Result<()> {
    loop {
        let app = router(Arc::clone(&context.generators))?;
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))?;
        tracing::info!(
            "Serving {} generator(s) on http://{}",
            context.generators.names().len(),
            address
        );

        let (stopped, reason) = oneshot::channel();
        let reload = Arc::clone(reload);
        let signal = async move {
            let stop = tokio::select! {
                _ = tokio::signal::ctrl_c() => Stop::Interrupted,
                () = reload.notified() => Stop::Reload,
            };
            let _ = stopped.send(stop);
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .context("HTTP server failed")?;

        match reason.await.unwrap_or(Stop::Interrupted) {
            Stop::Interrupted => {
                tracing::info!("Shutting down");
                return Ok(());
            }
            Stop::Reload => {
                if let Err(e) = context.reload() {
                    tracing::error!("Keeping the previous configuration: {:#}", e);
                }
                tracing::info!("Restarting server");
            }
        }
    }
}

async fn watch_config(path: PathBuf, reload: Arc<Notify>) {
    async fn modified(path: &std::path::Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.and_then(|metadata| metadata.modified()).ok()
    }

    let mut last = modified(&path).await;
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    loop {
        interval.tick().await;
        let current = modified(&path).await;
        if current.is_some() && current != last {
            last = current;
            tracing::info!("Configuration {} changed", path.display());
            reload.notify_one();
        }
    }
}

/// One `GET` route per configured generator.
///
/// # Errors
///
/// [`FeedgenError::InvalidEndpoint`] when two endpoints overlap in a way the router
/// cannot tell apart.
pub fn router(generators: Arc<FeedGenerators>) -> Result<Router> {
    let mut router = Router::new();
    for (name, endpoint) in generators.endpoints() {
        let handler_generators = Arc::clone(&generators);
        let handler_name = name.clone();
        let handler = move |path: Option<Path<HashMap<String, String>>>, RawQuery(query): RawQuery| {
            let generators = Arc::clone(&handler_generators);
            let name = handler_name.clone();
            async move {
                let parameters: Parameters =
                    path.map(|Path(parameters)| parameters.into_iter().collect()).unwrap_or_default();
                respond(generators, name, parameters, query).await
            }
        };

        let current = router;
        router = catch_unwind(AssertUnwindSafe(|| current.route(&endpoint, get(handler)))).map_err(
            |_| FeedgenError::InvalidEndpoint {
                generator: name.clone(),
                endpoint: endpoint.clone(),
                reason: "conflicts with another endpoint".to_string(),
            },
        )?;
        tracing::debug!("Route GET {} -> {}", endpoint, name);
    }
    Ok(router)
}

async fn respond(
    generators: Arc<FeedGenerators>,
    name: String,
    parameters: Parameters,
    query: Option<String>,
) -> Response {
    let query = parse_query(query.as_deref().unwrap_or_default());
    let format = query
        .get("format")
        .and_then(|values| values.first())
        .map_or(DEFAULT_FORMAT.name(), String::as_str);
    let converter: Converter = match format.parse() {
        Ok(converter) => converter,
        Err(e) => return failure(&name, &e),
    };

    let generator_name = name.clone();
    let result = tokio::task::spawn_blocking(move || {
        let feed = generators.generate(&generator_name, &parameters, &query)?;
        converter.convert(&feed)
    })
    .await;

    match result {
        Ok(Ok(rendered)) => {
            ([(header::CONTENT_TYPE, rendered.content_type)], rendered.body).into_response()
        }
        Ok(Err(e)) => failure(&name, &e),
        Err(e) => {
            tracing::error!("Generation task for '{}' failed: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "generation task failed").into_response()
        }
    }
}

fn failure(name: &str, error: &FeedgenError) -> Response {
    tracing::error!("Failed to generate '{}': {}", name, error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
}
