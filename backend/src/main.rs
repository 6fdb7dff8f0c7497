//! `docbatch` server binary.
//!
//! Reads the configuration (`DOCBATCH_CONFIG` plus `DOCBATCH_*` overrides),
//! assembles the renderer and notifier stacks and serves the HTTP API.

use actix_web::{web, App, HttpServer};
use docbatch_backend::config::AppConfig;
use docbatch_backend::job_controller::ledger::BatchLedger;
use docbatch_backend::job_controller::retention::{self, RetentionPolicy};
use docbatch_backend::job_controller::{BatchEngine, EngineDeps};
use docbatch_backend::notify::email::{EmailNotifier, PickupDirTransport};
use docbatch_backend::notify::{LogNotifier, MultiNotifier, Notifier};
use docbatch_backend::render::pdf::PdfRenderer;
use docbatch_backend::render::routing::RoutingRenderer;
use docbatch_backend::render::text::TextRenderer;
use docbatch_backend::render::upstream::UpstreamRenderer;
use docbatch_backend::render::Renderer;
use docbatch_backend::services;
use env_logger::Env;
use log::info;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Entry point of the server.
///
/// The engine is shared with every worker thread of the `HttpServer` as
/// `web::Data`. The retention sweep runs as a background task for the life
/// of the process.
///
/// # Returns
/// An `io::Result` that fails when the configuration is invalid, a
/// directory cannot be created, or the address cannot be bound.
#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let config = AppConfig::load().map_err(io::Error::other)?;
    tokio::fs::create_dir_all(&config.engine.working_root).await?;

    let upstream: Option<Arc<dyn Renderer>> = match &config.renderer.upstream_url {
        Some(url) => {
            let renderer = UpstreamRenderer::new(
                url.clone(),
                config.renderer.upstream_token.clone(),
                config.engine.render_timeout(),
            )
            .map_err(io::Error::other)?;
            info!("Upstream renderer at {}", url);
            Some(Arc::new(renderer))
        }
        None => None,
    };
    let renderer = RoutingRenderer::new(
        Arc::new(TextRenderer),
        Arc::new(PdfRenderer::new(
            config.renderer.fonts_dir.clone(),
            config.renderer.font_family.clone(),
        )),
        upstream,
    );

    let mut notifier = MultiNotifier::new(vec![Arc::new(LogNotifier)]);
    if let Some(dir) = &config.notifications.pickup_dir {
        tokio::fs::create_dir_all(dir).await?;
        info!("Mail notifications written to {}", dir.display());
        notifier.push(Arc::new(EmailNotifier::new(
            config.notifications.from_address.clone(),
            PickupDirTransport::new(dir.clone()),
        )));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    let ledger = match &config.ledger_path {
        Some(path) => {
            info!("Batch ledger at {}", path.display());
            Some(BatchLedger::open(path).map_err(io::Error::other)?)
        }
        None => None,
    };

    let engine = BatchEngine::new(
        config.engine.clone(),
        EngineDeps {
            renderer: Arc::new(renderer),
            notifier,
            ledger,
            public_base_url: config.server.public_base_url.clone(),
        },
    );

    retention::spawn(
        engine.clone(),
        RetentionPolicy::from(&config.retention),
        Duration::from_secs(config.retention.sweep_interval_secs),
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    info!("Server running at http://{}:{}", host, port);

    let engine = web::Data::new(engine);
    HttpServer::new(move || {
        App::new()
            .app_data(web::JsonConfig::default().limit(services::JSON_LIMIT))
            .app_data(engine.clone())
            .configure(services::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
