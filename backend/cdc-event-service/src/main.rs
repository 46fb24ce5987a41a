use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use cdc_event_service::config::Config;
use cdc_event_service::metrics::{serve_metrics, CdcMetrics, ConsumerMetrics};
use cdc_event_service::services::{
    CdcEventConsumer, JsonLinesLogSink, KafkaMessageSource, LogSink, OperationEmitter,
    ReconciliationEngine, TracingLogSink,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // Structured JSON logging; canonical event records go to the `cdc_events` target
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cdc_event_service=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_line_number(true)
                .with_target(true),
        )
        .init();

    tracing::info!("Starting cdc-event-service");

    let config = Config::from_env().context("Failed to load configuration")?;

    let registry = prometheus::default_registry();
    let cdc_metrics = CdcMetrics::new(registry).context("Failed to register CDC metrics")?;
    let consumer_metrics =
        ConsumerMetrics::new(registry).context("Failed to register consumer metrics")?;

    let sink: Arc<dyn LogSink> = match &config.reconciler.event_log_path {
        Some(path) => Arc::new(
            JsonLinesLogSink::open(path).context("Failed to open CDC event log file")?,
        ),
        None => Arc::new(TracingLogSink::new()),
    };

    let engine = ReconciliationEngine::new(
        &config.reconciler,
        OperationEmitter::new(cdc_metrics, sink),
    );
    let source =
        KafkaMessageSource::new(&config.kafka).context("Failed to create Kafka message source")?;
    let mut consumer = CdcEventConsumer::new(source, engine, consumer_metrics);

    // Spawn the consumer loop; it stops once the HTTP server has shut down
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let consumer_handle = tokio::spawn(async move {
        tracing::info!("CDC event consumer task started");
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = consumer.run_until(shutdown).await {
            tracing::error!("CDC event consumer failed: {:?}", e);
        }
    });

    let http_port = config.http_port;
    tracing::info!("Starting HTTP server on 0.0.0.0:{}", http_port);

    let server_result = HttpServer::new(move || {
        App::new()
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(("0.0.0.0", http_port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error");

    let _ = shutdown_tx.send(());
    if let Err(e) = consumer_handle.await {
        tracing::error!("CDC event consumer task panicked: {:?}", e);
    }

    tracing::info!("cdc-event-service stopped");
    server_result
}
