use crate::cli::ServeArgs;
use crate::infra::{build_engine, load_seed, AppState};
use crate::routes::with_rule_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use status_rules::config::AppConfig;
use status_rules::error::AppError;
use status_rules::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(seed) = args.seed.take() {
        config.catalog_seed = Some(seed);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = build_engine(config.engine.clone());
    match &config.catalog_seed {
        Some(path) => {
            load_seed(&engine, path)?;
        }
        None => warn!("no catalog seed configured; starting with an empty catalog"),
    }

    let app = with_rule_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        tie_policy = ?config.engine.tie_policy,
        document_fallback = ?config.engine.document_fallback,
        "status rule service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
