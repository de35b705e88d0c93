use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use status_rules::engine::{
    AuditError, AuditEvent, AuditSink, CatalogSeed, EngineConfig, InMemoryRuleStore, RuleEngine,
    SeedSummary,
};
use status_rules::error::AppError;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ServiceEngine = RuleEngine<InMemoryRuleStore, TracingAuditSink>;

/// Forwards committed configuration changes to the log under the `audit` target.
#[derive(Debug, Default, Clone)]
pub(crate) struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let before = event
            .before
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default();
        let after = event
            .after
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default();

        info!(
            target: "audit",
            actor = %event.actor,
            kind = %event.entity_kind,
            entity = %event.entity_id,
            action = ?event.action,
            annotation = event.annotation.as_deref().unwrap_or(""),
            recorded_at = %event.recorded_at.to_rfc3339(),
            before = %before,
            after = %after,
            "configuration change"
        );
        Ok(())
    }
}

pub(crate) fn build_engine(config: EngineConfig) -> Arc<ServiceEngine> {
    Arc::new(RuleEngine::new(
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(TracingAuditSink),
        config,
    ))
}

/// Reads a catalog seed from disk and loads it in a single transaction.
pub(crate) fn load_seed<A>(
    engine: &RuleEngine<InMemoryRuleStore, A>,
    path: &Path,
) -> Result<SeedSummary, AppError>
where
    A: AuditSink + 'static,
{
    let seed = CatalogSeed::from_path(path)?;
    let summary = engine.load_catalog(seed)?;
    info!(
        path = %path.display(),
        jurisdictions = summary.jurisdictions,
        test_types = summary.test_types,
        "catalog seed applied"
    );
    Ok(summary)
}
