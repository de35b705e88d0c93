use std::sync::Arc;

use axum::response::Response;
use serde_json::Value;

use crate::engine::{
    AuditError, AuditEvent, AuditSink, CatalogSeed, EngineConfig, InMemoryAuditLog,
    InMemoryRuleStore, JurisdictionId, MutationContext, NewRule, ResultStatusMapping, RuleEngine,
    StatusId, SymptomDecisionEntry, TestResultId, TestTypeId,
};

pub(super) type MemoryEngine = RuleEngine<InMemoryRuleStore, InMemoryAuditLog>;

const SEED: &str = r#"{
    "jurisdictions": [
        {
            "id": "J1",
            "name": "Polk County",
            "region": "IA",
            "country": "US",
            "statuses": [
                { "id": "healthy", "name": "Healthy", "description": "No restrictions" },
                { "id": "quarantine", "name": "Quarantine", "description": "Stay home" },
                { "id": "monitor", "name": "Monitor", "description": "Watch for symptoms" },
                { "id": "none", "name": "No symptoms" }
            ]
        },
        {
            "id": "J2",
            "name": "Story County",
            "region": "IA",
            "country": "US",
            "statuses": [
                { "id": "j2-clear", "name": "Clear" },
                { "id": "j2-isolate", "name": "Isolate" }
            ]
        }
    ],
    "test_types": [
        {
            "id": "PCR",
            "name": "PCR",
            "priority": 1,
            "results": [
                { "id": "positive", "name": "Positive", "next_step": "Isolate for ten days" },
                { "id": "negative", "name": "Negative" }
            ]
        },
        {
            "id": "ANTIGEN",
            "name": "Rapid antigen",
            "priority": 2,
            "results": [
                {
                    "id": "reactive",
                    "name": "Reactive",
                    "next_step": "Book a confirmatory PCR",
                    "next_step_offset": 24,
                    "result_expires_offset": 72
                },
                { "id": "non-reactive", "name": "Non-reactive", "result_expires_offset": 48 }
            ]
        }
    ]
}"#;

pub(super) fn seed() -> CatalogSeed {
    CatalogSeed::from_json(SEED).expect("fixture seed parses")
}

pub(super) fn j1() -> JurisdictionId {
    JurisdictionId::new("J1")
}

pub(super) fn j2() -> JurisdictionId {
    JurisdictionId::new("J2")
}

pub(super) fn pcr() -> TestTypeId {
    TestTypeId::new("PCR")
}

pub(super) fn antigen() -> TestTypeId {
    TestTypeId::new("ANTIGEN")
}

pub(super) fn status(id: &str) -> StatusId {
    StatusId::new(id)
}

pub(super) fn admin() -> MutationContext {
    MutationContext::new("admin@county.gov").with_annotation("fixture change")
}

pub(super) fn mapping(result: &str, status: &str) -> ResultStatusMapping {
    ResultStatusMapping {
        test_type_result_id: TestResultId::new(result),
        jurisdiction_status_id: StatusId::new(status),
    }
}

/// PCR rule for J1: positive -> quarantine, negative -> healthy.
pub(super) fn pcr_rule(priority: Option<i32>) -> NewRule {
    NewRule {
        jurisdiction_id: j1(),
        test_type_id: pcr(),
        priority,
        mappings: vec![
            mapping("positive", "quarantine"),
            mapping("negative", "healthy"),
        ],
    }
}

/// Antigen rule for J1: reactive -> monitor.
pub(super) fn antigen_rule(priority: Option<i32>) -> NewRule {
    NewRule {
        jurisdiction_id: j1(),
        test_type_id: antigen(),
        priority,
        mappings: vec![mapping("reactive", "monitor")],
    }
}

pub(super) fn symptom_entry(gr1: bool, gr2: bool, status: &str) -> SymptomDecisionEntry {
    SymptomDecisionEntry {
        gr1,
        gr2,
        jurisdiction_status_id: StatusId::new(status),
        next_step: format!("follow {status} guidance"),
    }
}

pub(super) fn symptom_entries() -> Vec<SymptomDecisionEntry> {
    vec![
        symptom_entry(false, false, "none"),
        symptom_entry(true, false, "monitor"),
        symptom_entry(false, true, "monitor"),
        symptom_entry(true, true, "quarantine"),
    ]
}

pub(super) fn build_engine() -> (MemoryEngine, Arc<InMemoryRuleStore>, Arc<InMemoryAuditLog>) {
    build_engine_with(EngineConfig::default())
}

pub(super) fn build_engine_with(
    config: EngineConfig,
) -> (MemoryEngine, Arc<InMemoryRuleStore>, Arc<InMemoryAuditLog>) {
    let store = Arc::new(InMemoryRuleStore::new());
    let audit = Arc::new(InMemoryAuditLog::default());
    let engine = RuleEngine::new(store.clone(), audit.clone(), config);
    engine.load_catalog(seed()).expect("fixture seed loads");
    (engine, store, audit)
}

/// Audit sink whose transport is always down.
#[derive(Default)]
pub(super) struct OfflineAudit;

impl AuditSink for OfflineAudit {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Transport("event bus offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
