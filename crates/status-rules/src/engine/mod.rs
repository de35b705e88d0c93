//! Jurisdiction-aware health-status rule engine.
//!
//! Test results resolve to jurisdiction statuses through per-test-type mapping rules, symptom
//! counts resolve through a fixed 2x2 decision table, and statuses resolve to an access
//! decision. Opaque versioned rulesets are distributed alongside for callers that evaluate
//! rules themselves. Every write runs as a single storage transaction and is reported to an
//! audit sink once committed.

pub(crate) mod access;
pub mod catalog;
pub mod config;
pub(crate) mod distributor;
pub mod domain;
pub mod error;
pub mod memory;
pub mod repository;
pub(crate) mod resolution;
pub(crate) mod result_rules;
pub mod router;
pub mod service;
pub(crate) mod symptoms;

#[cfg(test)]
mod tests;

pub use access::NewAccessRule;
pub use catalog::{
    CatalogSeed, EntityCatalog, JurisdictionSeed, NewStatus, SeedError, SeedSummary,
};
pub use config::{EngineConfig, DEFAULT_MAX_DOCUMENT_BYTES};
pub use distributor::{DocumentFallback, DocumentWrite};
pub use domain::{
    AccessDecision, AccessRule, AccessRuleEntry, AccessRuleId, AccessVerdict, ActorId,
    AppVersion, EntityKind, HydratedRule, Jurisdiction, JurisdictionId, JurisdictionStatus,
    ResultMappingRule, ResultStatusMapping, RuleId, StatusId, SymptomDecisionEntry,
    SymptomDecisionTable, SymptomMatrix, SymptomTableId, SymptomVerdict, TestResultId,
    TestSignal, TestType, TestTypeId, TestTypeResult, VersionedRuleDocument,
};
pub use error::RuleError;
pub use memory::{InMemoryAuditLog, InMemoryRuleStore};
pub use repository::{
    AuditAction, AuditError, AuditEvent, AuditSink, MutationContext, RepositoryError,
    RuleStore, StoreReader, StoreWriter,
};
pub use resolution::{NextStep, ResolvedStatus, StatusCandidate, StatusResolution, TiePolicy};
pub use result_rules::{NewRule, RuleChanges};
pub use router::{rules_router, ACTOR_HEADER, AUDIT_NOTE_HEADER};
pub use service::{HealthAssessment, RuleEngine};
pub use symptoms::{NewSymptomTable, SymptomOutcome, SymptomTableChanges};
