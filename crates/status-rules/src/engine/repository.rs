use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AccessRule, AccessRuleId, ActorId, AppVersion, EntityKind, Jurisdiction, JurisdictionId,
    JurisdictionStatus, ResultMappingRule, RuleId, StatusId, SymptomDecisionTable,
    SymptomTableId, TestType, TestTypeId, VersionedRuleDocument,
};

/// Read side of a storage snapshot.
pub trait StoreReader {
    fn jurisdiction(&self, id: &JurisdictionId) -> Result<Option<Jurisdiction>, RepositoryError>;
    fn jurisdictions(&self) -> Result<Vec<Jurisdiction>, RepositoryError>;
    fn status(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<Option<JurisdictionStatus>, RepositoryError>;
    fn statuses(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<JurisdictionStatus>, RepositoryError>;
    fn test_type(&self, id: &TestTypeId) -> Result<Option<TestType>, RepositoryError>;
    fn test_types(&self) -> Result<Vec<TestType>, RepositoryError>;

    fn rule(&self, id: &RuleId) -> Result<Option<ResultMappingRule>, RepositoryError>;
    fn rule_for(
        &self,
        jurisdiction_id: &JurisdictionId,
        test_type_id: &TestTypeId,
    ) -> Result<Option<ResultMappingRule>, RepositoryError>;
    fn rules_for_jurisdiction(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<ResultMappingRule>, RepositoryError>;
    fn rules_for_test_type(
        &self,
        test_type_id: &TestTypeId,
    ) -> Result<Vec<ResultMappingRule>, RepositoryError>;

    fn access_rule(&self, id: &AccessRuleId) -> Result<Option<AccessRule>, RepositoryError>;
    fn access_rule_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Option<AccessRule>, RepositoryError>;

    fn symptom_table(
        &self,
        id: &SymptomTableId,
    ) -> Result<Option<SymptomDecisionTable>, RepositoryError>;
    fn symptom_table_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Option<SymptomDecisionTable>, RepositoryError>;

    fn document(
        &self,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<Option<VersionedRuleDocument>, RepositoryError>;
    fn documents_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<VersionedRuleDocument>, RepositoryError>;
}

/// Write side of a storage transaction.
///
/// Inserts enforce the uniqueness keys themselves and answer `RepositoryError::Conflict`;
/// updates and removals of a missing row answer `RepositoryError::NotFound`.
pub trait StoreWriter: StoreReader {
    fn insert_jurisdiction(&mut self, jurisdiction: Jurisdiction) -> Result<(), RepositoryError>;
    /// Removes the jurisdiction together with the statuses it owns.
    fn remove_jurisdiction(&mut self, id: &JurisdictionId)
        -> Result<Jurisdiction, RepositoryError>;
    fn insert_status(&mut self, status: JurisdictionStatus) -> Result<(), RepositoryError>;
    fn remove_status(
        &mut self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<JurisdictionStatus, RepositoryError>;
    fn insert_test_type(&mut self, test_type: TestType) -> Result<(), RepositoryError>;
    fn update_test_type(&mut self, test_type: TestType) -> Result<(), RepositoryError>;
    fn remove_test_type(&mut self, id: &TestTypeId) -> Result<TestType, RepositoryError>;

    /// Persists a new rule, assigning its insertion sequence. Unique on
    /// `(jurisdiction_id, test_type_id)`.
    fn insert_rule(
        &mut self,
        rule: ResultMappingRule,
    ) -> Result<ResultMappingRule, RepositoryError>;
    fn update_rule(&mut self, rule: ResultMappingRule) -> Result<(), RepositoryError>;
    fn remove_rule(&mut self, id: &RuleId) -> Result<ResultMappingRule, RepositoryError>;

    /// Unique on `jurisdiction_id`.
    fn insert_access_rule(&mut self, rule: AccessRule) -> Result<(), RepositoryError>;
    fn update_access_rule(&mut self, rule: AccessRule) -> Result<(), RepositoryError>;
    fn remove_access_rule(&mut self, id: &AccessRuleId) -> Result<AccessRule, RepositoryError>;

    /// Unique on `jurisdiction_id`.
    fn insert_symptom_table(&mut self, table: SymptomDecisionTable)
        -> Result<(), RepositoryError>;
    fn update_symptom_table(&mut self, table: SymptomDecisionTable)
        -> Result<(), RepositoryError>;
    fn remove_symptom_table(
        &mut self,
        id: &SymptomTableId,
    ) -> Result<SymptomDecisionTable, RepositoryError>;

    /// Replaces any document stored under the same key, returning the previous one.
    fn upsert_document(
        &mut self,
        document: VersionedRuleDocument,
    ) -> Result<Option<VersionedRuleDocument>, RepositoryError>;
    fn remove_document(
        &mut self,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<VersionedRuleDocument, RepositoryError>;
}

/// Storage abstraction so the engine can be exercised in isolation.
///
/// `write` runs the operation as one transaction: validation reads and the mutation observe
/// the same snapshot, and nothing is committed when the operation returns an error.
pub trait RuleStore: Send + Sync {
    fn read<T, E>(&self, op: impl FnOnce(&dyn StoreReader) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>;

    fn write<T, E>(&self, op: impl FnOnce(&mut dyn StoreWriter) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{kind} '{key}' already exists")]
    Conflict { kind: EntityKind, key: String },
    #[error("{kind} '{key}' not found")]
    NotFound { kind: EntityKind, key: String },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub(crate) fn conflict(kind: EntityKind, key: impl ToString) -> Self {
        RepositoryError::Conflict {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn not_found(kind: EntityKind, key: impl ToString) -> Self {
        RepositoryError::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

/// Who is mutating configuration, plus the free-text note forwarded to the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationContext {
    pub actor: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl MutationContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: ActorId::new(actor),
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

/// Record handed to the audit collaborator after a committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: ActorId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Outbound audit hook (event log, message bus, ...).
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Audit dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit transport unavailable: {0}")]
    Transport(String),
}
