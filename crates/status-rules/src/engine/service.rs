use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::{self, NewAccessRule};
use super::catalog::{self, CatalogSeed, EntityCatalog, NewStatus, SeedSummary};
use super::config::EngineConfig;
use super::distributor::{self, DocumentWrite};
use super::domain::{
    AccessRule, AccessRuleEntry, AccessRuleId, AccessVerdict, AppVersion, EntityKind,
    HydratedRule, Jurisdiction, JurisdictionId, JurisdictionStatus, ResultMappingRule, RuleId,
    StatusId, SymptomDecisionTable, SymptomTableId, TestResultId, TestSignal, TestType,
    TestTypeId, TestTypeResult, VersionedRuleDocument,
};
use super::error::RuleError;
use super::repository::{AuditAction, AuditEvent, AuditSink, MutationContext, RuleStore};
use super::resolution::StatusResolution;
use super::result_rules::{self, NewRule, RuleChanges};
use super::symptoms::{self, NewSymptomTable, SymptomOutcome, SymptomTableChanges};

/// Combined answer for one subject: the resolved status with its guidance, and access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub jurisdiction_id: JurisdictionId,
    pub resolution: StatusResolution,
    pub access: AccessVerdict,
}

/// Facade composing the storage, audit sink and policy configuration.
pub struct RuleEngine<S, A> {
    store: Arc<S>,
    audit: Arc<A>,
    config: EngineConfig,
}

impl<S, A> RuleEngine<S, A>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(store: Arc<S>, audit: Arc<A>, config: EngineConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn record<T: Serialize>(
        &self,
        ctx: &MutationContext,
        entity_kind: EntityKind,
        entity_id: impl ToString,
        action: AuditAction,
        before: Option<&T>,
        after: Option<&T>,
    ) {
        let entity_id = entity_id.to_string();
        let snapshot = |label: &str, state: Option<&T>| {
            let state = state?;
            match serde_json::to_value(state) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(
                        %error,
                        kind = %entity_kind,
                        entity = %entity_id,
                        snapshot = label,
                        "audit snapshot could not be serialised"
                    );
                    None
                }
            }
        };
        let before = snapshot("before", before);
        let after = snapshot("after", after);

        let event = AuditEvent {
            actor: ctx.actor.clone(),
            entity_kind,
            entity_id,
            action,
            before,
            after,
            annotation: ctx.annotation.clone(),
            recorded_at: Utc::now(),
        };

        if let Err(error) = self.audit.record(event) {
            warn!(
                %error,
                kind = %entity_kind,
                action = ?action,
                actor = %ctx.actor,
                "audit sink rejected event for committed change"
            );
        }
    }

    // --- catalog -------------------------------------------------------------------------

    pub fn jurisdiction(&self, id: &JurisdictionId) -> Result<Jurisdiction, RuleError> {
        self.store
            .read(|reader| EntityCatalog::new(reader).jurisdiction(id))
    }

    pub fn jurisdictions(&self) -> Result<Vec<Jurisdiction>, RuleError> {
        self.store
            .read(|reader| Ok(reader.jurisdictions()?))
    }

    pub fn status(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<JurisdictionStatus, RuleError> {
        self.store
            .read(|reader| EntityCatalog::new(reader).status(jurisdiction_id, status_id))
    }

    pub fn statuses(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<JurisdictionStatus>, RuleError> {
        self.store.read(|reader| {
            EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;
            Ok(reader.statuses(jurisdiction_id)?)
        })
    }

    pub fn test_type(&self, id: &TestTypeId) -> Result<TestType, RuleError> {
        self.store
            .read(|reader| EntityCatalog::new(reader).test_type(id))
    }

    pub fn test_types(&self) -> Result<Vec<TestType>, RuleError> {
        self.store.read(|reader| Ok(reader.test_types()?))
    }

    pub fn test_type_result(
        &self,
        test_type_id: &TestTypeId,
        result_id: &TestResultId,
    ) -> Result<TestTypeResult, RuleError> {
        self.store
            .read(|reader| EntityCatalog::new(reader).result(test_type_id, result_id))
    }

    pub fn create_jurisdiction(
        &self,
        ctx: &MutationContext,
        jurisdiction: Jurisdiction,
    ) -> Result<Jurisdiction, RuleError> {
        let created = self
            .store
            .write(|tx| catalog::create_jurisdiction(tx, jurisdiction))?;
        info!(jurisdiction = %created.id, actor = %ctx.actor, "jurisdiction created");
        self.record(
            ctx,
            EntityKind::Jurisdiction,
            &created.id,
            AuditAction::Created,
            None,
            Some(&created),
        );
        Ok(created)
    }

    pub fn delete_jurisdiction(
        &self,
        ctx: &MutationContext,
        id: &JurisdictionId,
    ) -> Result<(), RuleError> {
        let removed = self
            .store
            .write(|tx| catalog::delete_jurisdiction(tx, id))?;
        info!(jurisdiction = %id, actor = %ctx.actor, "jurisdiction deleted");
        self.record(
            ctx,
            EntityKind::Jurisdiction,
            id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn create_status(
        &self,
        ctx: &MutationContext,
        jurisdiction_id: &JurisdictionId,
        status: NewStatus,
    ) -> Result<JurisdictionStatus, RuleError> {
        let created = self
            .store
            .write(|tx| catalog::create_status(tx, jurisdiction_id, status))?;
        info!(jurisdiction = %jurisdiction_id, status = %created.id, actor = %ctx.actor, "status created");
        self.record(
            ctx,
            EntityKind::JurisdictionStatus,
            &created.id,
            AuditAction::Created,
            None,
            Some(&created),
        );
        Ok(created)
    }

    pub fn delete_status(
        &self,
        ctx: &MutationContext,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<(), RuleError> {
        let removed = self
            .store
            .write(|tx| catalog::delete_status(tx, jurisdiction_id, status_id))?;
        info!(jurisdiction = %jurisdiction_id, status = %status_id, actor = %ctx.actor, "status deleted");
        self.record(
            ctx,
            EntityKind::JurisdictionStatus,
            status_id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn create_test_type(
        &self,
        ctx: &MutationContext,
        test_type: TestType,
    ) -> Result<TestType, RuleError> {
        let created = self
            .store
            .write(|tx| catalog::create_test_type(tx, test_type))?;
        info!(test_type = %created.id, results = created.results.len(), actor = %ctx.actor, "test type created");
        self.record(
            ctx,
            EntityKind::TestType,
            &created.id,
            AuditAction::Created,
            None,
            Some(&created),
        );
        Ok(created)
    }

    pub fn add_test_type_result(
        &self,
        ctx: &MutationContext,
        test_type_id: &TestTypeId,
        result: TestTypeResult,
    ) -> Result<TestType, RuleError> {
        let result_id = result.id.clone();
        let updated = self
            .store
            .write(|tx| catalog::add_result(tx, test_type_id, result))?;
        info!(test_type = %test_type_id, result = %result_id, actor = %ctx.actor, "test type result added");
        self.record(
            ctx,
            EntityKind::TestTypeResult,
            &result_id,
            AuditAction::Created,
            None,
            updated.result(&result_id),
        );
        Ok(updated)
    }

    pub fn delete_test_type_result(
        &self,
        ctx: &MutationContext,
        test_type_id: &TestTypeId,
        result_id: &TestResultId,
    ) -> Result<(), RuleError> {
        let removed = self
            .store
            .write(|tx| catalog::delete_result(tx, test_type_id, result_id))?;
        info!(test_type = %test_type_id, result = %result_id, actor = %ctx.actor, "test type result deleted");
        self.record(
            ctx,
            EntityKind::TestTypeResult,
            result_id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn delete_test_type(
        &self,
        ctx: &MutationContext,
        test_type_id: &TestTypeId,
    ) -> Result<(), RuleError> {
        let removed = self
            .store
            .write(|tx| catalog::delete_test_type(tx, test_type_id))?;
        info!(test_type = %test_type_id, actor = %ctx.actor, "test type deleted");
        self.record(
            ctx,
            EntityKind::TestType,
            test_type_id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    /// Loads a whole catalog in one transaction; any rejected entry leaves the store untouched.
    pub fn load_catalog(&self, seed: CatalogSeed) -> Result<SeedSummary, RuleError> {
        let summary = self.store.write(|tx| catalog::apply_seed(tx, seed))?;
        info!(
            jurisdictions = summary.jurisdictions,
            statuses = summary.statuses,
            test_types = summary.test_types,
            results = summary.results,
            "catalog seed loaded"
        );
        Ok(summary)
    }

    // --- result mapping rules --------------------------------------------------------------

    pub fn create_rule(
        &self,
        ctx: &MutationContext,
        new: NewRule,
    ) -> Result<HydratedRule, RuleError> {
        let created = self
            .store
            .write(|tx| result_rules::create(tx, new, Utc::now()))?;
        info!(
            rule = %created.rule.id,
            jurisdiction = %created.rule.jurisdiction_id,
            test_type = %created.rule.test_type_id,
            actor = %ctx.actor,
            "result mapping rule created"
        );
        self.record(
            ctx,
            EntityKind::ResultMappingRule,
            &created.rule.id,
            AuditAction::Created,
            None,
            Some(&created.rule),
        );
        Ok(created)
    }

    pub fn update_rule(
        &self,
        ctx: &MutationContext,
        id: &RuleId,
        changes: RuleChanges,
    ) -> Result<HydratedRule, RuleError> {
        let (before, after) = self
            .store
            .write(|tx| result_rules::update(tx, id, changes, Utc::now()))?;
        info!(rule = %id, actor = %ctx.actor, "result mapping rule updated");
        self.record(
            ctx,
            EntityKind::ResultMappingRule,
            id,
            AuditAction::Updated,
            Some(&before),
            Some(&after.rule),
        );
        Ok(after)
    }

    pub fn delete_rule(&self, ctx: &MutationContext, id: &RuleId) -> Result<(), RuleError> {
        let removed = self.store.write(|tx| result_rules::delete(tx, id))?;
        info!(rule = %id, actor = %ctx.actor, "result mapping rule deleted");
        self.record(
            ctx,
            EntityKind::ResultMappingRule,
            id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn rule(&self, id: &RuleId) -> Result<HydratedRule, RuleError> {
        self.store.read(|reader| result_rules::get(reader, id))
    }

    pub fn list_rules(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<ResultMappingRule>, RuleError> {
        self.store
            .read(|reader| result_rules::list_by_jurisdiction(reader, jurisdiction_id))
    }

    pub fn resolve_status(
        &self,
        jurisdiction_id: &JurisdictionId,
        signals: &[TestSignal],
    ) -> Result<StatusResolution, RuleError> {
        self.resolve_status_at(jurisdiction_id, signals, Utc::now())
    }

    /// Resolves as of a given instant, which decides whether timed results have expired.
    pub fn resolve_status_at(
        &self,
        jurisdiction_id: &JurisdictionId,
        signals: &[TestSignal],
        as_of: DateTime<Utc>,
    ) -> Result<StatusResolution, RuleError> {
        let resolution = self.store.read(|reader| {
            result_rules::resolve(
                reader,
                jurisdiction_id,
                signals,
                as_of,
                self.config.tie_policy,
            )
        })?;
        debug!(
            jurisdiction = %jurisdiction_id,
            signals = signals.len(),
            status = ?resolution.status_id(),
            "status resolved"
        );
        Ok(resolution)
    }

    // --- symptom decision tables -----------------------------------------------------------

    pub fn create_symptom_table(
        &self,
        ctx: &MutationContext,
        new: NewSymptomTable,
    ) -> Result<SymptomDecisionTable, RuleError> {
        let created = self
            .store
            .write(|tx| symptoms::create(tx, new, Utc::now()))?;
        info!(table = %created.id, jurisdiction = %created.jurisdiction_id, actor = %ctx.actor, "symptom decision table created");
        self.record(
            ctx,
            EntityKind::SymptomDecisionTable,
            &created.id,
            AuditAction::Created,
            None,
            Some(&created),
        );
        Ok(created)
    }

    pub fn update_symptom_table(
        &self,
        ctx: &MutationContext,
        id: &SymptomTableId,
        changes: SymptomTableChanges,
    ) -> Result<SymptomDecisionTable, RuleError> {
        let (before, after) = self
            .store
            .write(|tx| symptoms::update(tx, id, changes, Utc::now()))?;
        info!(table = %id, actor = %ctx.actor, "symptom decision table updated");
        self.record(
            ctx,
            EntityKind::SymptomDecisionTable,
            id,
            AuditAction::Updated,
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    pub fn delete_symptom_table(
        &self,
        ctx: &MutationContext,
        id: &SymptomTableId,
    ) -> Result<(), RuleError> {
        let removed = self.store.write(|tx| symptoms::delete(tx, id))?;
        info!(table = %id, actor = %ctx.actor, "symptom decision table deleted");
        self.record(
            ctx,
            EntityKind::SymptomDecisionTable,
            id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn symptom_table(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<SymptomDecisionTable, RuleError> {
        self.store
            .read(|reader| symptoms::table_for(reader, jurisdiction_id))
    }

    pub fn evaluate_symptoms(
        &self,
        jurisdiction_id: &JurisdictionId,
        gr1_count: u32,
        gr2_count: u32,
    ) -> Result<SymptomOutcome, RuleError> {
        let outcome = self.store.read(|reader| {
            symptoms::evaluate(reader, jurisdiction_id, gr1_count, gr2_count)
        })?;
        debug!(
            jurisdiction = %jurisdiction_id,
            gr1 = outcome.gr1,
            gr2 = outcome.gr2,
            status = %outcome.status.id,
            "symptoms evaluated"
        );
        Ok(outcome)
    }

    // --- access rules ----------------------------------------------------------------------

    pub fn create_access_rule(
        &self,
        ctx: &MutationContext,
        new: NewAccessRule,
    ) -> Result<AccessRule, RuleError> {
        let created = self
            .store
            .write(|tx| access::create(tx, new, Utc::now()))?;
        info!(access_rule = %created.id, jurisdiction = %created.jurisdiction_id, actor = %ctx.actor, "access rule created");
        self.record(
            ctx,
            EntityKind::AccessRule,
            &created.id,
            AuditAction::Created,
            None,
            Some(&created),
        );
        Ok(created)
    }

    pub fn update_access_rule(
        &self,
        ctx: &MutationContext,
        id: &AccessRuleId,
        jurisdiction_id: &JurisdictionId,
        entries: Vec<AccessRuleEntry>,
    ) -> Result<AccessRule, RuleError> {
        let (before, after) = self
            .store
            .write(|tx| access::update(tx, id, jurisdiction_id, entries, Utc::now()))?;
        info!(access_rule = %id, actor = %ctx.actor, "access rule updated");
        self.record(
            ctx,
            EntityKind::AccessRule,
            id,
            AuditAction::Updated,
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    pub fn delete_access_rule(
        &self,
        ctx: &MutationContext,
        id: &AccessRuleId,
    ) -> Result<(), RuleError> {
        let removed = self.store.write(|tx| access::delete(tx, id))?;
        info!(access_rule = %id, actor = %ctx.actor, "access rule deleted");
        self.record(
            ctx,
            EntityKind::AccessRule,
            id,
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }

    pub fn access_rule(&self, jurisdiction_id: &JurisdictionId) -> Result<AccessRule, RuleError> {
        self.store
            .read(|reader| access::rule_for(reader, jurisdiction_id))
    }

    pub fn decide_access(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<AccessVerdict, RuleError> {
        self.store
            .read(|reader| access::decide(reader, jurisdiction_id, status_id))
    }

    /// Resolves the status for the signals and, when one resolves, its access decision. Both
    /// lookups read the same snapshot.
    pub fn assess(
        &self,
        jurisdiction_id: &JurisdictionId,
        signals: &[TestSignal],
    ) -> Result<HealthAssessment, RuleError> {
        let as_of = Utc::now();
        self.store.read(|reader| {
            let resolution = result_rules::resolve(
                reader,
                jurisdiction_id,
                signals,
                as_of,
                self.config.tie_policy,
            )?;
            let access = match resolution.status_id() {
                Some(status_id) => access::decide(reader, jurisdiction_id, status_id)?,
                None => AccessVerdict::Unspecified,
            };
            Ok(HealthAssessment {
                jurisdiction_id: jurisdiction_id.clone(),
                resolution,
                access,
            })
        })
    }

    // --- versioned rule documents ----------------------------------------------------------

    pub fn put_document(
        &self,
        ctx: &MutationContext,
        jurisdiction_id: &JurisdictionId,
        app_version: AppVersion,
        payload: String,
    ) -> Result<DocumentWrite, RuleError> {
        let max_bytes = self.config.max_document_bytes;
        let (written, previous) = self.store.write(|tx| {
            distributor::put(
                tx,
                jurisdiction_id,
                app_version,
                payload,
                max_bytes,
                Utc::now(),
            )
        })?;
        info!(
            jurisdiction = %jurisdiction_id,
            app_version = %written.document.app_version,
            bytes = written.document.payload.len(),
            replaced = written.replaced,
            actor = %ctx.actor,
            "versioned ruleset stored"
        );
        let action = if written.replaced {
            AuditAction::Updated
        } else {
            AuditAction::Created
        };
        self.record(
            ctx,
            EntityKind::VersionedRuleDocument,
            format!("{jurisdiction_id}@{}", written.document.app_version),
            action,
            previous.as_ref(),
            Some(&written.document),
        );
        Ok(written)
    }

    pub fn document(
        &self,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<VersionedRuleDocument, RuleError> {
        let fallback = self.config.document_fallback;
        self.store.read(|reader| {
            distributor::get(reader, jurisdiction_id, app_version, fallback)
        })
    }

    pub fn document_versions(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<AppVersion>, RuleError> {
        self.store
            .read(|reader| distributor::versions(reader, jurisdiction_id))
    }

    pub fn remove_document(
        &self,
        ctx: &MutationContext,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<(), RuleError> {
        let removed = self
            .store
            .write(|tx| distributor::remove(tx, jurisdiction_id, app_version))?;
        info!(jurisdiction = %jurisdiction_id, app_version = %app_version, actor = %ctx.actor, "versioned ruleset removed");
        self.record(
            ctx,
            EntityKind::VersionedRuleDocument,
            format!("{jurisdiction_id}@{app_version}"),
            AuditAction::Deleted,
            Some(&removed),
            None,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{InMemoryAuditLog, InMemoryRuleStore};
    use serde::Serializer;

    /// Serialises to a string unless `broken`.
    struct Snapshot {
        broken: bool,
    }

    impl Serialize for Snapshot {
        fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
            if self.broken {
                Err(serde::ser::Error::custom("snapshot cannot be encoded"))
            } else {
                serializer.serialize_str("encoded")
            }
        }
    }

    #[test]
    fn unserialisable_snapshots_still_emit_the_audit_event() {
        let audit = Arc::new(InMemoryAuditLog::default());
        let engine = RuleEngine::new(
            Arc::new(InMemoryRuleStore::new()),
            audit.clone(),
            EngineConfig::default(),
        );
        let ctx = MutationContext::new("admin@county.gov");

        engine.record(
            &ctx,
            EntityKind::ResultMappingRule,
            "rule-1",
            AuditAction::Updated,
            Some(&Snapshot { broken: true }),
            Some(&Snapshot { broken: false }),
        );

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, "rule-1");
        assert!(events[0].before.is_none());
        assert_eq!(events[0].after, Some(serde_json::json!("encoded")));
    }
}
