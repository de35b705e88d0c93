use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use super::domain::{
    AccessRule, AccessRuleId, AppVersion, EntityKind, Jurisdiction, JurisdictionId,
    JurisdictionStatus, ResultMappingRule, RuleId, StatusId, SymptomDecisionTable,
    SymptomTableId, TestType, TestTypeId, VersionedRuleDocument,
};
use super::repository::{
    AuditError, AuditEvent, AuditSink, RepositoryError, RuleStore, StoreReader, StoreWriter,
};

/// Process-local store; every write works on a copy of the state and swaps it in on success.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    state: RwLock<StoreState>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable("rule store lock poisoned".to_string())
}

impl RuleStore for InMemoryRuleStore {
    fn read<T, E>(&self, op: impl FnOnce(&dyn StoreReader) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let guard = self.state.read().map_err(|_| poisoned())?;
        op(&*guard)
    }

    fn write<T, E>(&self, op: impl FnOnce(&mut dyn StoreWriter) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let mut guard = self.state.write().map_err(|_| poisoned())?;
        let mut draft = guard.clone();
        let output = op(&mut draft)?;
        *guard = draft;
        Ok(output)
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    jurisdictions: BTreeMap<JurisdictionId, Jurisdiction>,
    statuses: BTreeMap<StatusId, JurisdictionStatus>,
    test_types: BTreeMap<TestTypeId, TestType>,
    rules: BTreeMap<RuleId, ResultMappingRule>,
    rule_keys: BTreeMap<(JurisdictionId, TestTypeId), RuleId>,
    access_rules: BTreeMap<AccessRuleId, AccessRule>,
    symptom_tables: BTreeMap<SymptomTableId, SymptomDecisionTable>,
    documents: BTreeMap<(JurisdictionId, AppVersion), VersionedRuleDocument>,
    next_sequence: u64,
}

impl StoreReader for StoreState {
    fn jurisdiction(&self, id: &JurisdictionId) -> Result<Option<Jurisdiction>, RepositoryError> {
        Ok(self.jurisdictions.get(id).cloned())
    }

    fn jurisdictions(&self) -> Result<Vec<Jurisdiction>, RepositoryError> {
        Ok(self.jurisdictions.values().cloned().collect())
    }

    fn status(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<Option<JurisdictionStatus>, RepositoryError> {
        Ok(self
            .statuses
            .get(status_id)
            .filter(|status| &status.jurisdiction_id == jurisdiction_id)
            .cloned())
    }

    fn statuses(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<JurisdictionStatus>, RepositoryError> {
        Ok(self
            .statuses
            .values()
            .filter(|status| &status.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect())
    }

    fn test_type(&self, id: &TestTypeId) -> Result<Option<TestType>, RepositoryError> {
        Ok(self.test_types.get(id).cloned())
    }

    fn test_types(&self) -> Result<Vec<TestType>, RepositoryError> {
        Ok(self.test_types.values().cloned().collect())
    }

    fn rule(&self, id: &RuleId) -> Result<Option<ResultMappingRule>, RepositoryError> {
        Ok(self.rules.get(id).cloned())
    }

    fn rule_for(
        &self,
        jurisdiction_id: &JurisdictionId,
        test_type_id: &TestTypeId,
    ) -> Result<Option<ResultMappingRule>, RepositoryError> {
        let key = (jurisdiction_id.clone(), test_type_id.clone());
        Ok(self
            .rule_keys
            .get(&key)
            .and_then(|id| self.rules.get(id))
            .cloned())
    }

    fn rules_for_jurisdiction(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<ResultMappingRule>, RepositoryError> {
        let mut rules: Vec<_> = self
            .rules
            .values()
            .filter(|rule| &rule.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.sequence);
        Ok(rules)
    }

    fn rules_for_test_type(
        &self,
        test_type_id: &TestTypeId,
    ) -> Result<Vec<ResultMappingRule>, RepositoryError> {
        let mut rules: Vec<_> = self
            .rules
            .values()
            .filter(|rule| &rule.test_type_id == test_type_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.sequence);
        Ok(rules)
    }

    fn access_rule(&self, id: &AccessRuleId) -> Result<Option<AccessRule>, RepositoryError> {
        Ok(self.access_rules.get(id).cloned())
    }

    fn access_rule_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Option<AccessRule>, RepositoryError> {
        Ok(self
            .access_rules
            .values()
            .find(|rule| &rule.jurisdiction_id == jurisdiction_id)
            .cloned())
    }

    fn symptom_table(
        &self,
        id: &SymptomTableId,
    ) -> Result<Option<SymptomDecisionTable>, RepositoryError> {
        Ok(self.symptom_tables.get(id).cloned())
    }

    fn symptom_table_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Option<SymptomDecisionTable>, RepositoryError> {
        Ok(self
            .symptom_tables
            .values()
            .find(|table| &table.jurisdiction_id == jurisdiction_id)
            .cloned())
    }

    fn document(
        &self,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<Option<VersionedRuleDocument>, RepositoryError> {
        let key = (jurisdiction_id.clone(), app_version.clone());
        Ok(self.documents.get(&key).cloned())
    }

    fn documents_for(
        &self,
        jurisdiction_id: &JurisdictionId,
    ) -> Result<Vec<VersionedRuleDocument>, RepositoryError> {
        Ok(self
            .documents
            .values()
            .filter(|document| &document.jurisdiction_id == jurisdiction_id)
            .cloned()
            .collect())
    }
}

impl StoreWriter for StoreState {
    fn insert_jurisdiction(&mut self, jurisdiction: Jurisdiction) -> Result<(), RepositoryError> {
        if self.jurisdictions.contains_key(&jurisdiction.id) {
            return Err(RepositoryError::conflict(
                EntityKind::Jurisdiction,
                &jurisdiction.id,
            ));
        }
        self.jurisdictions
            .insert(jurisdiction.id.clone(), jurisdiction);
        Ok(())
    }

    fn remove_jurisdiction(
        &mut self,
        id: &JurisdictionId,
    ) -> Result<Jurisdiction, RepositoryError> {
        let removed = self
            .jurisdictions
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Jurisdiction, id))?;
        self.statuses
            .retain(|_, status| &status.jurisdiction_id != id);
        Ok(removed)
    }

    fn insert_status(&mut self, status: JurisdictionStatus) -> Result<(), RepositoryError> {
        if !self.jurisdictions.contains_key(&status.jurisdiction_id) {
            return Err(RepositoryError::not_found(
                EntityKind::Jurisdiction,
                &status.jurisdiction_id,
            ));
        }
        if self.statuses.contains_key(&status.id) {
            return Err(RepositoryError::conflict(
                EntityKind::JurisdictionStatus,
                &status.id,
            ));
        }
        self.statuses.insert(status.id.clone(), status);
        Ok(())
    }

    fn remove_status(
        &mut self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<JurisdictionStatus, RepositoryError> {
        match self.statuses.get(status_id) {
            Some(status) if &status.jurisdiction_id == jurisdiction_id => {}
            _ => {
                return Err(RepositoryError::not_found(
                    EntityKind::JurisdictionStatus,
                    status_id,
                ))
            }
        }
        self.statuses
            .remove(status_id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::JurisdictionStatus, status_id))
    }

    fn insert_test_type(&mut self, test_type: TestType) -> Result<(), RepositoryError> {
        if self.test_types.contains_key(&test_type.id) {
            return Err(RepositoryError::conflict(EntityKind::TestType, &test_type.id));
        }
        self.test_types.insert(test_type.id.clone(), test_type);
        Ok(())
    }

    fn update_test_type(&mut self, test_type: TestType) -> Result<(), RepositoryError> {
        match self.test_types.get_mut(&test_type.id) {
            Some(existing) => {
                *existing = test_type;
                Ok(())
            }
            None => Err(RepositoryError::not_found(
                EntityKind::TestType,
                &test_type.id,
            )),
        }
    }

    fn remove_test_type(&mut self, id: &TestTypeId) -> Result<TestType, RepositoryError> {
        self.test_types
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::TestType, id))
    }

    fn insert_rule(
        &mut self,
        mut rule: ResultMappingRule,
    ) -> Result<ResultMappingRule, RepositoryError> {
        let key = (rule.jurisdiction_id.clone(), rule.test_type_id.clone());
        if self.rule_keys.contains_key(&key) || self.rules.contains_key(&rule.id) {
            return Err(RepositoryError::conflict(
                EntityKind::ResultMappingRule,
                format!("{}/{}", key.0, key.1),
            ));
        }
        self.next_sequence += 1;
        rule.sequence = self.next_sequence;
        self.rule_keys.insert(key, rule.id.clone());
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    fn update_rule(&mut self, rule: ResultMappingRule) -> Result<(), RepositoryError> {
        let existing = self
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::ResultMappingRule, &rule.id))?;
        let sequence = existing.sequence;
        *existing = ResultMappingRule { sequence, ..rule };
        Ok(())
    }

    fn remove_rule(&mut self, id: &RuleId) -> Result<ResultMappingRule, RepositoryError> {
        let removed = self
            .rules
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::ResultMappingRule, id))?;
        self.rule_keys.remove(&(
            removed.jurisdiction_id.clone(),
            removed.test_type_id.clone(),
        ));
        Ok(removed)
    }

    fn insert_access_rule(&mut self, rule: AccessRule) -> Result<(), RepositoryError> {
        let taken = self
            .access_rules
            .values()
            .any(|existing| existing.jurisdiction_id == rule.jurisdiction_id);
        if taken || self.access_rules.contains_key(&rule.id) {
            return Err(RepositoryError::conflict(
                EntityKind::AccessRule,
                &rule.jurisdiction_id,
            ));
        }
        self.access_rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    fn update_access_rule(&mut self, rule: AccessRule) -> Result<(), RepositoryError> {
        match self.access_rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule;
                Ok(())
            }
            None => Err(RepositoryError::not_found(EntityKind::AccessRule, &rule.id)),
        }
    }

    fn remove_access_rule(&mut self, id: &AccessRuleId) -> Result<AccessRule, RepositoryError> {
        self.access_rules
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::AccessRule, id))
    }

    fn insert_symptom_table(
        &mut self,
        table: SymptomDecisionTable,
    ) -> Result<(), RepositoryError> {
        let taken = self
            .symptom_tables
            .values()
            .any(|existing| existing.jurisdiction_id == table.jurisdiction_id);
        if taken || self.symptom_tables.contains_key(&table.id) {
            return Err(RepositoryError::conflict(
                EntityKind::SymptomDecisionTable,
                &table.jurisdiction_id,
            ));
        }
        self.symptom_tables.insert(table.id.clone(), table);
        Ok(())
    }

    fn update_symptom_table(
        &mut self,
        table: SymptomDecisionTable,
    ) -> Result<(), RepositoryError> {
        match self.symptom_tables.get_mut(&table.id) {
            Some(existing) => {
                *existing = table;
                Ok(())
            }
            None => Err(RepositoryError::not_found(
                EntityKind::SymptomDecisionTable,
                &table.id,
            )),
        }
    }

    fn remove_symptom_table(
        &mut self,
        id: &SymptomTableId,
    ) -> Result<SymptomDecisionTable, RepositoryError> {
        self.symptom_tables
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::SymptomDecisionTable, id))
    }

    fn upsert_document(
        &mut self,
        document: VersionedRuleDocument,
    ) -> Result<Option<VersionedRuleDocument>, RepositoryError> {
        let key = (
            document.jurisdiction_id.clone(),
            document.app_version.clone(),
        );
        Ok(self.documents.insert(key, document))
    }

    fn remove_document(
        &mut self,
        jurisdiction_id: &JurisdictionId,
        app_version: &AppVersion,
    ) -> Result<VersionedRuleDocument, RepositoryError> {
        let key = (jurisdiction_id.clone(), app_version.clone());
        self.documents.remove(&key).ok_or_else(|| {
            RepositoryError::not_found(
                EntityKind::VersionedRuleDocument,
                format!("{jurisdiction_id}@{app_version}"),
            )
        })
    }
}

/// Audit sink that keeps every event in memory, for tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| AuditError::Transport("audit log lock poisoned".to_string()))?;
        events.push(event);
        Ok(())
    }
}
