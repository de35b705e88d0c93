//! Reference data every rule validates against: jurisdictions, their statuses, test types and
//! their results.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::domain::{
    EntityKind, Jurisdiction, JurisdictionId, JurisdictionStatus, StatusId, TestResultId,
    TestType, TestTypeId, TestTypeResult,
};
use super::error::RuleError;
use super::repository::{StoreReader, StoreWriter};

/// Typed lookups over a storage snapshot, turning absent rows into `RuleError::NotFound`.
pub struct EntityCatalog<'a, R: StoreReader + ?Sized> {
    reader: &'a R,
}

impl<'a, R: StoreReader + ?Sized> EntityCatalog<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self { reader }
    }

    pub fn jurisdiction(&self, id: &JurisdictionId) -> Result<Jurisdiction, RuleError> {
        self.reader
            .jurisdiction(id)?
            .ok_or_else(|| RuleError::not_found(EntityKind::Jurisdiction, id))
    }

    pub fn status(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<JurisdictionStatus, RuleError> {
        self.reader
            .status(jurisdiction_id, status_id)?
            .ok_or_else(|| RuleError::not_found(EntityKind::JurisdictionStatus, status_id))
    }

    pub fn test_type(&self, id: &TestTypeId) -> Result<TestType, RuleError> {
        self.reader
            .test_type(id)?
            .ok_or_else(|| RuleError::not_found(EntityKind::TestType, id))
    }

    pub fn result(
        &self,
        test_type_id: &TestTypeId,
        result_id: &TestResultId,
    ) -> Result<TestTypeResult, RuleError> {
        let test_type = self.test_type(test_type_id)?;
        test_type
            .result(result_id)
            .cloned()
            .ok_or_else(|| RuleError::not_found(EntityKind::TestTypeResult, result_id))
    }

    /// A status referenced by a rule must belong to the rule's jurisdiction.
    pub(crate) fn ensure_status_in(
        &self,
        jurisdiction_id: &JurisdictionId,
        status_id: &StatusId,
    ) -> Result<(), RuleError> {
        match self.reader.status(jurisdiction_id, status_id)? {
            Some(_) => Ok(()),
            None => Err(RuleError::InvalidReference(format!(
                "status '{status_id}' does not belong to jurisdiction '{jurisdiction_id}'"
            ))),
        }
    }
}

/// A result referenced by a rule must belong to the rule's test type.
pub(crate) fn ensure_result_in(
    test_type: &TestType,
    result_id: &TestResultId,
) -> Result<(), RuleError> {
    match test_type.result(result_id) {
        Some(_) => Ok(()),
        None => Err(RuleError::InvalidReference(format!(
            "result '{result_id}' does not belong to test type '{}'",
            test_type.id
        ))),
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), RuleError> {
    if value.trim().is_empty() {
        return Err(RuleError::InvalidArgument(format!(
            "{field} must not be blank"
        )));
    }
    Ok(())
}

/// Status definition submitted for an existing jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatus {
    pub id: StatusId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub(crate) fn create_jurisdiction<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction: Jurisdiction,
) -> Result<Jurisdiction, RuleError> {
    require_text("jurisdiction id", jurisdiction.id.as_str())?;
    require_text("jurisdiction name", &jurisdiction.name)?;
    tx.insert_jurisdiction(jurisdiction.clone())?;
    Ok(jurisdiction)
}

pub(crate) fn create_status<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction_id: &JurisdictionId,
    status: NewStatus,
) -> Result<JurisdictionStatus, RuleError> {
    EntityCatalog::new(&*tx).jurisdiction(jurisdiction_id)?;
    require_text("status id", status.id.as_str())?;
    require_text("status name", &status.name)?;

    let status = JurisdictionStatus {
        id: status.id,
        jurisdiction_id: jurisdiction_id.clone(),
        name: status.name,
        description: status.description,
    };
    tx.insert_status(status.clone())?;
    Ok(status)
}

fn validate_result(result: &TestTypeResult) -> Result<(), RuleError> {
    require_text("test type result id", result.id.as_str())?;
    require_text("test type result name", &result.name)
}

pub(crate) fn create_test_type<W: StoreWriter + ?Sized>(
    tx: &mut W,
    test_type: TestType,
) -> Result<TestType, RuleError> {
    require_text("test type id", test_type.id.as_str())?;
    require_text("test type name", &test_type.name)?;

    let mut seen = BTreeSet::new();
    for result in &test_type.results {
        validate_result(result)?;
        if !seen.insert(&result.id) {
            return Err(RuleError::InvalidArgument(format!(
                "test type '{}' lists result '{}' more than once",
                test_type.id, result.id
            )));
        }
    }

    tx.insert_test_type(test_type.clone())?;
    Ok(test_type)
}

pub(crate) fn add_result<W: StoreWriter + ?Sized>(
    tx: &mut W,
    test_type_id: &TestTypeId,
    result: TestTypeResult,
) -> Result<TestType, RuleError> {
    let mut test_type = EntityCatalog::new(&*tx).test_type(test_type_id)?;
    validate_result(&result)?;
    if test_type.result(&result.id).is_some() {
        return Err(RuleError::Conflict(format!(
            "test type '{test_type_id}' already defines result '{}'",
            result.id
        )));
    }

    test_type.results.push(result);
    tx.update_test_type(test_type.clone())?;
    Ok(test_type)
}

pub(crate) fn delete_status<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction_id: &JurisdictionId,
    status_id: &StatusId,
) -> Result<JurisdictionStatus, RuleError> {
    EntityCatalog::new(&*tx).status(jurisdiction_id, status_id)?;

    if let Some(rule) = tx
        .rules_for_jurisdiction(jurisdiction_id)?
        .into_iter()
        .find(|rule| rule.references_status(status_id))
    {
        return Err(RuleError::Conflict(format!(
            "status '{status_id}' is referenced by result mapping rule '{}'",
            rule.id
        )));
    }
    if let Some(access) = tx.access_rule_for(jurisdiction_id)? {
        if access.decision_for(status_id).is_some() {
            return Err(RuleError::Conflict(format!(
                "status '{status_id}' is referenced by access rule '{}'",
                access.id
            )));
        }
    }
    if let Some(table) = tx.symptom_table_for(jurisdiction_id)? {
        if table.entries.references_status(status_id) {
            return Err(RuleError::Conflict(format!(
                "status '{status_id}' is referenced by symptom decision table '{}'",
                table.id
            )));
        }
    }

    Ok(tx.remove_status(jurisdiction_id, status_id)?)
}

pub(crate) fn delete_result<W: StoreWriter + ?Sized>(
    tx: &mut W,
    test_type_id: &TestTypeId,
    result_id: &TestResultId,
) -> Result<TestTypeResult, RuleError> {
    let mut test_type = EntityCatalog::new(&*tx).test_type(test_type_id)?;
    let position = test_type
        .results
        .iter()
        .position(|result| &result.id == result_id)
        .ok_or_else(|| RuleError::not_found(EntityKind::TestTypeResult, result_id))?;

    if let Some(rule) = tx
        .rules_for_test_type(test_type_id)?
        .into_iter()
        .find(|rule| rule.references_result(result_id))
    {
        return Err(RuleError::Conflict(format!(
            "result '{result_id}' is referenced by result mapping rule '{}'",
            rule.id
        )));
    }

    let removed = test_type.results.remove(position);
    tx.update_test_type(test_type)?;
    Ok(removed)
}

pub(crate) fn delete_test_type<W: StoreWriter + ?Sized>(
    tx: &mut W,
    test_type_id: &TestTypeId,
) -> Result<TestType, RuleError> {
    EntityCatalog::new(&*tx).test_type(test_type_id)?;

    if let Some(rule) = tx.rules_for_test_type(test_type_id)?.first() {
        return Err(RuleError::Conflict(format!(
            "test type '{test_type_id}' is referenced by result mapping rule '{}'",
            rule.id
        )));
    }

    Ok(tx.remove_test_type(test_type_id)?)
}

/// Removes a jurisdiction and the statuses it owns once nothing else points at it.
pub(crate) fn delete_jurisdiction<W: StoreWriter + ?Sized>(
    tx: &mut W,
    jurisdiction_id: &JurisdictionId,
) -> Result<Jurisdiction, RuleError> {
    EntityCatalog::new(&*tx).jurisdiction(jurisdiction_id)?;

    let mut dependents = Vec::new();
    let rules = tx.rules_for_jurisdiction(jurisdiction_id)?.len();
    if rules > 0 {
        dependents.push(format!("{rules} result mapping rule(s)"));
    }
    if tx.access_rule_for(jurisdiction_id)?.is_some() {
        dependents.push("an access rule".to_string());
    }
    if tx.symptom_table_for(jurisdiction_id)?.is_some() {
        dependents.push("a symptom decision table".to_string());
    }
    let documents = tx.documents_for(jurisdiction_id)?.len();
    if documents > 0 {
        dependents.push(format!("{documents} versioned rule document(s)"));
    }

    if !dependents.is_empty() {
        return Err(RuleError::Conflict(format!(
            "jurisdiction '{jurisdiction_id}' is still referenced by {}",
            dependents.join(", ")
        )));
    }

    Ok(tx.remove_jurisdiction(jurisdiction_id)?)
}

/// Bulk catalog definition loaded at startup or validated from the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub jurisdictions: Vec<JurisdictionSeed>,
    #[serde(default)]
    pub test_types: Vec<TestType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionSeed {
    #[serde(flatten)]
    pub jurisdiction: Jurisdiction,
    #[serde(default)]
    pub statuses: Vec<NewStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub jurisdictions: usize,
    pub statuses: usize,
    pub test_types: usize,
    pub results: usize,
}

/// Failure to read or parse a catalog seed file.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("unable to read catalog seed {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog seed is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CatalogSeed {
    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let raw = fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }
}

pub(crate) fn apply_seed<W: StoreWriter + ?Sized>(
    tx: &mut W,
    seed: CatalogSeed,
) -> Result<SeedSummary, RuleError> {
    let mut summary = SeedSummary::default();

    for entry in seed.jurisdictions {
        let jurisdiction = create_jurisdiction(tx, entry.jurisdiction)?;
        summary.jurisdictions += 1;
        for status in entry.statuses {
            create_status(tx, &jurisdiction.id, status)?;
            summary.statuses += 1;
        }
    }

    for test_type in seed.test_types {
        let stored = create_test_type(tx, test_type)?;
        summary.test_types += 1;
        summary.results += stored.results.len();
    }

    Ok(summary)
}
