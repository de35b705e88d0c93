use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::EntityCatalog;
use super::domain::{
    EntityKind, JurisdictionId, JurisdictionStatus, SymptomDecisionEntry, SymptomDecisionTable,
    SymptomMatrix, SymptomTableId,
};
use super::error::RuleError;
use super::repository::{StoreReader, StoreWriter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSymptomTable {
    pub jurisdiction_id: JurisdictionId,
    pub gr1_threshold: u32,
    pub gr2_threshold: u32,
    pub entries: Vec<SymptomDecisionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomTableChanges {
    pub gr1_threshold: u32,
    pub gr2_threshold: u32,
    pub entries: Vec<SymptomDecisionEntry>,
}

/// Result of running symptom counts through a jurisdiction's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomOutcome {
    pub gr1: bool,
    pub gr2: bool,
    pub status: JurisdictionStatus,
    pub next_step: String,
}

fn build_matrix<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    entries: Vec<SymptomDecisionEntry>,
) -> Result<SymptomMatrix, RuleError> {
    let matrix = SymptomMatrix::from_entries(entries)?;
    let catalog = EntityCatalog::new(reader);
    for status_id in matrix.status_ids() {
        catalog.ensure_status_in(jurisdiction_id, status_id)?;
    }
    Ok(matrix)
}

pub(crate) fn create<W: StoreWriter + ?Sized>(
    tx: &mut W,
    new: NewSymptomTable,
    now: DateTime<Utc>,
) -> Result<SymptomDecisionTable, RuleError> {
    let jurisdiction = EntityCatalog::new(&*tx).jurisdiction(&new.jurisdiction_id)?;

    if let Some(existing) = tx.symptom_table_for(&jurisdiction.id)? {
        return Err(RuleError::Conflict(format!(
            "jurisdiction '{}' already has symptom decision table '{}'",
            jurisdiction.id, existing.id
        )));
    }

    let entries = build_matrix(&*tx, &jurisdiction.id, new.entries)?;
    let table = SymptomDecisionTable {
        id: SymptomTableId::generate(),
        jurisdiction_id: jurisdiction.id,
        gr1_threshold: new.gr1_threshold,
        gr2_threshold: new.gr2_threshold,
        entries,
        created_at: now,
        updated_at: now,
    };
    tx.insert_symptom_table(table.clone())?;
    Ok(table)
}

pub(crate) fn update<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &SymptomTableId,
    changes: SymptomTableChanges,
    now: DateTime<Utc>,
) -> Result<(SymptomDecisionTable, SymptomDecisionTable), RuleError> {
    let before = tx
        .symptom_table(id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::SymptomDecisionTable, id))?;

    let entries = build_matrix(&*tx, &before.jurisdiction_id, changes.entries)?;
    let after = SymptomDecisionTable {
        gr1_threshold: changes.gr1_threshold,
        gr2_threshold: changes.gr2_threshold,
        entries,
        updated_at: now,
        ..before.clone()
    };
    tx.update_symptom_table(after.clone())?;
    Ok((before, after))
}

pub(crate) fn delete<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &SymptomTableId,
) -> Result<SymptomDecisionTable, RuleError> {
    Ok(tx.remove_symptom_table(id)?)
}

pub(crate) fn table_for<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
) -> Result<SymptomDecisionTable, RuleError> {
    EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;
    reader
        .symptom_table_for(jurisdiction_id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::SymptomDecisionTable, jurisdiction_id))
}

pub(crate) fn evaluate<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    gr1_count: u32,
    gr2_count: u32,
) -> Result<SymptomOutcome, RuleError> {
    let table = table_for(reader, jurisdiction_id)?;
    let verdict = table.evaluate(gr1_count, gr2_count);
    let status =
        EntityCatalog::new(reader).status(jurisdiction_id, &verdict.jurisdiction_status_id)?;

    Ok(SymptomOutcome {
        gr1: verdict.gr1,
        gr2: verdict.gr2,
        status,
        next_step: verdict.next_step,
    })
}
