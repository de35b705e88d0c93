use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::EntityCatalog;
use super::domain::{
    AccessRule, AccessRuleEntry, AccessRuleId, AccessVerdict, EntityKind, JurisdictionId,
    StatusId,
};
use super::error::RuleError;
use super::repository::{StoreReader, StoreWriter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccessRule {
    pub jurisdiction_id: JurisdictionId,
    pub entries: Vec<AccessRuleEntry>,
}

fn validate_entries<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    entries: &[AccessRuleEntry],
) -> Result<(), RuleError> {
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(&entry.jurisdiction_status_id) {
            return Err(RuleError::InvalidArgument(format!(
                "status '{}' appears more than once in the access rule",
                entry.jurisdiction_status_id
            )));
        }
    }

    let catalog = EntityCatalog::new(reader);
    for entry in entries {
        catalog.ensure_status_in(jurisdiction_id, &entry.jurisdiction_status_id)?;
    }
    Ok(())
}

pub(crate) fn create<W: StoreWriter + ?Sized>(
    tx: &mut W,
    new: NewAccessRule,
    now: DateTime<Utc>,
) -> Result<AccessRule, RuleError> {
    let jurisdiction = EntityCatalog::new(&*tx).jurisdiction(&new.jurisdiction_id)?;

    if let Some(existing) = tx.access_rule_for(&jurisdiction.id)? {
        return Err(RuleError::Conflict(format!(
            "jurisdiction '{}' already has access rule '{}'",
            jurisdiction.id, existing.id
        )));
    }

    validate_entries(&*tx, &jurisdiction.id, &new.entries)?;

    let rule = AccessRule {
        id: AccessRuleId::generate(),
        jurisdiction_id: jurisdiction.id,
        entries: new.entries,
        created_at: now,
        updated_at: now,
    };
    tx.insert_access_rule(rule.clone())?;
    Ok(rule)
}

/// The jurisdiction is restated by callers; it must match the stored rule.
pub(crate) fn update<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &AccessRuleId,
    jurisdiction_id: &JurisdictionId,
    entries: Vec<AccessRuleEntry>,
    now: DateTime<Utc>,
) -> Result<(AccessRule, AccessRule), RuleError> {
    let before = tx
        .access_rule(id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::AccessRule, id))?;

    if &before.jurisdiction_id != jurisdiction_id {
        return Err(RuleError::InvalidArgument(format!(
            "access rule '{id}' belongs to jurisdiction '{}', not '{jurisdiction_id}'",
            before.jurisdiction_id
        )));
    }

    validate_entries(&*tx, jurisdiction_id, &entries)?;

    let after = AccessRule {
        entries,
        updated_at: now,
        ..before.clone()
    };
    tx.update_access_rule(after.clone())?;
    Ok((before, after))
}

pub(crate) fn delete<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &AccessRuleId,
) -> Result<AccessRule, RuleError> {
    Ok(tx.remove_access_rule(id)?)
}

pub(crate) fn rule_for<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
) -> Result<AccessRule, RuleError> {
    EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;
    reader
        .access_rule_for(jurisdiction_id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::AccessRule, jurisdiction_id))
}

/// Missing rule or missing entry both answer `Unspecified`; no default is imputed.
pub(crate) fn decide<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    status_id: &StatusId,
) -> Result<AccessVerdict, RuleError> {
    EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;
    let decision = reader
        .access_rule_for(jurisdiction_id)?
        .and_then(|rule| rule.decision_for(status_id));
    Ok(AccessVerdict::from(decision))
}
