use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::{ensure_result_in, EntityCatalog};
use super::domain::{
    EntityKind, HydratedRule, JurisdictionId, ResultMappingRule, ResultStatusMapping, RuleId,
    TestSignal, TestType, TestTypeId,
};
use super::error::RuleError;
use super::repository::{StoreReader, StoreWriter};
use super::resolution::{
    is_expired, next_step_for, select, ResolvedStatus, StatusCandidate, StatusResolution,
    TiePolicy,
};

/// Request to create the rule for a `(jurisdiction, test type)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub jurisdiction_id: JurisdictionId,
    pub test_type_id: TestTypeId,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub mappings: Vec<ResultStatusMapping>,
}

/// Updatable part of a rule. The jurisdiction and test type never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChanges {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub mappings: Vec<ResultStatusMapping>,
}

/// Rejects duplicate result keys and references outside the rule's scope, returning the
/// mappings in canonical (result id) order.
fn validate_mappings<R: StoreReader + ?Sized>(
    catalog: &EntityCatalog<'_, R>,
    jurisdiction_id: &JurisdictionId,
    test_type: &TestType,
    mut mappings: Vec<ResultStatusMapping>,
) -> Result<Vec<ResultStatusMapping>, RuleError> {
    let mut seen = BTreeSet::new();
    for mapping in &mappings {
        if !seen.insert(&mapping.test_type_result_id) {
            return Err(RuleError::InvalidArgument(format!(
                "result '{}' is mapped more than once",
                mapping.test_type_result_id
            )));
        }
    }

    for mapping in &mappings {
        ensure_result_in(test_type, &mapping.test_type_result_id)?;
        catalog.ensure_status_in(jurisdiction_id, &mapping.jurisdiction_status_id)?;
    }

    mappings.sort();
    Ok(mappings)
}

fn hydrate<R: StoreReader + ?Sized>(
    reader: &R,
    rule: ResultMappingRule,
) -> Result<HydratedRule, RuleError> {
    let catalog = EntityCatalog::new(reader);
    let jurisdiction = catalog.jurisdiction(&rule.jurisdiction_id)?;
    let test_type = catalog.test_type(&rule.test_type_id)?;
    Ok(HydratedRule {
        rule,
        jurisdiction,
        test_type,
    })
}

pub(crate) fn create<W: StoreWriter + ?Sized>(
    tx: &mut W,
    new: NewRule,
    now: DateTime<Utc>,
) -> Result<HydratedRule, RuleError> {
    let catalog = EntityCatalog::new(&*tx);
    let jurisdiction = catalog.jurisdiction(&new.jurisdiction_id)?;
    let test_type = catalog.test_type(&new.test_type_id)?;

    if let Some(existing) = tx.rule_for(&jurisdiction.id, &test_type.id)? {
        return Err(RuleError::Conflict(format!(
            "jurisdiction '{}' already has rule '{}' for test type '{}'",
            jurisdiction.id, existing.id, test_type.id
        )));
    }

    let mappings = validate_mappings(&catalog, &jurisdiction.id, &test_type, new.mappings)?;

    let rule = ResultMappingRule {
        id: RuleId::generate(),
        jurisdiction_id: jurisdiction.id.clone(),
        test_type_id: test_type.id.clone(),
        priority: new.priority,
        mappings,
        sequence: 0,
        created_at: now,
        updated_at: now,
    };
    let stored = tx.insert_rule(rule)?;

    Ok(HydratedRule {
        rule: stored,
        jurisdiction,
        test_type,
    })
}

/// Returns the rule as it was before the update alongside the updated, hydrated rule.
pub(crate) fn update<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &RuleId,
    changes: RuleChanges,
    now: DateTime<Utc>,
) -> Result<(ResultMappingRule, HydratedRule), RuleError> {
    let before = tx
        .rule(id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::ResultMappingRule, id))?;

    let catalog = EntityCatalog::new(&*tx);
    let jurisdiction = catalog.jurisdiction(&before.jurisdiction_id)?;
    let test_type = catalog.test_type(&before.test_type_id)?;
    let mappings = validate_mappings(&catalog, &jurisdiction.id, &test_type, changes.mappings)?;

    let after = ResultMappingRule {
        priority: changes.priority,
        mappings,
        updated_at: now,
        ..before.clone()
    };
    tx.update_rule(after.clone())?;

    Ok((
        before,
        HydratedRule {
            rule: after,
            jurisdiction,
            test_type,
        },
    ))
}

pub(crate) fn delete<W: StoreWriter + ?Sized>(
    tx: &mut W,
    id: &RuleId,
) -> Result<ResultMappingRule, RuleError> {
    Ok(tx.remove_rule(id)?)
}

pub(crate) fn get<R: StoreReader + ?Sized>(
    reader: &R,
    id: &RuleId,
) -> Result<HydratedRule, RuleError> {
    let rule = reader
        .rule(id)?
        .ok_or_else(|| RuleError::not_found(EntityKind::ResultMappingRule, id))?;
    hydrate(reader, rule)
}

/// Ascending priority, unset priorities last, ties by test type id.
pub(crate) fn list_by_jurisdiction<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
) -> Result<Vec<ResultMappingRule>, RuleError> {
    EntityCatalog::new(reader).jurisdiction(jurisdiction_id)?;

    let mut rules = reader.rules_for_jurisdiction(jurisdiction_id)?;
    rules.sort_by(|a, b| {
        (a.priority.is_none(), a.priority)
            .cmp(&(b.priority.is_none(), b.priority))
            .then_with(|| a.test_type_id.cmp(&b.test_type_id))
    });
    Ok(rules)
}

pub(crate) fn resolve<R: StoreReader + ?Sized>(
    reader: &R,
    jurisdiction_id: &JurisdictionId,
    signals: &[TestSignal],
    as_of: DateTime<Utc>,
    policy: TiePolicy,
) -> Result<StatusResolution, RuleError> {
    let catalog = EntityCatalog::new(reader);
    catalog.jurisdiction(jurisdiction_id)?;

    // One slot per rule: a later observation of the same test supersedes an earlier one.
    // Expiry is judged on the surviving observation only.
    let mut latest: Vec<(StatusCandidate, bool)> = Vec::new();
    for signal in signals {
        let Some(rule) = reader.rule_for(jurisdiction_id, &signal.test_type_id)? else {
            continue;
        };
        let Some(status_id) = rule.status_for(&signal.result_id) else {
            continue;
        };

        let test_type = reader.test_type(&signal.test_type_id)?;
        let result = test_type
            .as_ref()
            .and_then(|test_type| test_type.result(&signal.result_id));
        let expired = is_expired(result, signal.observed_at, as_of);

        let candidate = StatusCandidate {
            rule_id: rule.id.clone(),
            test_type_id: rule.test_type_id.clone(),
            result_id: signal.result_id.clone(),
            jurisdiction_status_id: status_id.clone(),
            priority: rule.priority,
            sequence: rule.sequence,
            observed_at: signal.observed_at,
        };
        match latest
            .iter_mut()
            .find(|(kept, _)| kept.rule_id == candidate.rule_id)
        {
            // `None < Some(_)`: untimed signals never displace timed ones; equal times keep
            // the later signal.
            Some(slot) if candidate.observed_at >= slot.0.observed_at => {
                *slot = (candidate, expired)
            }
            Some(_) => {}
            None => latest.push((candidate, expired)),
        }
    }

    let candidates = latest
        .into_iter()
        .filter(|(_, expired)| !expired)
        .map(|(candidate, _)| candidate)
        .collect();

    let Some(winner) = select(candidates, policy)? else {
        return Ok(StatusResolution::NoStatus);
    };

    let status = catalog.status(jurisdiction_id, &winner.jurisdiction_status_id)?;
    let test_type = reader.test_type(&winner.test_type_id)?;
    let next_step = next_step_for(
        test_type
            .as_ref()
            .and_then(|test_type| test_type.result(&winner.result_id)),
        winner.observed_at,
    );

    Ok(StatusResolution::Resolved(ResolvedStatus {
        status,
        winner,
        next_step,
    }))
}
