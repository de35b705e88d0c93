use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    JurisdictionStatus, RuleId, StatusId, TestResultId, TestTypeId, TestTypeResult,
};
use super::error::RuleError;

/// How ties between equally ranked candidates naming different statuses are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    /// Surface every tied candidate as `RuleError::Ambiguous`.
    #[default]
    Report,
    /// Pick the candidate whose rule was stored first. Arbitrary, but deterministic.
    FirstInserted,
}

impl TiePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "report" | "ambiguous" => Some(Self::Report),
            "first-inserted" | "first_inserted" => Some(Self::FirstInserted),
            _ => None,
        }
    }
}

/// Status produced by one signal through one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCandidate {
    pub rule_id: RuleId,
    pub test_type_id: TestTypeId,
    pub result_id: TestResultId,
    pub jurisdiction_status_id: StatusId,
    pub priority: Option<i32>,
    #[serde(skip)]
    pub(crate) sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Guidance attached to the winning test result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStep {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activates_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStatus {
    pub status: JurisdictionStatus,
    pub winner: StatusCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<NextStep>,
}

/// Outcome of status resolution. `NoStatus` is not a "healthy" status: callers keep their
/// own baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusResolution {
    Resolved(ResolvedStatus),
    NoStatus,
}

impl StatusResolution {
    pub fn status_id(&self) -> Option<&StatusId> {
        match self {
            StatusResolution::Resolved(resolved) => Some(&resolved.status.id),
            StatusResolution::NoStatus => None,
        }
    }
}

/// Lower priority value wins; rules without a priority rank after every explicit one.
fn rank(priority: Option<i32>) -> (bool, i32) {
    (priority.is_none(), priority.unwrap_or(i32::MAX))
}

pub(crate) fn select(
    candidates: Vec<StatusCandidate>,
    policy: TiePolicy,
) -> Result<Option<StatusCandidate>, RuleError> {
    let Some(best) = candidates.iter().map(|c| rank(c.priority)).min() else {
        return Ok(None);
    };

    let mut tied: Vec<StatusCandidate> = candidates
        .into_iter()
        .filter(|candidate| rank(candidate.priority) == best)
        .collect();
    tied.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.test_type_id.cmp(&b.test_type_id))
    });

    let unanimous = tied
        .windows(2)
        .all(|pair| pair[0].jurisdiction_status_id == pair[1].jurisdiction_status_id);

    if unanimous || policy == TiePolicy::FirstInserted {
        return Ok(tied.into_iter().next());
    }

    let priority = tied.first().and_then(|candidate| candidate.priority);
    Err(RuleError::Ambiguous {
        priority,
        candidates: tied,
    })
}

/// `true` when the result carries an expiry and the observation is older than it.
pub(crate) fn is_expired(
    result: Option<&TestTypeResult>,
    observed_at: Option<DateTime<Utc>>,
    as_of: DateTime<Utc>,
) -> bool {
    match (result.and_then(|r| r.result_expires_offset), observed_at) {
        (Some(hours), Some(observed)) => offset_from(observed, hours)
            .map(|expires_at| expires_at <= as_of)
            .unwrap_or(false),
        _ => false,
    }
}

pub(crate) fn next_step_for(
    result: Option<&TestTypeResult>,
    observed_at: Option<DateTime<Utc>>,
) -> Option<NextStep> {
    let result = result?;
    if result.next_step.trim().is_empty() {
        return None;
    }
    let activates_at = match (result.next_step_offset, observed_at) {
        (Some(hours), Some(observed)) => offset_from(observed, hours),
        _ => None,
    };
    Some(NextStep {
        text: result.next_step.clone(),
        activates_at,
    })
}

fn offset_from(instant: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_hours(hours).and_then(|delta| instant.checked_add_signed(delta))
}
