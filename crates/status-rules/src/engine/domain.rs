use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::RuleError;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Administrative region ("county") owning its own status vocabulary.
    JurisdictionId
);
identifier!(StatusId);
identifier!(TestTypeId);
identifier!(TestResultId);
identifier!(
    /// Identifier of a result-mapping rule.
    RuleId
);
identifier!(AccessRuleId);
identifier!(SymptomTableId);
identifier!(
    /// Authenticated administrator performing a mutation.
    ActorId
);

impl RuleId {
    pub(crate) fn generate() -> Self {
        Self(format!("rule-{}", uuid::Uuid::new_v4()))
    }
}

impl AccessRuleId {
    pub(crate) fn generate() -> Self {
        Self(format!("access-{}", uuid::Uuid::new_v4()))
    }
}

impl SymptomTableId {
    pub(crate) fn generate() -> Self {
        Self(format!("symptoms-{}", uuid::Uuid::new_v4()))
    }
}

/// Entity families known to the engine, used for error and audit reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Jurisdiction,
    JurisdictionStatus,
    TestType,
    TestTypeResult,
    ResultMappingRule,
    SymptomDecisionTable,
    AccessRule,
    VersionedRuleDocument,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Jurisdiction => "jurisdiction",
            EntityKind::JurisdictionStatus => "jurisdiction status",
            EntityKind::TestType => "test type",
            EntityKind::TestTypeResult => "test type result",
            EntityKind::ResultMappingRule => "result mapping rule",
            EntityKind::SymptomDecisionTable => "symptom decision table",
            EntityKind::AccessRule => "access rule",
            EntityKind::VersionedRuleDocument => "versioned rule document",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: JurisdictionId,
    pub name: String,
    pub region: String,
    pub country: String,
}

/// Named health/access state scoped to a single jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionStatus {
    pub id: StatusId,
    pub jurisdiction_id: JurisdictionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Diagnostic test category owning its ordered list of discrete outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestType {
    pub id: TestTypeId,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub results: Vec<TestTypeResult>,
}

impl TestType {
    pub fn result(&self, id: &TestResultId) -> Option<&TestTypeResult> {
        self.results.iter().find(|result| &result.id == id)
    }
}

/// Offsets are expressed in hours relative to when the result was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTypeResult {
    pub id: TestResultId,
    pub name: String,
    #[serde(default)]
    pub next_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_expires_offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultStatusMapping {
    pub test_type_result_id: TestResultId,
    pub jurisdiction_status_id: StatusId,
}

/// Decision table translating the results of one test type into statuses of one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMappingRule {
    pub id: RuleId,
    pub jurisdiction_id: JurisdictionId,
    pub test_type_id: TestTypeId,
    pub priority: Option<i32>,
    pub mappings: Vec<ResultStatusMapping>,
    /// Storage insertion ordinal, assigned when the rule is first persisted.
    #[serde(default)]
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResultMappingRule {
    pub fn status_for(&self, result_id: &TestResultId) -> Option<&StatusId> {
        self.mappings
            .iter()
            .find(|mapping| &mapping.test_type_result_id == result_id)
            .map(|mapping| &mapping.jurisdiction_status_id)
    }

    pub fn references_status(&self, status_id: &StatusId) -> bool {
        self.mappings
            .iter()
            .any(|mapping| &mapping.jurisdiction_status_id == status_id)
    }

    pub fn references_result(&self, result_id: &TestResultId) -> bool {
        self.status_for(result_id).is_some()
    }
}

/// Rule together with the catalog entities it is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydratedRule {
    #[serde(flatten)]
    pub rule: ResultMappingRule,
    pub jurisdiction: Jurisdiction,
    pub test_type: TestType,
}

/// One observed test outcome for the subject being assessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSignal {
    pub test_type_id: TestTypeId,
    pub result_id: TestResultId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl TestSignal {
    pub fn new(test_type_id: impl Into<String>, result_id: impl Into<String>) -> Self {
        Self {
            test_type_id: TestTypeId::new(test_type_id),
            result_id: TestResultId::new(result_id),
            observed_at: None,
        }
    }

    pub fn observed_at(mut self, instant: DateTime<Utc>) -> Self {
        self.observed_at = Some(instant);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomDecisionEntry {
    pub gr1: bool,
    pub gr2: bool,
    pub jurisdiction_status_id: StatusId,
    #[serde(default)]
    pub next_step: String,
}

/// Outcome stored in one cell of the symptom matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SymptomCell {
    jurisdiction_status_id: StatusId,
    next_step: String,
}

/// Exhaustive 2x2 matrix over the (gr1, gr2) symptom-group flags.
///
/// Construction only succeeds when every combination appears exactly once, so lookups
/// never fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "Vec<SymptomDecisionEntry>",
    into = "Vec<SymptomDecisionEntry>"
)]
pub struct SymptomMatrix {
    cells: [SymptomCell; 4],
}

impl SymptomMatrix {
    const fn index(gr1: bool, gr2: bool) -> usize {
        ((gr1 as usize) << 1) | gr2 as usize
    }

    const fn flags(index: usize) -> (bool, bool) {
        (index & 0b10 != 0, index & 0b01 != 0)
    }

    pub fn from_entries(entries: Vec<SymptomDecisionEntry>) -> Result<Self, RuleError> {
        if entries.len() != 4 {
            return Err(RuleError::InvalidArgument(format!(
                "symptom decision table needs exactly 4 entries, found {}",
                entries.len()
            )));
        }

        let mut slots: [Option<SymptomCell>; 4] = Default::default();
        for entry in entries {
            let slot = &mut slots[Self::index(entry.gr1, entry.gr2)];
            if slot.is_some() {
                return Err(RuleError::InvalidArgument(format!(
                    "duplicate symptom entry for gr1={}, gr2={}",
                    entry.gr1, entry.gr2
                )));
            }
            *slot = Some(SymptomCell {
                jurisdiction_status_id: entry.jurisdiction_status_id,
                next_step: entry.next_step,
            });
        }

        match slots {
            [Some(none), Some(gr2_only), Some(gr1_only), Some(both)] => Ok(Self {
                cells: [none, gr2_only, gr1_only, both],
            }),
            _ => Err(RuleError::InvalidArgument(
                "symptom entries must cover every gr1/gr2 combination".to_string(),
            )),
        }
    }

    pub fn lookup(&self, gr1: bool, gr2: bool) -> (&StatusId, &str) {
        let cell = &self.cells[Self::index(gr1, gr2)];
        (&cell.jurisdiction_status_id, &cell.next_step)
    }

    pub fn entries(&self) -> Vec<SymptomDecisionEntry> {
        self.cells
            .iter()
            .enumerate()
            .map(|(index, cell)| {
                let (gr1, gr2) = Self::flags(index);
                SymptomDecisionEntry {
                    gr1,
                    gr2,
                    jurisdiction_status_id: cell.jurisdiction_status_id.clone(),
                    next_step: cell.next_step.clone(),
                }
            })
            .collect()
    }

    pub fn references_status(&self, status_id: &StatusId) -> bool {
        self.cells
            .iter()
            .any(|cell| &cell.jurisdiction_status_id == status_id)
    }

    pub(crate) fn status_ids(&self) -> impl Iterator<Item = &StatusId> {
        self.cells.iter().map(|cell| &cell.jurisdiction_status_id)
    }
}

impl TryFrom<Vec<SymptomDecisionEntry>> for SymptomMatrix {
    type Error = RuleError;

    fn try_from(entries: Vec<SymptomDecisionEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<SymptomMatrix> for Vec<SymptomDecisionEntry> {
    fn from(matrix: SymptomMatrix) -> Self {
        matrix.entries()
    }
}

/// Legacy per-jurisdiction symptom questionnaire decision table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomDecisionTable {
    pub id: SymptomTableId,
    pub jurisdiction_id: JurisdictionId,
    pub gr1_threshold: u32,
    pub gr2_threshold: u32,
    pub entries: SymptomMatrix,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SymptomDecisionTable {
    pub fn evaluate(&self, gr1_count: u32, gr2_count: u32) -> SymptomVerdict {
        let gr1 = gr1_count >= self.gr1_threshold;
        let gr2 = gr2_count >= self.gr2_threshold;
        let (status_id, next_step) = self.entries.lookup(gr1, gr2);
        SymptomVerdict {
            gr1,
            gr2,
            jurisdiction_status_id: status_id.clone(),
            next_step: next_step.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomVerdict {
    pub gr1: bool,
    pub gr2: bool,
    pub jurisdiction_status_id: StatusId,
    pub next_step: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Granted,
    Denied,
}

impl AccessDecision {
    pub const fn label(self) -> &'static str {
        match self {
            AccessDecision::Granted => "granted",
            AccessDecision::Denied => "denied",
        }
    }
}

impl FromStr for AccessDecision {
    type Err = RuleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(RuleError::InvalidArgument(format!(
                "access decision must be 'granted' or 'denied', found '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRuleEntry {
    pub jurisdiction_status_id: StatusId,
    pub decision: AccessDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: AccessRuleId,
    pub jurisdiction_id: JurisdictionId,
    pub entries: Vec<AccessRuleEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessRule {
    pub fn decision_for(&self, status_id: &StatusId) -> Option<AccessDecision> {
        self.entries
            .iter()
            .find(|entry| &entry.jurisdiction_status_id == status_id)
            .map(|entry| entry.decision)
    }
}

/// Access answer; `Unspecified` leaves the default policy to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessVerdict {
    Granted,
    Denied,
    Unspecified,
}

impl From<Option<AccessDecision>> for AccessVerdict {
    fn from(decision: Option<AccessDecision>) -> Self {
        match decision {
            Some(AccessDecision::Granted) => AccessVerdict::Granted,
            Some(AccessDecision::Denied) => AccessVerdict::Denied,
            None => AccessVerdict::Unspecified,
        }
    }
}

const MAX_APP_VERSION_LEN: usize = 64;

/// Client application version addressing a versioned rule document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppVersion(String);

impl AppVersion {
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(RuleError::InvalidArgument(
                "app version must not be blank".to_string(),
            ));
        }
        if value.len() > MAX_APP_VERSION_LEN {
            return Err(RuleError::InvalidArgument(format!(
                "app version exceeds {MAX_APP_VERSION_LEN} characters"
            )));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(RuleError::InvalidArgument(format!(
                "app version '{value}' must not contain whitespace"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dotted numeric form with trailing zero segments removed, so `1.2` and `1.2.0` compare
    /// equal. `None` when any segment is not a plain number.
    pub fn numeric_segments(&self) -> Option<Vec<u64>> {
        let mut segments = self
            .0
            .split('.')
            .map(|segment| segment.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        while segments.last() == Some(&0) {
            segments.pop();
        }
        Some(segments)
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AppVersion {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppVersion> for String {
    fn from(version: AppVersion) -> Self {
        version.0
    }
}

/// Opaque ruleset addressed by `(jurisdiction_id, app_version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRuleDocument {
    pub jurisdiction_id: JurisdictionId,
    pub app_version: AppVersion,
    pub payload: String,
    pub last_updated: DateTime<Utc>,
}
