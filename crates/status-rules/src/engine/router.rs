use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::access::NewAccessRule;
use super::catalog::NewStatus;
use super::domain::{
    AccessDecision, AccessRuleEntry, AccessRuleId, AppVersion, Jurisdiction, JurisdictionId,
    RuleId, StatusId, SymptomTableId, TestResultId, TestSignal, TestType, TestTypeId,
    TestTypeResult,
};
use super::error::RuleError;
use super::repository::{AuditSink, MutationContext, RuleStore};
use super::result_rules::{NewRule, RuleChanges};
use super::service::RuleEngine;
use super::symptoms::{NewSymptomTable, SymptomTableChanges};

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const AUDIT_NOTE_HEADER: &str = "x-audit-note";

type EngineState<S, A> = State<Arc<RuleEngine<S, A>>>;

/// Router builder exposing the catalog, rule administration and evaluation endpoints.
pub fn rules_router<S, A>(engine: Arc<RuleEngine<S, A>>) -> Router
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/jurisdictions",
            get(list_jurisdictions::<S, A>).post(create_jurisdiction::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id",
            get(jurisdiction_handler::<S, A>).delete(delete_jurisdiction::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/statuses",
            get(list_statuses::<S, A>).post(create_status::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/statuses/:status_id",
            get(status_handler::<S, A>).delete(delete_status::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/rules",
            get(list_rules::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/resolve",
            post(resolve_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/assessment",
            post(assessment_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/symptom-table",
            get(symptom_table_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/symptom-evaluation",
            post(evaluate_symptoms_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/access-rule",
            get(access_rule_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/access/:status_id",
            get(decide_access_handler::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/rulesets",
            get(list_rulesets::<S, A>),
        )
        .route(
            "/api/v1/jurisdictions/:jurisdiction_id/rulesets/:app_version",
            put(put_ruleset::<S, A>)
                .get(get_ruleset::<S, A>)
                .delete(delete_ruleset::<S, A>),
        )
        .route(
            "/api/v1/test-types",
            get(list_test_types::<S, A>).post(create_test_type::<S, A>),
        )
        .route(
            "/api/v1/test-types/:test_type_id",
            get(test_type_handler::<S, A>).delete(delete_test_type::<S, A>),
        )
        .route(
            "/api/v1/test-types/:test_type_id/results",
            post(add_result::<S, A>),
        )
        .route(
            "/api/v1/test-types/:test_type_id/results/:result_id",
            get(result_handler::<S, A>).delete(delete_result::<S, A>),
        )
        .route("/api/v1/rules", post(create_rule::<S, A>))
        .route(
            "/api/v1/rules/:rule_id",
            get(rule_handler::<S, A>)
                .put(update_rule::<S, A>)
                .delete(delete_rule::<S, A>),
        )
        .route("/api/v1/symptom-tables", post(create_symptom_table::<S, A>))
        .route(
            "/api/v1/symptom-tables/:table_id",
            put(update_symptom_table::<S, A>).delete(delete_symptom_table::<S, A>),
        )
        .route("/api/v1/access-rules", post(create_access_rule::<S, A>))
        .route(
            "/api/v1/access-rules/:access_rule_id",
            put(update_access_rule::<S, A>).delete(delete_access_rule::<S, A>),
        )
        .with_state(engine)
}

/// Reads the acting administrator and the optional audit note from request headers.
pub(crate) fn mutation_context(headers: &HeaderMap) -> Result<MutationContext, RuleError> {
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            RuleError::InvalidArgument(format!("mutations require the {ACTOR_HEADER} header"))
        })?;

    let context = MutationContext::new(actor);
    let note = headers
        .get(AUDIT_NOTE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    Ok(match note {
        Some(note) => context.with_annotation(note),
        None => context,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalsPayload {
    #[serde(default)]
    signals: Vec<TestSignal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SymptomCountsPayload {
    gr1_count: u32,
    gr2_count: u32,
}

/// Access entries arrive with a free-form decision so that bad values surface as
/// `InvalidArgument` rather than a body rejection.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessEntryPayload {
    jurisdiction_status_id: StatusId,
    decision: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessRulePayload {
    jurisdiction_id: JurisdictionId,
    #[serde(default)]
    entries: Vec<AccessEntryPayload>,
}

fn access_entries(entries: Vec<AccessEntryPayload>) -> Result<Vec<AccessRuleEntry>, RuleError> {
    entries
        .into_iter()
        .map(|entry| {
            Ok(AccessRuleEntry {
                jurisdiction_status_id: entry.jurisdiction_status_id,
                decision: entry.decision.parse::<AccessDecision>()?,
            })
        })
        .collect()
}

// --- catalog -----------------------------------------------------------------------------

pub(crate) async fn list_jurisdictions<S, A>(
    State(engine): EngineState<S, A>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.jurisdictions()?))
}

pub(crate) async fn create_jurisdiction<S, A>(
    State(engine): EngineState<S, A>,
    headers: HeaderMap,
    Json(jurisdiction): Json<Jurisdiction>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let created = engine.create_jurisdiction(&ctx, jurisdiction)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn jurisdiction_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.jurisdiction(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn delete_jurisdiction<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_jurisdiction(&ctx, &JurisdictionId(jurisdiction_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_statuses<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.statuses(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn create_status<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
    headers: HeaderMap,
    Json(status): Json<NewStatus>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let created = engine.create_status(&ctx, &JurisdictionId(jurisdiction_id), status)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn status_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, status_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.status(
        &JurisdictionId(jurisdiction_id),
        &StatusId(status_id),
    )?))
}

pub(crate) async fn delete_status<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, status_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_status(&ctx, &JurisdictionId(jurisdiction_id), &StatusId(status_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_test_types<S, A>(
    State(engine): EngineState<S, A>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.test_types()?))
}

pub(crate) async fn create_test_type<S, A>(
    State(engine): EngineState<S, A>,
    headers: HeaderMap,
    Json(test_type): Json<TestType>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let created = engine.create_test_type(&ctx, test_type)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn test_type_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(test_type_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.test_type(&TestTypeId(test_type_id))?))
}

pub(crate) async fn delete_test_type<S, A>(
    State(engine): EngineState<S, A>,
    Path(test_type_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_test_type(&ctx, &TestTypeId(test_type_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn add_result<S, A>(
    State(engine): EngineState<S, A>,
    Path(test_type_id): Path<String>,
    headers: HeaderMap,
    Json(result): Json<TestTypeResult>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let updated = engine.add_test_type_result(&ctx, &TestTypeId(test_type_id), result)?;
    Ok((StatusCode::CREATED, Json(updated)))
}

pub(crate) async fn result_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path((test_type_id, result_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.test_type_result(
        &TestTypeId(test_type_id),
        &TestResultId(result_id),
    )?))
}

pub(crate) async fn delete_result<S, A>(
    State(engine): EngineState<S, A>,
    Path((test_type_id, result_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_test_type_result(&ctx, &TestTypeId(test_type_id), &TestResultId(result_id))?;
    Ok(StatusCode::NO_CONTENT)
}

// --- result mapping rules ----------------------------------------------------------------

pub(crate) async fn create_rule<S, A>(
    State(engine): EngineState<S, A>,
    headers: HeaderMap,
    Json(new): Json<NewRule>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let created = engine.create_rule(&ctx, new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn rule_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(rule_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.rule(&RuleId(rule_id))?))
}

pub(crate) async fn update_rule<S, A>(
    State(engine): EngineState<S, A>,
    Path(rule_id): Path<String>,
    headers: HeaderMap,
    Json(changes): Json<RuleChanges>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    Ok(Json(engine.update_rule(&ctx, &RuleId(rule_id), changes)?))
}

pub(crate) async fn delete_rule<S, A>(
    State(engine): EngineState<S, A>,
    Path(rule_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_rule(&ctx, &RuleId(rule_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_rules<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.list_rules(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn resolve_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
    Json(payload): Json<SignalsPayload>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let resolution = engine.resolve_status(&JurisdictionId(jurisdiction_id), &payload.signals)?;
    Ok(Json(resolution))
}

pub(crate) async fn assessment_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
    Json(payload): Json<SignalsPayload>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let assessment = engine.assess(&JurisdictionId(jurisdiction_id), &payload.signals)?;
    Ok(Json(assessment))
}

// --- symptom decision tables -------------------------------------------------------------

pub(crate) async fn create_symptom_table<S, A>(
    State(engine): EngineState<S, A>,
    headers: HeaderMap,
    Json(new): Json<NewSymptomTable>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let created = engine.create_symptom_table(&ctx, new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn update_symptom_table<S, A>(
    State(engine): EngineState<S, A>,
    Path(table_id): Path<String>,
    headers: HeaderMap,
    Json(changes): Json<SymptomTableChanges>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    Ok(Json(engine.update_symptom_table(
        &ctx,
        &SymptomTableId(table_id),
        changes,
    )?))
}

pub(crate) async fn delete_symptom_table<S, A>(
    State(engine): EngineState<S, A>,
    Path(table_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_symptom_table(&ctx, &SymptomTableId(table_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn symptom_table_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.symptom_table(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn evaluate_symptoms_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
    Json(counts): Json<SymptomCountsPayload>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let outcome = engine.evaluate_symptoms(
        &JurisdictionId(jurisdiction_id),
        counts.gr1_count,
        counts.gr2_count,
    )?;
    Ok(Json(outcome))
}

// --- access rules ------------------------------------------------------------------------

pub(crate) async fn create_access_rule<S, A>(
    State(engine): EngineState<S, A>,
    headers: HeaderMap,
    Json(payload): Json<AccessRulePayload>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let new = NewAccessRule {
        jurisdiction_id: payload.jurisdiction_id,
        entries: access_entries(payload.entries)?,
    };
    let created = engine.create_access_rule(&ctx, new)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn update_access_rule<S, A>(
    State(engine): EngineState<S, A>,
    Path(access_rule_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<AccessRulePayload>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let entries = access_entries(payload.entries)?;
    let updated = engine.update_access_rule(
        &ctx,
        &AccessRuleId(access_rule_id),
        &payload.jurisdiction_id,
        entries,
    )?;
    Ok(Json(updated))
}

pub(crate) async fn delete_access_rule<S, A>(
    State(engine): EngineState<S, A>,
    Path(access_rule_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    engine.delete_access_rule(&ctx, &AccessRuleId(access_rule_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn access_rule_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.access_rule(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn decide_access_handler<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, status_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let jurisdiction_id = JurisdictionId(jurisdiction_id);
    let status_id = StatusId(status_id);
    let decision = engine.decide_access(&jurisdiction_id, &status_id)?;
    Ok(Json(json!({
        "jurisdiction_id": jurisdiction_id,
        "jurisdiction_status_id": status_id,
        "decision": decision,
    })))
}

// --- versioned rulesets ------------------------------------------------------------------

pub(crate) async fn list_rulesets<S, A>(
    State(engine): EngineState<S, A>,
    Path(jurisdiction_id): Path<String>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    Ok(Json(engine.document_versions(&JurisdictionId(jurisdiction_id))?))
}

pub(crate) async fn put_ruleset<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, app_version)): Path<(String, String)>,
    headers: HeaderMap,
    payload: String,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let app_version = AppVersion::parse(&app_version)?;
    let written = engine.put_document(&ctx, &JurisdictionId(jurisdiction_id), app_version, payload)?;
    let status = if written.replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(written)))
}

pub(crate) async fn get_ruleset<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, app_version)): Path<(String, String)>,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let app_version = AppVersion::parse(&app_version)?;
    Ok(Json(engine.document(&JurisdictionId(jurisdiction_id), &app_version)?))
}

pub(crate) async fn delete_ruleset<S, A>(
    State(engine): EngineState<S, A>,
    Path((jurisdiction_id, app_version)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, RuleError>
where
    S: RuleStore + 'static,
    A: AuditSink + 'static,
{
    let ctx = mutation_context(&headers)?;
    let app_version = AppVersion::parse(&app_version)?;
    engine.remove_document(&ctx, &JurisdictionId(jurisdiction_id), &app_version)?;
    Ok(StatusCode::NO_CONTENT)
}
