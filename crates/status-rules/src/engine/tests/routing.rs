use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::engine::{
    router, rules_router, AccessDecision, AccessRuleEntry, InMemoryAuditLog, InMemoryRuleStore,
    NewAccessRule, ACTOR_HEADER, AUDIT_NOTE_HEADER,
};

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(ACTOR_HEADER, "admin@county.gov")
        .header(AUDIT_NOTE_HEADER, "ticket 4411")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_rule_route_returns_created_rule() {
    let (engine, _, audit) = build_engine();
    let app = rules_router(Arc::new(engine));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/rules",
            serde_json::to_value(pcr_rule(Some(5))).unwrap(),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["jurisdiction_id"], "J1");
    assert_eq!(payload["test_type"]["id"], "PCR");
    assert_eq!(payload["priority"], 5);

    let events = audit.events();
    let last = events.last().expect("audited");
    assert_eq!(last.annotation.as_deref(), Some("ticket 4411"));
}

#[tokio::test]
async fn mutations_without_actor_are_bad_requests() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let request = Request::post("/api/v1/rules")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&pcr_rule(Some(5))).unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert!(payload["error"]
        .as_str()
        .expect("error message")
        .contains(ACTOR_HEADER));
}

#[tokio::test]
async fn invalid_references_map_to_unprocessable_entity() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let body = json!({
        "jurisdiction_id": "J1",
        "test_type_id": "PCR",
        "priority": 1,
        "mappings": [
            { "test_type_result_id": "reactive", "jurisdiction_status_id": "monitor" }
        ]
    });
    let response = app
        .oneshot(json_request("POST", "/api/v1/rules", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn resolve_route_reports_the_winning_status() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(1)))
        .expect("pcr rule");
    let app = rules_router(Arc::new(engine));

    let body = json!({ "signals": [ { "test_type_id": "PCR", "result_id": "positive" } ] });
    let response = app
        .oneshot(json_request("POST", "/api/v1/jurisdictions/J1/resolve", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["outcome"], "resolved");
    assert_eq!(payload["status"]["id"], "quarantine");
    assert_eq!(payload["next_step"]["text"], "Isolate for ten days");
}

#[tokio::test]
async fn ambiguous_resolution_lists_candidates() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(2)))
        .expect("pcr rule");
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");
    let app = rules_router(Arc::new(engine));

    let body = json!({
        "signals": [
            { "test_type_id": "PCR", "result_id": "positive" },
            { "test_type_id": "ANTIGEN", "result_id": "reactive" }
        ]
    });
    let response = app
        .oneshot(json_request("POST", "/api/v1/jurisdictions/J1/resolve", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["candidates"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn unknown_rule_is_not_found() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let response = app
        .oneshot(get_request("/api/v1/rules/rule-missing"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn access_rules_reject_unknown_decisions() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let body = json!({
        "jurisdiction_id": "J1",
        "entries": [ { "jurisdiction_status_id": "healthy", "decision": "sometimes" } ]
    });
    let response = app
        .oneshot(json_request("POST", "/api/v1/access-rules", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn symptom_evaluation_route_applies_thresholds() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let table = json!({
        "jurisdiction_id": "J1",
        "gr1_threshold": 3,
        "gr2_threshold": 2,
        "entries": serde_json::to_value(symptom_entries()).unwrap(),
    });
    let created = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/symptom-tables", table))
        .await
        .expect("route executes");
    assert_eq!(created.status(), StatusCode::CREATED);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/jurisdictions/J1/symptom-evaluation",
            json!({ "gr1_count": 3, "gr2_count": 1 }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"]["id"], "monitor");
    assert_eq!(payload["gr1"], true);
    assert_eq!(payload["gr2"], false);
}

#[tokio::test]
async fn ruleset_routes_upsert_raw_payloads() {
    let (engine, _, _) = build_engine();
    let app = rules_router(Arc::new(engine));

    let put = |payload: &'static str| {
        Request::put("/api/v1/jurisdictions/J1/rulesets/3.1.0")
            .header(ACTOR_HEADER, "release-bot")
            .body(Body::from(payload))
            .unwrap()
    };

    let first = app
        .clone()
        .oneshot(put("rules: v1"))
        .await
        .expect("route executes");
    assert_eq!(first.status(), StatusCode::CREATED);
    let second = app
        .clone()
        .oneshot(put("rules: v2"))
        .await
        .expect("route executes");
    assert_eq!(second.status(), StatusCode::OK);

    let fetched = app
        .clone()
        .oneshot(get_request("/api/v1/jurisdictions/J1/rulesets/3.1.0"))
        .await
        .expect("route executes");
    assert_eq!(fetched.status(), StatusCode::OK);
    let payload = read_json_body(fetched).await;
    assert_eq!(payload["payload"], "rules: v2");
    assert_eq!(payload["app_version"], "3.1.0");

    let versions = app
        .oneshot(get_request("/api/v1/jurisdictions/J1/rulesets"))
        .await
        .expect("route executes");
    assert_eq!(read_json_body(versions).await, json!(["3.1.0"]));
}

#[tokio::test]
async fn delete_routes_answer_no_content() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(1)))
        .expect("pcr rule");
    let app = rules_router(Arc::new(engine));

    let request = Request::delete(format!("/api/v1/rules/{}", created.rule.id))
        .header(ACTOR_HEADER, "admin@county.gov")
        .body(Body::empty())
        .unwrap();
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listed = app
        .oneshot(get_request("/api/v1/jurisdictions/J1/rules"))
        .await
        .expect("route executes");
    assert_eq!(read_json_body(listed).await, json!([]));
}

#[tokio::test]
async fn decide_access_handler_reports_unspecified_without_entry() {
    let (engine, _, _) = build_engine();
    engine
        .create_access_rule(
            &admin(),
            NewAccessRule {
                jurisdiction_id: j1(),
                entries: vec![AccessRuleEntry {
                    jurisdiction_status_id: status("healthy"),
                    decision: AccessDecision::Granted,
                }],
            },
        )
        .expect("access rule");
    let engine = Arc::new(engine);

    let granted = router::decide_access_handler::<InMemoryRuleStore, InMemoryAuditLog>(
        State(engine.clone()),
        Path(("J1".to_string(), "healthy".to_string())),
    )
    .await
    .into_response();
    assert_eq!(granted.status(), StatusCode::OK);
    assert_eq!(read_json_body(granted).await["decision"], "granted");

    let unspecified = router::decide_access_handler::<InMemoryRuleStore, InMemoryAuditLog>(
        State(engine),
        Path(("J1".to_string(), "quarantine".to_string())),
    )
    .await
    .into_response();
    assert_eq!(read_json_body(unspecified).await["decision"], "unspecified");
}
