use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use govledger_core::{Actor, GovernanceLedger};
use govledger_service::{build_router, AppState, TokenTable};
use serde_json::{json, Value};
use tower::ServiceExt;

const HUMAN: &str = "t-alice";
const AGENT: &str = "t-builder";
const SYSTEM: &str = "t-ci";

fn test_router() -> Router {
    let tokens = TokenTable::default()
        .with_token(HUMAN, Actor::human("alice"))
        .with_token(AGENT, Actor::agent("builder"))
        .with_token(SYSTEM, Actor::system("ci"));
    build_router(AppState::new(GovernanceLedger::in_memory(), tokens), false)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn depends_on(kind: &str, id: &str, stream_kind: &str, root: (&str, &str)) -> Value {
    json!({
        "stream_id": id,
        "stream_kind": stream_kind,
        "event_type": format!("{}Registered", kind),
        "refs": [
            {"kind": kind, "id": id, "rel": "about"},
            {"kind": root.0, "id": root.1, "rel": "depends_on"}
        ]
    })
}

async fn seed_sr_spec(app: &Router) {
    for event in [
        depends_on("Candidate", "cand_1", "CANDIDATE", ("GovernedArtifact", "SR-SPEC")),
        depends_on("OracleSuite", "suite_1", "GOVERNANCE", ("GovernedArtifact", "SR-SPEC")),
        depends_on("Candidate", "cand_2", "CANDIDATE", ("OracleSuite", "suite_1")),
    ] {
        let (status, _) = send(app, "POST", "/events", Some(AGENT), Some(event)).await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn health_reports_backend_and_head() {
    let app = test_router();
    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "memory");
    assert_eq!(body["events"], 0);
}

#[tokio::test]
async fn writes_require_a_known_bearer_token() {
    let app = test_router();
    let approval = json!({"portal_id": "ReleaseApprovalPortal", "decision": "APPROVED"});

    let (status, body) = send(&app, "POST", "/approvals", None, Some(approval.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, "POST", "/approvals", Some("bogus"), Some(approval)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agents_cannot_record_approvals() {
    let app = test_router();
    let approval = json!({"portal_id": "ReleaseApprovalPortal", "decision": "APPROVED"});

    let (status, body) = send(&app, "POST", "/approvals", Some(AGENT), Some(approval.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "AUTHORIZATION_ERROR");

    let (status, body) = send(&app, "POST", "/approvals", Some(HUMAN), Some(approval)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["decision"], "APPROVED");
    let approval_id = body["approval_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/approvals/{}", approval_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approved_by"]["id"], "alice");

    let (status, body) = send(&app, "GET", "/approvals?decision=APPROVED", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn unknown_portal_is_a_validation_error() {
    let app = test_router();
    let approval = json!({"portal_id": "BackDoorPortal", "decision": "APPROVED"});

    let (status, body) = send(&app, "POST", "/approvals", Some(HUMAN), Some(approval)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn mark_list_and_resolve_staleness() {
    let app = test_router();
    seed_sr_spec(&app).await;

    let mark = json!({
        "root_ref": {"kind": "GovernedArtifact", "id": "SR-SPEC"},
        "reason_code": "GOVERNED_ARTIFACT_CHANGED"
    });
    let (status, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["stale_ids"].as_array().unwrap().len(), 3);

    // Same root and reason again reuses the open markers.
    let (status, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stale_ids"].as_array().unwrap().len(), 3);

    let (status, body) = send(
        &app,
        "GET",
        "/staleness/dependents?root_kind=GovernedArtifact&root_id=SR-SPEC",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let dependents = body["dependents"].as_array().unwrap();
    assert_eq!(dependents.len(), 3);

    let (status, body) = send(
        &app,
        "GET",
        "/staleness/blocking?kind=Candidate&id=cand_2",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], true);
    let stale_id = body["markers"][0]["stale_id"].as_str().unwrap().to_string();
    assert_eq!(body["markers"][0]["depth"], 2);

    let resolve = json!({"resolution_kind": "MECHANICAL", "resolution_note": "re-ran suite"});
    let uri = format!("/staleness/{}/resolve", stale_id);
    let (status, body) = send(&app, "POST", &uri, Some(SYSTEM), Some(resolve.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let (status, body) = send(&app, "POST", &uri, Some(HUMAN), Some(resolve)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, body) = send(&app, "GET", &format!("/staleness/{}", stale_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolution_kind"], "MECHANICAL");

    let (_, body) = send(
        &app,
        "GET",
        "/staleness/blocking?kind=Candidate&id=cand_2",
        None,
        None,
    )
    .await;
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn decision_resolution_needs_a_human_and_refs() {
    let app = test_router();
    seed_sr_spec(&app).await;

    let mark = json!({
        "root_ref": {"kind": "GovernedArtifact", "id": "SR-SPEC"},
        "max_depth": 1
    });
    let (_, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark)).await;
    let stale_id = body["stale_ids"][0].as_str().unwrap().to_string();
    let uri = format!("/staleness/{}/resolve", stale_id);

    let no_refs = json!({"resolution_kind": "DECISION"});
    let (status, _) = send(&app, "POST", &uri, Some(HUMAN), Some(no_refs)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let decision = json!({
        "trigger": "STALENESS_REVIEW",
        "decision": "keep candidate",
        "rationale": "editorial change only",
        "subject_refs": [{"kind": "Candidate", "id": "cand_1"}]
    });
    let (status, body) = send(&app, "POST", "/decisions", Some(HUMAN), Some(decision)).await;
    assert_eq!(status, StatusCode::CREATED);
    let decision_id = body["decision_id"].as_str().unwrap().to_string();

    let with_refs = json!({
        "resolution_kind": "DECISION",
        "resolution_refs": [{"kind": "Decision", "id": decision_id, "rel": "resolved_by"}]
    });
    let (status, _) = send(&app, "POST", &uri, Some(SYSTEM), Some(with_refs.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", &uri, Some(HUMAN), Some(with_refs)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let (status, body) = send(&app, "GET", "/decisions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn unknown_marker_is_not_found() {
    let app = test_router();
    let (status, body) = send(&app, "GET", "/staleness/stale_missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn exception_lifecycle_over_http() {
    let app = test_router();
    let create = json!({
        "kind": "DEVIATION",
        "scope": {"candidate_id": "cand_1"},
        "rationale": "vendor patch pending",
        "target_description": "skip lint on generated code"
    });
    let (status, body) = send(&app, "POST", "/exceptions", Some(HUMAN), Some(create)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "CREATED");
    let exception_id = body["exception_id"].as_str().unwrap().to_string();

    let activate = format!("/exceptions/{}/activate", exception_id);
    let (status, body) = send(&app, "POST", &activate, Some(HUMAN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ACTIVE");

    let (status, _) = send(&app, "POST", &activate, Some(HUMAN), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let resolve = format!("/exceptions/{}/resolve", exception_id);
    let (status, _) = send(&app, "POST", &resolve, Some(AGENT), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        "POST",
        &resolve,
        Some(HUMAN),
        Some(json!({"resolution_notes": "patch landed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "RESOLVED");

    let (_, body) = send(&app, "GET", &format!("/exceptions/{}", exception_id), None, None).await;
    assert_eq!(body["resolution_notes"], "patch landed");

    let (_, body) = send(&app, "GET", "/exceptions?status=RESOLVED", None, None).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn integrity_conditions_cannot_be_waived() {
    let app = test_router();

    let (status, _) = send(
        &app,
        "POST",
        "/integrity/conditions",
        Some(SYSTEM),
        Some(json!({"oracle_id": "oracle:build", "condition": "ORACLE_GAP"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let waiver = json!({
        "kind": "WAIVER",
        "scope": {"oracle_id": "oracle:build"},
        "rationale": "flaky runner",
        "target_description": "accept failing build oracle"
    });
    let (status, body) = send(&app, "POST", "/exceptions", Some(HUMAN), Some(waiver)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let literal = json!({
        "kind": "WAIVER",
        "scope": {"oracle_id": "oracle:lint"},
        "rationale": "noise",
        "target_description": "waive ORACLE_TAMPER finding"
    });
    let (status, _) = send(&app, "POST", "/exceptions", Some(HUMAN), Some(literal)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "POST",
        "/integrity/conditions",
        Some(SYSTEM),
        Some(json!({"oracle_id": "oracle:build", "condition": "CLOUDY"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn events_are_listed_newest_first_by_default() {
    let app = test_router();
    seed_sr_spec(&app).await;

    let (status, body) = send(&app, "GET", "/events?limit=2", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 3);
    assert_eq!(body["has_more"], true);
    assert_eq!(body["events"][0]["global_seq"], 3);
    assert_eq!(body["events"][1]["global_seq"], 2);

    let cursor = body["next_cursor"].as_u64().unwrap();
    let (_, body) = send(&app, "GET", &format!("/events?limit=2&cursor={}", cursor), None, None).await;
    assert_eq!(body["events"][0]["global_seq"], 1);
    assert_eq!(body["has_more"], false);

    let (_, body) = send(&app, "GET", "/events?order=asc&stream_kind=CANDIDATE", None, None).await;
    let ids: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["stream_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["cand_1", "cand_2"]);

    let (status, _) = send(&app, "GET", "/events?order=sideways", None, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let event_id = body["events"][0]["event_id"].as_str().unwrap().to_string();
    let (status, body) = send(&app, "GET", &format!("/events/{}", event_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["actor_kind"], "AGENT");
}

#[tokio::test]
async fn event_appends_are_validated() {
    let app = test_router();

    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("authorization", format!("Bearer {}", AGENT))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.clone().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let reserved = json!({
        "stream_id": "appr_forged",
        "stream_kind": "APPROVAL",
        "event_type": "ApprovalRecorded"
    });
    let (status, _) = send(&app, "POST", "/events", Some(AGENT), Some(reserved)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let retried = json!({
        "event_id": "evt_fixed",
        "stream_id": "run_1",
        "stream_kind": "RUN",
        "event_type": "RunCompleted"
    });
    let (status, first) = send(&app, "POST", "/events", Some(SYSTEM), Some(retried.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = send(&app, "POST", "/events", Some(SYSTEM), Some(retried)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["receipt"]["global_seq"], second["receipt"]["global_seq"]);

    let stale_write = json!({
        "stream_id": "run_1",
        "stream_kind": "RUN",
        "event_type": "RunCompleted",
        "expected_version": 0
    });
    let (status, _) = send(&app, "POST", "/events", Some(SYSTEM), Some(stale_write)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn marker_streams_reject_domain_appends() {
    let app = test_router();
    seed_sr_spec(&app).await;

    let mark = json!({
        "root_ref": {"kind": "GovernedArtifact", "id": "SR-SPEC"},
        "max_depth": 1
    });
    let (_, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark)).await;
    let stale_id = body["stale_ids"][0].as_str().unwrap().to_string();

    let note = json!({
        "stream_id": stale_id,
        "stream_kind": "GOVERNANCE",
        "event_type": "Note"
    });
    let (status, body) = send(&app, "POST", "/events", Some(AGENT), Some(note)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let resolve = json!({"resolution_kind": "MECHANICAL"});
    let uri = format!("/staleness/{}/resolve", stale_id);
    let (status, body) = send(&app, "POST", &uri, Some(SYSTEM), Some(resolve)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let (_, body) = send(
        &app,
        "GET",
        "/staleness/blocking?kind=Candidate&id=cand_1",
        None,
        None,
    )
    .await;
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn decision_resolution_rejects_unrecorded_approvals() {
    let app = test_router();
    seed_sr_spec(&app).await;

    let mark = json!({
        "root_ref": {"kind": "GovernedArtifact", "id": "SR-SPEC"},
        "max_depth": 1
    });
    let (_, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark)).await;
    let stale_id = body["stale_ids"][0].as_str().unwrap().to_string();

    let lookalike = json!({
        "stream_id": "approval_1",
        "stream_kind": "APPROVAL",
        "event_type": "Note"
    });
    let (status, _) = send(&app, "POST", "/events", Some(AGENT), Some(lookalike)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "GET", "/approvals/approval_1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let resolve = json!({
        "resolution_kind": "DECISION",
        "resolution_refs": [{"kind": "Approval", "id": "approval_1", "rel": "resolved_by"}]
    });
    let uri = format!("/staleness/{}/resolve", stale_id);
    let (status, _) = send(&app, "POST", &uri, Some(HUMAN), Some(resolve)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = send(&app, "GET", &format!("/staleness/{}", stale_id), None, None).await;
    assert!(body["resolved_at"].is_null());
}

#[tokio::test]
async fn marking_an_entity_nothing_depends_on_blocks_it() {
    let app = test_router();
    let mark = json!({"root_ref": {"kind": "Candidate", "id": "lonely"}});
    let (status, body) = send(&app, "POST", "/staleness/mark", Some(HUMAN), Some(mark)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["stale_ids"].as_array().unwrap().len(), 1);
    assert_eq!(body["dependents_marked"][0]["depth"], 0);

    let (_, body) = send(
        &app,
        "GET",
        "/staleness/blocking?kind=Candidate&id=lonely",
        None,
        None,
    )
    .await;
    assert_eq!(body["blocked"], true);
}
