//! HTTP clients against stand-in services
//!
//! Each test serves a small axum router on an ephemeral port and points the
//! client at it.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use keystep_common::config::{TrackerConfig, WebDriverConfig, ZephyrConfig};
use keystep_engine::jira::JiraTracker;
use keystep_engine::webdriver::WebDriverSession;
use keystep_engine::zephyr::ZephyrSource;
use keystep_engine::{
    Action, AutomationDriver, Backoff, EngineError, IssueTracker, ScenarioSource, Selector,
};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ---------------------------------------------------------------------------
// Issue tracker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct JiraState {
    known: HashMap<String, String>,
    created: Vec<Value>,
    tokens: Vec<String>,
    drop_issues: bool,
}

type SharedJira = Arc<Mutex<JiraState>>;

async fn jira_search(
    State(state): State<SharedJira>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock();
    if let Some(token) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.tokens.push(token.to_string());
    }
    if state.drop_issues {
        return Json(json!({ "errorMessages": ["bad jql"] }));
    }
    let jql = query.get("jql").cloned().unwrap_or_default();
    let issues: Vec<Value> = state
        .known
        .iter()
        .filter(|(fp, _)| jql.contains(fp.as_str()))
        .map(|(_, key)| json!({ "key": key, "fields": { "summary": "" } }))
        .collect();
    Json(json!({ "total": issues.len(), "issues": issues }))
}

async fn jira_create(State(state): State<SharedJira>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock();
    let key = format!("KS-{}", 100 + state.created.len());
    let summary = body["fields"]["summary"].as_str().unwrap_or_default().to_string();
    state.known.insert(summary, key.clone());
    state.created.push(body);
    Json(json!({ "id": "1", "key": key }))
}

async fn jira(state: SharedJira) -> JiraTracker {
    let app = Router::new()
        .route("/rest/api/3/search", get(jira_search))
        .route("/rest/api/2/issue", post(jira_create))
        .with_state(state);
    let config = TrackerConfig {
        base_url: serve(app).await,
        project_key: "KS".to_string(),
        parent_epic: "KS-7".to_string(),
        ..Default::default()
    };
    JiraTracker::new(config, "Basic c2VjcmV0").unwrap()
}

#[tokio::test]
async fn test_tracker_files_then_finds_a_record() {
    let state = SharedJira::default();
    let tracker = jira(state.clone()).await;
    let fp = keystep_engine::fingerprint("Juggle three oranges");

    assert!(tracker.find_by_fingerprint(&fp).await.unwrap().is_none());

    let id = tracker
        .create_record(&fp, "From KS-T2 - Create a test step for: \n\nJuggle three oranges")
        .await
        .unwrap();
    assert_eq!(id, "KS-100");

    let found = tracker.find_by_fingerprint(&fp).await.unwrap().unwrap();
    assert_eq!(found.id, "KS-100");
    assert_eq!(found.fingerprint, fp);

    let state = state.lock();
    let fields = &state.created[0]["fields"];
    assert_eq!(fields["summary"], fp.as_str());
    assert_eq!(fields["parent"]["key"], "KS-7");
    assert_eq!(fields["project"]["key"], "KS");
    assert!(fields["description"].as_str().unwrap().ends_with("Juggle three oranges"));
    assert!(state.tokens.iter().all(|t| t == "Basic c2VjcmV0"));
}

#[tokio::test]
async fn test_search_without_issue_list_is_an_error() {
    let state = SharedJira::default();
    state.lock().drop_issues = true;
    let tracker = jira(state).await;

    let err = tracker.find_by_fingerprint("abc").await.unwrap_err();
    assert!(matches!(err, EngineError::Tracker(_)), "{:?}", err);
}

#[test]
fn test_search_jql_scopes_to_open_tasks_under_epic() {
    let tracker = JiraTracker::new(
        TrackerConfig {
            project_key: "KS".to_string(),
            parent_epic: "KS-7".to_string(),
            ..Default::default()
        },
        "t",
    )
    .unwrap();
    assert_eq!(
        tracker.search_jql("abc"),
        "Project=KS AND type=Task and parentEpic=KS-7 and summary ~\"abc\" and status != Done"
    );
}

// ---------------------------------------------------------------------------
// Test management
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ZephyrState {
    executions_created: Vec<Value>,
    synced: Vec<String>,
    lookups: u32,
}

type SharedZephyr = Arc<Mutex<ZephyrState>>;

async fn zephyr_folders() -> String {
    // zero-width spaces leak into names pasted from a browser
    json!({
        "total": 5,
        "values": [
            { "id": 1, "name": "Regression", "parentId": null },
            { "id": 2, "name": "Login", "parentId": 1 },
            { "id": 3, "name": "Base Test Cases", "parentId": 1 },
            { "id": 4, "name": "SSO\u{200B}", "parentId": 2 },
            { "id": 5, "name": "Smoke", "parentId": null },
        ]
    })
    .to_string()
}

async fn zephyr_test_cases(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let keys: Vec<&str> = match query.get("folderId").map(String::as_str) {
        Some("1") => vec!["KS-T1"],
        Some("2") => vec!["KS-T2", "KS-T1"],
        Some("3") => vec!["KS-T99"],
        Some("4") => vec!["KS-T3"],
        _ => vec![],
    };
    let values: Vec<Value> = keys.iter().map(|k| json!({ "key": k })).collect();
    Json(json!({ "values": values }))
}

async fn zephyr_find_execution(
    State(state): State<SharedZephyr>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock();
    state.lookups += 1;
    assert_eq!(query.get("onlyLastExecutions").map(String::as_str), Some("true"));
    assert!(query.get("actualEndDateAfter").is_some_and(|d| d.ends_with('Z')));
    if state.executions_created.is_empty() {
        Json(json!({ "total": 0, "values": [] }))
    } else {
        Json(json!({ "total": 1, "values": [{ "key": "KS-E1" }] }))
    }
}

async fn zephyr_create_execution(
    State(state): State<SharedZephyr>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.lock().executions_created.push(body);
    StatusCode::CREATED
}

async fn zephyr_sync(State(state): State<SharedZephyr>, Path(key): Path<String>) -> StatusCode {
    state.lock().synced.push(key);
    StatusCode::OK
}

async fn zephyr_execution_steps(Path(key): Path<String>) -> String {
    assert_eq!(key, "KS-E1");
    json!({
        "values": [
            { "inline": {
                "description": "<p>On the Student, browse to example.com\u{200B}.</p>",
                "expectedResult": "example.com is accessed",
                "testData": null
            }},
            { "inline": {
                "description": "In the Username field, enter username",
                "expectedResult": "",
                "testData": "username: alice<br>url: https://a.example.com"
            }},
        ]
    })
    .to_string()
}

async fn zephyr_case_steps(Path(key): Path<String>) -> Json<Value> {
    match key.as_str() {
        "KS-T1" => Json(json!({
            "values": [
                { "testCase": { "testCaseKey": "KS-T50" } },
                { "inline": { "description": "Click Save", "expectedResult": "Saved is displayed" } },
            ]
        })),
        "KS-T50" => Json(json!({
            "values": [
                { "inline": { "description": "Log in as admin" } },
            ]
        })),
        _ => Json(json!({ "values": [] })),
    }
}

async fn zephyr(state: SharedZephyr) -> ZephyrSource {
    let app = Router::new()
        .route("/folders", get(zephyr_folders))
        .route("/testcases", get(zephyr_test_cases))
        .route("/testcases/:key/teststeps", get(zephyr_case_steps))
        .route(
            "/testexecutions",
            get(zephyr_find_execution).post(zephyr_create_execution),
        )
        .route("/testexecutions/:key/teststeps/sync", post(zephyr_sync))
        .route("/testexecutions/:key/teststeps", get(zephyr_execution_steps))
        .with_state(state);
    let config = ZephyrConfig {
        base_url: serve(app).await,
        project_key: "KS".to_string(),
        ..Default::default()
    };
    ZephyrSource::new(config, "token")
        .unwrap()
        .with_execution_backoff(Backoff::new(2, Duration::from_millis(10)))
}

#[tokio::test]
async fn test_discovery_walks_descendants_but_not_base_cases() {
    let source = zephyr(SharedZephyr::default()).await;

    let keys = source.discover("Regression").await.unwrap();
    assert_eq!(keys, vec!["KS-T1", "KS-T2", "KS-T3"]);

    let err = source.discover("Nightly").await.unwrap_err();
    assert!(matches!(err, EngineError::Source(_)));
}

#[tokio::test]
async fn test_missing_execution_is_created_then_found() {
    let state = SharedZephyr::default();
    let source = zephyr(state.clone()).await;

    let scenario = source.fetch_scenario("KS-T1").await.unwrap();
    assert_eq!(
        scenario.texts().collect::<Vec<_>>(),
        vec![
            "On the Student, browse to example.com",
            "example.com is accessed",
            "In the Username field, enter username",
            "No expected result",
        ]
    );
    assert_eq!(
        scenario.steps[2].test_data.get("url"),
        Some("https://a.example.com")
    );

    let state = state.lock();
    assert_eq!(state.lookups, 2);
    assert_eq!(state.executions_created.len(), 1);
    let created = &state.executions_created[0];
    assert_eq!(created["testCaseKey"], "KS-T1");
    assert_eq!(created["testCycleKey"], "KS-R1");
    assert_eq!(created["statusName"], "Not Executed");
    assert_eq!(state.synced, vec!["KS-E1"]);
}

#[tokio::test]
async fn test_definition_expands_called_tests() {
    let source = zephyr(SharedZephyr::default()).await;
    let scenario = source.fetch_definition("KS-T1").await.unwrap();
    assert_eq!(
        scenario.texts().collect::<Vec<_>>(),
        vec![
            "Log in as admin",
            "No expected result",
            "Click Save",
            "Saved is displayed",
        ]
    );
}

// ---------------------------------------------------------------------------
// WebDriver hub
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HubState {
    url: String,
    clicks: Vec<String>,
    typed: Vec<String>,
    capabilities: Option<Value>,
    deleted: bool,
}

type SharedHub = Arc<Mutex<HubState>>;

async fn hub_new_session(State(state): State<SharedHub>, Json(caps): Json<Value>) -> Json<Value> {
    state.lock().capabilities = Some(caps);
    Json(json!({ "value": { "sessionId": "s-1", "capabilities": {} } }))
}

async fn hub_get_url(State(state): State<SharedHub>) -> (StatusCode, Json<Value>) {
    let state = state.lock();
    if state.deleted {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "value": { "error": "invalid session id", "message": "gone" } })),
        );
    }
    (StatusCode::OK, Json(json!({ "value": state.url })))
}

async fn hub_set_url(State(state): State<SharedHub>, Json(body): Json<Value>) -> Json<Value> {
    state.lock().url = body["url"].as_str().unwrap_or_default().to_string();
    Json(json!({ "value": null }))
}

async fn hub_find(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["value"] == "//*[normalize-space(text())='Save']" {
        (
            StatusCode::OK,
            Json(json!({ "value": { "element-6066-11e4-a52e-4f735466cecf": "e-1" } })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "value": { "error": "no such element", "message": "nope" } })),
        )
    }
}

async fn hub_displayed() -> Json<Value> {
    Json(json!({ "value": true }))
}

async fn hub_click(State(state): State<SharedHub>, Path((_, id)): Path<(String, String)>) -> Json<Value> {
    state.lock().clicks.push(id);
    Json(json!({ "value": null }))
}

async fn hub_clear() -> Json<Value> {
    Json(json!({ "value": null }))
}

async fn hub_value(State(state): State<SharedHub>, Json(body): Json<Value>) -> Json<Value> {
    state
        .lock()
        .typed
        .push(body["text"].as_str().unwrap_or_default().to_string());
    Json(json!({ "value": null }))
}

async fn hub_delete(State(state): State<SharedHub>) -> Json<Value> {
    state.lock().deleted = true;
    Json(json!({ "value": null }))
}

async fn hub(state: SharedHub) -> String {
    let app = Router::new()
        .route("/session", post(hub_new_session))
        .route("/session/:id", delete(hub_delete))
        .route("/session/:id/url", get(hub_get_url).post(hub_set_url))
        .route("/session/:id/element", post(hub_find))
        .route("/session/:id/element/:el/displayed", get(hub_displayed))
        .route("/session/:id/element/:el/click", post(hub_click))
        .route("/session/:id/element/:el/clear", post(hub_clear))
        .route("/session/:id/element/:el/value", post(hub_value))
        .with_state(state);
    serve(app).await
}

#[tokio::test]
async fn test_webdriver_session_round_trip() {
    let state = SharedHub::default();
    let hub_url = hub(state.clone()).await;
    let config = WebDriverConfig {
        hub_url: hub_url.clone(),
        ..Default::default()
    };
    let caps = keystep_engine::webdriver::session_capabilities(
        keystep_engine::webdriver::Browser::parse(&config.browser).unwrap(),
        config.headless,
        Some("it_admin"),
    );
    let session = WebDriverSession::start(reqwest::Client::new(), &hub_url, &caps)
        .await
        .unwrap();
    assert_eq!(session.session_id(), "s-1");
    assert_eq!(
        state.lock().capabilities.as_ref().unwrap()["capabilities"]["alwaysMatch"]
            ["nodename:applicationName"],
        "it_admin"
    );

    session.navigate("https://example.com/login").await.unwrap();
    assert_eq!(session.current_url().await.unwrap(), "https://example.com/login");

    let save = session
        .require(&Selector::text("Save"), Duration::from_secs(2))
        .await
        .unwrap();
    session.act(&save, &Action::Click).await.unwrap();
    session.act(&save, &Action::fill("alice")).await.unwrap();
    assert!(session.locate(&Selector::css("#missing")).await.unwrap().is_none());

    assert!(session.session_is_live().await);
    session.dispose().await.unwrap();
    assert!(!session.session_is_live().await);

    let state = state.lock();
    assert_eq!(state.clicks, vec!["e-1"]);
    assert_eq!(state.typed, vec!["alice"]);
}
