mod helpers;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::routing::MethodFilter;
use axum::{Extension, Router};
use tower::ServiceExt;

use helpers::{RulesBuilder, TestRules};
use routeguard::guard::loader::load;
use routeguard::guard::steps::ScenarioSteps;
use routeguard::guard::types::Lifetime;
use routeguard::guard::web::{ActionTable, CurrentActor};
use routeguard::settings::TemporaryBackend;

const USERS_EDIT: &str = "App.Http.Controllers.UsersController@edit";
const USERS_DELETE: &str = "App.Http.Controllers.UsersController@delete";
const USERS_DENIED: &str = "App.Http.Controllers.UsersController@permissionDenied";
const HOME_INDEX: &str = "App.Http.Controllers.HomeController@index";

fn table(with_denied_handler: bool) -> ActionTable {
    let table = ActionTable::new()
        .route("/users/edit", MethodFilter::GET, USERS_EDIT, || async { "edit" })
        .route("/users/delete", MethodFilter::GET, USERS_DELETE, || async {
            "delete"
        })
        .route("/home", MethodFilter::GET, HOME_INDEX, || async { "home" });
    if with_denied_handler {
        table.action(USERS_DENIED, || async { "denied" })
    } else {
        table
    }
}

fn app(rules: &TestRules, app_env: &str, with_denied_handler: bool) -> (Router, ScenarioSteps) {
    let table = table(with_denied_handler);
    let gate = Arc::new(rules.gate(app_env, TemporaryBackend::File, table.registry()));
    let steps = ScenarioSteps::for_gate(&gate);
    (table.into_router(gate), steps)
}

fn as_actor(router: Router, permissions: &[&str]) -> Router {
    let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
    router.layer(Extension(CurrentActor(Arc::new(permissions))))
}

async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_json(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn edit_rules() -> RulesBuilder {
    RulesBuilder::new().permission("edit", &["Users@edit"])
}

#[tokio::test]
async fn test_allowed_request_reaches_handler() {
    let rules = edit_rules().build();
    let (router, _) = app(&rules, "production", false);
    let router = as_actor(router, &["edit"]);

    let response = get(&router, "/users/edit").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "edit");
}

#[tokio::test]
async fn test_denied_request_redirects_to_no_permission_route() {
    let rules = edit_rules().no_permission_route("/home").debug().build();
    let (router, _) = app(&rules, "production", false);
    let router = as_actor(router, &["edit"]);

    let response = get(&router, "/users/delete").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/home");

    // the redirect target has no rule but must stay reachable
    let response = get(&router, "/home").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_denied_request_is_redispatched_to_permission_denied() {
    let rules = edit_rules().no_permission_route("/home").build();
    let (router, _) = app(&rules, "production", true);

    let response = get(&router, "/users/delete").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "denied");
}

#[tokio::test]
async fn test_denied_request_without_strategy_returns_501() {
    let rules = edit_rules().build();
    let (router, _) = app(&rules, "production", false);

    let response = get_json(&router, "/users/edit").await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_string(response).await, r#"["Permission denied"]"#);

    let response = get(&router, "/users/edit").await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body_string(response).await, "Permission denied");
}

#[tokio::test]
async fn test_invalid_rules_fail_every_request() {
    let rules = edit_rules().permission("view", &["UsersEdit"]).build();
    let (router, _) = app(&rules, "production", false);
    let router = as_actor(router, &["edit"]);

    let response = get(&router, "/users/edit").await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        body_string(response).await,
        "Invalid permission condition: UsersEdit for permission view"
    );
}

#[tokio::test]
async fn test_custom_pattern_grants_access() {
    let rules = RulesBuilder::new()
        .custom("maintenance", &[r"UsersController@(edit|delete)$"])
        .build();
    let (router, _) = app(&rules, "production", false);
    let router = as_actor(router, &["maintenance"]);

    assert_eq!(get(&router, "/users/edit").await.status(), StatusCode::OK);
    assert_eq!(get(&router, "/users/delete").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_temporary_permission_expires_after_requests() {
    let rules = edit_rules().testing("testing").build();
    let (router, steps) = app(&rules, "testing", false);

    assert!(steps.reset_before_each_scenario());
    assert!(steps.given_permission("edit", Lifetime::Requests(2)));

    assert_eq!(get(&router, "/users/edit").await.status(), StatusCode::OK);
    assert_eq!(get(&router, "/users/edit").await.status(), StatusCode::OK);
    assert_eq!(
        get(&router, "/users/edit").await.status(),
        StatusCode::NOT_IMPLEMENTED
    );
    assert!(rules.temporary_path().exists());
}

#[tokio::test]
async fn test_default_testing_permissions() {
    let rules = edit_rules()
        .testing("ci")
        .default_permissions("edit")
        .build();

    let (router, _) = app(&rules, "ci", false);
    assert_eq!(get(&router, "/users/edit").await.status(), StatusCode::OK);

    let (router, _) = app(&rules, "production", false);
    assert_eq!(
        get(&router, "/users/edit").await.status(),
        StatusCode::NOT_IMPLEMENTED
    );
}

#[tokio::test]
async fn test_grants_refused_outside_testing_environment() {
    let rules = edit_rules().testing("testing").build();
    let (router, steps) = app(&rules, "production", false);

    assert!(!steps.given_permission("edit", Lifetime::Unlimited));
    assert_eq!(
        get(&router, "/users/edit").await.status(),
        StatusCode::NOT_IMPLEMENTED
    );
    assert!(!rules.temporary_path().exists());
}

#[tokio::test]
async fn test_document_backend_writes_rule_file() {
    let rules = edit_rules().testing("testing").build();
    let table = table(false);
    let gate = Arc::new(rules.gate("testing", TemporaryBackend::Document, table.registry()));
    let steps = ScenarioSteps::for_gate(&gate);
    let router = table.into_router(gate);

    assert!(steps.given_permissions("edit,view", Lifetime::Requests(1)));
    assert_eq!(get(&router, "/users/edit").await.status(), StatusCode::OK);
    assert_eq!(
        get(&router, "/users/edit").await.status(),
        StatusCode::NOT_IMPLEMENTED
    );

    let document = load(rules.path()).unwrap();
    assert_eq!(document.testing.temporary_permissions.as_deref(), Some("edit,view"));
    assert_eq!(document.testing.temporary_request_counter, 0);

    let raw: serde_yaml::Value = serde_yaml::from_str(&rules.contents()).unwrap();
    assert_eq!(raw["comment"].as_str(), Some("managed by tests"));
}
