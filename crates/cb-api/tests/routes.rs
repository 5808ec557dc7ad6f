//! HTTP behavior of the route table against the in-memory store.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use async_trait::async_trait;
use cb_api::configure_routes;
use cb_api::handlers::AppState;
use cb_api::middleware::{cors_policy, standard_middleware};
use cb_core::{AppError, Citizen, CitizenDirectory, IdentityProvider, NewCitizen, Principal, Role};
use cb_engine::CivicEngine;
use cb_store_memory::MemoryStore;
use chrono::Utc;
use serde_json::{json, Value};

/// Treats the bearer token itself as the caller's email.
struct EmailIdentity;

#[async_trait]
impl IdentityProvider for EmailIdentity {
    async fn authenticate(&self, credential: &str) -> cb_core::Result<Principal> {
        match credential.strip_prefix("Bearer ") {
            Some(email) if email.contains('@') => Ok(Principal::new(email)),
            _ => Err(AppError::Unauthenticated),
        }
    }
}

async fn state() -> web::Data<AppState> {
    let store = Arc::new(MemoryStore::new());
    let mut admin = Citizen::registered(
        NewCitizen {
            email: "boss@city.gov".into(),
            display_name: "Boss".into(),
            photo_url: None,
        },
        Utc::now(),
    );
    admin.role = Role::Admin;
    store.insert_if_absent(admin).await.unwrap();

    web::Data::new(AppState {
        engine: CivicEngine::with_store(store),
        identity: Box::new(EmailIdentity),
    })
}

fn bearer(email: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {email}"))
}

fn pothole() -> Value {
    json!({
        "title": "Pothole on Main St",
        "description": "Deep enough to lose a wheel",
        "category": "roads",
        "location": "Main St & 3rd"
    })
}

#[actix_web::test]
async fn test_issue_lifecycle_over_http() {
    let app = test::init_service(
        App::new()
            .app_data(state().await)
            .wrap(standard_middleware())
            .wrap(cors_policy())
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/issues")
        .insert_header(bearer("ana@example.org"))
        .set_json(pothole())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let issue: Value = test::read_body_json(resp).await;
    assert_eq!(issue["status"], "reported");
    let id = issue["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::patch()
        .uri(&format!("/issues/upvote/{id}"))
        .insert_header(bearer("bob@example.org"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["upvoteCount"], 1);

    let req = test::TestRequest::patch()
        .uri(&format!("/issues/upvote/{id}"))
        .insert_header(bearer("bob@example.org"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "conflict");

    let req = test::TestRequest::patch()
        .uri(&format!("/issues/assign/{id}"))
        .insert_header(bearer("boss@city.gov"))
        .set_json(json!({ "staffEmail": "sam@city.gov", "staffName": "Sam" }))
        .to_request();
    let assigned: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(assigned["status"], "pending");

    let req = test::TestRequest::get()
        .uri(&format!("/timeline/{id}"))
        .to_request();
    let timeline: Value = test::call_and_read_body_json(&app, req).await;
    let labels: Vec<_> = timeline
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["status"].as_str().unwrap())
        .collect();
    assert_eq!(labels, ["Assigned", "Issue reported"]);

    let req = test::TestRequest::get().uri("/issues/summary").to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary, json!({ "totalIssues": 1, "pending": 1, "resolved": 0 }));
}

#[actix_web::test]
async fn test_errors_are_json() {
    let app = test::init_service(
        App::new()
            .app_data(state().await)
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/issues")
        .set_json(pothole())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthenticated");

    let req = test::TestRequest::post()
        .uri("/issues")
        .insert_header(("Authorization", "Bearer nobody"))
        .set_json(pothole())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::patch()
        .uri(&format!("/issues/assign/{}", uuid::Uuid::now_v7()))
        .insert_header(bearer("ana@example.org"))
        .set_json(json!({ "staffEmail": "sam@city.gov", "staffName": "Sam" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri(&format!("/issues/{}", uuid::Uuid::now_v7()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");

    let req = test::TestRequest::get().uri("/issues/not-a-uuid").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/issues")
        .insert_header(bearer("ana@example.org"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation");

    let req = test::TestRequest::get()
        .uri("/latest-issues?limit=18446744073709551615")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation");
}

#[actix_web::test]
async fn test_staff_onboarding_over_http() {
    let app = test::init_service(
        App::new()
            .app_data(state().await)
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/citizen")
        .insert_header(bearer("sam@city.gov"))
        .set_json(json!({ "email": "sam@city.gov", "displayName": "Sam" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/staff")
        .insert_header(bearer("sam@city.gov"))
        .set_json(json!({ "staffEmail": "sam@city.gov", "staffName": "Sam" }))
        .to_request();
    let application: Value = test::call_and_read_body_json(&app, req).await;
    let app_id = application["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::patch()
        .uri(&format!("/staff/{app_id}"))
        .insert_header(bearer("boss@city.gov"))
        .set_json(json!({ "status": "approved" }))
        .to_request();
    let approved: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["workStatus"], "available");

    let req = test::TestRequest::get()
        .uri("/citizens/sam@city.gov/role")
        .to_request();
    let role: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(role, json!({ "role": "staff" }));

    let req = test::TestRequest::get()
        .uri("/staff/stats")
        .insert_header(bearer("sam@city.gov"))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats, json!({ "assigned": 0, "resolved": 0, "today": 0 }));
}
