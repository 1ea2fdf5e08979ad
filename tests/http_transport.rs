use actix_web::{http::StatusCode, test, web, App};
use fellowship_relay::{
    handlers::{fellowship, health::health_check, status::{metrics_handler, status_handler}},
    settings::Settings,
    AppState,
};
use serde_json::json;

fn test_settings() -> Settings {
    Settings {
        poll_timeout_secs: 1,
        ..Settings::default()
    }
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .route("/health", web::get().to(health_check))
                .route("/status", web::get().to(status_handler))
                .route("/metrics", web::get().to(metrics_handler))
                .configure(fellowship::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn fetch_and_deliver_round_trip_over_http() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);

    let req = test::TestRequest::get()
        .uri("/groups/lobby/fetch?identity=alice")
        .to_request();
    let alice: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let alice_session = alice["session"].as_str().expect("session").to_string();
    assert_eq!(alice["members"], json!([]));
    assert_eq!(alice["messages"], json!({}));

    let req = test::TestRequest::post()
        .uri("/groups/lobby/deliver")
        .set_json(json!({ "from": "bob", "to": alice_session, "message": "hi" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = test::TestRequest::get()
        .uri(&format!(
            "/groups/lobby/fetch?identity=alice&session={alice_session}"
        ))
        .to_request();
    let update: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(update["session"], alice_session.as_str());
    assert_eq!(update["messages"], json!({ "bob": ["hi"] }));
}

#[actix_rt::test]
async fn long_poll_times_out_with_no_content_and_cancels() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);
    let alice = app_state.fellowship.fetch("lobby", "alice", "").await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!(
            "/groups/lobby/fetch?identity=alice&session={}",
            alice.session
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri("/status").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["fellowship"]["members"], 1);
    assert_eq!(body["fellowship"]["pending_fetches"], 0);
    assert_eq!(body["fetches"]["cancelled"], 1);
    assert_eq!(body["fetches"]["deferred"], 1);
}

#[actix_rt::test]
async fn deliver_rejects_malformed_body() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);

    let req = test::TestRequest::post()
        .uri("/groups/lobby/deliver")
        .set_json(json!({ "from": "bob" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn requests_after_shutdown_are_unavailable() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);
    app_state.fellowship.shutdown().await;

    let req = test::TestRequest::get()
        .uri("/groups/lobby/fetch?identity=alice")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("shutting down"));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[actix_rt::test]
async fn health_and_status_report_live_state() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);
    app_state.fellowship.fetch("lobby", "alice", "").await.unwrap();
    app_state.fellowship.fetch("kitchen", "bob", "").await.unwrap();

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
    assert_eq!(body["members"], 2);

    let req = test::TestRequest::get().uri("/status").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["fellowship"]["groups"], 2);
    assert_eq!(body["sessions"]["created"], 2);
    assert_eq!(body["sessions"]["ttl_seconds"], 120);
    assert!(body["fetches"]["description"].is_string());
}

#[actix_rt::test]
async fn metrics_endpoint_exposes_counters_as_text() {
    let app_state = AppState::new(test_settings());
    let app = init_app!(app_state);
    app_state.fellowship.fetch("lobby", "alice", "").await.unwrap();

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = test::read_body(resp).await;
    let text = std::str::from_utf8(&body).expect("utf-8 body");
    assert!(text.contains("# TYPE sessions_created gauge\n"));
    assert!(text.contains("\nsessions_created 1\n"));
    assert!(text.contains("\nfetches 1\n"));
    assert!(text.find("cancelled_fetches") < text.find("sessions_created"));
}
