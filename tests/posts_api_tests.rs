use actix_web::{test, web, App};
use serde_json::json;
use std::sync::Arc;

use inkstream::api::{self, AppState};
use inkstream::artifacts::ArtifactStore;
use inkstream::auth::AuthService;
use inkstream::cascade::CascadeDeleter;
use inkstream::engagement::EngagementTracker;
use inkstream::store::Store;

fn create_app_state(
    store: Arc<Store>,
    auth_service: Arc<AuthService>,
    artifacts: Arc<ArtifactStore>,
) -> AppState {
    AppState {
        engagement: Arc::new(EngagementTracker::new(store.clone())),
        cascade: Arc::new(CascadeDeleter::new(store.clone(), artifacts.clone())),
        store,
        auth_service,
        artifacts,
    }
}

macro_rules! build_app {
    () => {{
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Store::in_memory().unwrap());
        let auth_service = Arc::new(AuthService::new("test_secret".to_string()));
        let artifacts = Arc::new(ArtifactStore::new(dir.path()).unwrap());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(auth_service.clone()))
                .app_data(web::Data::new(store.clone()))
                .app_data(web::Data::new(create_app_state(
                    store.clone(),
                    auth_service.clone(),
                    artifacts.clone(),
                )))
                .configure(api::configure_routes),
        )
        .await;
        (dir, store, artifacts, app)
    }};
}

macro_rules! register_and_get_token_id {
    ($app:expr, $username:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "username": $username,
                "email": format!("{}@example.com", $username),
                "password": "password123"
            }))
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        let token = resp["data"]["token"].as_str().unwrap().to_string();
        let user_id = resp["data"]["user"]["id"].as_str().unwrap().to_string();
        (token, user_id)
    }};
}

macro_rules! create_post {
    ($app:expr, $token:expr, $title:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(("Authorization", format!("Bearer {}", $token)))
            .set_json(json!({ "title": $title, "body": "Body text" }))
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        resp["data"]["id"].as_str().unwrap().to_string()
    }};
}

#[actix_web::test]
async fn test_create_post() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, user_id) = register_and_get_token_id!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({
            "title": "Hello",
            "body": "World",
            "categories": ["intro"]
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["title"], "Hello");
    assert_eq!(body["data"]["author"], "alice");
    assert_eq!(body["data"]["owner_id"], user_id);
    assert_eq!(body["data"]["view_count"], 0);
    assert_eq!(body["data"]["favorite_count"], 0);
}

#[actix_web::test]
async fn test_create_post_requires_auth() {
    let (_dir, _store, _artifacts, app) = build_app!();

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .set_json(json!({ "title": "Hello", "body": "World" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn test_create_post_blank_title() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "title": " ", "body": "World" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_create_post_with_unknown_artifact() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({
            "title": "Hello",
            "body": "World",
            "artifact": "never-uploaded.png"
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_get_post_not_found() {
    let (_dir, _store, _artifacts, app) = build_app!();

    let req = test::TestRequest::get()
        .uri("/api/posts/nonexistent-id")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_update_post() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");
    let post_id = create_post!(app, &token, "Original");

    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", post_id))
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "title": "Updated" }))
        .to_request();

    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["title"], "Updated");
    assert_eq!(resp["data"]["body"], "Body text");
}

#[actix_web::test]
async fn test_update_post_not_owner() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (alice_token, _alice_id) = register_and_get_token_id!(app, "alice");
    let (bob_token, _bob_id) = register_and_get_token_id!(app, "bob");
    let post_id = create_post!(app, &alice_token, "Alice's post");

    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", post_id))
        .insert_header(("Authorization", format!("Bearer {}", bob_token)))
        .set_json(json!({ "title": "Hijacked" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_delete_post() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");
    let post_id = create_post!(app, &token, "Doomed");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/posts/{}", post_id))
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}", post_id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_list_posts_with_search() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");
    create_post!(app, &token, "Learning Rust");
    create_post!(app, &token, "All about cats");

    let req = test::TestRequest::get()
        .uri("/api/posts?search=rust")
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let hits = resp["data"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["title"], "Learning Rust");

    let req = test::TestRequest::get().uri("/api/posts").to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"].as_array().unwrap().len(), 2);
}

#[actix_web::test]
async fn test_list_user_posts() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (alice_token, alice_id) = register_and_get_token_id!(app, "alice");
    let (bob_token, _bob_id) = register_and_get_token_id!(app, "bob");
    create_post!(app, &alice_token, "Alice 1");
    create_post!(app, &alice_token, "Alice 2");
    create_post!(app, &bob_token, "Bob 1");

    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/user/{}", alice_id))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"].as_array().unwrap().len(), 2);
}

#[actix_web::test]
async fn test_upload_and_fetch_artifact() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");

    let req = test::TestRequest::put()
        .uri("/api/artifacts/photo.png")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_payload(vec![1u8, 2, 3, 4])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/artifacts/photo.png")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "image/png"
    );
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), &[1u8, 2, 3, 4]);
}

#[actix_web::test]
async fn test_upload_artifact_requires_auth() {
    let (_dir, _store, _artifacts, app) = build_app!();

    let req = test::TestRequest::put()
        .uri("/api/artifacts/photo.png")
        .set_payload(vec![1u8])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn test_fetch_missing_artifact() {
    let (_dir, _store, _artifacts, app) = build_app!();

    let req = test::TestRequest::get()
        .uri("/api/artifacts/ghost.png")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_update_post_replaces_artifact() {
    let (_dir, _store, artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");

    for name in ["old.png", "new.png"] {
        let req = test::TestRequest::put()
            .uri(&format!("/api/artifacts/{}", name))
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .set_payload(vec![9u8])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({
            "title": "Photo post",
            "body": "With picture",
            "artifact": "old.png"
        }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let post_id = resp["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{}", post_id))
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "artifact": "new.png" }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["artifact"], "new.png");

    // the superseded blob is gone, the new one remains
    assert!(!artifacts.exists("old.png"));
    assert!(artifacts.exists("new.png"));
}
