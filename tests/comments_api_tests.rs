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
async fn test_create_and_list_comments() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (alice_token, _alice_id) = register_and_get_token_id!(app, "alice");
    let (bob_token, _bob_id) = register_and_get_token_id!(app, "bob");
    let post_id = create_post!(app, &alice_token, "Post");

    for (token, text) in [(&alice_token, "First!"), (&bob_token, "Nice post")] {
        let req = test::TestRequest::post()
            .uri("/api/comments")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .set_json(json!({ "post_id": post_id, "body": text }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/api/comments/post/{}", post_id))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let comments = resp["data"].as_array().unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["author"], "alice");
    assert_eq!(comments[1]["author"], "bob");
}

#[actix_web::test]
async fn test_create_comment_requires_auth() {
    let (_dir, _store, _artifacts, app) = build_app!();

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .set_json(json!({ "post_id": "some-post", "body": "Hi" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn test_create_comment_on_missing_post() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "post_id": "nonexistent", "body": "Hi" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_create_blank_comment() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");
    let post_id = create_post!(app, &token, "Post");

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "post_id": post_id, "body": "  " }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_update_comment_author_only() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (alice_token, _alice_id) = register_and_get_token_id!(app, "alice");
    let (bob_token, _bob_id) = register_and_get_token_id!(app, "bob");
    let post_id = create_post!(app, &alice_token, "Post");

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .set_json(json!({ "post_id": post_id, "body": "Original" }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let comment_id = resp["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(("Authorization", format!("Bearer {}", bob_token)))
        .set_json(json!({ "body": "Hijacked" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::put()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .set_json(json!({ "body": "Edited" }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["body"], "Edited");
}

#[actix_web::test]
async fn test_delete_comment() {
    let (_dir, _store, _artifacts, app) = build_app!();
    let (token, _user_id) = register_and_get_token_id!(app, "alice");
    let post_id = create_post!(app, &token, "Post");

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "post_id": post_id, "body": "Delete me" }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let comment_id = resp["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/comments/{}", comment_id))
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    let req = test::TestRequest::get()
        .uri(&format!("/api/comments/post/{}", post_id))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"].as_array().unwrap().len(), 0);
}
