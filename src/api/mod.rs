use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::artifacts::{self, ArtifactError, ArtifactStore};
use crate::auth::{AuthService, AuthUser};
use crate::cascade::CascadeDeleter;
use crate::engagement::{EngagementError, EngagementTracker, HistoryKind};
use crate::models::*;
use crate::store::{Store, StoreError};

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub engagement: Arc<EngagementTracker>,
    pub cascade: Arc<CascadeDeleter>,
    pub artifacts: Arc<ArtifactStore>,
}

fn store_error_response(e: StoreError) -> HttpResponse {
    match e {
        StoreError::NotFound(msg) => HttpResponse::NotFound().json(ApiResponse::<()>::error(msg)),
        StoreError::Conflict(msg) => HttpResponse::Conflict().json(ApiResponse::<()>::error(msg)),
        other => {
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error(other.to_string()))
        }
    }
}

fn engagement_error_response(e: EngagementError) -> HttpResponse {
    match e {
        EngagementError::Validation(msg) => {
            HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg))
        }
        EngagementError::Store(e) => store_error_response(e),
    }
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Auth Endpoints ====================

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    if body.username.trim().is_empty() || body.email.trim().is_empty() || body.password.is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Username, email, and password are required",
        ));
    }

    let password_hash = match state.auth_service.hash_password(&body.password) {
        Ok(hash) => hash,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to hash password"))
        }
    };

    let mut user = User {
        id: String::new(),
        username: body.username.clone(),
        email: body.email.clone(),
        password_hash,
        favorites: Vec::new(),
        view_history: Vec::new(),
        search_history: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    if let Err(e) = state.store.create_user(&mut user) {
        return store_error_response(e);
    }
    log::info!("registered user {}", user.username);

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to generate token"))
        }
    };

    HttpResponse::Created().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> impl Responder {
    let user = match state.store.get_user_by_identifier(&body.identifier) {
        Ok(u) => u,
        Err(StoreError::NotFound(_)) => {
            return HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("Invalid credentials"));
        }
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Database error"));
        }
    };

    let valid = state
        .auth_service
        .verify_password(&body.password, &user.password_hash)
        .unwrap_or(false);

    if !valid {
        return HttpResponse::Unauthorized().json(ApiResponse::<()>::error("Invalid credentials"));
    }

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to generate token"))
        }
    };

    log::info!("user {} logged in", user.username);
    HttpResponse::Ok().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn get_current_user(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    match state.store.get_user(&auth_user.user_id) {
        Ok(user) => HttpResponse::Ok().json(ApiResponse::success(user)),
        Err(_) => HttpResponse::NotFound().json(ApiResponse::<()>::error("User not found")),
    }
}

// ==================== User Endpoints ====================

pub async fn get_user(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_user(&id) {
        Ok(user) => HttpResponse::Ok().json(ApiResponse::success(user)),
        Err(e) => store_error_response(e),
    }
}

pub async fn update_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateUserRequest>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot update another user"));
    }

    let mut user = match state.store.get_user(&id) {
        Ok(u) => u,
        Err(e) => return store_error_response(e),
    };

    let old_username = user.username.clone();
    if let Some(ref username) = body.username {
        user.username = username.clone();
    }
    if let Some(ref email) = body.email {
        user.email = email.clone();
    }

    if let Err(e) = state.store.update_user(&mut user) {
        return store_error_response(e);
    }

    // the username is denormalized onto every owned post
    if user.username != old_username {
        match state.store.update_posts_author(&user.id, &user.username) {
            Ok(updated) => log::info!(
                "renamed {} -> {}, updated {} post(s)",
                old_username,
                user.username,
                updated
            ),
            Err(e) => return store_error_response(e),
        }
    }

    HttpResponse::Ok().json(ApiResponse::success(user))
}

pub async fn update_password(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdatePasswordRequest>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot update another user"));
    }
    if body.password.is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Password is required"));
    }

    let password_hash = match state.auth_service.hash_password(&body.password) {
        Ok(hash) => hash,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to hash password"))
        }
    };

    match state.store.update_user_password(&id, &password_hash) {
        Ok(_) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "message": "Password updated"
        }))),
        Err(e) => store_error_response(e),
    }
}

pub async fn verify_password(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<VerifyPasswordRequest>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot verify another user"));
    }

    let user = match state.store.get_user(&id) {
        Ok(u) => u,
        Err(e) => return store_error_response(e),
    };

    let valid = state
        .auth_service
        .verify_password(&body.current_password, &user.password_hash)
        .unwrap_or(false);

    if valid {
        HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "message": "Password verified"
        })))
    } else {
        HttpResponse::Unauthorized().json(ApiResponse::<()>::error("Incorrect current password"))
    }
}

pub async fn delete_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot delete another user"));
    }

    match state.cascade.delete_account(&id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => {
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string()))
        }
    }
}

pub async fn get_user_favorites(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.engagement.favorites_for(&id) {
        Ok(posts) => HttpResponse::Ok().json(ApiResponse::success(posts)),
        Err(e) => engagement_error_response(e),
    }
}

pub async fn get_user_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.engagement.view_history_for(&id) {
        Ok(posts) => HttpResponse::Ok().json(ApiResponse::success(posts)),
        Err(e) => engagement_error_response(e),
    }
}

pub async fn clear_user_history(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot modify another user"));
    }

    match state.engagement.clear_history(&id, HistoryKind::View) {
        Ok(_) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "message": "View history cleared"
        }))),
        Err(e) => engagement_error_response(e),
    }
}

pub async fn get_search_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_user(&id) {
        Ok(user) => HttpResponse::Ok().json(ApiResponse::success(user.search_history)),
        Err(e) => store_error_response(e),
    }
}

pub async fn record_search(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<RecordSearchRequest>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot modify another user"));
    }

    match state.engagement.record_search(&id, &body.query) {
        Ok(history) => HttpResponse::Ok().json(ApiResponse::success(history)),
        Err(e) => engagement_error_response(e),
    }
}

pub async fn clear_search_history(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    if id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Cannot modify another user"));
    }

    match state.engagement.clear_history(&id, HistoryKind::Search) {
        Ok(_) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "message": "Search history cleared"
        }))),
        Err(e) => engagement_error_response(e),
    }
}

// ==================== Post Endpoints ====================

#[derive(Deserialize)]
pub struct ListPostsQuery {
    search: Option<String>,
}

pub async fn list_posts(
    state: web::Data<AppState>,
    query: web::Query<ListPostsQuery>,
) -> impl Responder {
    match state.store.list_posts(query.search.as_deref()) {
        Ok(posts) => HttpResponse::Ok().json(ApiResponse::success(posts)),
        Err(e) => store_error_response(e),
    }
}

pub async fn get_post(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_post(&id) {
        Ok(post) => HttpResponse::Ok().json(ApiResponse::success(post)),
        Err(e) => store_error_response(e),
    }
}

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreatePostRequest>,
) -> impl Responder {
    if body.title.trim().is_empty() || body.body.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Title and body are required"));
    }

    // the artifact must already be stored before a post may reference it
    if let Some(ref artifact) = body.artifact {
        if !state.artifacts.exists(artifact) {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
                "Artifact {} has not been uploaded",
                artifact
            )));
        }
    }

    let user = match state.store.get_user(&auth_user.user_id) {
        Ok(u) => u,
        Err(e) => return store_error_response(e),
    };

    let mut post = Post {
        id: String::new(),
        title: body.title.clone(),
        body: body.body.clone(),
        author: user.username.clone(),
        owner_id: user.id.clone(),
        categories: body.categories.clone(),
        artifact: body.artifact.clone(),
        view_count: 0,
        viewed_by: Vec::new(),
        favorite_count: 0,
        favorited_by: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    match state.store.create_post(&mut post) {
        Ok(_) => {
            log::info!("post created: {}", post.title);
            HttpResponse::Created().json(ApiResponse::success(post))
        }
        Err(e) => store_error_response(e),
    }
}

pub async fn update_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdatePostRequest>,
) -> impl Responder {
    let id = path.into_inner();
    let mut post = match state.store.get_post(&id) {
        Ok(p) => p,
        Err(e) => return store_error_response(e),
    };

    if post.owner_id != auth_user.user_id {
        return HttpResponse::NotFound().json(ApiResponse::<()>::error("Post not found"));
    }

    if let Some(ref title) = body.title {
        post.title = title.clone();
    }
    if let Some(ref text) = body.body {
        post.body = text.clone();
    }
    if let Some(ref categories) = body.categories {
        post.categories = categories.clone();
    }
    if let Some(ref artifact) = body.artifact {
        if !state.artifacts.exists(artifact) {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
                "Artifact {} has not been uploaded",
                artifact
            )));
        }
        // replacing the reference deletes the superseded blob
        state
            .cascade
            .replace_artifact(&mut post, Some(artifact.clone()));
    }

    match state.store.update_post(&mut post) {
        Ok(_) => HttpResponse::Ok().json(ApiResponse::success(post)),
        Err(e) => store_error_response(e),
    }
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match state.store.get_post(&id) {
        Ok(post) => {
            if post.owner_id != auth_user.user_id {
                return HttpResponse::NotFound().json(ApiResponse::<()>::error("Post not found"));
            }
        }
        Err(e) => return store_error_response(e),
    }

    match state.cascade.delete_content(&id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => {
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string()))
        }
    }
}

pub async fn list_user_posts(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let owner_id = path.into_inner();
    match state.store.find_posts_by_owner(&owner_id) {
        Ok(posts) => HttpResponse::Ok().json(ApiResponse::success(posts)),
        Err(e) => store_error_response(e),
    }
}

pub async fn record_post_view(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.engagement.record_view(&auth_user.user_id, &id) {
        Ok(post) => HttpResponse::Ok().json(ApiResponse::success(post)),
        Err(e) => engagement_error_response(e),
    }
}

pub async fn toggle_post_favorite(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.engagement.toggle_favorite(&auth_user.user_id, &id) {
        Ok(post) => HttpResponse::Ok().json(ApiResponse::success(post)),
        Err(e) => engagement_error_response(e),
    }
}

// ==================== Comment Endpoints ====================

pub async fn create_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreateCommentRequest>,
) -> impl Responder {
    if body.body.trim().is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Comment is required"));
    }

    if let Err(e) = state.store.get_post(&body.post_id) {
        return store_error_response(e);
    }

    let user = match state.store.get_user(&auth_user.user_id) {
        Ok(u) => u,
        Err(e) => return store_error_response(e),
    };

    let mut comment = Comment {
        id: String::new(),
        post_id: body.post_id.clone(),
        author_id: user.id.clone(),
        author: user.username.clone(),
        body: body.body.clone(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    match state.store.create_comment(&mut comment) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(comment)),
        Err(e) => store_error_response(e),
    }
}

pub async fn update_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateCommentRequest>,
) -> impl Responder {
    let id = path.into_inner();
    let mut comment = match state.store.get_comment(&id) {
        Ok(c) => c,
        Err(e) => return store_error_response(e),
    };

    if comment.author_id != auth_user.user_id {
        return HttpResponse::NotFound().json(ApiResponse::<()>::error("Comment not found"));
    }

    comment.body = body.body.clone();
    match state.store.update_comment(&mut comment) {
        Ok(_) => HttpResponse::Ok().json(ApiResponse::success(comment)),
        Err(e) => store_error_response(e),
    }
}

pub async fn delete_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    let comment = match state.store.get_comment(&id) {
        Ok(c) => c,
        Err(e) => return store_error_response(e),
    };

    if comment.author_id != auth_user.user_id {
        return HttpResponse::NotFound().json(ApiResponse::<()>::error("Comment not found"));
    }

    match state.store.delete_comment(&id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => store_error_response(e),
    }
}

pub async fn list_post_comments(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let post_id = path.into_inner();
    match state.store.list_comments_by_post(&post_id) {
        Ok(comments) => HttpResponse::Ok().json(ApiResponse::success(comments)),
        Err(e) => store_error_response(e),
    }
}

// ==================== Artifact Endpoints ====================

pub async fn upload_artifact(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let name = path.into_inner();
    if body.is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Empty upload"));
    }

    match state.artifacts.store(&name, &body) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
            "name": name,
            "size": body.len()
        }))),
        Err(ArtifactError::InvalidName(name)) => HttpResponse::BadRequest().json(
            ApiResponse::<()>::error(format!("Invalid artifact name: {}", name)),
        ),
        Err(e) => {
            log::error!("failed to store artifact {}: {}", name, e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to store artifact"))
        }
    }
}

pub async fn get_artifact(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();
    match state.artifacts.read(&name) {
        Ok(Some(bytes)) => HttpResponse::Ok()
            .content_type(artifacts::content_type_for(&name))
            .body(bytes),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(ArtifactError::InvalidName(_)) => HttpResponse::BadRequest().finish(),
        Err(e) => {
            log::error!("failed to read artifact {}: {}", name, e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))
        // Auth
        .route("/api/auth/register", web::post().to(register))
        .route("/api/auth/login", web::post().to(login))
        .route("/api/auth/me", web::get().to(get_current_user))
        // Users
        .route("/api/users/{id}", web::get().to(get_user))
        .route("/api/users/{id}", web::put().to(update_user))
        .route("/api/users/{id}", web::delete().to(delete_user))
        .route("/api/users/{id}/password", web::put().to(update_password))
        .route(
            "/api/users/{id}/password/verify",
            web::post().to(verify_password),
        )
        .route("/api/users/{id}/favorites", web::get().to(get_user_favorites))
        .route("/api/users/{id}/history", web::get().to(get_user_history))
        .route(
            "/api/users/{id}/history",
            web::delete().to(clear_user_history),
        )
        .route(
            "/api/users/{id}/searchhistory",
            web::get().to(get_search_history),
        )
        .route(
            "/api/users/{id}/searchhistory",
            web::put().to(record_search),
        )
        .route(
            "/api/users/{id}/searchhistory",
            web::delete().to(clear_search_history),
        )
        // Posts
        .route("/api/posts", web::get().to(list_posts))
        .route("/api/posts", web::post().to(create_post))
        .route("/api/posts/{id}", web::get().to(get_post))
        .route("/api/posts/{id}", web::put().to(update_post))
        .route("/api/posts/{id}", web::delete().to(delete_post))
        .route("/api/posts/user/{id}", web::get().to(list_user_posts))
        .route("/api/posts/{id}/view", web::post().to(record_post_view))
        .route(
            "/api/posts/{id}/favorite",
            web::post().to(toggle_post_favorite),
        )
        // Comments
        .route("/api/comments", web::post().to(create_comment))
        .route("/api/comments/{id}", web::put().to(update_comment))
        .route("/api/comments/{id}", web::delete().to(delete_comment))
        .route(
            "/api/comments/post/{id}",
            web::get().to(list_post_comments),
        )
        // Artifacts
        .route("/api/artifacts/{name}", web::put().to(upload_artifact))
        .route("/api/artifacts/{name}", web::get().to(get_artifact));
}
