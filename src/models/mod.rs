use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User is an account that authors posts and engages with others' posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Post ids this user has favorited. Set semantics, exposed as a list.
    #[serde(default)]
    pub favorites: Vec<String>,
    /// Post ids this user has viewed, most recent first, deduplicated.
    #[serde(default)]
    pub view_history: Vec<String>,
    /// Search queries, most recent first, deduplicated, capped.
    #[serde(default)]
    pub search_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Post is a content item. The author's username is denormalized onto it
/// and fanned out on username change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub owner_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Name of the associated blob in the artifact store, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub view_count: i64,
    /// Account ids that have ever triggered a counted view.
    #[serde(default)]
    pub viewed_by: Vec<String>,
    pub favorite_count: i64,
    /// Account ids that currently favorite this post.
    #[serde(default)]
    pub favorited_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment on a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Request/Response types for API
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    pub current_password: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordSearchRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub artifact: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub categories: Option<Vec<String>>,
    pub artifact: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub post_id: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
