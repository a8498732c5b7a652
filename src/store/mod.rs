use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store holding the two document collections
/// (users, posts) and the comments they cascade to.
///
/// List-valued document fields are stored as JSON text columns; there is
/// no foreign-key enforcement between the collections.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                favorites TEXT DEFAULT '[]',
                view_history TEXT DEFAULT '[]',
                search_history TEXT DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                author TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                categories TEXT DEFAULT '[]',
                artifact TEXT,
                view_count INTEGER DEFAULT 0,
                viewed_by TEXT DEFAULT '[]',
                favorite_count INTEGER DEFAULT 0,
                favorited_by TEXT DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_owner_id ON posts(owner_id);
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_comments_author_id ON comments(author_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let taken: Option<String> = conn
            .query_row(
                "SELECT username FROM users WHERE username = ?1 OR email = ?2",
                params![&user.username, &user.email],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = taken {
            if existing == user.username {
                return Err(StoreError::Conflict("Username already exists".to_string()));
            }
            return Err(StoreError::Conflict("Email already exists".to_string()));
        }

        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, username, email, password_hash, favorites,
                view_history, search_history, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                serde_json::to_string(&user.favorites)?,
                serde_json::to_string(&user.view_history)?,
                serde_json::to_string(&user.search_history)?,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], |row| {
            self.row_to_user(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    /// Look up a user by username or email, the login identifier.
    pub fn get_user_by_identifier(&self, identifier: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1 OR email = ?1",
            params![identifier],
            |row| self.row_to_user(row),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("User {}", identifier))
            }
            _ => StoreError::Database(e),
        })
    }

    /// Update identifying fields. Rejects a username or email already held
    /// by a different user.
    pub fn update_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        let username_taken: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1 AND id != ?2",
                params![&user.username, &user.id],
                |row| row.get(0),
            )
            .optional()?;
        if username_taken.is_some() {
            return Err(StoreError::Conflict("Username already taken".to_string()));
        }

        let email_taken: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1 AND id != ?2",
                params![&user.email, &user.id],
                |row| row.get(0),
            )
            .optional()?;
        if email_taken.is_some() {
            return Err(StoreError::Conflict("Email already taken".to_string()));
        }

        user.updated_at = Utc::now();
        let rows = conn.execute(
            "UPDATE users SET username = ?1, email = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                &user.username,
                &user.email,
                user.updated_at.to_rfc3339(),
                &user.id,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user.id)));
        }
        Ok(())
    }

    /// Write back the engagement lists (favorites and histories) only.
    pub fn update_user_lists(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        user.updated_at = Utc::now();
        let rows = conn.execute(
            r#"UPDATE users SET favorites = ?1, view_history = ?2, search_history = ?3,
               updated_at = ?4 WHERE id = ?5"#,
            params![
                serde_json::to_string(&user.favorites)?,
                serde_json::to_string(&user.view_history)?,
                serde_json::to_string(&user.search_history)?,
                user.updated_at.to_rfc3339(),
                &user.id,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user.id)));
        }
        Ok(())
    }

    pub fn update_user_password(&self, id: &str, password_hash: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![password_hash, Utc::now().to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    /// Returns false when the user was already gone.
    pub fn delete_user(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn all_users(&self) -> StoreResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM users")?;
        let rows = stmt.query_map([], |row| self.row_to_user(row))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    fn row_to_user(&self, row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            favorites: parse_list(row.get::<_, String>("favorites")?),
            view_history: parse_list(row.get::<_, String>("view_history")?),
            search_history: parse_list(row.get::<_, String>("search_history")?),
            created_at: parse_datetime(row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
        })
    }

    // ==================== Post Operations ====================

    pub fn create_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        post.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        post.created_at = now;
        post.updated_at = now;

        conn.execute(
            r#"INSERT INTO posts (id, title, body, author, owner_id, categories, artifact,
                view_count, viewed_by, favorite_count, favorited_by, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                &post.id,
                &post.title,
                &post.body,
                &post.author,
                &post.owner_id,
                serde_json::to_string(&post.categories)?,
                &post.artifact,
                post.view_count,
                serde_json::to_string(&post.viewed_by)?,
                post.favorite_count,
                serde_json::to_string(&post.favorited_by)?,
                post.created_at.to_rfc3339(),
                post.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM posts WHERE id = ?1", params![id], |row| {
            self.row_to_post(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn update_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        post.updated_at = Utc::now();

        let rows = conn.execute(
            r#"UPDATE posts SET title = ?1, body = ?2, author = ?3, categories = ?4,
               artifact = ?5, view_count = ?6, viewed_by = ?7, favorite_count = ?8,
               favorited_by = ?9, updated_at = ?10 WHERE id = ?11"#,
            params![
                &post.title,
                &post.body,
                &post.author,
                serde_json::to_string(&post.categories)?,
                &post.artifact,
                post.view_count,
                serde_json::to_string(&post.viewed_by)?,
                post.favorite_count,
                serde_json::to_string(&post.favorited_by)?,
                post.updated_at.to_rfc3339(),
                &post.id,
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", post.id)));
        }
        Ok(())
    }

    /// Returns false when the post was already gone.
    pub fn delete_post(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// List posts, optionally filtered by a case-insensitive title substring.
    pub fn list_posts(&self, search: Option<&str>) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut posts = Vec::new();

        if let Some(q) = search {
            let pattern = format!("%{}%", q);
            let mut stmt = conn
                .prepare("SELECT * FROM posts WHERE title LIKE ?1 ORDER BY created_at DESC")?;
            let rows = stmt.query_map(params![pattern], |row| self.row_to_post(row))?;
            for row in rows {
                posts.push(row?);
            }
        } else {
            let mut stmt = conn.prepare("SELECT * FROM posts ORDER BY created_at DESC")?;
            let rows = stmt.query_map([], |row| self.row_to_post(row))?;
            for row in rows {
                posts.push(row?);
            }
        }

        Ok(posts)
    }

    pub fn find_posts_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM posts WHERE owner_id = ?1 ORDER BY created_at DESC")?;
        let rows = stmt.query_map(params![owner_id], |row| self.row_to_post(row))?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Resolve an id list (favorites, view history) to full posts.
    /// Preserves the input order and silently drops ids whose post no
    /// longer exists, so dangling references never reach a caller.
    pub fn find_posts_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Post>> {
        let mut posts = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_post(id) {
                Ok(post) => posts.push(post),
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(posts)
    }

    /// Fan out an owner's username change to every post they own.
    pub fn update_posts_author(&self, owner_id: &str, author: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE posts SET author = ?1, updated_at = ?2 WHERE owner_id = ?3",
            params![author, Utc::now().to_rfc3339(), owner_id],
        )?;
        Ok(rows)
    }

    fn all_posts(&self) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM posts")?;
        let rows = stmt.query_map([], |row| self.row_to_post(row))?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn row_to_post(&self, row: &rusqlite::Row) -> rusqlite::Result<Post> {
        Ok(Post {
            id: row.get("id")?,
            title: row.get("title")?,
            body: row.get("body")?,
            author: row.get("author")?,
            owner_id: row.get("owner_id")?,
            categories: parse_list(row.get::<_, String>("categories")?),
            artifact: row.get("artifact")?,
            view_count: row.get("view_count")?,
            viewed_by: parse_list(row.get::<_, String>("viewed_by")?),
            favorite_count: row.get("favorite_count")?,
            favorited_by: parse_list(row.get::<_, String>("favorited_by")?),
            created_at: parse_datetime(row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
        })
    }

    // ==================== Reference Scrubbing ====================

    /// Remove the given post ids from every user's favorites and view
    /// history. Returns the number of users rewritten.
    pub fn remove_post_refs_from_users(&self, post_ids: &[String]) -> StoreResult<usize> {
        let users = self.all_users()?;
        let mut touched = 0;
        for mut user in users {
            let before = user.favorites.len() + user.view_history.len();
            user.favorites.retain(|id| !post_ids.contains(id));
            user.view_history.retain(|id| !post_ids.contains(id));
            if user.favorites.len() + user.view_history.len() != before {
                self.update_user_lists(&mut user)?;
                touched += 1;
            }
        }
        Ok(touched)
    }

    /// Remove a deleted account from every post's viewed_by/favorited_by.
    /// favorite_count tracks the membership set; view_count is a historical
    /// total and stays. Returns the number of posts rewritten.
    pub fn remove_user_refs_from_posts(&self, user_id: &str) -> StoreResult<usize> {
        let posts = self.all_posts()?;
        let mut touched = 0;
        for mut post in posts {
            let before = post.viewed_by.len() + post.favorited_by.len();
            post.viewed_by.retain(|u| u != user_id);
            post.favorited_by.retain(|u| u != user_id);
            if post.viewed_by.len() + post.favorited_by.len() != before {
                post.favorite_count = post.favorited_by.len() as i64;
                self.update_post(&mut post)?;
                touched += 1;
            }
        }
        Ok(touched)
    }

    // ==================== Comment Operations ====================

    pub fn create_comment(&self, comment: &mut Comment) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        comment.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        comment.created_at = now;
        comment.updated_at = now;

        conn.execute(
            r#"INSERT INTO comments (id, post_id, author_id, author, body, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &comment.id,
                &comment.post_id,
                &comment.author_id,
                &comment.author,
                &comment.body,
                comment.created_at.to_rfc3339(),
                comment.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> StoreResult<Comment> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM comments WHERE id = ?1",
            params![id],
            |row| self.row_to_comment(row),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Comment {}", id))
            }
            _ => StoreError::Database(e),
        })
    }

    pub fn update_comment(&self, comment: &mut Comment) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        comment.updated_at = Utc::now();
        let rows = conn.execute(
            "UPDATE comments SET body = ?1, updated_at = ?2 WHERE id = ?3",
            params![&comment.body, comment.updated_at.to_rfc3339(), &comment.id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Comment {}", comment.id)));
        }
        Ok(())
    }

    pub fn delete_comment(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn list_comments_by_post(&self, post_id: &str) -> StoreResult<Vec<Comment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM comments WHERE post_id = ?1 ORDER BY created_at ASC")?;
        let rows = stmt.query_map(params![post_id], |row| self.row_to_comment(row))?;

        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    /// Delete every comment on a post. Zero rows is not an error, so the
    /// cascade step can be repeated.
    pub fn delete_comments_by_post(&self, post_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
        Ok(rows)
    }

    /// Delete every comment authored by an account, wherever it was left.
    pub fn delete_comments_by_author(&self, author_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM comments WHERE author_id = ?1",
            params![author_id],
        )?;
        Ok(rows)
    }

    fn row_to_comment(&self, row: &rusqlite::Row) -> rusqlite::Result<Comment> {
        Ok(Comment {
            id: row.get("id")?,
            post_id: row.get("post_id")?,
            author_id: row.get("author_id")?,
            author: row.get("author")?,
            body: row.get("body")?,
            created_at: parse_datetime(row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
        })
    }
}

fn parse_list(s: String) -> Vec<String> {
    serde_json::from_str(&s).unwrap_or_default()
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
