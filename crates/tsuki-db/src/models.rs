//! Database row types. These map directly to SQLite rows and are converted
//! into `tsuki-types` models at the crate boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use tsuki_types::models::{Post, PostView, User};

pub(crate) const USER_COLUMNS: &str = "id, email, username, password, verified, avatar, created_at";
pub(crate) const POST_COLUMNS: &str = "id, user_id, body, created_at";

/// Posts with their author and vote count; callers append the filter.
pub(crate) const POST_VIEW_SELECT: &str = "SELECT p.id, p.user_id, p.body, p.created_at,
        u.username, u.avatar,
        (SELECT COUNT(*) FROM votes v WHERE v.post_id = p.id)
     FROM posts p
     JOIN users u ON u.id = p.user_id";

pub struct UserRow {
    pub id: String,
    pub email: Option<String>,
    pub username: String,
    pub password: String,
    pub verified: bool,
    pub avatar: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password: row.get(3)?,
            verified: row.get(4)?,
            avatar: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self
                .id
                .parse()
                .with_context(|| format!("corrupt user id '{}'", self.id))?,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on user '{}'", self.id))?,
            email: self.email,
            username: self.username,
            password_hash: self.password,
            verified: self.verified,
            avatar_url: self.avatar,
        })
    }
}

pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: String,
}

impl PostRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            body: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    pub fn into_post(self) -> Result<Post> {
        let author_id: Uuid = self
            .user_id
            .parse()
            .with_context(|| format!("corrupt user_id on post '{}'", self.id))?;
        Ok(Post {
            id: self
                .id
                .parse()
                .with_context(|| format!("corrupt post id '{}'", self.id))?,
            author_id,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on post '{}'", self.id))?,
            body: self.body,
        })
    }
}

pub struct PostViewRow {
    pub post: PostRow,
    pub author: String,
    pub author_avatar: Option<String>,
    pub votes: i64,
}

impl PostViewRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            post: PostRow::from_row(row)?,
            author: row.get(4)?,
            author_avatar: row.get(5)?,
            votes: row.get(6)?,
        })
    }

    pub fn into_view(self) -> Result<PostView> {
        Ok(PostView {
            post: self.post.into_post()?,
            author: self.author,
            author_avatar: self.author_avatar,
            votes: self.votes as u64,
        })
    }
}

/// Accepts RFC 3339 as written by this crate, and SQLite's own
/// `datetime('now')` format (no timezone, assumed UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_formats() {
        let a = parse_timestamp("2024-03-01T12:30:00+00:00").unwrap();
        let b = parse_timestamp("2024-03-01 12:30:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
