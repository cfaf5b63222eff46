use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use tsuki_types::models::{EdgeKind, Page, Post, PostView, User, UserUpdate};

use crate::Database;
use crate::models::{POST_COLUMNS, POST_VIEW_SELECT, PostRow, PostViewRow, USER_COLUMNS, UserRow};

/// Table and column names backing each edge kind.
struct EdgeTable {
    table: &'static str,
    actor: &'static str,
    target: &'static str,
    target_table: &'static str,
}

fn edge_table(kind: EdgeKind) -> EdgeTable {
    match kind {
        EdgeKind::Follow => EdgeTable {
            table: "follows",
            actor: "user_id",
            target: "follow_id",
            target_table: "users",
        },
        EdgeKind::Vote => EdgeTable {
            table: "votes",
            actor: "user_id",
            target: "post_id",
            target_table: "posts",
        },
    }
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &User, oauth_origin: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, username, password, verified, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id.to_string(),
                    user.email,
                    user.username,
                    user.password_hash,
                    user.verified,
                    user.avatar_url,
                    user.created_at.to_rfc3339(),
                ],
            )?;
            if oauth_origin {
                tx.execute(
                    "INSERT INTO oauth_users (user_id) VALUES (?1)",
                    [user.id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Applies a single tagged update. Returns whether a row changed.
    pub fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(|conn| {
            let changed = match update {
                UserUpdate::Username(username) => conn.execute(
                    "UPDATE users SET username = ?1 WHERE id = ?2",
                    rusqlite::params![username, id],
                )?,
                UserUpdate::Password(hash) => conn.execute(
                    "UPDATE users SET password = ?1 WHERE id = ?2",
                    rusqlite::params![hash, id],
                )?,
                UserUpdate::Avatar(avatar) => conn.execute(
                    "UPDATE users SET avatar = ?1 WHERE id = ?2",
                    rusqlite::params![avatar, id],
                )?,
                UserUpdate::SetVerified(verified) => conn.execute(
                    "UPDATE users SET verified = ?1 WHERE id = ?2",
                    rusqlite::params![verified, id],
                )?,
            };
            Ok(changed > 0)
        })
    }

    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    pub fn is_oauth_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM oauth_users WHERE user_id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // -- Edges --

    pub fn target_exists(&self, kind: EdgeKind, target: Uuid) -> Result<bool> {
        let t = edge_table(kind);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1", t.target_table);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, [target.to_string()], |row| row.get(0))?;
            Ok(count > 0)
        })
    }

    pub fn edge_exists(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> Result<bool> {
        let t = edge_table(kind);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1 AND {} = ?2",
            t.table, t.actor, t.target
        );
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &sql,
                rusqlite::params![actor.to_string(), target.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Plain insert; the primary key rejects a duplicate pair.
    pub fn insert_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> Result<()> {
        let t = edge_table(kind);
        let sql = format!("INSERT INTO {} ({}, {}) VALUES (?1, ?2)", t.table, t.actor, t.target);
        self.with_conn(|conn| {
            conn.execute(&sql, rusqlite::params![actor.to_string(), target.to_string()])?;
            Ok(())
        })
    }

    pub fn delete_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> Result<bool> {
        let t = edge_table(kind);
        let sql = format!("DELETE FROM {} WHERE {} = ?1 AND {} = ?2", t.table, t.actor, t.target);
        self.with_conn(|conn| {
            let changed =
                conn.execute(&sql, rusqlite::params![actor.to_string(), target.to_string()])?;
            Ok(changed > 0)
        })
    }

    /// Number of edges pointing at `target`.
    pub fn count_incoming(&self, kind: EdgeKind, target: Uuid) -> Result<u64> {
        let t = edge_table(kind);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", t.table, t.target);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, [target.to_string()], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Number of edges leaving `actor`.
    pub fn count_outgoing(&self, kind: EdgeKind, actor: Uuid) -> Result<u64> {
        let t = edge_table(kind);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", t.table, t.actor);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, [actor.to_string()], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Usernames of the users following `user_id`, alphabetical.
    pub fn get_followers(&self, user_id: Uuid, page: Page) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_usernames(
                conn,
                "SELECT u.username FROM follows f
                 JOIN users u ON u.id = f.user_id
                 WHERE f.follow_id = ?1
                 ORDER BY u.username
                 LIMIT ?2 OFFSET ?3",
                user_id,
                page,
            )
        })
    }

    /// Usernames of the users `user_id` follows, alphabetical.
    pub fn get_following(&self, user_id: Uuid, page: Page) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_usernames(
                conn,
                "SELECT u.username FROM follows f
                 JOIN users u ON u.id = f.follow_id
                 WHERE f.user_id = ?1
                 ORDER BY u.username
                 LIMIT ?2 OFFSET ?3",
                user_id,
                page,
            )
        })
    }

    /// Users whose name contains `keyword`, alphabetical. `%` and `_` in
    /// the keyword match themselves.
    pub fn search_users(&self, keyword: &str, page: Page) -> Result<Vec<User>> {
        let page = page.clamped();
        let pattern = format!("%{}%", escape_like(keyword));
        let sql = format!(
            "SELECT {} FROM users WHERE username LIKE ?1 ESCAPE '\\'
             ORDER BY username LIMIT ?2 OFFSET ?3",
            USER_COLUMNS
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![pattern, page.limit, page.offset],
                    UserRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UserRow::into_user).collect()
        })
    }

    // -- Posts --

    pub fn create_post(&self, post: &Post) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    post.id.to_string(),
                    post.author_id.to_string(),
                    post.body,
                    post.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS);
        self.with_conn(|conn| {
            let row = conn
                .query_row(&sql, [id.to_string()], PostRow::from_row)
                .optional()?;
            row.map(PostRow::into_post).transpose()
        })
    }

    /// Posts by the users `user_id` follows, newest first.
    pub fn get_feed(&self, user_id: Uuid, page: Page) -> Result<Vec<PostView>> {
        let sql = format!(
            "{} WHERE p.user_id IN (SELECT follow_id FROM follows WHERE user_id = ?1)
             ORDER BY p.created_at DESC, p.id LIMIT ?2 OFFSET ?3",
            POST_VIEW_SELECT
        );
        self.with_conn(|conn| query_post_views(conn, &sql, user_id, page))
    }

    /// Posts written by `user_id`, newest first.
    pub fn get_user_posts(&self, user_id: Uuid, page: Page) -> Result<Vec<PostView>> {
        let sql = format!(
            "{} WHERE p.user_id = ?1
             ORDER BY p.created_at DESC, p.id LIMIT ?2 OFFSET ?3",
            POST_VIEW_SELECT
        );
        self.with_conn(|conn| query_post_views(conn, &sql, user_id, page))
    }

    pub fn count_posts(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Verification --

    pub fn insert_verification(&self, id: &str, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO verifications (id, token) VALUES (?1, ?2)",
                (id, token),
            )?;
            Ok(())
        })
    }

    pub fn get_verification_token(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT token FROM verifications WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }
}

/// `column` is always one of this module's literals, never caller input.
fn query_user(conn: &Connection, column: &'static str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], UserRow::from_row).optional()?;

    row.map(UserRow::into_user).transpose()
}

fn query_usernames(conn: &Connection, sql: &str, id: Uuid, page: Page) -> Result<Vec<String>> {
    let page = page.clamped();
    let mut stmt = conn.prepare(sql)?;

    let rows = stmt
        .query_map(
            rusqlite::params![id.to_string(), page.limit, page.offset],
            |row| row.get(0),
        )?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(rows)
}

fn query_post_views(conn: &Connection, sql: &str, id: Uuid, page: Page) -> Result<Vec<PostView>> {
    let page = page.clamped();
    let mut stmt = conn.prepare(sql)?;

    let rows = stmt
        .query_map(
            rusqlite::params![id.to_string(), page.limit, page.offset],
            PostViewRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(PostViewRow::into_view).collect()
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn user(name: &str, email: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.map(str::to_string),
            username: name.to_string(),
            password_hash: "hash".to_string(),
            verified: false,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch_user_by_each_key() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice", Some("alice@example.com"));
        db.create_user(&alice, false).unwrap();

        let by_name = db.get_user_by_username("alice").unwrap().unwrap();
        let by_email = db.get_user_by_email("alice@example.com").unwrap().unwrap();
        let by_id = db.get_user_by_id(alice.id).unwrap().unwrap();

        assert_eq!(by_name.id, alice.id);
        assert_eq!(by_email.id, alice.id);
        assert_eq!(by_id.username, "alice");
        assert!(!db.is_oauth_user(alice.id).unwrap());
        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn users_without_email_do_not_collide() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&user("a", None), false).unwrap();
        db.create_user(&user("b", None), false).unwrap();
        assert!(db.create_user(&user("c", Some("x@y.z")), false).is_ok());
        assert!(db.create_user(&user("d", Some("x@y.z")), false).is_err());
    }

    #[test]
    fn oauth_link_written_with_user() {
        let db = Database::open_in_memory().unwrap();
        let u = user("octo", Some("octo@example.com"));
        db.create_user(&u, true).unwrap();
        assert!(db.is_oauth_user(u.id).unwrap());
    }

    #[test]
    fn tagged_updates_touch_one_column() {
        let db = Database::open_in_memory().unwrap();
        let u = user("carol", None);
        db.create_user(&u, false).unwrap();

        assert!(db.update_user(u.id, &UserUpdate::SetVerified(true)).unwrap());
        assert!(db.update_user(u.id, &UserUpdate::Avatar(Some("https://img/a.png".into()))).unwrap());
        assert!(db.update_user(u.id, &UserUpdate::Username("caroline".into())).unwrap());

        let stored = db.get_user_by_id(u.id).unwrap().unwrap();
        assert!(stored.verified);
        assert_eq!(stored.avatar_url.as_deref(), Some("https://img/a.png"));
        assert_eq!(stored.username, "caroline");
        assert_eq!(stored.password_hash, "hash");

        assert!(!db.update_user(Uuid::new_v4(), &UserUpdate::SetVerified(true)).unwrap());
    }

    #[test]
    fn deleting_a_user_cascades_edges_and_posts() {
        let db = Database::open_in_memory().unwrap();
        let a = user("a", None);
        let b = user("b", None);
        db.create_user(&a, true).unwrap();
        db.create_user(&b, false).unwrap();

        let post = Post {
            id: Uuid::new_v4(),
            author_id: a.id,
            body: "hello".into(),
            created_at: Utc::now(),
        };
        db.create_post(&post).unwrap();
        db.insert_edge(EdgeKind::Follow, b.id, a.id).unwrap();
        db.insert_edge(EdgeKind::Vote, b.id, post.id).unwrap();

        assert!(db.delete_user(a.id).unwrap());
        assert!(!db.edge_exists(EdgeKind::Follow, b.id, a.id).unwrap());
        assert!(db.get_post(post.id).unwrap().is_none());
        assert_eq!(db.count_incoming(EdgeKind::Vote, post.id).unwrap(), 0);
        assert!(!db.is_oauth_user(a.id).unwrap());
    }

    #[test]
    fn duplicate_edge_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let a = user("a", None);
        let b = user("b", None);
        db.create_user(&a, false).unwrap();
        db.create_user(&b, false).unwrap();

        db.insert_edge(EdgeKind::Follow, a.id, b.id).unwrap();
        assert!(db.insert_edge(EdgeKind::Follow, a.id, b.id).is_err());
        assert!(db.delete_edge(EdgeKind::Follow, a.id, b.id).unwrap());
        assert!(!db.delete_edge(EdgeKind::Follow, a.id, b.id).unwrap());
    }

    #[test]
    fn follower_listing_is_paged_per_request() {
        let db = Database::open_in_memory().unwrap();
        let star = user("star", None);
        db.create_user(&star, false).unwrap();
        for name in ["dave", "anna", "cleo", "bert"] {
            let fan = user(name, None);
            db.create_user(&fan, false).unwrap();
            db.insert_edge(EdgeKind::Follow, fan.id, star.id).unwrap();
        }

        let first = db.get_followers(star.id, Page::new(2, 0)).unwrap();
        let second = db.get_followers(star.id, Page::new(2, 2)).unwrap();
        assert_eq!(first, vec!["anna", "bert"]);
        assert_eq!(second, vec!["cleo", "dave"]);
        assert_eq!(db.count_incoming(EdgeKind::Follow, star.id).unwrap(), 4);
        assert_eq!(db.get_following(star.id, Page::default()).unwrap().len(), 0);
    }

    #[test]
    fn verification_records_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.insert_verification("abc", "signed.token.value").unwrap();
        assert_eq!(
            db.get_verification_token("abc").unwrap().as_deref(),
            Some("signed.token.value")
        );
        assert!(db.get_verification_token("missing").unwrap().is_none());
    }

    fn post_at(db: &Database, author: Uuid, body: &str, minute: u32) -> Post {
        let post = Post {
            id: Uuid::new_v4(),
            author_id: author,
            body: body.into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        };
        db.create_post(&post).unwrap();
        post
    }

    #[test]
    fn feed_holds_followed_authors_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let reader = user("reader", None);
        let (amy, ben, zed) = (user("amy", None), user("ben", None), user("zed", None));
        for u in [&reader, &amy, &ben, &zed] {
            db.create_user(u, false).unwrap();
        }
        db.insert_edge(EdgeKind::Follow, reader.id, amy.id).unwrap();
        db.insert_edge(EdgeKind::Follow, reader.id, ben.id).unwrap();

        let old = post_at(&db, amy.id, "old", 1);
        let new = post_at(&db, ben.id, "new", 3);
        let mid = post_at(&db, amy.id, "mid", 2);
        post_at(&db, zed.id, "unfollowed", 4);
        post_at(&db, reader.id, "own", 5);
        db.insert_edge(EdgeKind::Vote, zed.id, mid.id).unwrap();

        let feed = db.get_feed(reader.id, Page::default()).unwrap();
        let ids: Vec<Uuid> = feed.iter().map(|v| v.post.id).collect();
        assert_eq!(ids, vec![new.id, mid.id, old.id]);
        assert_eq!(feed[0].author, "ben");
        assert_eq!(feed[1].votes, 1);
        assert_eq!(feed[2].votes, 0);

        let second = db.get_feed(reader.id, Page::new(2, 2)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].post.id, old.id);
        assert!(db.get_feed(zed.id, Page::default()).unwrap().is_empty());
    }

    #[test]
    fn user_posts_are_paged_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let author = user("author", None);
        db.create_user(&author, false).unwrap();
        let posts: Vec<Post> = (0..3)
            .map(|m| post_at(&db, author.id, &format!("post {}", m), m))
            .collect();

        let first = db.get_user_posts(author.id, Page::new(2, 0)).unwrap();
        let rest = db.get_user_posts(author.id, Page::new(2, 2)).unwrap();
        assert_eq!(
            first.iter().map(|v| v.post.id).collect::<Vec<_>>(),
            vec![posts[2].id, posts[1].id]
        );
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].post, posts[0]);
        assert!(db.get_user_posts(Uuid::new_v4(), Page::default()).unwrap().is_empty());
    }

    #[test]
    fn search_matches_substrings_and_literal_wildcards() {
        let db = Database::open_in_memory().unwrap();
        for name in ["moonwalker", "honeymoon", "sunny", "moo_n", "mooXn"] {
            db.create_user(&user(name, None), false).unwrap();
        }

        let names = |keyword: &str, page: Page| -> Vec<String> {
            db.search_users(keyword, page)
                .unwrap()
                .into_iter()
                .map(|u| u.username)
                .collect()
        };
        assert_eq!(names("moon", Page::default()), vec!["honeymoon", "moonwalker"]);
        assert_eq!(names("moon", Page::new(1, 1)), vec!["moonwalker"]);
        assert_eq!(names("o_n", Page::default()), vec!["moo_n"]);
        assert!(names("%", Page::default()).is_empty());
    }
}
