use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const SCHEMA_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT UNIQUE,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                verified    INTEGER NOT NULL DEFAULT 0,
                avatar      TEXT,
                created_at  TEXT NOT NULL
            );

            -- Presence marks an account created through an OAuth provider.
            CREATE TABLE oauth_users (
                user_id     TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE follows (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                follow_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, follow_id)
            );

            CREATE INDEX idx_follows_target ON follows(follow_id);

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_posts_author ON posts(user_id, created_at);

            CREATE TABLE votes (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, post_id)
            );

            CREATE INDEX idx_votes_target ON votes(post_id);

            CREATE TABLE verifications (
                id          TEXT PRIMARY KEY,
                token       TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", SCHEMA_VERSION);
    Ok(())
}
