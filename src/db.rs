//! SQLite store: schema setup and queries for users, feeds, follows and posts.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// A feed joined with the name of the user who added it.
#[derive(Debug, Clone, FromRow)]
pub struct FeedWithOwner {
    pub name: String,
    pub url: String,
    pub user_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedFollowDetails {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub feed_id: Uuid,
    pub feed_name: String,
    pub user_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: Option<String>,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: Uuid,
}

/// A post from a followed feed, as shown by `browse`.
#[derive(Debug, Clone, FromRow)]
pub struct UserPost {
    pub id: Uuid,
    pub title: Option<String>,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_name: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Waits for pooled connections to finish and closes them.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id BLOB PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_fetched_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id BLOB PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BLOB PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                title TEXT,
                url TEXT NOT NULL UNIQUE,
                description TEXT,
                published_at TEXT,
                feed_id BLOB NOT NULL REFERENCES feeds(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    pub async fn create_user(&self, name: &str) -> Result<User> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, created_at, updated_at, name)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .bind(name)
        .execute(&self.pool)
        .await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Deletes every user. Feeds, follows and posts go with them.
    pub async fn delete_users(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Feeds

    pub async fn create_feed(&self, name: &str, url: &str, user_id: Uuid) -> Result<Feed> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO feeds (id, created_at, updated_at, name, url, user_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .bind(name)
        .bind(url)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.get_feed(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: "feed",
            key: id.to_string(),
        })
    }

    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedWithOwner>> {
        let feeds = sqlx::query_as::<_, FeedWithOwner>(
            r#"
            SELECT feeds.name, feeds.url, users.name AS user_name
            FROM feeds
            JOIN users ON users.id = feeds.user_id
            ORDER BY feeds.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// The feed fetched longest ago. Feeds that were never fetched come first.
    pub async fn get_next_feed_to_fetch(&self) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn mark_feed_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "feed",
                key: feed_id.to_string(),
            });
        }
        Ok(())
    }

    // Follows

    pub async fn create_feed_follow(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
    ) -> Result<FeedFollowDetails> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO feed_follows (id, created_at, updated_at, user_id, feed_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        let follow = sqlx::query_as::<_, FeedFollowDetails>(
            r#"
            SELECT feed_follows.*, feeds.name AS feed_name, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(follow)
    }

    /// Returns whether a follow existed.
    pub async fn delete_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_feed_follows_for_user(&self, user_id: Uuid) -> Result<Vec<FeedFollowDetails>> {
        let follows = sqlx::query_as::<_, FeedFollowDetails>(
            r#"
            SELECT feed_follows.*, feeds.name AS feed_name, users.name AS user_name
            FROM feed_follows
            JOIN feeds ON feeds.id = feed_follows.feed_id
            JOIN users ON users.id = feed_follows.user_id
            WHERE feed_follows.user_id = ?
            ORDER BY feed_follows.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    // Posts

    pub async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO posts (id, created_at, updated_at, title, url, description, published_at, feed_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .bind(post.title.as_deref())
        .bind(&post.url)
        .bind(post.description.as_deref())
        .bind(post.published_at)
        .bind(post.feed_id)
        .execute(&self.pool)
        .await?;

        let created = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    /// Newest posts from the feeds a user follows. Posts without a publish time sort last.
    pub async fn get_posts_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<UserPost>> {
        let posts = sqlx::query_as::<_, UserPost>(
            r#"
            SELECT posts.id, posts.title, posts.url, posts.description, posts.published_at,
                   feeds.name AS feed_name
            FROM posts
            JOIN feed_follows ON feed_follows.feed_id = posts.feed_id
            JOIN feeds ON feeds.id = posts.feed_id
            WHERE feed_follows.user_id = ?
            ORDER BY posts.published_at DESC NULLS LAST, posts.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    #[cfg(test)]
    pub async fn get_posts_for_feed(&self, feed_id: Uuid) -> Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            "SELECT * FROM posts WHERE feed_id = ? ORDER BY created_at, rowid",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn count_posts_for_feed(&self, feed_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
