//! One ingestion cycle: pick the stalest feed, stamp it, fetch it, store its posts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{Database, Feed, NewPost};
use crate::error::{FetchError, IngestError};
use crate::fetcher::{Fetcher, RssItem};

/// Per-item results of storing a fetched feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub created: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Ingested(IngestStats),
    FetchFailed(FetchError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub feed: Feed,
    pub started_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
}

pub struct Ingestor {
    db: Arc<Database>,
    fetcher: Fetcher,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, fetcher: Fetcher) -> Self {
        Self { db, fetcher }
    }

    /// Only feed selection and the freshness stamp can fail the cycle. A fetch
    /// failure is reported in the outcome; item failures are counted.
    pub async fn run_cycle(&self) -> Result<CycleReport, IngestError> {
        let started_at = Utc::now();

        let feed = self
            .db
            .get_next_feed_to_fetch()
            .await?
            .ok_or(IngestError::NoFeeds)?;

        info!("Next feed to fetch: {} ({})", feed.name, feed.url);

        // Stamp before fetching so a hanging or broken feed cannot stall the rotation.
        self.db.mark_feed_fetched(feed.id, started_at).await?;

        let outcome = match self.fetcher.fetch(&feed.url).await {
            Ok(rss) => {
                let stats = self.store_items(&feed, rss.items).await;
                info!(
                    "Feed '{}': {} new, {} already known, {} failed, {} skipped",
                    feed.name, stats.created, stats.duplicates, stats.failed, stats.skipped
                );
                CycleOutcome::Ingested(stats)
            }
            Err(e) => {
                warn!("Failed to fetch feed '{}': {}", feed.name, e);
                CycleOutcome::FetchFailed(e)
            }
        };

        Ok(CycleReport {
            feed,
            started_at,
            outcome,
        })
    }

    async fn store_items(&self, feed: &Feed, items: Vec<RssItem>) -> IngestStats {
        let mut stats = IngestStats::default();

        for item in items {
            if item.link.is_empty() {
                warn!("Skipping item with no link: {:?}", item.title);
                stats.skipped += 1;
                continue;
            }

            let post = NewPost {
                feed_id: feed.id,
                url: item.link,
                title: non_empty(item.title),
                description: non_empty(item.description),
                published_at: item.published_at,
            };

            match self.db.create_post(&post).await {
                Ok(created) => {
                    debug!("Created post: {}", created.url);
                    stats.created += 1;
                }
                Err(e) if e.is_unique_violation() => {
                    debug!("Post already known: {}", post.url);
                    stats.duplicates += 1;
                }
                Err(e) => {
                    warn!("Failed to save post {}: {}", post.url, e);
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const THREE_ITEMS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
            <channel>
                <title>Blog</title>
                <link>https://blog.example.com</link>
                <description>A blog</description>
                <item>
                    <title>First</title>
                    <link>https://blog.example.com/1</link>
                    <description>One</description>
                    <pubDate>2024-12-09T12:00:00Z</pubDate>
                </item>
                <item>
                    <title>Second</title>
                    <link>https://blog.example.com/2</link>
                    <description></description>
                    <pubDate></pubDate>
                </item>
                <item>
                    <title></title>
                    <link>https://blog.example.com/3</link>
                    <pubDate>Tue, 10 Dec 2024 08:30:00 GMT</pubDate>
                </item>
            </channel>
        </rss>"#;

    async fn create_test_db() -> Arc<Database> {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        Arc::new(db)
    }

    async fn add_feed(db: &Database, url: &str) -> Feed {
        let user = match db.get_user_by_name("owner").await.unwrap() {
            Some(user) => user,
            None => db.create_user("owner").await.unwrap(),
        };
        db.create_feed(url, url, user.id).await.unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn ingestor(db: &Arc<Database>) -> Ingestor {
        Ingestor::new(db.clone(), Fetcher::new().unwrap())
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("x".to_string()), Some("x".to_string()));
    }

    #[tokio::test]
    async fn test_no_feeds() {
        let db = create_test_db().await;
        let result = ingestor(&db).run_cycle().await;
        assert!(matches!(result, Err(IngestError::NoFeeds)));
    }

    #[tokio::test]
    async fn test_cycle_stores_all_items() {
        let server = MockServer::start().await;
        serve(&server, "/feed", THREE_ITEMS).await;
        let db = create_test_db().await;
        let feed = add_feed(&db, &format!("{}/feed", server.uri())).await;

        let report = ingestor(&db).run_cycle().await.unwrap();

        assert_eq!(report.feed.id, feed.id);
        match report.outcome {
            CycleOutcome::Ingested(stats) => assert_eq!(
                stats,
                IngestStats {
                    created: 3,
                    ..Default::default()
                }
            ),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let posts = db.get_posts_for_feed(feed.id).await.unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts.iter().filter(|p| p.published_at.is_none()).count(), 1);
        assert!(posts[1].published_at.is_none());
        assert!(posts[1].description.is_none());
        assert!(posts[2].title.is_none());
        assert_eq!(posts[0].title.as_deref(), Some("First"));
    }

    #[tokio::test]
    async fn test_second_cycle_skips_known_posts() {
        let server = MockServer::start().await;
        serve(&server, "/feed", THREE_ITEMS).await;
        let db = create_test_db().await;
        let feed = add_feed(&db, &format!("{}/feed", server.uri())).await;
        let ingestor = ingestor(&db);

        ingestor.run_cycle().await.unwrap();
        let report = ingestor.run_cycle().await.unwrap();

        match report.outcome {
            CycleOutcome::Ingested(stats) => {
                assert_eq!(stats.created, 0);
                assert_eq!(stats.duplicates, 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_items_without_link_are_skipped() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/feed",
            r#"<rss version="2.0"><channel><title>T</title>
                <item><title>No link</title></item>
                <item><title>Linked</title><link>https://x.example.com/1</link></item>
            </channel></rss>"#,
        )
        .await;
        let db = create_test_db().await;
        let feed = add_feed(&db, &format!("{}/feed", server.uri())).await;

        let report = ingestor(&db).run_cycle().await.unwrap();

        match report.outcome {
            CycleOutcome::Ingested(stats) => {
                assert_eq!(stats.created, 1);
                assert_eq!(stats.skipped, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_still_stamps_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let db = create_test_db().await;
        let feed = add_feed(&db, &format!("{}/broken", server.uri())).await;
        let before = Utc::now();

        let report = ingestor(&db).run_cycle().await.unwrap();

        assert!(matches!(
            report.outcome,
            CycleOutcome::FetchFailed(FetchError::Status { .. })
        ));
        let stamped = db.get_feed(feed.id).await.unwrap().unwrap();
        let fetched_at = stamped.last_fetched_at.unwrap();
        assert!(fetched_at >= before - Duration::milliseconds(1));
        assert_eq!(
            fetched_at.timestamp_millis(),
            report.started_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_never_fetched_feed_selected_first() {
        let server = MockServer::start().await;
        serve(&server, "/f", THREE_ITEMS).await;
        serve(&server, "/g", THREE_ITEMS.replace("blog.example.com", "g.example.com").as_str())
            .await;
        let db = create_test_db().await;
        let g = add_feed(&db, &format!("{}/g", server.uri())).await;
        let f = add_feed(&db, &format!("{}/f", server.uri())).await;
        db.mark_feed_fetched(g.id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        let report = ingestor(&db).run_cycle().await.unwrap();

        assert_eq!(report.feed.id, f.id);
        let f = db.get_feed(f.id).await.unwrap().unwrap();
        let g = db.get_feed(g.id).await.unwrap().unwrap();
        assert!(f.last_fetched_at.unwrap() > g.last_fetched_at.unwrap());
    }
}
