//! PostgreSQL + pgvector persistence for videos and their highlights.
//!
//! Nearest-neighbour search is done by the database: `<=>` is cosine
//! distance and `<->` is L2 distance over the `vector(768)` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::Serialize;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::config::PostgresConfig;
use crate::llm::EMBEDDING_DIM;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_initial", include_str!("../migrations/001_initial.sql")),
    (
        "002_add_embedding_index",
        include_str!("../migrations/002_add_embedding_index.sql"),
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("expected {expected}-dimensional embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

// ── Models ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub id: i32,
    pub filename: String,
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoOverview {
    #[serde(flatten)]
    pub video: Video,
    pub highlight_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Highlight {
    pub id: i32,
    pub video_id: i32,
    pub timestamp: f64,
    pub description: String,
    pub summary: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoDetail {
    pub video: Video,
    pub highlights: Vec<Highlight>,
}

/// Answer row for a question: one highlight with its cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantHighlight {
    pub id: i32,
    pub description: String,
    pub timestamp: f64,
    pub similarity_score: f64,
    pub video_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarHighlight {
    pub highlight: Highlight,
    pub video_name: String,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub filename: String,
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewHighlight {
    pub timestamp: f64,
    pub description: String,
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

fn video_from_row(row: &Row) -> Video {
    Video {
        id: row.get("id"),
        filename: row.get("filename"),
        duration: row.get("duration"),
        width: row.get("width"),
        height: row.get("height"),
        fps: row.get("fps"),
        summary: row.get("summary"),
        created_at: row.get("created_at"),
    }
}

fn highlight_from_row(row: &Row) -> Highlight {
    let embedding: Option<Vector> = row.get("embedding");
    Highlight {
        id: row.get("id"),
        video_id: row.get("video_id"),
        timestamp: row.get("timestamp"),
        description: row.get("description"),
        summary: row.get("summary"),
        embedding: embedding.map(|v| v.to_vec()),
        created_at: row.get("created_at"),
    }
}

fn to_vector(embedding: &[f32]) -> Result<Vector, DbError> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(DbError::Dimension {
            expected: EMBEDDING_DIM,
            actual: embedding.len(),
        });
    }
    Ok(Vector::from(embedding.to_vec()))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

const VIDEO_COLUMNS: &str = "id, filename, duration, width, height, fps, summary, created_at";
const HIGHLIGHT_COLUMNS: &str =
    "h.id, h.video_id, h.timestamp, h.description, h.summary, h.embedding, h.created_at";

// ── Retrieval seam ──────────────────────────────────────────────────────

/// What the web API needs from storage.
#[async_trait]
pub trait HighlightIndex: Send + Sync {
    async fn find_relevant_highlights(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RelevantHighlight>, DbError>;

    async fn list_videos(&self) -> Result<Vec<VideoOverview>, DbError>;

    async fn get_video(&self, video_id: i32) -> Result<Option<VideoDetail>, DbError>;

    async fn get_video_highlights(&self, video_id: i32) -> Result<Vec<Highlight>, DbError>;

    async fn find_similar_highlights(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarHighlight>, DbError>;
}

// ── Database ────────────────────────────────────────────────────────────

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DbError> {
        let (client, connection) = config.pg_config().connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        debug!(host = %config.host, db = %config.database, "connected to PostgreSQL");
        Ok(Self { client })
    }

    pub async fn ensure_extension(&self) -> Result<(), DbError> {
        self.client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await?;
        Ok(())
    }

    /// Create the extension and apply pending migrations.
    ///
    /// With `reset`, the tables are dropped and recreated, but only while
    /// `highlights` holds no rows.
    pub async fn init_schema(&self, reset: bool) -> Result<(), DbError> {
        self.ensure_extension().await?;

        if reset {
            if self.table_exists("highlights").await? && self.count_highlights().await? > 0 {
                warn!("highlights table is not empty, keeping existing data");
            } else {
                info!("dropping and recreating tables");
                self.client
                    .batch_execute(
                        "DROP TABLE IF EXISTS highlights; \
                         DROP TABLE IF EXISTS videos; \
                         DROP TABLE IF EXISTS schema_migrations;",
                    )
                    .await?;
            }
        }

        self.run_migrations().await
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        let row = self
            .client
            .query_one(
                "SELECT to_regclass($1) IS NOT NULL",
                &[&format!("public.{table}")],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn run_migrations(&self) -> Result<(), DbError> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version TEXT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .await?;

        for (version, sql) in MIGRATIONS {
            let applied = self
                .client
                .query_opt(
                    "SELECT 1 FROM schema_migrations WHERE version = $1",
                    &[version],
                )
                .await?
                .is_some();
            if applied {
                continue;
            }

            self.client.batch_execute(sql).await?;
            self.client
                .execute(
                    "INSERT INTO schema_migrations (version) VALUES ($1)",
                    &[version],
                )
                .await?;
            info!("applied migration {version}");
        }
        Ok(())
    }

    pub async fn add_video(&self, video: &NewVideo) -> Result<Video, DbError> {
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO videos (filename, duration, width, height, fps, summary) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {VIDEO_COLUMNS}"
                ),
                &[
                    &video.filename,
                    &video.duration,
                    &video.width,
                    &video.height,
                    &video.fps,
                    &video.summary,
                ],
            )
            .await?;
        Ok(video_from_row(&row))
    }

    pub async fn add_highlight(
        &self,
        video_id: i32,
        highlight: &NewHighlight,
    ) -> Result<Highlight, DbError> {
        let embedding = highlight.embedding.as_deref().map(to_vector).transpose()?;
        let row = self
            .client
            .query_one(
                "INSERT INTO highlights AS h (video_id, timestamp, description, summary, embedding) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING h.id, h.video_id, h.timestamp, h.description, h.summary, h.embedding, h.created_at",
                &[
                    &video_id,
                    &highlight.timestamp,
                    &highlight.description,
                    &highlight.summary,
                    &embedding,
                ],
            )
            .await?;
        Ok(highlight_from_row(&row))
    }

    pub async fn get_video(&self, video_id: i32) -> Result<Option<VideoDetail>, DbError> {
        let Some(row) = self
            .client
            .query_opt(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1"),
                &[&video_id],
            )
            .await?
        else {
            return Ok(None);
        };

        let video = video_from_row(&row);
        let highlights = self.get_video_highlights(video_id).await?;
        Ok(Some(VideoDetail { video, highlights }))
    }

    pub async fn list_videos(&self) -> Result<Vec<VideoOverview>, DbError> {
        let rows = self
            .client
            .query(
                "SELECT v.id, v.filename, v.duration, v.width, v.height, v.fps, v.summary, \
                        v.created_at, COUNT(h.id) AS highlight_count \
                 FROM videos v LEFT JOIN highlights h ON h.video_id = v.id \
                 GROUP BY v.id ORDER BY v.id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| VideoOverview {
                video: video_from_row(row),
                highlight_count: row.get("highlight_count"),
            })
            .collect())
    }

    /// Highlights of one video in timestamp order.
    pub async fn get_video_highlights(&self, video_id: i32) -> Result<Vec<Highlight>, DbError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {HIGHLIGHT_COLUMNS} FROM highlights h \
                     WHERE h.video_id = $1 ORDER BY h.timestamp, h.id"
                ),
                &[&video_id],
            )
            .await?;
        Ok(rows.iter().map(highlight_from_row).collect())
    }

    pub async fn count_highlights(&self) -> Result<i64, DbError> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM highlights", &[])
            .await?;
        Ok(row.get(0))
    }

    /// Delete a video and, through the cascade, its highlights.
    pub async fn delete_video(&self, video_id: i32) -> Result<bool, DbError> {
        let deleted = self
            .client
            .execute("DELETE FROM videos WHERE id = $1", &[&video_id])
            .await?;
        Ok(deleted > 0)
    }

    /// Highlights nearest to `embedding` by L2 distance.
    pub async fn find_similar_highlights(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarHighlight>, DbError> {
        let query = to_vector(embedding)?;
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {HIGHLIGHT_COLUMNS}, v.filename AS video_name, \
                            h.embedding <-> $1 AS distance \
                     FROM highlights h JOIN videos v ON v.id = h.video_id \
                     WHERE h.embedding IS NOT NULL \
                     ORDER BY h.embedding <-> $1 \
                     LIMIT $2"
                ),
                &[&query, &to_limit(limit)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| SimilarHighlight {
                highlight: highlight_from_row(row),
                video_name: row.get("video_name"),
                distance: row.get("distance"),
            })
            .collect())
    }

    /// Highlights whose cosine similarity to `embedding` is at least
    /// `threshold`, most similar first.
    pub async fn find_relevant_highlights(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RelevantHighlight>, DbError> {
        let query = to_vector(embedding)?;
        let rows = self
            .client
            .query(
                "SELECT h.id, h.description, h.timestamp, v.filename AS video_name, \
                        1 - (h.embedding <=> $1) AS similarity_score \
                 FROM highlights h JOIN videos v ON v.id = h.video_id \
                 WHERE h.embedding IS NOT NULL \
                   AND 1 - (h.embedding <=> $1) >= $2 \
                 ORDER BY h.embedding <=> $1 \
                 LIMIT $3",
                &[&query, &threshold, &to_limit(limit)],
            )
            .await?;

        let found: Vec<RelevantHighlight> = rows
            .iter()
            .map(|row| RelevantHighlight {
                id: row.get("id"),
                description: row.get("description"),
                timestamp: row.get("timestamp"),
                similarity_score: row.get("similarity_score"),
                video_name: row.get("video_name"),
            })
            .collect();
        debug!(found = found.len(), threshold, "relevant highlights");
        Ok(found)
    }
}

#[async_trait]
impl HighlightIndex for Database {
    async fn find_relevant_highlights(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RelevantHighlight>, DbError> {
        Database::find_relevant_highlights(self, embedding, threshold, limit).await
    }

    async fn list_videos(&self) -> Result<Vec<VideoOverview>, DbError> {
        Database::list_videos(self).await
    }

    async fn get_video(&self, video_id: i32) -> Result<Option<VideoDetail>, DbError> {
        Database::get_video(self, video_id).await
    }

    async fn get_video_highlights(&self, video_id: i32) -> Result<Vec<Highlight>, DbError> {
        Database::get_video_highlights(self, video_id).await
    }

    async fn find_similar_highlights(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarHighlight>, DbError> {
        Database::find_similar_highlights(self, embedding, limit).await
    }
}
