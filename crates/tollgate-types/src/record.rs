//! Inbound record types for the ingestion path.
//!
//! A [`Record`] is a sum type over the record kinds the warehouse accepts.
//! Every record carries a caller-supplied [`RecordKey`] which the gateway
//! uses as its write-deduplication key. Records are immutable once built.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── RecordKey ───────────────────────────────────────────────────────────

/// Idempotency key for a record.
///
/// Retried writes of the same key are deduplicated by the warehouse, not by
/// the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Wrap an existing key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh random key (`rec-<uuid>`).
    pub fn generate() -> Self {
        Self(format!("rec-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ── Kinds and tables ────────────────────────────────────────────────────

/// Discriminant of a [`Record`], used to partition batches at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Raw social media post.
    Post,
    /// Sentiment analysis result for a post.
    Analysis,
}

impl RecordKind {
    /// Destination table for records of this kind.
    pub fn table(self) -> TableKind {
        match self {
            RecordKind::Post => TableKind::Posts,
            RecordKind::Analysis => TableKind::SentimentAnalysis,
        }
    }
}

/// Destination table in the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// `posts` table.
    Posts,
    /// `sentiment_analysis` table.
    SentimentAnalysis,
}

impl TableKind {
    /// Stable table name.
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Posts => "posts",
            TableKind::SentimentAnalysis => "sentiment_analysis",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

/// Engagement counters attached to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub views: u64,
}

/// A social media post collected by an upstream producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Platform-native post identifier.
    pub post_id: String,

    /// Source platform (e.g. "twitter", "telegram").
    pub platform: String,

    /// Author identifier on the platform.
    #[serde(default)]
    pub author_id: String,

    /// Post text.
    #[serde(default)]
    pub content: String,

    /// Detected language code, or "unknown".
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub hashtags: Vec<String>,

    #[serde(default)]
    pub engagement: Engagement,

    /// When the post was published on the platform.
    pub created_at: DateTime<Utc>,

    /// When the post entered the ingestion pipeline.
    #[serde(default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,
}

fn default_language() -> String {
    "unknown".into()
}

/// Sentiment label produced by the analysis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Map a polarity score in `[-1, 1]` to a label.
    pub fn from_score(score: f64) -> Self {
        if score > 0.1 {
            Sentiment::Positive
        } else if score < -0.1 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

/// Sentiment analysis result for a single post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Post the analysis refers to.
    pub post_id: String,

    pub sentiment: Sentiment,

    /// Polarity in `[-1, 1]`.
    pub sentiment_score: f64,

    /// Model confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,

    /// Model identifier that produced the result.
    #[serde(default)]
    pub model: String,

    #[serde(default = "Utc::now")]
    pub analyzed_at: DateTime<Utc>,
}

// ── Record ──────────────────────────────────────────────────────────────

/// An inbound record of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// A raw post bound for the `posts` table.
    Post {
        key: RecordKey,
        #[serde(flatten)]
        payload: PostRecord,
    },
    /// An analysis result bound for the `sentiment_analysis` table.
    Analysis {
        key: RecordKey,
        #[serde(flatten)]
        payload: AnalysisRecord,
    },
}

impl Record {
    /// Build a post record.
    pub fn post(key: impl Into<RecordKey>, payload: PostRecord) -> Self {
        Record::Post {
            key: key.into(),
            payload,
        }
    }

    /// Build an analysis record.
    pub fn analysis(key: impl Into<RecordKey>, payload: AnalysisRecord) -> Self {
        Record::Analysis {
            key: key.into(),
            payload,
        }
    }

    /// The idempotency key.
    pub fn key(&self) -> &RecordKey {
        match self {
            Record::Post { key, .. } | Record::Analysis { key, .. } => key,
        }
    }

    /// The record's kind.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Post { .. } => RecordKind::Post,
            Record::Analysis { .. } => RecordKind::Analysis,
        }
    }

    /// Destination table.
    pub fn table(&self) -> TableKind {
        self.kind().table()
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
