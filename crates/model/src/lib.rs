//! Canonical playback-event schema shared by every component in the
//! pipeline: validation, topic derivation, correlation-key computation and
//! the JSON wire codec.
//!
//! `MediaEvent` is the only message type the rest of the workspace knows
//! about. Producers build one per upstream report, the publisher (see the
//! `eventlog` crate) validates and marshals it onto the durable log, and
//! every downstream consumer unmarshals the same bytes back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Second-precision RFC3339 timestamp, used for correlation-key derivation
/// so two reports that agree to the second collapse onto the same key.
fn format_started_at(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|ts| ts.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// Upstream media server this event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Plex,
    Tautulli,
    Jellyfin,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Plex => "plex",
            Source::Tautulli => "tautulli",
            Source::Jellyfin => "jellyfin",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content a playback event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Episode,
    Track,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Episode => "episode",
            MediaType::Track => "track",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation and correlation-key errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("required field missing or zero: {0}")]
    MissingField(&'static str),

    #[error("field {field} must not contain '.' or whitespace: {value}")]
    InvalidAlphabet { field: &'static str, value: String },

    #[error("session_key must not contain ':': {0}")]
    InvalidSessionKey(String),

    #[error("failed to serialize event: {0}")]
    Encode(String),

    #[error("failed to deserialize event: {0}")]
    Decode(String),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// The canonical normalised playback event.
///
/// Required fields are validated by [`MediaEvent::validate`]; optional
/// fields default to `None`/`0` and are filled in opportunistically by
/// upstream-specific producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEvent {
    pub event_id: String,
    pub source: Source,
    pub user_id: u64,
    pub media_type: MediaType,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
}

fn has_forbidden_chars(s: &str) -> bool {
    s.contains('.') || s.chars().any(char::is_whitespace)
}

impl MediaEvent {
    /// Validate required fields and the subject alphabet. Called by
    /// [`MediaEvent::marshal`]; `unmarshal` deliberately skips this so the
    /// caller (usually router middleware) can decide what to do with an
    /// event that decoded but doesn't validate.
    pub fn validate(&self) -> ModelResult<()> {
        if self.event_id.is_empty() {
            return Err(ModelError::MissingField("event_id"));
        }
        if self.user_id == 0 {
            return Err(ModelError::MissingField("user_id"));
        }
        if self.title.is_empty() {
            return Err(ModelError::MissingField("title"));
        }

        let source = self.source.as_str();
        if has_forbidden_chars(source) {
            return Err(ModelError::InvalidAlphabet {
                field: "source",
                value: source.to_string(),
            });
        }
        let media_type = self.media_type.as_str();
        if has_forbidden_chars(media_type) {
            return Err(ModelError::InvalidAlphabet {
                field: "media_type",
                value: media_type.to_string(),
            });
        }

        if let Some(session_key) = &self.session_key {
            if session_key.contains(':') {
                return Err(ModelError::InvalidSessionKey(session_key.clone()));
            }
        }

        Ok(())
    }

    /// `playback.<source>.<media_type>` — the subject this event publishes
    /// onto.
    pub fn topic(&self) -> String {
        format!("playback.{}.{}", self.source, self.media_type)
    }

    /// Compute the correlation key without mutating `self`. See module
    /// docs for the exact field ordering; start timestamps are
    /// second-precision by design — two reports that agree to the second
    /// collapse onto the same key, one second apart do not.
    pub fn generate_correlation_key(&self) -> String {
        let server_id = self.server_id.as_deref().unwrap_or("default");
        let machine_id = self.machine_id.as_deref().unwrap_or("unknown");
        let content = self
            .rating_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.title);
        let started_at = format_started_at(self.started_at);
        let session_key = self.session_key.as_deref().unwrap_or("");

        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.source, server_id, self.user_id, content, machine_id, started_at, session_key
        )
    }

    /// Compute and store the correlation key on `self`.
    pub fn set_correlation_key(&mut self) {
        self.correlation_key = Some(self.generate_correlation_key());
    }

    /// The cross-source dedup key: the correlation key with `source` and
    /// `session_key` stripped, so two different upstreams reporting the
    /// same logical playback collapse onto one router dispatch.
    pub fn cross_source_key(&self) -> String {
        let server_id = self.server_id.as_deref().unwrap_or("default");
        let machine_id = self.machine_id.as_deref().unwrap_or("unknown");
        let content = self
            .rating_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.title);
        let started_at = format_started_at(self.started_at);

        format!("{}:{}:{}:{}:{}", server_id, self.user_id, content, machine_id, started_at)
    }

    pub fn is_complete(&self) -> bool {
        self.stopped_at.is_some()
    }

    /// `play_duration` if non-zero, else `stopped_at - started_at` if
    /// complete, else `now - started_at`.
    pub fn duration(&self) -> Option<chrono::Duration> {
        if let Some(play_duration) = self.play_duration.filter(|d| *d != 0) {
            return Some(chrono::Duration::seconds(play_duration));
        }
        let started_at = self.started_at?;
        match self.stopped_at {
            Some(stopped_at) => Some(stopped_at - started_at),
            None => Some(Utc::now() - started_at),
        }
    }

    /// Validate, then serialize to the JSON wire format.
    pub fn marshal(&self) -> ModelResult<Vec<u8>> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| ModelError::Encode(e.to_string()))
    }

    /// Deserialize without validating — callers decide what to do with a
    /// structurally valid but semantically invalid event.
    pub fn unmarshal(bytes: &[u8]) -> ModelResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ModelError::Decode(e.to_string()))
    }
}
