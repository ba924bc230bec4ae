//! Wire types for the submission API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workspace::ContentStats;

// --- Request types ---

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub account: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArticleRequest<'a> {
    pub title: &'a str,
    pub images: &'a [String],
    pub cover: &'a str,
    pub category_id: u32,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub require_membership: bool,
    pub status: &'static str,
    pub attachment: &'a str,
    pub image_count: usize,
    pub video_count: usize,
    pub size_mb: u64,
}

// --- Response types ---

/// Common `{code, message, data}` response wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// `code` is one of the success values the API uses.
    pub fn code_ok(&self) -> bool {
        matches!(self.code, Some(0 | 200 | 201))
    }

    pub fn token(&self) -> Option<String> {
        self.data
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Asset urls from `data: [{url}]` or `data: {url}`.
    pub fn urls(&self) -> Vec<String> {
        let url_of = |item: &Value| item.get("url").and_then(Value::as_str).map(str::to_string);
        match &self.data {
            Value::Array(items) => items.iter().filter_map(url_of).collect(),
            obj @ Value::Object(_) => url_of(obj).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// `data.success == true`
    pub fn data_success(&self) -> bool {
        self.data
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Article id from `data.data.id`, falling back to `data.id`.
    pub fn article_id(&self) -> Option<String> {
        let id = self
            .data
            .get("data")
            .and_then(|inner| inner.get("id"))
            .or_else(|| self.data.get("id"))?;
        match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Article fields that come from the work item.
#[derive(Debug, Clone, Default)]
pub struct ArticleMetadata {
    pub title: String,
    pub stats: ContentStats,
    /// Gallery urls, in display order
    pub images: Vec<String>,
    pub require_membership: bool,
}

/// Remote identifiers for one submitted work item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    /// Reference returned for the uploaded archive
    pub asset_url: String,
    /// Urls of uploaded gallery images
    pub gallery: Vec<String>,
    /// Article identifier, when an article was created and the server returned one
    pub article_id: Option<String>,
}
