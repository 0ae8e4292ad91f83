use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: i64,
    /// Owning bookmark id, as the remote sends it (stringly keyed in the
    /// bookmarks lookup table).
    pub article_id: String,
    pub time: i64,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl Highlight {
    /// Permalink back to the highlight on instapaper.com. Doubles as a
    /// dedup anchor for files written before block ids existed.
    pub fn link(&self) -> String {
        format!(
            "https://www.instapaper.com/read/{}/{}",
            self.article_id, self.id
        )
    }

    /// Stable block identifier embedded in rendered output.
    pub fn block_id(&self) -> String {
        format!("^h{}", self.id)
    }

    pub fn has_note(&self) -> bool {
        self.note.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    pub saved_at: i64,
    #[serde(default)]
    pub published_at: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// One page of the remote highlights feed: the highlights themselves plus a
/// lookup table of the bookmarks they belong to. The table is sourced fresh
/// on every page, never cached across pages.
#[derive(Debug, Default)]
pub struct HighlightsPage {
    pub highlights: Vec<Highlight>,
    pub articles_by_id: HashMap<String, Article>,
}

impl HighlightsPage {
    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }
}

/// Makes a raw remote tag usable as a vault tag: runs of whitespace become a
/// single hyphen, and a purely numeric result gets an underscore appended so
/// the host does not treat it as a number.
pub fn normalize_tag(name: &str) -> String {
    let joined = name.split_whitespace().collect::<Vec<_>>().join("-");

    if !joined.is_empty() && joined.chars().all(|c| c.is_ascii_digit()) {
        format!("{}_", joined)
    } else {
        joined
    }
}
