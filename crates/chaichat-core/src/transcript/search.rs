//! Case-insensitive message search with filtering and ordering.

use std::cmp::Reverse;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TranscriptMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFilter {
    #[default]
    All,
    User,
    #[serde(alias = "ai")]
    Assistant,
    /// Messages containing inline or fenced code
    Code,
}

impl MessageFilter {
    fn accepts(&self, message: &TranscriptMessage) -> bool {
        match self {
            Self::All => true,
            Self::User => message.is_user,
            Self::Assistant => !message.is_user,
            Self::Code => message.has_code(),
        }
    }
}

impl FromStr for MessageFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "user" => Ok(Self::User),
            "ai" | "assistant" => Ok(Self::Assistant),
            "code" => Ok(Self::Code),
            other => Err(anyhow::anyhow!("unknown message filter '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Relevance,
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "relevance" => Ok(Self::Relevance),
            other => Err(anyhow::anyhow!("unknown sort order '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub filter: MessageFilter,
    pub sort: SortOrder,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: MessageFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit<'a> {
    pub message: &'a TranscriptMessage,
    /// Occurrences of the query text (0 for an empty query)
    pub matches: usize,
}

/// Messages matching `query`, ordered by `query.sort`
pub fn search<'a>(messages: &'a [TranscriptMessage], query: &SearchQuery) -> Vec<SearchHit<'a>> {
    let needle = query.text.trim().to_lowercase();

    let mut hits: Vec<SearchHit<'a>> = messages
        .iter()
        .filter(|m| query.filter.accepts(m))
        .filter_map(|m| {
            if needle.is_empty() {
                return Some(SearchHit { message: m, matches: 0 });
            }
            let matches = m.content.to_lowercase().matches(needle.as_str()).count();
            (matches > 0).then_some(SearchHit { message: m, matches })
        })
        .collect();

    // Stable sorts: equal keys keep transcript order
    hits.sort_by_key(|h| h.message.sequence);
    match query.sort {
        SortOrder::Relevance if !needle.is_empty() => hits.sort_by_key(|h| Reverse(h.matches)),
        SortOrder::Oldest => hits.sort_by_key(|h| h.message.timestamp),
        SortOrder::Newest | SortOrder::Relevance => {
            hits.sort_by_key(|h| Reverse((h.message.timestamp, h.message.sequence)))
        }
    }
    hits
}
