//! Persona domain model.
//!
//! A persona is a named character defined entirely by data: a display name,
//! some profile fields for pickers, and the fixed system instruction that
//! conditions every reply.

use serde::{Deserialize, Serialize};

/// Links shown on a persona's profile card
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Audience figures shown next to a persona
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub students: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<String>,
}

/// A registered persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable lookup key (e.g. "hitesh")
    pub id: String,
    pub name: String,
    /// Name used to attribute replies. Falls back to `name` when omitted.
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    /// First line shown when a conversation starts
    #[serde(default)]
    pub greeting: String,
    /// Sent verbatim as the system instruction
    pub system_prompt: String,
    #[serde(default)]
    pub stats: PersonaStats,
    #[serde(default)]
    pub social_links: SocialLinks,
}

/// Everything about a persona except its system prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub expertise: Vec<String>,
    pub greeting: String,
    pub stats: PersonaStats,
    pub social_links: SocialLinks,
}

impl Persona {
    /// The name replies are attributed to
    pub fn speaker(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    pub fn summary(&self) -> PersonaSummary {
        PersonaSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            display_name: self.speaker().to_string(),
            description: self.description.clone(),
            expertise: self.expertise.clone(),
            greeting: self.greeting.clone(),
            stats: self.stats.clone(),
            social_links: self.social_links.clone(),
        }
    }
}
