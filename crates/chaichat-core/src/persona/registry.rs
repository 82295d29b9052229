//! Static persona registry.
//!
//! Built-in personas are embedded at compile time and parsed once. A user
//! file in the same format may override them by id or add new ones.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::model::Persona;

const BUILTIN_PERSONAS: &str = include_str!("../../personas/default.toml");

/// Problems found while loading persona definitions
#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("failed to read personas file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse personas: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid persona '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("persona '{0}' is defined more than once")]
    Duplicate(String),

    #[error("no personas defined")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default, rename = "persona")]
    personas: Vec<Persona>,
}

/// Immutable lookup table of personas, in registration order
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
    index: HashMap<String, usize>,
}

impl PersonaRegistry {
    /// Registry containing the built-in personas
    pub fn builtin() -> Result<Self, PersonaError> {
        Self::from_toml_str(BUILTIN_PERSONAS)
    }

    /// Parse a personas document (`[[persona]]` tables)
    pub fn from_toml_str(content: &str) -> Result<Self, PersonaError> {
        let file: PersonaFile = toml::from_str(content)?;
        Self::from_personas(file.personas)
    }

    pub fn from_personas(personas: Vec<Persona>) -> Result<Self, PersonaError> {
        if personas.is_empty() {
            return Err(PersonaError::Empty);
        }

        let mut registry = Self {
            personas: Vec::with_capacity(personas.len()),
            index: HashMap::new(),
        };
        for persona in personas {
            let persona = validate(persona)?;
            if registry.index.contains_key(&persona.id) {
                return Err(PersonaError::Duplicate(persona.id));
            }
            registry.insert(persona);
        }
        debug!("Persona registry: {:?}", registry.ids());
        Ok(registry)
    }

    /// Built-ins with the personas from `path` layered on top
    pub fn load_file(path: &Path) -> Result<Self, PersonaError> {
        let content = std::fs::read_to_string(path).map_err(|source| PersonaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let overrides = Self::from_toml_str(&content)?;
        let mut registry = Self::builtin()?;
        registry.merge(overrides);
        info!(
            "Loaded personas from {} ({} total)",
            path.display(),
            registry.len()
        );
        Ok(registry)
    }

    /// Replace personas with matching ids, append the rest
    pub fn merge(&mut self, other: PersonaRegistry) {
        for persona in other.personas {
            match self.index.get(&persona.id) {
                Some(&idx) => {
                    debug!("Overriding persona '{}'", persona.id);
                    self.personas[idx] = persona;
                }
                None => self.insert(persona),
            }
        }
    }

    fn insert(&mut self, persona: Persona) {
        self.index.insert(persona.id.clone(), self.personas.len());
        self.personas.push(persona);
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.index.get(id).map(|&idx| &self.personas[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All personas in registration order
    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    pub fn ids(&self) -> Vec<&str> {
        self.personas.iter().map(|p| p.id.as_str()).collect()
    }

    /// First registered persona
    pub fn default_id(&self) -> &str {
        // Construction rejects empty registries
        self.personas.first().map(|p| p.id.as_str()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

fn validate(mut persona: Persona) -> Result<Persona, PersonaError> {
    let invalid = |id: &str, reason: &str| PersonaError::Invalid {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if persona.id.is_empty() {
        return Err(invalid("", "id is empty"));
    }
    if !persona
        .id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            &persona.id,
            "id may only contain lowercase letters, digits, '-' and '_'",
        ));
    }
    if persona.name.trim().is_empty() {
        return Err(invalid(&persona.id, "name is empty"));
    }
    if persona.system_prompt.trim().is_empty() {
        return Err(invalid(&persona.id, "system_prompt is empty"));
    }
    if persona.display_name.trim().is_empty() {
        persona.display_name = persona.name.clone();
    }
    Ok(persona)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CUSTOM: &str = r#"
[[persona]]
id = "rustacean"
name = "Ferris"
system_prompt = "You are Ferris the crab."
"#;

    #[test]
    fn test_builtin_personas() {
        let registry = PersonaRegistry::builtin().unwrap();
        assert_eq!(registry.ids(), vec!["hitesh", "piyush"]);
        assert_eq!(registry.default_id(), "hitesh");

        let hitesh = registry.get("hitesh").unwrap();
        assert_eq!(hitesh.speaker(), "Hitesh Choudhary");
        assert!(hitesh.system_prompt.starts_with("You are an AI assistant"));
        assert!(hitesh.social_links.youtube.is_some());

        let piyush = registry.get("piyush").unwrap();
        assert!(piyush.system_prompt.contains("Piyush Garg"));
        assert!(!piyush.expertise.is_empty());
        assert_eq!(piyush.stats.students.as_deref(), Some("500K+ Students"));
        assert!(piyush.greeting.ends_with('\u{1F680}'));
    }

    #[test]
    fn test_builtin_prompts_kept_in_full() {
        let registry = PersonaRegistry::builtin().unwrap();
        let hitesh = &registry.get("hitesh").unwrap().system_prompt;
        assert!(hitesh.len() > 20_000);
        assert!(hitesh.contains("```javascript"));
        assert!(hitesh.ends_with("avoid unnecessary repetition of greeting phrases."));

        let piyush = &registry.get("piyush").unwrap().system_prompt;
        assert!(piyush.len() > 4_000);
        assert!(piyush.ends_with("hands-on learning through project development."));
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = PersonaRegistry::builtin().unwrap();
        assert!(registry.get("nobody").is_none());
        assert!(!registry.contains("HITESH"));
    }

    #[test]
    fn test_display_name_defaults_to_name() {
        let registry = PersonaRegistry::from_toml_str(CUSTOM).unwrap();
        assert_eq!(registry.get("rustacean").unwrap().display_name, "Ferris");
    }

    #[test]
    fn test_rejects_invalid_ids() {
        let doc = r#"
[[persona]]
id = "Bad Id"
name = "x"
system_prompt = "y"
"#;
        assert!(matches!(
            PersonaRegistry::from_toml_str(doc),
            Err(PersonaError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_prompt() {
        let doc = r#"
[[persona]]
id = "quiet"
name = "Quiet"
system_prompt = "   "
"#;
        let err = PersonaRegistry::from_toml_str(doc).unwrap_err();
        assert!(err.to_string().contains("system_prompt"));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let doc = format!("{}{}", CUSTOM, CUSTOM);
        assert!(matches!(
            PersonaRegistry::from_toml_str(&doc),
            Err(PersonaError::Duplicate(id)) if id == "rustacean"
        ));
        assert!(matches!(
            PersonaRegistry::from_toml_str(""),
            Err(PersonaError::Empty)
        ));
    }

    #[test]
    fn test_load_file_merges_over_builtins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{}
[[persona]]
id = "piyush"
name = "Piyush Garg"
system_prompt = "Overridden prompt"
"#,
            CUSTOM
        )
        .unwrap();

        let registry = PersonaRegistry::load_file(file.path()).unwrap();
        assert_eq!(registry.ids(), vec!["hitesh", "piyush", "rustacean"]);
        assert_eq!(
            registry.get("piyush").unwrap().system_prompt,
            "Overridden prompt"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = PersonaRegistry::load_file(Path::new("/nonexistent/personas.toml")).unwrap_err();
        assert!(matches!(err, PersonaError::Io { .. }));
    }
}
