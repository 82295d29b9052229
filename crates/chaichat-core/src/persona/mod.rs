//! Persona definitions and lookup

mod model;
mod registry;

pub use model::{Persona, PersonaStats, PersonaSummary, SocialLinks};
pub use registry::{PersonaError, PersonaRegistry};
