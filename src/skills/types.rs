//! Skills type definitions.

use serde::{Deserialize, Serialize};

/// A statically supplied skill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillManifest {
    /// Skill name.
    pub name: String,
    /// One-line description shown for on-demand skills.
    pub description: String,
    /// Whether the full content is always injected into the prompt.
    pub always_loaded: bool,
    /// Skill names that must be present for this skill to work.
    pub dependencies: Vec<String>,
    /// Markdown body.
    pub content: String,
}

impl SkillManifest {
    pub fn new(name: &str, description: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    /// Mark as always loaded.
    pub fn always(mut self) -> Self {
        self.always_loaded = true;
        self
    }

    /// Add a dependency on another skill.
    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }
}
