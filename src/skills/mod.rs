//! Skills: markdown instruction bundles surfaced in the system prompt.
//!
//! Skills are supplied as manifests and frozen into a [`SkillTable`]. The
//! agent loop swaps the whole table to reload.

mod types;

pub use types::SkillManifest;

use tracing::warn;

use crate::config::SkillsConfig;

/// Immutable, name-ordered table of skills.
#[derive(Debug, Clone, Default)]
pub struct SkillTable {
    skills: Vec<SkillManifest>,
}

impl SkillTable {
    /// Build a table. Later manifests replace earlier ones with the same name.
    ///
    /// Unmet dependencies are logged, not rejected.
    pub fn new(manifests: Vec<SkillManifest>) -> Self {
        let mut skills: Vec<SkillManifest> = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            if manifest.name.trim().is_empty() {
                warn!("Skipping skill with empty name");
                continue;
            }
            match skills.iter_mut().find(|s| s.name == manifest.name) {
                Some(existing) => *existing = manifest,
                None => skills.push(manifest),
            }
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));

        let table = Self { skills };
        for (skill, missing) in table.missing_dependencies() {
            warn!(skill = %skill, missing = %missing.join(", "), "Skill has unmet dependencies");
        }
        table
    }

    /// Build a table applying `disabled` and `always_load` from config.
    pub fn from_config(manifests: Vec<SkillManifest>, config: &SkillsConfig) -> Self {
        let manifests = manifests
            .into_iter()
            .filter(|m| !config.disabled.contains(&m.name))
            .map(|mut m| {
                if config.always_load.contains(&m.name) {
                    m.always_loaded = true;
                }
                m
            })
            .collect();
        Self::new(manifests)
    }

    pub fn get(&self, name: &str) -> Option<&SkillManifest> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Skills whose content goes into every prompt.
    pub fn always_loaded(&self) -> impl Iterator<Item = &SkillManifest> {
        self.skills.iter().filter(|s| s.always_loaded)
    }

    /// Skills listed by description only.
    pub fn on_demand(&self) -> impl Iterator<Item = &SkillManifest> {
        self.skills.iter().filter(|s| !s.always_loaded)
    }

    /// `(skill, missing dependency names)` for every skill with unmet deps.
    pub fn missing_dependencies(&self) -> Vec<(String, Vec<String>)> {
        self.skills
            .iter()
            .filter_map(|s| {
                let missing: Vec<String> = s
                    .dependencies
                    .iter()
                    .filter(|dep| self.get(dep).is_none())
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (s.name.clone(), missing))
            })
            .collect()
    }

    /// Prompt block: always-loaded skills verbatim, the rest as one-liners.
    ///
    /// Empty when the table is empty.
    pub fn render_summary(&self) -> String {
        if self.skills.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Skills\n");
        for skill in self.always_loaded() {
            out.push_str(&format!("\n### {}\n\n{}\n", skill.name, skill.content.trim()));
        }

        let on_demand: Vec<&SkillManifest> = self.on_demand().collect();
        if !on_demand.is_empty() {
            out.push_str("\nAvailable on request:\n");
            for skill in on_demand {
                out.push_str(&format!("- {}: {}\n", skill.name, skill.description));
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SkillManifest> {
        vec![
            SkillManifest::new("weather", "Look up forecasts", "Use web_fetch on wttr.in").always(),
            SkillManifest::new("github", "Work with GitHub", "Use the gh CLI").depends_on("shell"),
            SkillManifest::new("notes", "Keep notes", "Write to notes.md"),
        ]
    }

    #[test]
    fn test_table_is_sorted_and_split() {
        let table = SkillTable::new(sample());
        assert_eq!(table.len(), 3);
        let always: Vec<&str> = table.always_loaded().map(|s| s.name.as_str()).collect();
        let lazy: Vec<&str> = table.on_demand().map(|s| s.name.as_str()).collect();
        assert_eq!(always, vec!["weather"]);
        assert_eq!(lazy, vec!["github", "notes"]);
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let table = SkillTable::new(vec![
            SkillManifest::new("notes", "old", "old body"),
            SkillManifest::new("notes", "new", "new body"),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("notes").unwrap().description, "new");
    }

    #[test]
    fn test_missing_dependencies() {
        let table = SkillTable::new(sample());
        assert_eq!(
            table.missing_dependencies(),
            vec![("github".to_string(), vec!["shell".to_string()])]
        );
    }

    #[test]
    fn test_render_summary() {
        let summary = SkillTable::new(sample()).render_summary();
        assert!(summary.starts_with("## Skills"));
        assert!(summary.contains("### weather\n\nUse web_fetch on wttr.in"));
        assert!(summary.contains("- github: Work with GitHub"));
        assert!(!summary.contains("Use the gh CLI"));
        assert_eq!(SkillTable::default().render_summary(), "");
    }

    #[test]
    fn test_from_config() {
        let config = SkillsConfig {
            always_load: vec!["notes".to_string()],
            disabled: vec!["github".to_string()],
        };
        let table = SkillTable::from_config(sample(), &config);
        assert!(table.get("github").is_none());
        assert!(table.get("notes").unwrap().always_loaded);
    }
}
