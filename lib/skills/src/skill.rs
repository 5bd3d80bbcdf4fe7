//! Skills the host may delegate to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A separately hosted bot the host can delegate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    /// Name the host uses for the skill.
    pub id: String,
    /// The skill's app id; the audience of tokens sent to it.
    #[serde(default)]
    pub app_id: String,
    /// Where activities for the skill are posted.
    pub endpoint: String,
}

impl SkillDefinition {
    /// Creates a skill definition.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        app_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_id: app_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// The configured skills and the callback URL handed to them.
#[derive(Debug, Clone, Default)]
pub struct SkillsConfiguration {
    skill_host_endpoint: String,
    skills: BTreeMap<String, SkillDefinition>,
}

impl SkillsConfiguration {
    /// Creates a configuration. Later definitions replace earlier ones with the same id.
    #[must_use]
    pub fn new(
        skill_host_endpoint: impl Into<String>,
        skills: impl IntoIterator<Item = SkillDefinition>,
    ) -> Self {
        Self {
            skill_host_endpoint: skill_host_endpoint.into(),
            skills: skills
                .into_iter()
                .map(|skill| (skill.id.clone(), skill))
                .collect(),
        }
    }

    /// Returns the URL skills send their replies to.
    #[must_use]
    pub fn skill_host_endpoint(&self) -> &str {
        &self.skill_host_endpoint
    }

    /// Looks up a skill by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SkillDefinition> {
        self.skills.get(id)
    }

    /// Looks up a skill by app id.
    #[must_use]
    pub fn by_app_id(&self, app_id: &str) -> Option<&SkillDefinition> {
        self.skills
            .values()
            .find(|skill| !skill.app_id.is_empty() && skill.app_id == app_id)
    }

    /// Iterates over the configured skills in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SkillDefinition> {
        self.skills.values()
    }

    /// Returns the number of configured skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Returns true if no skills are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Returns the app ids of the configured skills, for the callback allow-list.
    #[must_use]
    pub fn app_ids(&self) -> Vec<String> {
        self.skills
            .values()
            .filter(|skill| !skill.app_id.is_empty())
            .map(|skill| skill.app_id.clone())
            .collect()
    }
}
