use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::{Skill, SkillError};

/// Summary of a registered skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
}

/// Named mapping from command name to skill, shared across agents.
/// Populated once at construction and read-only afterwards.
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Registry with every builtin skill registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        info!(skill = %name, "registering skill");
        self.skills.insert(name, skill);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    /// Invoke a skill by name. Unknown names resolve to a typed error.
    pub async fn invoke(&self, name: &str, args: &[String]) -> Result<String, SkillError> {
        let skill = self
            .get(name)
            .ok_or_else(|| SkillError::Failed(format!("unknown skill '{}'", name)))?;
        skill.invoke(args).await
    }

    pub fn list(&self) -> Vec<SkillInfo> {
        let mut infos: Vec<SkillInfo> = self
            .skills
            .values()
            .map(|s| SkillInfo {
                name: s.name().to_string(),
                description: s.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}
