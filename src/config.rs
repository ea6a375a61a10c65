use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("agent roster is empty")]
    EmptyRoster,
    #[error("duplicate agent name '{0}'")]
    DuplicateAgent(String),
    #[error("break interval must be at least 1 turn")]
    ZeroBreakInterval,
    #[error("break duration range is inverted ({min}..{max})")]
    InvertedBreakRange { min: u64, max: u64 },
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Language model backend choice (groq, openai, ollama, anthropic)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Model override for the chosen backend
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL override for the chosen backend
    #[serde(default)]
    pub base_url: Option<String>,

    /// How long the workday runs
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// An agent considers a break every this many recorded actions
    #[serde(default = "default_break_every")]
    pub break_every: usize,

    /// Shortest break, in seconds
    #[serde(default = "default_break_min_secs")]
    pub break_min_secs: u64,

    /// Longest break, in seconds
    #[serde(default = "default_break_max_secs")]
    pub break_max_secs: u64,

    /// An agent shares a workspace file every this many recorded actions
    #[serde(default = "default_share_every")]
    pub share_every: usize,

    /// Pause between scheduler rounds, in seconds
    #[serde(default = "default_round_pause_secs")]
    pub round_pause_secs: u64,

    /// Directory for persisted chat, email, knowledge, and note tables
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Root directory for agent workspaces
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Domain used for derived agent email addresses
    #[serde(default = "default_email_domain")]
    pub email_domain: String,

    /// Agent roster
    #[serde(default = "default_roster")]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub responsibilities: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl AgentConfig {
    fn new(name: &str, role: &str, responsibilities: &str, skills: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            responsibilities: responsibilities.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn default_backend() -> String {
    "groq".to_string()
}

fn default_duration_secs() -> u64 {
    220
}

fn default_break_every() -> usize {
    5
}

fn default_break_min_secs() -> u64 {
    2
}

fn default_break_max_secs() -> u64 {
    8
}

fn default_share_every() -> usize {
    3
}

fn default_round_pause_secs() -> u64 {
    1
}

fn default_store_dir() -> String {
    "databases".to_string()
}

fn default_workspace_dir() -> String {
    "workspace".to_string()
}

fn default_email_domain() -> String {
    "company.com".to_string()
}

fn default_roster() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new(
            "Alice",
            "Project Manager",
            "Coordinate the team, track progress, and unblock people",
            &["generate_documentation"],
        ),
        AgentConfig::new(
            "Bob",
            "Software Engineer",
            "Implement features and fix bugs in the product codebase",
            &["save_file", "edit_file", "git_clone", "git_pull", "git_push"],
        ),
        AgentConfig::new(
            "Charlie",
            "DevOps Engineer",
            "Keep builds, dependencies, and deployments healthy",
            &["install_dependencies", "git_pull", "git_push"],
        ),
        AgentConfig::new(
            "David",
            "QA Engineer",
            "Test the product and report regressions",
            &["run_unit_tests", "search_files"],
        ),
        AgentConfig::new(
            "Eve",
            "Research Analyst",
            "Research the market and summarize findings for the team",
            &["scrape_webpage", "save_file"],
        ),
        AgentConfig::new(
            "Frank",
            "Technical Writer",
            "Write and maintain product documentation",
            &["generate_documentation", "save_file", "edit_file"],
        ),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: None,
            base_url: None,
            duration_secs: default_duration_secs(),
            break_every: default_break_every(),
            break_min_secs: default_break_min_secs(),
            break_max_secs: default_break_max_secs(),
            share_every: default_share_every(),
            round_pause_secs: default_round_pause_secs(),
            store_dir: default_store_dir(),
            workspace_dir: default_workspace_dir(),
            email_domain: default_email_domain(),
            agents: default_roster(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!(
            agents = config.agents.len(),
            backend = %config.backend,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }
        if self.break_every == 0 {
            return Err(ConfigError::ZeroBreakInterval);
        }
        if self.break_min_secs > self.break_max_secs {
            return Err(ConfigError::InvertedBreakRange {
                min: self.break_min_secs,
                max: self.break_max_secs,
            });
        }
        Ok(())
    }
}
