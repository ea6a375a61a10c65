//! Skills: named external tools invokable through the `command` action.
//!
//! Each skill is a pure function from the core's perspective: an ordered
//! argument list in, an outcome text out. Failures surface as [`SkillError`]
//! and are captured per-command by the dispatcher.

use async_trait::async_trait;

pub mod builtin;
pub mod registry;

pub use registry::{SkillInfo, SkillRegistry};

/// Failure of a single skill invocation.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named tool an agent may invoke.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the skill with positional, whitespace-trimmed arguments.
    async fn invoke(&self, args: &[String]) -> Result<String, SkillError>;
}
