//! Routes parsed actions to the chat bus or the skill registry.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::bus::{BusError, ChatBus};
use crate::protocol::{Action, ProtocolError};
use crate::skills::{SkillError, SkillRegistry};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unknown or unpermitted command '{0}'")]
    UnknownCommand(String),
    #[error("skill '{name}' failed: {source}")]
    SkillExecution {
        name: String,
        #[source]
        source: SkillError,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// What a successfully dispatched action produced.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Sent,
    Emailed,
    CommandOutput(String),
    Noop,
}

/// Executes actions on behalf of agents.
pub struct Dispatcher {
    bus: Arc<ChatBus>,
    skills: Arc<SkillRegistry>,
}

impl Dispatcher {
    pub fn new(bus: Arc<ChatBus>, skills: Arc<SkillRegistry>) -> Self {
        Self { bus, skills }
    }

    /// Execute a parsed action for `actor`. Commands require the skill
    /// to be registered and listed in the actor's capabilities.
    pub async fn dispatch(
        &self,
        actor: &str,
        capabilities: &[String],
        action: &Action,
    ) -> Result<Outcome, DispatchError> {
        match action {
            Action::Message { recipient, body } => {
                self.bus.send(actor, recipient, body)?;
                Ok(Outcome::Sent)
            }
            Action::Email {
                recipients,
                subject,
                body,
            } => {
                self.bus.send_email(actor, recipients, subject, body)?;
                Ok(Outcome::Emailed)
            }
            Action::Command { name, args } => {
                let permitted = capabilities.iter().any(|c| c == name);
                if !permitted || !self.skills.contains(name) {
                    return Err(DispatchError::UnknownCommand(name.clone()));
                }
                info!(%actor, command = %name, "running command");
                let output = self
                    .skills
                    .invoke(name, args)
                    .await
                    .map_err(|source| DispatchError::SkillExecution {
                        name: name.clone(),
                        source,
                    })?;
                Ok(Outcome::CommandOutput(output))
            }
            Action::Pass | Action::Ignore => {
                debug!(%actor, "no action this turn");
                Ok(Outcome::Noop)
            }
        }
    }
}
