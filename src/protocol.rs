//! Action protocol: the strict grammar a turn's generated text must match.
//!
//! ```text
//! message|<recipient>|<body>
//! email|<recipient>[,<recipient>...]|<subject>|<body>
//! command|<name>|<arg1>,<arg2>,...
//! pass
//! ignore
//! ```
//!
//! Keywords are case-insensitive. A turn's text may contain several
//! candidates (newline- or comma-separated); the first well-formed candidate
//! wins and the rest are discarded. Anything that does not fully match one
//! grammar case is rejected, never partially interpreted.

use crate::llm::Channel;

/// The structured result of parsing one turn's generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Message {
        recipient: String,
        body: String,
    },
    Email {
        recipients: Vec<String>,
        subject: String,
        body: String,
    },
    Command {
        name: String,
        args: Vec<String>,
    },
    Pass,
    /// Distinct from [`Action::Pass`] in the protocol, identical in effect.
    Ignore,
}

impl Action {
    pub fn channel(&self) -> Channel {
        match self {
            Action::Message { .. } => Channel::Message,
            Action::Email { .. } => Channel::Email,
            Action::Command { .. } => Channel::Command,
            Action::Pass => Channel::Pass,
            Action::Ignore => Channel::Ignore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("no well-formed action in turn text")]
    MalformedAction,
    #[error("action channel '{actual}' does not match hint '{hint}'")]
    ChannelMismatch { hint: Channel, actual: Channel },
}

const KEYWORDS: [&str; 5] = ["message", "email", "command", "pass", "ignore"];

/// Parse one turn's text into exactly one [`Action`].
pub fn parse(text: &str) -> Result<Action, ProtocolError> {
    candidates(text)
        .iter()
        .find_map(|c| parse_candidate(c))
        .ok_or(ProtocolError::MalformedAction)
}

/// Parse and additionally require agreement with a channel hint.
pub fn parse_with_hint(text: &str, hint: Option<Channel>) -> Result<Action, ProtocolError> {
    let action = parse(text)?;
    if let Some(hint) = hint {
        check_channel(&action, hint)?;
    }
    Ok(action)
}

/// Verify a parsed action agrees with a (possibly re-requested) hint.
pub fn check_channel(action: &Action, hint: Channel) -> Result<(), ProtocolError> {
    let actual = action.channel();
    if actual == hint {
        Ok(())
    } else {
        Err(ProtocolError::ChannelMismatch { hint, actual })
    }
}

/// True when a keyword starts at `pos`: at the beginning of the text or right
/// after a newline or comma (ignoring intervening spaces).
fn at_anchor(text: &str, pos: usize) -> bool {
    let before = text[..pos].trim_end_matches([' ', '\t']);
    before.is_empty() || before.ends_with(['\n', ','])
}

/// Split turn text into keyword-anchored candidate slices.
fn candidates(text: &str) -> Vec<String> {
    // ASCII-only lowering keeps byte offsets aligned with the original text.
    let lower = text.to_ascii_lowercase();
    let mut anchors = Vec::new();
    for keyword in KEYWORDS {
        let mut from = 0;
        while let Some(found) = lower[from..].find(keyword) {
            let pos = from + found;
            if at_anchor(&lower, pos) {
                anchors.push(pos);
            }
            from = pos + keyword.len();
        }
    }
    anchors.sort_unstable();
    anchors.dedup();

    anchors
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = anchors.get(i + 1).copied().unwrap_or(text.len());
            text[start..end]
                .trim()
                .trim_end_matches(',')
                .trim()
                .to_string()
        })
        .collect()
}

fn parse_candidate(candidate: &str) -> Option<Action> {
    let candidate = candidate.trim();
    let (keyword, rest) = match candidate.split_once('|') {
        Some((k, r)) => (k.trim().to_lowercase(), Some(r)),
        None => (candidate.to_lowercase(), None),
    };

    match keyword.as_str() {
        "pass" if rest.is_none() => Some(Action::Pass),
        "ignore" if rest.is_none() => Some(Action::Ignore),
        "message" => {
            let (recipient, body) = rest?.split_once('|')?;
            let recipient = recipient.trim();
            let body = body.trim();
            if recipient.is_empty() || body.is_empty() {
                return None;
            }
            Some(Action::Message {
                recipient: recipient.to_string(),
                body: body.to_string(),
            })
        }
        "email" => {
            let rest = rest?;
            let (recipients, rest) = rest.split_once('|')?;
            let (subject, body) = rest.split_once('|')?;
            let recipients: Vec<String> = recipients
                .split(',')
                .map(|r| r.trim().to_string())
                .collect();
            let subject = subject.trim();
            let body = body.trim();
            if recipients.iter().any(|r| r.is_empty()) || subject.is_empty() || body.is_empty() {
                return None;
            }
            Some(Action::Email {
                recipients,
                subject: subject.to_string(),
                body: body.to_string(),
            })
        }
        "command" => {
            let rest = rest?;
            let (name, args) = match rest.split_once('|') {
                Some((name, args)) => (name.trim(), Some(args)),
                None => (rest.trim(), None),
            };
            if name.is_empty() {
                return None;
            }
            let args: Vec<String> = match args {
                Some(a) if !a.trim().is_empty() => {
                    a.split(',').map(|s| s.trim().to_string()).collect()
                }
                _ => Vec::new(),
            };
            Some(Action::Command {
                name: name.to_string(),
                args,
            })
        }
        _ => None,
    }
}
