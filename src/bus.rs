//! Chat and email delivery between agents.
//!
//! The `Directory` holds the latest presence snapshot and the pending
//! note queue for every agent. The `ChatBus` routes chat messages and
//! emails through it and persists every record to the `RecordStore`.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use crate::agent::{AgentSnapshot, Location};
use crate::store::{now_rfc3339, ChatRecord, EmailRecord, RecordStore};

#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("unknown sender '{0}'")]
    UnknownSender(String),
    #[error("unknown recipient '{0}'")]
    UnknownRecipient(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),
}

/// Presence and pending-note registry for every agent in the roster.
#[derive(Default)]
pub struct Directory {
    snapshots: RwLock<HashMap<String, AgentSnapshot>>,
    pending: Mutex<HashMap<String, Vec<String>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest presence snapshot for an agent, registering it
    /// on first sight.
    pub fn update(&self, snapshot: AgentSnapshot) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(snapshot.name.clone(), snapshot);
    }

    pub fn contains(&self, name: &str) -> bool {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        snapshots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<AgentSnapshot> {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        snapshots.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = snapshots.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queue a note for an agent to pick up at the start of its next turn.
    pub fn push_note(&self, name: &str, note: String) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(name.to_string()).or_default().push(note);
    }

    /// Take every queued note for an agent, oldest first.
    pub fn drain_notes(&self, name: &str) -> Vec<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(name).unwrap_or_default()
    }
}

/// Routes chat messages and emails between agents and persists them.
pub struct ChatBus {
    directory: std::sync::Arc<Directory>,
    store: std::sync::Arc<RecordStore>,
    inboxes: Mutex<HashMap<String, Vec<EmailRecord>>>,
    domain: String,
}

impl ChatBus {
    pub fn new(
        directory: std::sync::Arc<Directory>,
        store: std::sync::Arc<RecordStore>,
        domain: &str,
    ) -> Self {
        Self {
            directory,
            store,
            inboxes: Mutex::new(HashMap::new()),
            domain: domain.to_string(),
        }
    }

    /// Email address derived from an agent name. The agent must exist
    /// in the directory.
    pub fn address_for(&self, name: &str) -> Result<String, AddressError> {
        if !self.directory.contains(name) {
            return Err(AddressError::UnknownRecipient(name.to_string()));
        }
        Ok(format!("{}@{}", name.to_lowercase(), self.domain))
    }

    /// Send a chat message from one agent to another.
    ///
    /// The record is appended to history regardless of whether the
    /// recipient is reachable. Delivery as a pending note only happens
    /// when the recipient is known and at the office.
    pub fn send(&self, sender: &str, recipient: &str, body: &str) -> Result<(), BusError> {
        if !self.directory.contains(sender) {
            return Err(AddressError::UnknownSender(sender.to_string()).into());
        }
        let record = ChatRecord {
            sender: sender.to_string(),
            recipients: vec![recipient.to_string()],
            body: body.to_string(),
            timestamp: now_rfc3339(),
        };
        self.store.append_chat(&record)?;

        match self.directory.get(recipient) {
            Some(snapshot) if snapshot.location == Location::Office => {
                self.directory.push_note(
                    recipient,
                    format!("Received message from {}: '{}'", sender, body),
                );
                info!(from = %sender, to = %recipient, "message delivered");
            }
            Some(_) => {
                info!(from = %sender, to = %recipient, "recipient away, message stored only");
            }
            None => {
                warn!(from = %sender, to = %recipient, "unknown recipient, message stored only");
            }
        }
        Ok(())
    }

    /// Send the same message to several recipients, one record each.
    /// Stops at the first storage failure; earlier records stay persisted.
    pub fn broadcast(&self, sender: &str, recipients: &[String], body: &str) -> Result<(), BusError> {
        for recipient in recipients {
            self.send(sender, recipient, body)?;
        }
        Ok(())
    }

    /// Send an email to one or more agents.
    ///
    /// Every recipient address is validated before anything is stored,
    /// so an invalid recipient leaves no partial state.
    pub fn send_email(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), BusError> {
        if !self.directory.contains(sender) {
            return Err(AddressError::UnknownSender(sender.to_string()).into());
        }
        let mut addressed = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let address = self.address_for(recipient)?;
            addressed.push((recipient.clone(), address));
        }
        let sender_address = format!("{}@{}", sender.to_lowercase(), self.domain);

        for (recipient, address) in addressed {
            let record = EmailRecord {
                sender: sender_address.clone(),
                recipient: address,
                subject: subject.to_string(),
                body: body.to_string(),
                timestamp: now_rfc3339(),
                reply_to: None,
                forward_to: None,
                attachment: None,
            };
            self.store.append_email(&record)?;
            let mut inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
            inboxes.entry(recipient.clone()).or_default().push(record);
            info!(from = %sender, to = %recipient, %subject, "email sent");
        }
        Ok(())
    }

    /// Number of emails waiting in an agent's inbox.
    pub fn check_email(&self, name: &str) -> usize {
        let inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        inboxes.get(name).map(Vec::len).unwrap_or(0)
    }

    /// Copy of an agent's inbox, oldest first.
    pub fn inbox(&self, name: &str) -> Vec<EmailRecord> {
        let inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        inboxes.get(name).cloned().unwrap_or_default()
    }

    /// Repopulate inboxes from the persisted email table. Used when
    /// resuming against an existing store directory.
    pub fn load_emails(&self) -> Result<usize, BusError> {
        let records = self.store.load_emails()?;
        let count = records.len();
        let mut inboxes = self.inboxes.lock().unwrap_or_else(|e| e.into_inner());
        inboxes.clear();
        for record in records {
            let local = record
                .recipient
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string();
            let name = self
                .directory
                .names()
                .into_iter()
                .find(|n| n.to_lowercase() == local)
                .unwrap_or(local);
            inboxes.entry(name).or_default().push(record);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn snapshot(name: &str, location: Location) -> AgentSnapshot {
        AgentSnapshot {
            name: name.to_string(),
            location,
            working: true,
        }
    }

    fn bus_with(names: &[(&str, Location)]) -> (ChatBus, Arc<Directory>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        for (name, location) in names {
            directory.update(snapshot(name, *location));
        }
        let bus = ChatBus::new(directory.clone(), store, "company.com");
        (bus, directory, dir)
    }

    #[test]
    fn test_send_delivers_note_when_at_office() {
        let (bus, directory, _guard) =
            bus_with(&[("Alice", Location::Office), ("Bob", Location::Office)]);
        bus.send("Alice", "Bob", "standup in five").unwrap();

        let notes = directory.drain_notes("Bob");
        assert_eq!(
            notes,
            vec!["Received message from Alice: 'standup in five'".to_string()]
        );
        assert!(directory.drain_notes("Bob").is_empty());
    }

    #[test]
    fn test_send_persists_even_when_recipient_home() {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        directory.update(snapshot("Alice", Location::Office));
        directory.update(snapshot("Bob", Location::Home));
        let bus = ChatBus::new(directory.clone(), store.clone(), "company.com");

        bus.send("Alice", "Bob", "see you tomorrow").unwrap();

        assert!(directory.drain_notes("Bob").is_empty());
        let history = store.chat_history(None, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "see you tomorrow");
    }

    #[test]
    fn test_send_persists_for_unknown_recipient() {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        directory.update(snapshot("Alice", Location::Office));
        let bus = ChatBus::new(directory, store.clone(), "company.com");

        bus.send("Alice", "Ghost", "anyone there?").unwrap();
        let history = store.chat_history(None, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].recipients, vec!["Ghost".to_string()]);
    }

    #[test]
    fn test_send_unknown_sender_is_error() {
        let (bus, _, _guard) = bus_with(&[("Alice", Location::Office)]);
        let err = bus.send("Ghost", "Alice", "boo").unwrap_err();
        assert!(matches!(
            err,
            BusError::Address(AddressError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_broadcast_reaches_each_recipient() {
        let (bus, directory, _guard) = bus_with(&[
            ("Alice", Location::Office),
            ("Bob", Location::Office),
            ("Carol", Location::Office),
        ]);
        bus.broadcast(
            "Alice",
            &["Bob".to_string(), "Carol".to_string()],
            "release is out",
        )
        .unwrap();
        assert_eq!(directory.drain_notes("Bob").len(), 1);
        assert_eq!(directory.drain_notes("Carol").len(), 1);
    }

    #[test]
    fn test_address_for() {
        let (bus, _, _guard) = bus_with(&[("Alice", Location::Office)]);
        assert_eq!(bus.address_for("Alice").unwrap(), "alice@company.com");
        assert_eq!(
            bus.address_for("Ghost").unwrap_err(),
            AddressError::UnknownRecipient("Ghost".to_string())
        );
    }

    #[test]
    fn test_send_email_all_or_nothing() {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        directory.update(snapshot("Alice", Location::Office));
        directory.update(snapshot("Bob", Location::Office));
        let bus = ChatBus::new(directory, store.clone(), "company.com");

        let err = bus
            .send_email(
                "Alice",
                &["Bob".to_string(), "Ghost".to_string()],
                "plans",
                "q3 roadmap",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::Address(AddressError::UnknownRecipient(_))
        ));
        // Invalid recipient left no records behind.
        assert!(store.load_emails().unwrap().is_empty());
        assert_eq!(bus.check_email("Bob"), 0);

        bus.send_email("Alice", &["Bob".to_string()], "plans", "q3 roadmap")
            .unwrap();
        assert_eq!(bus.check_email("Bob"), 1);
        let inbox = bus.inbox("Bob");
        assert_eq!(inbox[0].sender, "alice@company.com");
        assert_eq!(inbox[0].recipient, "bob@company.com");
        assert_eq!(inbox[0].subject, "plans");
    }

    #[test]
    fn test_load_emails_repopulates_inboxes() {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        directory.update(snapshot("Alice", Location::Office));
        directory.update(snapshot("Bob", Location::Office));

        {
            let bus = ChatBus::new(directory.clone(), store.clone(), "company.com");
            bus.send_email("Alice", &["Bob".to_string()], "hello", "first")
                .unwrap();
        }

        let bus = ChatBus::new(directory, store, "company.com");
        assert_eq!(bus.check_email("Bob"), 0);
        let loaded = bus.load_emails().unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(bus.check_email("Bob"), 1);
    }

    #[test]
    fn test_notes_drain_in_order() {
        let directory = Directory::new();
        directory.update(snapshot("Bob", Location::Office));
        directory.push_note("Bob", "first".to_string());
        directory.push_note("Bob", "second".to_string());
        assert_eq!(
            directory.drain_notes("Bob"),
            vec!["first".to_string(), "second".to_string()]
        );
    }
}
