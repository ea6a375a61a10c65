//! Durable record store backed by append-only JSONL tables.
//!
//! One file per logical table (`chat.jsonl`, `emails.jsonl`, `knowledge.jsonl`,
//! `notes.jsonl`). Every write is a single appended line; nothing is rewritten,
//! so the stored history is always a timestamp-ordered copy of everything sent.
//! A per-table mutex serializes concurrent writers.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// One chat message as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub timestamp: String,
}

/// One delivered email as persisted (one row per recipient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

/// Key/value knowledge entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub key: String,
    pub value: String,
    pub timestamp: String,
}

/// Free-text note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    pub content: String,
    pub timestamp: String,
}

/// Current UTC timestamp in RFC 3339 form, used for all record ordering.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Append/query storage for chat, email, knowledge, and note records.
pub struct RecordStore {
    dir: PathBuf,
    chat_lock: Mutex<()>,
    email_lock: Mutex<()>,
    knowledge_lock: Mutex<()>,
    note_lock: Mutex<()>,
}

impl RecordStore {
    /// Open (or create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            chat_lock: Mutex::new(()),
            email_lock: Mutex::new(()),
            knowledge_lock: Mutex::new(()),
            note_lock: Mutex::new(()),
        })
    }

    fn table(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn append_line<T: Serialize>(&self, table: &str, row: &T) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.table(table))?;
        let line = serde_json::to_string(row)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_lines<T: DeserializeOwned>(&self, table: &str) -> std::io::Result<Vec<T>> {
        let file = match File::open(self.table(table)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let reader = BufReader::new(file);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let row: T = serde_json::from_str(trimmed)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Append one chat message to the durable history.
    pub fn append_chat(&self, record: &ChatRecord) -> std::io::Result<()> {
        let _guard = self.chat_lock.lock().expect("chat table lock poisoned");
        self.append_line("chat.jsonl", record)
    }

    /// Query the chat history, most recent first.
    ///
    /// `participants` keeps only messages sent by or addressed to one of the
    /// given names; `limit` caps the result count.
    pub fn chat_history(
        &self,
        participants: Option<&[String]>,
        limit: Option<usize>,
    ) -> std::io::Result<Vec<ChatRecord>> {
        let mut rows: Vec<ChatRecord> = self.load_lines("chat.jsonl")?;
        if let Some(names) = participants {
            rows.retain(|r| {
                names.iter().any(|n| *n == r.sender)
                    || r.recipients.iter().any(|rcpt| names.contains(rcpt))
            });
        }
        rows.reverse();
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Case-sensitive substring search over message bodies, most recent first.
    pub fn search_chat(&self, keyword: &str) -> std::io::Result<Vec<ChatRecord>> {
        let mut rows: Vec<ChatRecord> = self.load_lines("chat.jsonl")?;
        rows.retain(|r| r.body.contains(keyword));
        rows.reverse();
        Ok(rows)
    }

    /// Append one email row (callers write one row per recipient).
    pub fn append_email(&self, record: &EmailRecord) -> std::io::Result<()> {
        let _guard = self.email_lock.lock().expect("email table lock poisoned");
        self.append_line("emails.jsonl", record)
    }

    /// Load every stored email row in send order.
    pub fn load_emails(&self) -> std::io::Result<Vec<EmailRecord>> {
        self.load_lines("emails.jsonl")
    }

    /// Store a key/value knowledge entry.
    pub fn put_knowledge(&self, key: &str, value: &str) -> std::io::Result<()> {
        let record = KnowledgeRecord {
            key: key.to_string(),
            value: value.to_string(),
            timestamp: now_rfc3339(),
        };
        let _guard = self
            .knowledge_lock
            .lock()
            .expect("knowledge table lock poisoned");
        self.append_line("knowledge.jsonl", &record)
    }

    /// Load all knowledge entries in insertion order.
    pub fn knowledge(&self) -> std::io::Result<Vec<KnowledgeRecord>> {
        self.load_lines("knowledge.jsonl")
    }

    /// Store a free-text note and return the created record.
    pub fn append_note(&self, content: &str) -> std::io::Result<NoteRecord> {
        let record = NoteRecord {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            timestamp: now_rfc3339(),
        };
        let _guard = self.note_lock.lock().expect("note table lock poisoned");
        self.append_line("notes.jsonl", &record)?;
        Ok(record)
    }

    /// Load all notes in insertion order.
    pub fn notes(&self) -> std::io::Result<Vec<NoteRecord>> {
        self.load_lines("notes.jsonl")
    }
}
