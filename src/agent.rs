use rand::Rng;
use std::time::{Duration, Instant};
use tracing::info;

/// Where an agent currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Home,
    Office,
}

/// Read-only view of an agent handed to the bus for delivery checks.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub name: String,
    pub location: Location,
    pub working: bool,
}

/// Per-agent lifecycle state: identity, location, working status, break
/// timer, and the append-only action/thought logs.
///
/// Owned exclusively by the scheduler. Invariant: `working == true` implies
/// `location == Office`; a break is only enterable while working.
#[derive(Debug)]
pub struct AgentState {
    pub name: String,
    pub role: String,
    pub responsibilities: String,
    /// Names of the skills this agent is permitted to invoke.
    pub skills: Vec<String>,
    location: Location,
    working: bool,
    on_break: bool,
    last_break_start: Option<Instant>,
    last_break_duration: Duration,
    actions: Vec<String>,
    thoughts: Vec<String>,
}

impl AgentState {
    pub fn new(name: &str, role: &str, responsibilities: &str, skills: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            responsibilities: responsibilities.to_string(),
            skills,
            location: Location::Home,
            working: false,
            on_break: false,
            last_break_start: None,
            last_break_duration: Duration::ZERO,
            actions: Vec::new(),
            thoughts: Vec::new(),
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn working(&self) -> bool {
        self.working
    }

    pub fn on_break(&self) -> bool {
        self.on_break
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn thoughts(&self) -> &[String] {
        &self.thoughts
    }

    pub fn last_thought(&self) -> Option<&str> {
        self.thoughts.last().map(String::as_str)
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    pub fn record_thought(&mut self, thought: impl Into<String>) {
        self.thoughts.push(thought.into());
    }

    pub fn has_capability(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            location: self.location,
            working: self.working,
        }
    }

    /// Home -> Office/Working. No-op when already at the office.
    pub fn go_to_office(&mut self) {
        if self.location == Location::Office {
            return;
        }
        self.location = Location::Office;
        self.working = true;
        self.actions.push(format!("{} arrived at the office", self.name));
        info!(agent = %self.name, "arrived at the office");
    }

    /// Office/Working -> Home. Disallowed (no-op) while on break.
    pub fn go_home(&mut self) {
        if self.location == Location::Home || self.on_break {
            return;
        }
        self.working = false;
        self.location = Location::Home;
        self.actions
            .push(format!("{} left the office and went home", self.name));
        info!(agent = %self.name, "left the office and went home");
    }

    fn break_elapsed(&self, now: Instant) -> bool {
        match self.last_break_start {
            None => true,
            Some(start) => now.duration_since(start) > self.last_break_duration,
        }
    }

    /// Enter a break if working and the previous break interval has fully
    /// elapsed. Samples the duration from `range` seconds and returns it so
    /// the scheduler can pace. Returns `None` (a no-op, not an error) when
    /// at home, already on break, or too soon after the last break.
    pub fn take_break<R: Rng>(
        &mut self,
        now: Instant,
        range: (u64, u64),
        rng: &mut R,
    ) -> Option<Duration> {
        if !self.working || self.on_break || self.location != Location::Office {
            return None;
        }
        if !self.break_elapsed(now) {
            return None;
        }
        let secs = rng.gen_range(range.0..=range.1);
        let duration = Duration::from_secs(secs);
        self.on_break = true;
        self.working = false;
        self.last_break_start = Some(now);
        self.last_break_duration = duration;
        info!(agent = %self.name, break_secs = secs, "taking a break");
        Some(duration)
    }

    /// Automatic Office/OnBreak -> Office/Working transition once the
    /// sampled duration has elapsed. Safe to call every turn.
    pub fn tick(&mut self, now: Instant) {
        if !self.on_break {
            return;
        }
        if let Some(start) = self.last_break_start {
            if now.duration_since(start) >= self.last_break_duration {
                self.on_break = false;
                self.working = true;
                info!(agent = %self.name, "back from break");
            }
        }
    }

    /// Break predicate evaluated by the scheduler after `act`.
    pub fn should_take_break(&self, break_every: usize) -> bool {
        break_every > 0
            && self.working
            && !self.actions.is_empty()
            && self.actions.len() % break_every == 0
    }
}
