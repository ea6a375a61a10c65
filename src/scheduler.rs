//! Workday scheduler.
//!
//! Drives every agent through the start-of-day phase, concurrent turn
//! rounds, and the end-of-day phase. Each round runs one turn per agent
//! on its own task; agents only share state through the directory, the
//! bus, and the record store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::agent::AgentState;
use crate::bus::{ChatBus, Directory};
use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher, Outcome};
use crate::llm::{Backend, Channel};
use crate::protocol::{self, ProtocolError};
use crate::store::RecordStore;
use crate::workspace::Workspace;

/// Cooperative stop signal checked at round boundaries.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a single turn needs, shared across agent tasks.
struct Shared {
    backend: Arc<dyn Backend>,
    bus: Arc<ChatBus>,
    directory: Arc<Directory>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<RecordStore>,
    workspace: Arc<Workspace>,
    break_every: usize,
    break_range: (u64, u64),
    share_every: usize,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    agents: Vec<Arc<Mutex<AgentState>>>,
    duration: Duration,
    round_pause: Duration,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        agents: Vec<AgentState>,
        backend: Arc<dyn Backend>,
        bus: Arc<ChatBus>,
        directory: Arc<Directory>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<RecordStore>,
        workspace: Arc<Workspace>,
    ) -> Self {
        let shared = Arc::new(Shared {
            backend,
            bus,
            directory,
            dispatcher,
            store,
            workspace,
            break_every: config.break_every,
            break_range: (config.break_min_secs, config.break_max_secs),
            share_every: config.share_every,
        });
        let agents = agents
            .into_iter()
            .map(|a| Arc::new(Mutex::new(a)))
            .collect();
        Self {
            shared,
            agents,
            duration: Duration::from_secs(config.duration_secs),
            round_pause: Duration::from_secs(config.round_pause_secs),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Run the full workday: arrival, rounds until the deadline or a
    /// stop signal, then departure.
    pub async fn run(&self) {
        self.start_of_day().await;

        // A zero duration means no deadline.
        let deadline = (self.duration > Duration::ZERO).then(|| Instant::now() + self.duration);
        let mut round = 0usize;
        while deadline.map_or(true, |d| Instant::now() < d) && !self.stop.load(Ordering::SeqCst) {
            round += 1;
            debug!(round, "starting round");
            self.run_round().await;
            sleep(self.round_pause).await;
        }

        self.end_of_day().await;
        info!(rounds = round, "workday over");
    }

    /// Everyone arrives, checks email, and reviews their tasks.
    async fn start_of_day(&self) {
        info!("the workday begins");
        for agent in &self.agents {
            let mut state = agent.lock().await;
            state.go_to_office();
            self.shared.directory.update(state.snapshot());
            let unread = self.shared.bus.check_email(&state.name);
            state.record_action(format!("Checked email: {} unread", unread));
            state.record_action("Reviewed today's tasks".to_string());
            info!(agent = %state.name, unread, "settled in");
        }
        sleep(Duration::from_millis(250)).await;
    }

    /// One concurrent turn per agent.
    pub async fn run_round(&self) {
        let mut set = JoinSet::new();
        for agent in &self.agents {
            let shared = self.shared.clone();
            let agent = agent.clone();
            set.spawn(async move {
                take_turn(shared, agent).await;
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Everyone wraps up and goes home.
    async fn end_of_day(&self) {
        info!("the workday ends");
        for agent in &self.agents {
            let mut state = agent.lock().await;
            state.record_action("Wrapped up for the day".to_string());
            state.go_home();
            self.shared.directory.update(state.snapshot());
        }
    }
}

/// One agent turn: catch up on notes, think, act, maybe break, jot a
/// note, and occasionally share a file. Backend failures cut the turn
/// short without touching anyone else's turn.
async fn take_turn(shared: Arc<Shared>, agent: Arc<Mutex<AgentState>>) {
    let mut state = agent.lock().await;
    let now = Instant::now();
    state.tick(now);

    for note in shared.directory.drain_notes(&state.name) {
        state.record_action(note);
    }
    shared.directory.update(state.snapshot());

    if state.on_break() {
        debug!(agent = %state.name, "still on break");
        return;
    }

    let context = persona_context(&state);

    // Think. The reflection itself enters the thought log; the summary
    // is an observable event only. Without a thought there is nothing
    // to act upon this turn.
    let thought = match shared.backend.generate(&context, THINK_PROMPT).await {
        Ok(t) => t,
        Err(e) => {
            warn!(agent = %state.name, error = %e, "think call failed");
            state.record_action("Nothing to act upon".to_string());
            shared.directory.update(state.snapshot());
            return;
        }
    };
    match shared
        .backend
        .generate(&context, &format!("{}\n\n{}", SUMMARY_PROMPT, thought))
        .await
    {
        Ok(summary) => info!(agent = %state.name, %summary, "thought summarized"),
        Err(e) => warn!(agent = %state.name, error = %e, "summary call failed"),
    }
    state.record_thought(thought);
    // Acting is conditioned on the freshly recorded thought.
    let context = persona_context(&state);

    // Act.
    let hint = match shared.backend.classify_channel(&context).await {
        Ok(c) => c,
        Err(e) => {
            warn!(agent = %state.name, error = %e, "channel classification failed");
            return;
        }
    };
    let colleagues: Vec<String> = shared
        .directory
        .names()
        .into_iter()
        .filter(|n| *n != state.name)
        .collect();
    let act_user = act_prompt(&state, hint, &colleagues);
    let action_text = match shared.backend.generate(&context, &act_user).await {
        Ok(t) => t,
        Err(e) => {
            warn!(agent = %state.name, error = %e, "act call failed");
            return;
        }
    };
    if let Ok(evaluation) = shared
        .backend
        .generate(&context, &format!("{}\n\n{}", EVALUATE_PROMPT, action_text))
        .await
    {
        debug!(agent = %state.name, %evaluation, "action evaluated");
    }
    state.record_action(action_text.clone());

    execute_action(&shared, &mut state, &context, &action_text, hint).await;

    // Break.
    if state.should_take_break(shared.break_every) {
        let pause = {
            let mut rng = rand::thread_rng();
            state.take_break(Instant::now(), shared.break_range, &mut rng)
        };
        shared.directory.update(state.snapshot());
        if let Some(duration) = pause {
            sleep(duration).await;
            state.tick(Instant::now());
            shared.directory.update(state.snapshot());
        }
    }

    // Jot down anything worth keeping from this turn.
    match shared.backend.generate(&context, NOTE_PROMPT).await {
        Ok(note) => {
            if let Err(e) = shared.store.append_note(&note) {
                warn!(agent = %state.name, error = %e, "failed to persist note");
            }
        }
        Err(e) => warn!(agent = %state.name, error = %e, "note call failed"),
    }

    // Periodically publish a file to the shared workspace.
    if shared.share_every > 0 && state.actions().len() % shared.share_every == 0 {
        match shared.backend.generate(&context, SHARE_PROMPT).await {
            Ok(content) => {
                let file_name = format!(
                    "{}_update_{}.md",
                    state.name.to_lowercase(),
                    state.actions().len()
                );
                let outcome = shared.workspace.save_shared_file(&file_name, &content);
                info!(agent = %state.name, %file_name, %outcome, "shared a file");
            }
            Err(e) => warn!(agent = %state.name, error = %e, "share call failed"),
        }
    }

    shared.directory.update(state.snapshot());
}

/// Parse the action text, reconcile it with the channel hint, and
/// dispatch it. A channel disagreement gets exactly one fresh
/// classification; a second disagreement drops the turn.
async fn execute_action(
    shared: &Arc<Shared>,
    state: &mut AgentState,
    context: &str,
    action_text: &str,
    hint: Channel,
) {
    let action = match protocol::parse_with_hint(action_text, None) {
        Ok(a) => a,
        Err(ProtocolError::MalformedAction) => {
            warn!(agent = %state.name, text = %action_text, "malformed action, turn dropped");
            return;
        }
        Err(e) => {
            warn!(agent = %state.name, error = %e, "action rejected");
            return;
        }
    };

    let mut hint = hint;
    if protocol::check_channel(&action, hint).is_err() {
        let reclass_context = format!("{}\n\nProposed action: {}", context, action_text);
        match shared.backend.classify_channel(&reclass_context).await {
            Ok(second) => hint = second,
            Err(e) => {
                warn!(agent = %state.name, error = %e, "reclassification failed, turn dropped");
                return;
            }
        }
        if let Err(e) = protocol::check_channel(&action, hint) {
            warn!(agent = %state.name, error = %e, "channel disagreement persists, turn dropped");
            return;
        }
    }

    let capabilities = state.skills.clone();
    match shared
        .dispatcher
        .dispatch(&state.name, &capabilities, &action)
        .await
    {
        Ok(Outcome::CommandOutput(output)) => {
            state.record_action(format!("Command output: {}", output));
        }
        Ok(outcome) => debug!(agent = %state.name, ?outcome, "action dispatched"),
        Err(DispatchError::UnknownCommand(name)) => {
            warn!(agent = %state.name, command = %name, "unknown or unpermitted command");
        }
        Err(e) => warn!(agent = %state.name, error = %e, "dispatch failed"),
    }
}

const THINK_PROMPT: &str = "Consider your role, your responsibilities, and your recent \
    actions. What should you focus on next? Reply with a short plan.";

const SUMMARY_PROMPT: &str = "Summarize the following plan in one sentence.";

const EVALUATE_PROMPT: &str = "Briefly judge whether the following action moves your \
    work forward. Reply in one sentence.";

const NOTE_PROMPT: &str = "Write down one piece of important information from your \
    current work worth remembering. Reply with just that note.";

const SHARE_PROMPT: &str = "Write a short status update file for your teammates \
    describing what you are working on. Reply with just the file content.";

fn persona_context(state: &AgentState) -> String {
    let mut context = format!(
        "You are {}, a {} at a software company. Your responsibilities: {}.",
        state.name, state.role, state.responsibilities
    );
    if !state.skills.is_empty() {
        context.push_str(&format!(" Your available commands: {}.", state.skills.join(", ")));
    }
    context.push_str(&format!(
        " You are currently {} and {}.",
        match state.location() {
            crate::agent::Location::Office => "at the office",
            crate::agent::Location::Home => "at home",
        },
        if state.working() { "working" } else { "not working" }
    ));
    if let Some(thought) = state.last_thought() {
        context.push_str(&format!(" Your last thought: {}", thought));
    }
    let recent: Vec<&str> = state
        .actions()
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(String::as_str)
        .collect();
    if !recent.is_empty() {
        context.push_str(&format!(" Recent actions: {}.", recent.join("; ")));
    }
    context
}

fn act_prompt(state: &AgentState, hint: Channel, colleagues: &[String]) -> String {
    format!(
        "Pick your next workplace action. The suggested channel is '{}'. \
        Respond with exactly one action line in one of these forms:\n\
        message|<recipient>|<body>\n\
        email|<recipient>[,<recipient>...]|<subject>|<body>\n\
        command|<name>|<arg>[,<arg>...]\n\
        pass\n\
        ignore\n\
        Known colleagues: {}. Your commands: {}.",
        hint,
        colleagues.join(", "),
        state.skills.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Location;
    use crate::llm::BackendError;
    use crate::skills::{Skill, SkillError, SkillRegistry};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Backend with per-agent scripted action lines. Non-action prompts
    /// get canned filler so turn plumbing still runs.
    struct ScriptedBackend {
        actions: StdMutex<HashMap<String, VecDeque<String>>>,
        channels: StdMutex<HashMap<String, VecDeque<Channel>>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                actions: StdMutex::new(HashMap::new()),
                channels: StdMutex::new(HashMap::new()),
            }
        }

        fn script(&self, agent: &str, channel: Channel, action: &str) {
            self.actions
                .lock()
                .unwrap()
                .entry(agent.to_string())
                .or_default()
                .push_back(action.to_string());
            self.channels
                .lock()
                .unwrap()
                .entry(agent.to_string())
                .or_default()
                .push_back(channel);
        }

        fn agent_of(&self, context: &str) -> Option<String> {
            let actions = self.actions.lock().unwrap();
            actions
                .keys()
                .find(|name| context.contains(format!("You are {}", name).as_str()))
                .cloned()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn generate(&self, system: &str, user: &str) -> Result<String, BackendError> {
            if user.contains("exactly one action line") {
                if let Some(agent) = self.agent_of(system) {
                    if let Some(action) = self
                        .actions
                        .lock()
                        .unwrap()
                        .get_mut(&agent)
                        .and_then(VecDeque::pop_front)
                    {
                        return Ok(action);
                    }
                }
                return Ok("pass".to_string());
            }
            if user.contains("Summarize") {
                return Ok("Condensed plan.".to_string());
            }
            Ok("Keeping the project on track.".to_string())
        }

        async fn classify_channel(&self, context: &str) -> Result<Channel, BackendError> {
            if let Some(agent) = self.agent_of(context) {
                if let Some(channel) = self
                    .channels
                    .lock()
                    .unwrap()
                    .get_mut(&agent)
                    .and_then(VecDeque::pop_front)
                {
                    return Ok(channel);
                }
            }
            Ok(Channel::Pass)
        }
    }

    struct NotifySkill {
        calls: StdMutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Skill for NotifySkill {
        fn name(&self) -> &str {
            "notify"
        }

        fn description(&self) -> &str {
            "record notifications"
        }

        async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok("ok".to_string())
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        backend: Arc<ScriptedBackend>,
        store: Arc<RecordStore>,
        directory: Arc<Directory>,
        notify: Arc<NotifySkill>,
        _store_dir: TempDir,
        _ws_dir: TempDir,
    }

    fn fixture(agents: Vec<AgentState>) -> Fixture {
        let store_dir = TempDir::new().unwrap();
        let ws_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let workspace = Arc::new(Workspace::open(ws_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        let bus = Arc::new(ChatBus::new(directory.clone(), store.clone(), "company.com"));
        let notify = Arc::new(NotifySkill {
            calls: StdMutex::new(Vec::new()),
        });
        let mut registry = SkillRegistry::new();
        registry.register(notify.clone());
        let dispatcher = Arc::new(Dispatcher::new(bus.clone(), Arc::new(registry)));
        let backend = Arc::new(ScriptedBackend::new());

        let mut config = Config::default();
        config.duration_secs = 1;
        config.round_pause_secs = 0;
        config.break_every = 100;
        config.share_every = 1000;

        let scheduler = Scheduler::new(
            &config,
            agents,
            backend.clone(),
            bus,
            directory.clone(),
            dispatcher,
            store.clone(),
            workspace,
        );
        Fixture {
            scheduler,
            backend,
            store,
            directory,
            notify,
            _store_dir: store_dir,
            _ws_dir: ws_dir,
        }
    }

    fn office_agent(name: &str, skills: &[&str]) -> AgentState {
        let mut state = AgentState::new(
            name,
            "Software Engineer",
            "Ship features",
            skills.iter().map(|s| s.to_string()).collect(),
        );
        state.go_to_office();
        state
    }

    #[tokio::test]
    async fn test_round_routes_command_and_message() {
        let alice = office_agent("Alice", &["notify"]);
        let bob = office_agent("Bob", &[]);
        let fx = fixture(vec![alice, bob]);
        fx.directory.update(snapshot_for("Alice"));
        fx.directory.update(snapshot_for("Bob"));

        fx.backend
            .script("Alice", Channel::Command, "command|notify|Bob,hello");
        fx.backend
            .script("Bob", Channel::Message, "message|Alice|got it");

        fx.scheduler.run_round().await;

        // The command ran but left no chat record.
        assert_eq!(
            fx.notify.calls.lock().unwrap().as_slice(),
            &[vec!["Bob".to_string(), "hello".to_string()]]
        );
        let history = fx.store.chat_history(None, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, "Bob");
        assert_eq!(history[0].recipients, vec!["Alice".to_string()]);
        assert_eq!(history[0].body, "got it");
    }

    fn snapshot_for(name: &str) -> crate::agent::AgentSnapshot {
        crate::agent::AgentSnapshot {
            name: name.to_string(),
            location: Location::Office,
            working: true,
        }
    }

    #[tokio::test]
    async fn test_malformed_action_leaves_no_records() {
        let alice = office_agent("Alice", &[]);
        let fx = fixture(vec![alice]);
        fx.directory.update(snapshot_for("Alice"));

        fx.backend
            .script("Alice", Channel::Message, "thinking out loud, no keyword here");

        fx.scheduler.run_round().await;

        assert!(fx.store.chat_history(None, None).unwrap().is_empty());
        assert!(fx.store.load_emails().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_mismatch_resolved_by_reclassification() {
        let alice = office_agent("Alice", &[]);
        let bob = office_agent("Bob", &[]);
        let fx = fixture(vec![alice, bob]);
        fx.directory.update(snapshot_for("Alice"));
        fx.directory.update(snapshot_for("Bob"));

        // First classification says email, the action is a message; the
        // second classification agrees with the action.
        fx.backend
            .script("Alice", Channel::Email, "message|Bob|lunch?");
        fx.backend
            .channels
            .lock()
            .unwrap()
            .get_mut("Alice")
            .unwrap()
            .push_back(Channel::Message);
        // Bob passes this round.
        fx.backend.script("Bob", Channel::Pass, "pass");

        fx.scheduler.run_round().await;

        let history = fx.store.chat_history(None, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "lunch?");
    }

    #[tokio::test]
    async fn test_channel_mismatch_twice_drops_turn() {
        let alice = office_agent("Alice", &[]);
        let bob = office_agent("Bob", &[]);
        let fx = fixture(vec![alice, bob]);
        fx.directory.update(snapshot_for("Alice"));
        fx.directory.update(snapshot_for("Bob"));

        fx.backend
            .script("Alice", Channel::Email, "message|Bob|lunch?");
        fx.backend
            .channels
            .lock()
            .unwrap()
            .get_mut("Alice")
            .unwrap()
            .push_back(Channel::Command);
        fx.backend.script("Bob", Channel::Pass, "pass");

        fx.scheduler.run_round().await;

        assert!(fx.store.chat_history(None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thought_log_keeps_reflection_not_summary() {
        let alice = office_agent("Alice", &[]);
        let fx = fixture(vec![alice]);
        fx.directory.update(snapshot_for("Alice"));
        fx.backend.script("Alice", Channel::Pass, "pass");

        fx.scheduler.run_round().await;

        let state = fx.scheduler.agents[0].lock().await;
        assert_eq!(
            state.thoughts().to_vec(),
            vec!["Keeping the project on track.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_think_records_nothing_to_act_upon() {
        struct FailingThink;

        #[async_trait]
        impl Backend for FailingThink {
            async fn generate(&self, _system: &str, user: &str) -> Result<String, BackendError> {
                if user.contains("What should you focus on next") {
                    return Err(BackendError::EmptyReply);
                }
                Ok("pass".to_string())
            }
        }

        let store_dir = TempDir::new().unwrap();
        let ws_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(store_dir.path()).unwrap());
        let workspace = Arc::new(Workspace::open(ws_dir.path()).unwrap());
        let directory = Arc::new(Directory::new());
        let bus = Arc::new(ChatBus::new(directory.clone(), store.clone(), "company.com"));
        let dispatcher = Arc::new(Dispatcher::new(bus.clone(), Arc::new(SkillRegistry::new())));

        let mut config = Config::default();
        config.duration_secs = 1;
        config.round_pause_secs = 0;
        config.break_every = 100;
        config.share_every = 1000;

        let alice = office_agent("Alice", &[]);
        directory.update(alice.snapshot());
        let scheduler = Scheduler::new(
            &config,
            vec![alice],
            Arc::new(FailingThink),
            bus,
            directory,
            dispatcher,
            store.clone(),
            workspace,
        );

        scheduler.run_round().await;

        let state = scheduler.agents[0].lock().await;
        assert!(state.actions().iter().any(|a| a == "Nothing to act upon"));
        assert!(state.thoughts().is_empty());
        assert!(store.chat_history(None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_note_persisted_every_turn() {
        let alice = office_agent("Alice", &[]);
        let fx = fixture(vec![alice]);
        fx.directory.update(snapshot_for("Alice"));
        fx.backend.script("Alice", Channel::Pass, "pass");

        fx.scheduler.run_round().await;

        let notes = fx.store.notes().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "Keeping the project on track.");
    }

    #[tokio::test]
    async fn test_pending_notes_drain_into_actions() {
        let alice = office_agent("Alice", &[]);
        let fx = fixture(vec![alice]);
        fx.directory.update(snapshot_for("Alice"));
        fx.directory
            .push_note("Alice", "Received message from Bob: 'hi'".to_string());
        fx.backend.script("Alice", Channel::Pass, "pass");

        fx.scheduler.run_round().await;

        // The note was consumed during the turn.
        assert!(fx.directory.drain_notes("Alice").is_empty());
    }

    #[tokio::test]
    async fn test_stop_handle_ends_run() {
        let alice = office_agent("Alice", &[]);
        let fx = fixture(vec![alice]);
        let handle = fx.scheduler.stop_handle();
        handle.stop();
        assert!(handle.is_stopped());
        // With the stop flag already set, run only does the two phases.
        fx.scheduler.run().await;
        assert!(fx.directory.get("Alice").is_some());
        assert_eq!(
            fx.directory.get("Alice").unwrap().location,
            Location::Home
        );
    }
}
