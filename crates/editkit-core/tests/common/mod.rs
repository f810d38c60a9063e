#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use editkit_core::{
    Command, CommandContext, CommandId, CommandKind, CommandListener, CommandReflector,
    ContextConfig, EditError, ExError, ExErrorKind, ExecutionContext, ExecutionPurpose,
    ManagerResolver, ObjectHandle, ObjectManager, PersistAction, QueueFilter, Result, SaveOptions,
    Session, TransactionManager,
};

/// In-memory execution context recording everything it is asked to do
pub struct MockDatabase {
    connected: AtomicBool,
    auto_commit: Mutex<bool>,
    log: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    fail_commit: AtomicBool,
}

impl MockDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            auto_commit: Mutex::new(true),
            log: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_commit: AtomicBool::new(false),
        })
    }

    pub fn fail_script(&self, script: &str) {
        self.failing.lock().unwrap().insert(script.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn fail_commits(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn auto_commit(&self) -> bool {
        *self.auto_commit.lock().unwrap()
    }

    /// Every recorded event: sessions, scripts and transaction control
    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Scripts that executed successfully, in order
    pub fn scripts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("exec:").map(str::to_string))
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap().push(event);
    }
}

struct MockSession<'a> {
    db: &'a MockDatabase,
    title: String,
    purpose: ExecutionPurpose,
}

impl Session for MockSession<'_> {
    fn title(&self) -> &str {
        &self.title
    }

    fn purpose(&self) -> ExecutionPurpose {
        self.purpose
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        if self.db.failing.lock().unwrap().contains(script) {
            self.db.record(format!("fail:{}", script));
            return Err(ExError::new(ExErrorKind::Persistence)
                .with_message(format!("script rejected: {}", script)));
        }
        self.db.record(format!("exec:{}", script));
        Ok(())
    }
}

impl ExecutionContext for MockDatabase {
    fn context_name(&self) -> &str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn open_session(&self, purpose: ExecutionPurpose, title: &str) -> Result<Box<dyn Session + '_>> {
        self.record(format!("session:{:?}:{}", purpose, title));
        Ok(Box::new(MockSession {
            db: self,
            title: title.to_string(),
            purpose,
        }))
    }

    fn transaction_manager(&self) -> Option<&dyn TransactionManager> {
        Some(self)
    }
}

impl TransactionManager for MockDatabase {
    fn is_auto_commit(&self) -> Result<bool> {
        Ok(self.auto_commit())
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.record(format!("auto_commit:{}", auto_commit));
        *self.auto_commit.lock().unwrap() = auto_commit;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.record("commit".to_string());
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ExError::new(ExErrorKind::TransactionControl).with_message("commit refused"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.record("rollback".to_string());
        Ok(())
    }
}

/// Object manager rendering one readable script per command
#[derive(Default)]
pub struct RecordingManager {
    updated: Mutex<Vec<Command>>,
    overrides: Mutex<HashMap<ObjectHandle, Vec<PersistAction>>>,
    rejected: Mutex<HashSet<ObjectHandle>>,
    drop_reorders: AtomicBool,
}

impl RecordingManager {
    pub fn override_actions(&self, target: &ObjectHandle, actions: Vec<PersistAction>) {
        self.overrides
            .lock()
            .unwrap()
            .insert(target.clone(), actions);
    }

    pub fn reject(&self, target: &ObjectHandle) {
        self.rejected.lock().unwrap().insert(target.clone());
    }

    pub fn drop_reorders(&self) {
        self.drop_reorders.store(true, Ordering::SeqCst);
    }

    pub fn updated(&self) -> Vec<Command> {
        self.updated.lock().unwrap().clone()
    }
}

impl ObjectManager for RecordingManager {
    fn persist_actions(&self, command: &Command, _options: &SaveOptions) -> Result<Vec<PersistAction>> {
        let target = command.target();
        if let Some(actions) = self.overrides.lock().unwrap().get(target) {
            return Ok(actions.clone());
        }
        let script = match command.kind() {
            CommandKind::Create { name, .. } => format!("CREATE {} {}", target, name),
            CommandKind::Delete => format!("DROP {}", target),
            CommandKind::Rename { old_name, new_name } => {
                format!("RENAME {} {} TO {}", target, old_name, new_name)
            }
            CommandKind::PropertyChange { changes } => format!(
                "ALTER {} SET {}",
                target,
                changes.keys().cloned().collect::<Vec<_>>().join(",")
            ),
            CommandKind::Reorder { new_position, .. } => format!("MOVE {} TO {}", target, new_position),
            CommandKind::Aggregate { claimed, .. } => {
                format!("CREATE {} WITH {}", target, claimed.len())
            }
            CommandKind::Script { .. } => return Ok(Vec::new()),
        };
        Ok(vec![PersistAction::script(script)])
    }

    fn validate(&self, command: &Command) -> Result<()> {
        if self.rejected.lock().unwrap().contains(command.target()) {
            return Err(EditError::Validation {
                command: command.title().to_string(),
                reason: format!("{} is read-only", command.target()),
            }
            .into());
        }
        Ok(())
    }

    fn update_model(&self, command: &Command) -> Result<()> {
        self.updated.lock().unwrap().push(command.clone());
        Ok(())
    }

    fn filter_commands(&self, queue: &mut QueueFilter<'_>) {
        if self.drop_reorders.load(Ordering::SeqCst) {
            queue.retain(|c| !matches!(c.kind(), CommandKind::Reorder { .. }));
        }
    }
}

/// Reflector recording redo/undo calls as `redo:<id>` / `undo:<id>`
#[derive(Default)]
pub struct RecordingReflector {
    calls: Mutex<Vec<(String, CommandId)>>,
}

impl RecordingReflector {
    pub fn calls(&self) -> Vec<(String, CommandId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn redone(&self) -> Vec<CommandId> {
        self.filtered("redo")
    }

    pub fn undone(&self) -> Vec<CommandId> {
        self.filtered("undo")
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn filtered(&self, op: &str) -> Vec<CommandId> {
        self.calls()
            .into_iter()
            .filter(|(o, _)| o == op)
            .map(|(_, id)| id)
            .collect()
    }
}

impl CommandReflector for RecordingReflector {
    fn redo(&self, command: &Command) {
        self.calls
            .lock()
            .unwrap()
            .push(("redo".to_string(), command.id()));
    }

    fn undo(&self, command: &Command) {
        self.calls
            .lock()
            .unwrap()
            .push(("undo".to_string(), command.id()));
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub changes: AtomicUsize,
    pub saves: AtomicUsize,
    pub resets: AtomicUsize,
}

impl CommandListener for RecordingListener {
    fn on_command_change(&self, _command: &Command) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_save(&self) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Context wired to a mock database and one manager for tables and columns
pub struct Harness {
    pub context: CommandContext,
    pub db: Arc<MockDatabase>,
    pub manager: Arc<RecordingManager>,
    pub reflector: Arc<RecordingReflector>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    pub fn atomic() -> Self {
        Self::with_config(ContextConfig::atomic())
    }

    pub fn with_config(config: ContextConfig) -> Self {
        let db = MockDatabase::new();
        let manager = Arc::new(RecordingManager::default());
        let resolved = manager.clone();
        let resolver: Arc<dyn ManagerResolver> =
            Arc::new(move |target: &ObjectHandle| -> Option<Arc<dyn ObjectManager>> {
                match target.kind() {
                    "table" | "column" => Some(resolved.clone() as Arc<dyn ObjectManager>),
                    _ => None,
                }
            });
        let context = CommandContext::new(db.clone(), resolver, config);
        Self {
            context,
            db,
            manager,
            reflector: Arc::new(RecordingReflector::default()),
        }
    }

    pub fn reflector(&self) -> Option<Arc<dyn CommandReflector>> {
        Some(self.reflector.clone() as Arc<dyn CommandReflector>)
    }

    /// Add with the shared reflector and `execute = true`
    pub fn add(&self, command: Command) -> CommandId {
        let id = command.id();
        self.context.add_command(command, self.reflector(), true);
        id
    }
}

pub fn table(id: u64) -> ObjectHandle {
    ObjectHandle::new("table", id)
}

pub fn column(id: u64) -> ObjectHandle {
    ObjectHandle::new("column", id)
}
