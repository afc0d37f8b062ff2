//! Thread registry
//!
//! A named, label-addressable directory of workers: lifecycle state,
//! per-worker inbox, manual-reset completion event, group waits. One mutex
//! guards structural mutation; it is always released before blocking on an
//! inbox or a completion event.

use crate::worker::WorkerExit;
use etherec_core::constants::{DEFAULT_INBOX_SIZE, LABEL_MAX};
use etherec_core::error::{RuntimeError, RuntimeResult};
use etherec_core::event::Event;
use etherec_core::inbox::InboxQueue;
use etherec_core::message::Message;
use etherec_core::state::WorkerState;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Poll interval for group waits; entries may be auto-cleaned mid-wait, so
/// the registry polls states instead of pinning join handles
const WAIT_POLL_MS: u64 = 10;

/// Hook run during final cleanup for auto-cleanup entries whose worker
/// never reached a terminal state
pub type CleanupHook = Arc<dyn Fn() + Send + Sync>;

/// Identity of the current OS thread, comparable with a stored owner id
pub fn current_thread_id() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unsafe { libc::pthread_self() as u64 }
        } else {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            hasher.finish()
        }
    }
}

struct RegistryEntry {
    label: String,
    state: WorkerState,
    completion: Arc<Event>,
    inbox: Option<Arc<InboxQueue>>,
    auto_cleanup: bool,
    thread_id: Option<u64>,
    join: Option<JoinHandle<WorkerExit>>,
    exit_hook: Option<CleanupHook>,
}

/// Process-wide worker directory
pub struct Registry {
    inner: Mutex<Option<Vec<RegistryEntry>>>,
}

impl Registry {
    /// An uninitialized registry; call `init` before use
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Prepare the entry list (idempotent)
    pub fn init(&self) -> RuntimeResult<()> {
        let mut inner = self.inner.lock()?;
        if inner.is_none() {
            *inner = Some(Vec::new());
        }
        Ok(())
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut Vec<RegistryEntry>) -> RuntimeResult<R>,
    ) -> RuntimeResult<R> {
        let mut inner = self.inner.lock()?;
        let entries = inner.as_mut().ok_or(RuntimeError::NotInitialized)?;
        f(entries)
    }

    /// Create an entry for `label` in state Created
    pub fn register(
        &self,
        label: &str,
        auto_cleanup: bool,
        exit_hook: Option<CleanupHook>,
    ) -> RuntimeResult<()> {
        if label.is_empty() || label.len() > LABEL_MAX {
            return Err(RuntimeError::InvalidArgument("bad worker label"));
        }
        self.with_entries(|entries| {
            if entries.iter().any(|e| e.label == label) {
                return Err(RuntimeError::Duplicate);
            }
            entries.push(RegistryEntry {
                label: label.to_string(),
                state: WorkerState::Created,
                completion: Arc::new(Event::new()),
                inbox: None,
                auto_cleanup,
                thread_id: None,
                join: None,
                exit_hook,
            });
            Ok(())
        })
    }

    /// Record the calling thread as the owner of `label`'s inbox
    pub fn bind_current_thread(&self, label: &str) -> RuntimeResult<()> {
        let id = current_thread_id();
        self.with_entries(|entries| {
            let entry = find_mut(entries, label)?;
            entry.thread_id = Some(id);
            Ok(())
        })
    }

    /// Attach the join handle used by health checks
    pub fn set_join_handle(
        &self,
        label: &str,
        handle: JoinHandle<WorkerExit>,
    ) -> RuntimeResult<()> {
        self.with_entries(|entries| {
            let entry = find_mut(entries, label)?;
            entry.join = Some(handle);
            Ok(())
        })
    }

    /// Apply a state transition, setting the completion event on entry to a
    /// terminal state
    pub fn update_state(&self, label: &str, new_state: WorkerState) -> RuntimeResult<()> {
        self.with_entries(|entries| {
            let entry = find_mut(entries, label)?;
            if !entry.state.can_transition_to(new_state) {
                return Err(RuntimeError::InvalidStateTransition {
                    from: entry.state,
                    to: new_state,
                });
            }
            entry.state = new_state;
            if new_state.is_terminal() {
                entry.completion.set();
            }
            Ok(())
        })
    }

    /// Current state of `label`; Unknown when absent or uninitialized
    pub fn get_state(&self, label: &str) -> WorkerState {
        self.with_entries(|entries| {
            Ok(entries
                .iter()
                .find(|e| e.label == label)
                .map(|e| e.state)
                .unwrap_or(WorkerState::Unknown))
        })
        .unwrap_or(WorkerState::Unknown)
    }

    /// Lazily allocate the inbox for an existing entry (idempotent)
    pub fn init_queue(&self, label: &str) -> RuntimeResult<()> {
        self.init_queue_sized(label, DEFAULT_INBOX_SIZE)
    }

    /// Lazily allocate an inbox with an explicit capacity (idempotent)
    pub fn init_queue_sized(&self, label: &str, max_size: usize) -> RuntimeResult<()> {
        self.with_entries(|entries| {
            let entry = find_mut(entries, label)?;
            if entry.inbox.is_none() {
                entry.inbox = Some(Arc::new(InboxQueue::with_capacity(label, max_size)));
            }
            Ok(())
        })
    }

    /// Inbox handle for out-of-band producers (e.g. the main loop)
    pub fn queue_for(&self, label: &str) -> Option<Arc<InboxQueue>> {
        self.with_entries(|entries| {
            Ok(entries
                .iter()
                .find(|e| e.label == label)
                .and_then(|e| e.inbox.clone()))
        })
        .unwrap_or(None)
    }

    /// Push a message into `label`'s inbox
    ///
    /// The registry mutex is released before the (possibly blocking) push.
    pub fn push_message(&self, label: &str, msg: &Message, timeout_ms: u64) -> RuntimeResult<()> {
        let queue = self.with_entries(|entries| {
            let entry = find_ref(entries, label)?;
            entry
                .inbox
                .clone()
                .ok_or(RuntimeError::InvalidArgument("worker has no inbox"))
        })?;
        queue.push(msg, timeout_ms)
    }

    /// Pop the oldest message from `label`'s inbox
    ///
    /// Only the owning worker may pop: a caller whose OS thread id differs
    /// from the entry's recorded id gets `Unauthorized` and the queue is
    /// left untouched.
    pub fn pop_message(&self, label: &str, timeout_ms: u64) -> RuntimeResult<Message> {
        let caller = current_thread_id();
        let queue = self.with_entries(|entries| {
            let entry = find_ref(entries, label)?;
            if entry.thread_id != Some(caller) {
                return Err(RuntimeError::Unauthorized);
            }
            entry
                .inbox
                .clone()
                .ok_or(RuntimeError::InvalidArgument("worker has no inbox"))
        })?;
        queue.pop(timeout_ms)
    }

    /// Wait for one worker's completion event
    pub fn wait_one(&self, label: &str, timeout_ms: u64) -> RuntimeResult<()> {
        let completion = self.with_entries(|entries| {
            let entry = find_ref(entries, label)?;
            Ok(Arc::clone(&entry.completion))
        })?;
        let timeout = if timeout_ms == u64::MAX {
            None
        } else {
            Some(Duration::from_millis(timeout_ms))
        };
        if completion.wait(timeout) {
            Ok(())
        } else {
            Err(RuntimeError::Timeout)
        }
    }

    /// Wait until every registered worker reaches a terminal state
    pub fn wait_all(&self, timeout_ms: u64) -> RuntimeResult<()> {
        self.wait_group(timeout_ms, None)
    }

    /// Like `wait_all` but excluding the calling worker's own entry
    pub fn wait_others(&self, timeout_ms: u64) -> RuntimeResult<()> {
        self.wait_group(timeout_ms, Some(current_thread_id()))
    }

    fn wait_group(&self, timeout_ms: u64, exclude_thread: Option<u64>) -> RuntimeResult<()> {
        // Snapshot labels, then poll without pinning handles: entries may be
        // auto-cleaned while we wait
        let labels = self.with_entries(|entries| {
            Ok(entries
                .iter()
                .filter(|e| !e.state.is_terminal())
                .filter(|e| exclude_thread.is_none() || e.thread_id != exclude_thread)
                .map(|e| e.label.clone())
                .collect::<Vec<_>>())
        })?;

        let deadline = Instant::now().checked_add(Duration::from_millis(timeout_ms));
        loop {
            let pending = labels.iter().any(|label| {
                let state = self.get_state(label);
                !(state.is_terminal() || state == WorkerState::Unknown)
            });
            if !pending {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(RuntimeError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(WAIT_POLL_MS));
        }
    }

    /// Remove an entry; its completion event and inbox are released
    pub fn deregister(&self, label: &str) -> RuntimeResult<()> {
        self.with_entries(|entries| {
            let at = entries
                .iter()
                .position(|e| e.label == label)
                .ok_or(RuntimeError::NotFound)?;
            entries.remove(at);
            Ok(())
        })
    }

    /// Probe one worker's liveness
    ///
    /// A finished thread whose entry still says Running transitions to
    /// Failed; with `auto_cleanup` the entry is removed as well.
    pub fn check_health(&self, label: &str) -> RuntimeResult<WorkerState> {
        self.with_entries(|entries| {
            let at = entries
                .iter()
                .position(|e| e.label == label)
                .ok_or(RuntimeError::NotFound)?;
            let finished = entries[at]
                .join
                .as_ref()
                .map(|h| h.is_finished())
                .unwrap_or(false);

            if finished && entries[at].state == WorkerState::Running {
                entries[at].state = WorkerState::Failed;
                entries[at].completion.set();
                if entries[at].auto_cleanup {
                    entries.remove(at);
                }
                return Ok(WorkerState::Failed);
            }
            Ok(entries[at].state)
        })
    }

    /// Probe every registered worker
    pub fn check_all(&self) -> RuntimeResult<()> {
        let labels = self.with_entries(|entries| {
            Ok(entries.iter().map(|e| e.label.clone()).collect::<Vec<_>>())
        })?;
        for label in labels {
            match self.check_health(&label) {
                Ok(_) | Err(RuntimeError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Tear down every entry and return the registry to uninitialized
    ///
    /// Auto-cleanup entries whose worker never reached a terminal state get
    /// their exit hook invoked here.
    pub fn cleanup(&self) -> RuntimeResult<()> {
        let mut inner = self.inner.lock()?;
        let entries = match inner.take() {
            Some(entries) => entries,
            None => return Ok(()),
        };
        for entry in entries {
            if entry.auto_cleanup && !entry.state.is_terminal() {
                if let Some(hook) = &entry.exit_hook {
                    hook();
                }
            }
            // Join handles, inboxes and events are released with the entry
        }
        Ok(())
    }

    /// Labels currently registered, in registration order
    pub fn labels(&self) -> Vec<String> {
        self.with_entries(|entries| Ok(entries.iter().map(|e| e.label.clone()).collect()))
            .unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(
    entries: &'a mut [RegistryEntry],
    label: &str,
) -> RuntimeResult<&'a mut RegistryEntry> {
    entries
        .iter_mut()
        .find(|e| e.label == label)
        .ok_or(RuntimeError::NotFound)
}

fn find_ref<'a>(entries: &'a [RegistryEntry], label: &str) -> RuntimeResult<&'a RegistryEntry> {
    entries
        .iter()
        .find(|e| e.label == label)
        .ok_or(RuntimeError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherec_core::message::{Message, MsgType};
    use std::thread;

    fn ready_registry() -> Registry {
        let reg = Registry::new();
        reg.init().unwrap();
        reg
    }

    #[test]
    fn test_init_is_idempotent() {
        let reg = Registry::new();
        assert!(reg.init().is_ok());
        assert!(reg.init().is_ok());
    }

    #[test]
    fn test_register_requires_init() {
        let reg = Registry::new();
        assert_eq!(
            reg.register("A", false, None),
            Err(RuntimeError::NotInitialized)
        );
    }

    #[test]
    fn test_register_validates_labels() {
        let reg = ready_registry();
        assert!(matches!(
            reg.register("", false, None),
            Err(RuntimeError::InvalidArgument(_))
        ));
        let long = "X".repeat(LABEL_MAX + 1);
        assert!(matches!(
            reg.register(&long, false, None),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(reg.register("READER", false, None).is_ok());
        assert_eq!(
            reg.register("READER", false, None),
            Err(RuntimeError::Duplicate)
        );
    }

    #[test]
    fn test_register_deregister_register() {
        let reg = ready_registry();
        reg.register("W", false, None).unwrap();
        reg.deregister("W").unwrap();
        assert!(reg.register("W", false, None).is_ok());
        assert_eq!(reg.deregister("GONE"), Err(RuntimeError::NotFound));
    }

    #[test]
    fn test_state_walks_follow_the_table() {
        let reg = ready_registry();
        reg.register("W", false, None).unwrap();
        assert_eq!(reg.get_state("W"), WorkerState::Created);

        reg.update_state("W", WorkerState::Running).unwrap();
        reg.update_state("W", WorkerState::Suspended).unwrap();
        reg.update_state("W", WorkerState::Running).unwrap();
        reg.update_state("W", WorkerState::Stopping).unwrap();
        assert_eq!(
            reg.update_state("W", WorkerState::Running),
            Err(RuntimeError::InvalidStateTransition {
                from: WorkerState::Stopping,
                to: WorkerState::Running,
            })
        );
        reg.update_state("W", WorkerState::Terminated).unwrap();
        // Terminal is a sink
        assert!(reg.update_state("W", WorkerState::Running).is_err());
    }

    #[test]
    fn test_completion_event_set_on_terminal() {
        let reg = ready_registry();
        reg.register("W", false, None).unwrap();
        reg.update_state("W", WorkerState::Running).unwrap();
        reg.update_state("W", WorkerState::Failed).unwrap();
        // Already terminal: the wait returns immediately
        assert!(reg.wait_one("W", 10).is_ok());
    }

    #[test]
    fn test_get_state_unknown_for_absent() {
        let reg = ready_registry();
        assert_eq!(reg.get_state("NOBODY"), WorkerState::Unknown);
    }

    #[test]
    fn test_init_queue_idempotent_and_owner_pop() {
        let reg = ready_registry();
        reg.register("W", false, None).unwrap();
        reg.init_queue("W").unwrap();
        reg.init_queue("W").unwrap();
        reg.bind_current_thread("W").unwrap();

        let msg = Message::new(MsgType::Test, b"ping").unwrap();
        reg.push_message("W", &msg, 0).unwrap();
        let got = reg.pop_message("W", 0).unwrap();
        assert_eq!(got.payload(), b"ping");
    }

    #[test]
    fn test_push_without_inbox_rejected() {
        let reg = ready_registry();
        reg.register("W", false, None).unwrap();
        let msg = Message::new(MsgType::Test, b"x").unwrap();
        assert!(matches!(
            reg.push_message("W", &msg, 0),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.push_message("GONE", &msg, 0),
            Err(RuntimeError::NotFound)
        ));
    }

    #[test]
    fn test_foreign_thread_pop_is_unauthorized() {
        let reg = Arc::new(ready_registry());
        reg.register("OWNER", false, None).unwrap();
        reg.init_queue("OWNER").unwrap();
        reg.bind_current_thread("OWNER").unwrap();

        let msg = Message::new(MsgType::Test, b"secret").unwrap();
        reg.push_message("OWNER", &msg, 0).unwrap();

        let reg2 = Arc::clone(&reg);
        let foreign = thread::spawn(move || reg2.pop_message("OWNER", 0));
        assert!(matches!(
            foreign.join().unwrap(),
            Err(RuntimeError::Unauthorized)
        ));

        // The queue was not mutated by the refused pop
        assert_eq!(reg.queue_for("OWNER").unwrap().len(), 1);
        assert_eq!(reg.pop_message("OWNER", 0).unwrap().payload(), b"secret");
    }

    #[test]
    fn test_wait_all_sees_terminal_and_deregistered() {
        let reg = Arc::new(ready_registry());
        for label in ["A", "B", "C"] {
            reg.register(label, false, None).unwrap();
            reg.update_state(label, WorkerState::Running).unwrap();
        }

        let reg2 = Arc::clone(&reg);
        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            reg2.update_state("A", WorkerState::Stopping).unwrap();
            reg2.update_state("A", WorkerState::Terminated).unwrap();
            reg2.update_state("B", WorkerState::Failed).unwrap();
            // C vanishes mid-wait; wait_all treats Unknown as done
            reg2.deregister("C").unwrap();
        });

        assert!(reg.wait_all(5000).is_ok());
        finisher.join().unwrap();
    }

    #[test]
    fn test_wait_all_times_out_on_stuck_worker() {
        let reg = ready_registry();
        reg.register("STUCK", false, None).unwrap();
        reg.update_state("STUCK", WorkerState::Running).unwrap();
        assert_eq!(reg.wait_all(60), Err(RuntimeError::Timeout));
    }

    #[test]
    fn test_check_health_marks_dead_running_worker_failed() {
        let reg = Arc::new(ready_registry());
        reg.register("DOOMED", false, None).unwrap();
        reg.update_state("DOOMED", WorkerState::Running).unwrap();

        let handle = thread::spawn(|| WorkerExit::Success);
        // Let the thread finish before attaching
        thread::sleep(Duration::from_millis(20));
        reg.set_join_handle("DOOMED", handle).unwrap();

        // The thread is gone but the entry still says Running
        let state = reg.check_health("DOOMED").unwrap();
        assert_eq!(state, WorkerState::Failed);
        assert!(reg.wait_one("DOOMED", 10).is_ok());
    }

    #[test]
    fn test_check_health_auto_cleanup_deregisters() {
        let reg = ready_registry();
        reg.register("DOOMED", true, None).unwrap();
        reg.update_state("DOOMED", WorkerState::Running).unwrap();

        let handle = thread::spawn(|| WorkerExit::Error);
        thread::sleep(Duration::from_millis(20));
        reg.set_join_handle("DOOMED", handle).unwrap();

        assert_eq!(reg.check_health("DOOMED").unwrap(), WorkerState::Failed);
        assert_eq!(reg.get_state("DOOMED"), WorkerState::Unknown);
    }

    #[test]
    fn test_cleanup_runs_exit_hooks_and_resets() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let reg = ready_registry();
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = Arc::clone(&calls);
        let hook: CleanupHook = Arc::new(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        reg.register("LIVE", true, Some(hook)).unwrap();
        reg.update_state("LIVE", WorkerState::Running).unwrap();

        // Terminated workers do not get the cleanup-time hook again
        reg.register("DONE", true, None).unwrap();
        reg.update_state("DONE", WorkerState::Running).unwrap();
        reg.update_state("DONE", WorkerState::Stopping).unwrap();
        reg.update_state("DONE", WorkerState::Terminated).unwrap();

        reg.cleanup().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registry is uninitialized again
        assert_eq!(
            reg.register("AGAIN", false, None),
            Err(RuntimeError::NotInitialized)
        );
        reg.init().unwrap();
        assert!(reg.register("AGAIN", false, None).is_ok());
    }
}
