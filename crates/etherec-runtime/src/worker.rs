//! Worker lifecycle
//!
//! A worker is an OS thread with a label, a registry entry and a hook set.
//! The spawn sequence: `pre_create` in the parent, OS spawn, thread-local
//! context + registry binding, logger readiness barrier, `init` hook, main
//! function, terminal state + `exit` hook, `post_create` back in the
//! parent. Workers with a message processor get the standard pump loop as
//! their body instead of a hand-written main.

use crate::logctx::{self, LogCtx};
use crate::registry::CleanupHook;
use crate::runtime::Runtime;
use crate::{rec_debug, rec_error, rec_info, rec_warn};
use etherec_core::error::{RuntimeError, RuntimeResult};
use etherec_core::message::Message;
use etherec_core::state::WorkerState;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long a worker's init waits for the Logger to start draining
const LOGGER_READY_TIMEOUT_MS: u64 = 5000;

/// Terminal status a worker main reports as its exit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    Error,
    InitFailed,
    Unauthorized,
    Shutdown,
    Timeout,
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerExit::Success => "Success",
            WorkerExit::Error => "Error",
            WorkerExit::InitFailed => "InitFailed",
            WorkerExit::Unauthorized => "Unauthorized",
            WorkerExit::Shutdown => "Shutdown",
            WorkerExit::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// Worker main function
pub type MainFn = Arc<dyn Fn(&WorkerContext) -> WorkerExit + Send + Sync>;

/// Lifecycle hook
pub type HookFn = Arc<dyn Fn(&WorkerContext) -> RuntimeResult<()> + Send + Sync>;

/// Per-message callback for pump workers
pub type MsgProcessor = Arc<dyn Fn(&WorkerContext, &Message) -> RuntimeResult<()> + Send + Sync>;

/// The explicit no-op hook
pub fn noop_hook() -> HookFn {
    Arc::new(|_| Ok(()))
}

/// Lifecycle capability set; absent hooks are explicit no-ops, not nils
#[derive(Clone)]
pub struct WorkerHooks {
    /// Runs in the parent before the OS thread exists
    pub pre_create: HookFn,
    /// Runs in the parent after a successful spawn
    pub post_create: HookFn,
    /// Runs on the worker thread after the logger readiness barrier
    pub init: HookFn,
    /// Runs on the worker thread after the main function returns
    pub exit: HookFn,
}

impl Default for WorkerHooks {
    fn default() -> Self {
        Self {
            pre_create: noop_hook(),
            post_create: noop_hook(),
            init: noop_hook(),
            exit: noop_hook(),
        }
    }
}

/// What a worker body sees: its own label and the shared runtime
#[derive(Clone)]
pub struct WorkerContext {
    label: String,
    runtime: Arc<Runtime>,
}

impl WorkerContext {
    pub fn new(label: &str, runtime: Arc<Runtime>) -> Self {
        Self {
            label: label.to_string(),
            runtime,
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Cooperative cancellation check; every outer loop polls this
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.runtime.shutdown().is_signalled()
    }

    /// Bounded idle wait that wakes early on shutdown
    #[inline]
    pub fn wait_shutdown(&self, timeout_ms: u64) -> bool {
        self.runtime.shutdown().wait(timeout_ms)
    }

    /// Pop from this worker's own inbox (owner-enforced)
    pub fn pop(&self, timeout_ms: u64) -> RuntimeResult<Message> {
        self.runtime.registry().pop_message(&self.label, timeout_ms)
    }

    /// Push into another worker's inbox
    pub fn push_to(&self, label: &str, msg: &Message, timeout_ms: u64) -> RuntimeResult<()> {
        self.runtime.registry().push_message(label, msg, timeout_ms)
    }

    /// Apply a lifecycle transition to this worker's own entry
    pub fn set_state(&self, state: WorkerState) -> RuntimeResult<()> {
        self.runtime.registry().update_state(&self.label, state)
    }
}

/// Everything needed to create one worker
#[derive(Clone)]
pub struct WorkerDescriptor {
    label: String,
    main: MainFn,
    hooks: WorkerHooks,
    /// When present, the standard pump loop is the worker body and `main`
    /// is not called
    msg_processor: Option<MsgProcessor>,
    batch_size: usize,
    poll_interval_ms: u64,
    inbox_size: Option<usize>,
    waits_for_logger: bool,
    logger_wait_ms: u64,
    auto_cleanup: bool,
}

impl WorkerDescriptor {
    /// Worker with a hand-written main function
    pub fn new(label: &str, main: MainFn) -> Self {
        Self {
            label: label.to_string(),
            main,
            hooks: WorkerHooks::default(),
            msg_processor: None,
            batch_size: 8,
            poll_interval_ms: 100,
            inbox_size: None,
            waits_for_logger: true,
            logger_wait_ms: LOGGER_READY_TIMEOUT_MS,
            auto_cleanup: true,
        }
    }

    /// Worker whose body is the standard pump over its own inbox
    pub fn message_pump(label: &str, processor: MsgProcessor) -> Self {
        let mut desc = Self::new(label, Arc::new(|_: &WorkerContext| WorkerExit::Success));
        desc.msg_processor = Some(processor);
        desc.inbox_size = Some(etherec_core::constants::DEFAULT_INBOX_SIZE);
        desc
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_hooks(mut self, hooks: WorkerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_init(mut self, hook: HookFn) -> Self {
        self.hooks.init = hook;
        self
    }

    pub fn with_exit(mut self, hook: HookFn) -> Self {
        self.hooks.exit = hook;
        self
    }

    pub fn with_pre_create(mut self, hook: HookFn) -> Self {
        self.hooks.pre_create = hook;
        self
    }

    pub fn with_post_create(mut self, hook: HookFn) -> Self {
        self.hooks.post_create = hook;
        self
    }

    /// Give the worker an inbox of `max_size` slots
    pub fn with_inbox(mut self, max_size: usize) -> Self {
        self.inbox_size = Some(max_size);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Skip the logger readiness barrier (the Logger itself)
    pub fn no_logger_wait(mut self) -> Self {
        self.waits_for_logger = false;
        self
    }

    pub fn logger_wait_ms(mut self, ms: u64) -> Self {
        self.logger_wait_ms = ms;
        self
    }

    pub fn auto_cleanup(mut self, yes: bool) -> Self {
        self.auto_cleanup = yes;
        self
    }
}

/// Spawn one worker through the full lifecycle sequence
pub fn spawn_worker(runtime: &Arc<Runtime>, desc: WorkerDescriptor) -> RuntimeResult<()> {
    let label = desc.label.clone();
    let parent_ctx = WorkerContext::new(&label, Arc::clone(runtime));

    (desc.hooks.pre_create)(&parent_ctx)?;

    // Weak handle: registry entries must not keep the runtime alive
    let cleanup_hook: CleanupHook = {
        let weak = Arc::downgrade(runtime);
        let exit = desc.hooks.exit.clone();
        let label = label.clone();
        Arc::new(move || {
            if let Some(rt) = weak.upgrade() {
                let ctx = WorkerContext::new(&label, rt);
                let _ = exit(&ctx);
            }
        })
    };

    runtime
        .registry()
        .register(&label, desc.auto_cleanup, Some(cleanup_hook))?;
    if let Some(size) = desc.inbox_size {
        runtime.registry().init_queue_sized(&label, size)?;
    }

    let rt = Arc::clone(runtime);
    let thread_desc = desc.clone();
    let handle = match thread::Builder::new()
        .name(label.clone())
        .spawn(move || worker_entry(rt, thread_desc))
    {
        Ok(h) => h,
        Err(_) => {
            let _ = runtime.registry().deregister(&label);
            return Err(RuntimeError::CreationFailed);
        }
    };
    runtime.registry().set_join_handle(&label, handle)?;

    (desc.hooks.post_create)(&parent_ctx)?;
    Ok(())
}

/// Spawn a worker table, skipping suppressed labels entirely
pub fn start_workers(
    runtime: &Arc<Runtime>,
    descriptors: Vec<WorkerDescriptor>,
    suppressed: &[String],
) -> RuntimeResult<()> {
    for desc in descriptors {
        if suppressed.iter().any(|s| s == desc.label()) {
            rec_info!("worker {} suppressed by config", desc.label());
            continue;
        }
        spawn_worker(runtime, desc)?;
    }
    Ok(())
}

/// Thread entry: context, barrier, init, main, terminal bookkeeping
fn worker_entry(runtime: Arc<Runtime>, desc: WorkerDescriptor) -> WorkerExit {
    let label = desc.label.clone();
    logctx::install(LogCtx {
        label: label.clone(),
        queue: runtime.log_queue(),
        level: runtime.level_handle(),
    });
    let _ = runtime.registry().bind_current_thread(&label);

    let ctx = WorkerContext::new(&label, Arc::clone(&runtime));
    let exit = run_body(&ctx, &desc);

    match exit {
        WorkerExit::Success | WorkerExit::Shutdown => {
            // Main may already have moved the entry to Stopping itself
            let _ = ctx.set_state(WorkerState::Stopping);
            if ctx.set_state(WorkerState::Terminated).is_err() {
                let _ = ctx.set_state(WorkerState::Failed);
            }
        }
        WorkerExit::InitFailed
        | WorkerExit::Error
        | WorkerExit::Unauthorized
        | WorkerExit::Timeout => {
            let _ = ctx.set_state(WorkerState::Failed);
        }
    }

    if let Err(e) = (desc.hooks.exit)(&ctx) {
        rec_warn!("exit hook failed: {}", e);
    }
    rec_debug!("worker {} exiting with {}", label, exit);
    logctx::clear();
    exit
}

fn run_body(ctx: &WorkerContext, desc: &WorkerDescriptor) -> WorkerExit {
    if desc.waits_for_logger
        && !ctx
            .runtime()
            .logger_ready()
            .wait(Some(Duration::from_millis(desc.logger_wait_ms)))
    {
        rec_error!("worker {} gave up waiting for the logger", ctx.label());
        return WorkerExit::InitFailed;
    }

    if let Err(e) = (desc.hooks.init)(ctx) {
        rec_error!("worker {} init failed: {}", ctx.label(), e);
        return WorkerExit::InitFailed;
    }

    if ctx.set_state(WorkerState::Running).is_err() {
        return WorkerExit::Error;
    }

    match &desc.msg_processor {
        Some(processor) => message_pump(ctx, processor, desc.batch_size, desc.poll_interval_ms),
        None => (desc.main)(ctx),
    }
}

/// Standard body for pump workers: pop up to `batch_size` messages, process
/// each, idle on the pop timeout, poll shutdown every outer iteration
fn message_pump(
    ctx: &WorkerContext,
    processor: &MsgProcessor,
    batch_size: usize,
    poll_interval_ms: u64,
) -> WorkerExit {
    loop {
        if ctx.is_shutdown() {
            // Drain what is already queued before leaving
            while let Ok(msg) = ctx.pop(0) {
                if processor(ctx, &msg).is_err() {
                    return WorkerExit::Error;
                }
            }
            return WorkerExit::Shutdown;
        }

        for _ in 0..batch_size {
            match ctx.pop(poll_interval_ms) {
                Ok(msg) => {
                    if let Err(e) = processor(ctx, &msg) {
                        rec_error!("processor failed on {}: {}", ctx.label(), e);
                        return WorkerExit::Error;
                    }
                }
                Err(RuntimeError::QueueEmpty) => break,
                Err(RuntimeError::Unauthorized) => return WorkerExit::Unauthorized,
                Err(_) => return WorkerExit::Error,
            }
        }
    }
}
