//! Worker lifecycle states and the allowed-transition table

use core::fmt;

/// Lifecycle state of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Entry registered, thread not yet through init
    Created = 0,

    /// Init completed, main function executing
    Running = 1,

    /// Paused by operator request
    Suspended = 2,

    /// Shutdown observed, winding down
    Stopping = 3,

    /// Main function returned cleanly
    Terminated = 4,

    /// Init failed, main errored, or liveness probe found the thread dead
    Failed = 5,

    /// No entry with this label exists
    Unknown = 6,
}

impl WorkerState {
    /// Check whether this state ends the lifecycle
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Terminated | WorkerState::Failed)
    }

    /// Check whether `self -> to` is in the allowed-transition table
    ///
    /// Created -> {Running, Failed}
    /// Running -> {Suspended, Stopping, Failed}
    /// Suspended -> {Running, Stopping}
    /// Stopping -> {Terminated}
    /// Terminated and Failed are sinks.
    pub const fn can_transition_to(&self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (*self, to),
            (Created, Running)
                | (Created, Failed)
                | (Running, Suspended)
                | (Running, Stopping)
                | (Running, Failed)
                | (Suspended, Running)
                | (Suspended, Stopping)
                | (Stopping, Terminated)
        )
    }
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Suspended,
            3 => WorkerState::Stopping,
            4 => WorkerState::Terminated,
            5 => WorkerState::Failed,
            _ => WorkerState::Unknown,
        }
    }
}

impl From<WorkerState> for u8 {
    fn from(state: WorkerState) -> u8 {
        state as u8
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Created => "Created",
            WorkerState::Running => "Running",
            WorkerState::Suspended => "Suspended",
            WorkerState::Stopping => "Stopping",
            WorkerState::Terminated => "Terminated",
            WorkerState::Failed => "Failed",
            WorkerState::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}
