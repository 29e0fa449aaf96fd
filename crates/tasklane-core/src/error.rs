use thiserror::Error;

/// Rejections raised by the window and timer stores. A rejected operation
/// never mutates state and never writes to storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task text cannot be empty")]
    EmptyTaskText,
    #[error("list title cannot be empty")]
    EmptyTitle,
    #[error("at least one list must remain")]
    LastWindow,
    #[error("timer is already running")]
    TimerRunning,
    #[error("timer has no time left")]
    TimerExpired,
    #[error("timer is not running")]
    TimerNotRunning,
    #[error("timer duration is locked while it runs")]
    TimerLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Invariant,
    Rejected,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::EmptyTaskText | StoreError::EmptyTitle => ErrorKind::Validation,
            StoreError::LastWindow => ErrorKind::Invariant,
            StoreError::TimerRunning
            | StoreError::TimerExpired
            | StoreError::TimerNotRunning
            | StoreError::TimerLocked => ErrorKind::Rejected,
        }
    }

    /// Whether the failure is surfaced through the alert collaborator.
    pub fn alerts_user(&self) -> bool {
        matches!(self, StoreError::EmptyTaskText | StoreError::LastWindow)
    }
}
