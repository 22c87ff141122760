//! Sync session state machine.
//!
//! Pure lifecycle for one session: the engine feeds it events and
//! executes the returned actions (start/stop the foreground service,
//! publish progress, save or clear the resume point, notify).

use sync_types::{ErrorReport, SyncStatus};

/// Session state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not started.
    #[default]
    Idle,
    /// Exchanging manifests.
    Preparing,
    /// Moving items.
    Transferring {
        /// Items scheduled.
        total: u32,
    },
    /// All items processed.
    Finished {
        /// Items that failed permanently.
        failed: u32,
    },
    /// Session-level error.
    Failed {
        /// What went wrong.
        error: ErrorReport,
    },
    /// Cancelled by the caller.
    Cancelled,
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session requested.
    Start,
    /// Manifests compared; `total` items will move.
    ManifestDiffed {
        /// Items scheduled.
        total: u32,
    },
    /// One item transferred.
    ItemCompleted,
    /// The plan ran out.
    Finished {
        /// Items that exhausted their budget.
        failed: u32,
    },
    /// A session-level error ended the session.
    Aborted {
        /// What went wrong.
        error: ErrorReport,
        /// Whether a resume point should be kept.
        resumable: bool,
    },
    /// Cooperative cancel observed.
    Cancelled,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Start the foreground service.
    StartService,
    /// Stop the foreground service.
    StopService,
    /// Publish the current progress.
    PublishProgress,
    /// Keep the resume point for the next session.
    SaveResumePoint,
    /// Drop any stored resume point.
    ClearResumePoint,
    /// Show the completion notification.
    NotifyCompletion,
    /// Show the error notification.
    NotifyError(ErrorReport),
}

impl SessionState {
    /// Process an event and return the new state plus actions to execute.
    ///
    /// Terminal states ignore every event.
    pub fn on_event(self, event: SessionEvent) -> (Self, Vec<SessionAction>) {
        use SessionAction as A;
        match (self, event) {
            (Self::Idle, SessionEvent::Start) => {
                (Self::Preparing, vec![A::StartService, A::PublishProgress])
            }

            (Self::Preparing, SessionEvent::ManifestDiffed { total }) => {
                (Self::Transferring { total }, vec![A::PublishProgress])
            }

            (state @ Self::Transferring { .. }, SessionEvent::ItemCompleted) => {
                (state, vec![A::PublishProgress])
            }

            (Self::Transferring { .. } | Self::Preparing, SessionEvent::Finished { failed }) => (
                Self::Finished { failed },
                vec![
                    A::ClearResumePoint,
                    A::NotifyCompletion,
                    A::StopService,
                    A::PublishProgress,
                ],
            ),

            (
                Self::Idle | Self::Preparing | Self::Transferring { .. },
                SessionEvent::Aborted { error, resumable },
            ) => {
                let mut actions = Vec::with_capacity(4);
                if resumable {
                    actions.push(A::SaveResumePoint);
                }
                actions.push(A::NotifyError(error.clone()));
                actions.push(A::StopService);
                actions.push(A::PublishProgress);
                (Self::Failed { error }, actions)
            }

            (Self::Preparing | Self::Transferring { .. }, SessionEvent::Cancelled) => (
                Self::Cancelled,
                vec![A::ClearResumePoint, A::StopService, A::PublishProgress],
            ),

            (state, _) => (state, vec![]),
        }
    }

    /// Public status for this state.
    pub fn status(&self) -> SyncStatus {
        match self {
            Self::Idle => SyncStatus::Idle,
            Self::Preparing => SyncStatus::Preparing,
            Self::Transferring { .. } => SyncStatus::Transferring,
            Self::Finished { failed: 0 } => SyncStatus::Completed,
            Self::Finished { .. } => SyncStatus::CompletedWithErrors,
            Self::Failed { .. } => SyncStatus::Failed,
            Self::Cancelled => SyncStatus::Cancelled,
        }
    }

    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::SyncErrorKind;

    fn network_error() -> ErrorReport {
        ErrorReport {
            kind: SyncErrorKind::NetworkError,
            message: "connection reset".into(),
            suggestion: None,
        }
    }

    fn run(events: Vec<SessionEvent>) -> (SessionState, Vec<SessionAction>) {
        let mut state = SessionState::default();
        let mut last = Vec::new();
        for event in events {
            let (next, actions) = state.on_event(event);
            state = next;
            last = actions;
        }
        (state, last)
    }

    // ===========================================
    // Happy path
    // ===========================================

    #[test]
    fn start_enters_preparing_and_starts_service() {
        let (state, actions) = SessionState::Idle.on_event(SessionEvent::Start);
        assert_eq!(state.status(), SyncStatus::Preparing);
        assert_eq!(
            actions,
            vec![SessionAction::StartService, SessionAction::PublishProgress]
        );
    }

    #[test]
    fn clean_run_completes() {
        let (state, actions) = run(vec![
            SessionEvent::Start,
            SessionEvent::ManifestDiffed { total: 2 },
            SessionEvent::ItemCompleted,
            SessionEvent::ItemCompleted,
            SessionEvent::Finished { failed: 0 },
        ]);
        assert_eq!(state.status(), SyncStatus::Completed);
        assert!(actions.contains(&SessionAction::ClearResumePoint));
        assert!(actions.contains(&SessionAction::NotifyCompletion));
        assert!(actions.contains(&SessionAction::StopService));
    }

    #[test]
    fn failures_complete_with_errors() {
        let (state, _) = run(vec![
            SessionEvent::Start,
            SessionEvent::ManifestDiffed { total: 2 },
            SessionEvent::Finished { failed: 1 },
        ]);
        assert_eq!(state.status(), SyncStatus::CompletedWithErrors);
    }

    #[test]
    fn empty_plan_can_finish_from_preparing() {
        let (state, _) = run(vec![
            SessionEvent::Start,
            SessionEvent::Finished { failed: 0 },
        ]);
        assert_eq!(state.status(), SyncStatus::Completed);
    }

    // ===========================================
    // Failure and cancel
    // ===========================================

    #[test]
    fn resumable_abort_saves_resume_point() {
        let (state, actions) = run(vec![
            SessionEvent::Start,
            SessionEvent::ManifestDiffed { total: 5 },
            SessionEvent::Aborted {
                error: network_error(),
                resumable: true,
            },
        ]);
        assert_eq!(state.status(), SyncStatus::Failed);
        assert_eq!(actions[0], SessionAction::SaveResumePoint);
        assert!(actions.contains(&SessionAction::NotifyError(network_error())));
    }

    #[test]
    fn non_resumable_abort_keeps_no_point() {
        let (_, actions) = run(vec![
            SessionEvent::Start,
            SessionEvent::Aborted {
                error: network_error(),
                resumable: false,
            },
        ]);
        assert!(!actions.contains(&SessionAction::SaveResumePoint));
        assert!(actions.contains(&SessionAction::StopService));
    }

    #[test]
    fn cancel_stops_service() {
        let (state, actions) = run(vec![
            SessionEvent::Start,
            SessionEvent::ManifestDiffed { total: 3 },
            SessionEvent::Cancelled,
        ]);
        assert_eq!(state.status(), SyncStatus::Cancelled);
        assert!(actions.contains(&SessionAction::StopService));
    }

    #[test]
    fn terminal_states_ignore_events() {
        let (state, _) = run(vec![
            SessionEvent::Start,
            SessionEvent::Cancelled,
            SessionEvent::ItemCompleted,
            SessionEvent::Finished { failed: 0 },
        ]);
        assert_eq!(state.status(), SyncStatus::Cancelled);
        assert!(state.is_terminal());
    }

    #[test]
    fn items_before_diff_are_ignored() {
        let (state, actions) = SessionState::Preparing.on_event(SessionEvent::ItemCompleted);
        assert_eq!(state, SessionState::Preparing);
        assert!(actions.is_empty());
    }
}
