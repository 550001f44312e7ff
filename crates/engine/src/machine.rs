//! Form lifecycle state machine.
//!
//! The lifecycle protocol (load, idle, edit, validate, submit, save, reset)
//! is an explicit finite state machine: states are a
//! closed enum and the transition table is data. The machine is purely
//! synchronous; asynchronous work (loading, saving, submitting) happens in
//! the session layer, which reports completion back as events.
//!
//! Autosave timing lives here: entering `Idle` (and every edit while idle)
//! stamps an activity time from the injected [`Clock`], and an
//! [`LifecycleEvent::AutosaveTick`] only advances to `Saving` once the form
//! has been quiet for [`AUTOSAVE_IDLE_SECONDS`] and at least that long has
//! passed since the previous save.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// Seconds of idle time before an autosave may fire, and the minimum spacing
/// between autosaves.
pub const AUTOSAVE_IDLE_SECONDS: i64 = 10;

/// Time source for autosave decisions. Injected so tests drive simulated
/// time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`] used outside tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Symbolic lifecycle state of a form instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Fetching form metadata.
    Loading,
    /// Editable and quiet; the only state autosave can fire from.
    Idle,
    /// Applying an edit to an already-submitted record.
    Updating,
    /// Last submit attempt failed validation; errors are surfaced.
    Invalid,
    /// Transient reset state; its entry action clears the form.
    Empty,
    /// Submission request in flight.
    Submitting,
    /// Submission accepted; auto-advances to `Empty`.
    Submitted,
    /// Draft write in flight.
    Saving,
    /// A write failed; a modal with the failure notice is shown.
    Failure,
    /// Unrecoverable metadata load failure; only `Reload` escapes.
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Idle => "idle",
            Self::Updating => "updating",
            Self::Invalid => "invalid",
            Self::Empty => "empty",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Saving => "saving",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }

    /// Whether an operation is in flight and the UI must treat the form as
    /// busy.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Submitting | Self::Updating | Self::Saving
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title and content of a failure modal, supplied by the triggering event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureNotice {
    pub title: String,
    pub content: String,
}

impl FailureNotice {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Events driving the lifecycle machine.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// Metadata load finished.
    Done,
    /// Metadata load failed fatally.
    LoadFailed,
    /// Submit requested; `valid` is the result of the validity guard.
    Submit { valid: bool },
    /// Update of an existing record requested; same guard as `Submit`.
    UpdateRecord { valid: bool },
    /// Reset requested.
    Clear,
    /// Re-run loading.
    Reload,
    /// A value edit was applied (restarts the autosave countdown).
    Edited,
    /// Periodic autosave poll; `can_save` reports whether the draft payload
    /// is worth persisting.
    AutosaveTick { can_save: bool },
    /// Draft write finished.
    SaveDone,
    /// Draft write failed.
    SaveFailed(FailureNotice),
    /// Submission write finished.
    SubmitDone,
    /// Submission write failed (or was rejected).
    SubmitFailed(FailureNotice),
    /// Re-attempt submission from `Failure`.
    Retry,
    /// Return to editing from `Failure`.
    Cancel,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::LoadFailed => "load-failed",
            Self::Submit { .. } => "submit",
            Self::UpdateRecord { .. } => "update-record",
            Self::Clear => "clear",
            Self::Reload => "reload",
            Self::Edited => "edited",
            Self::AutosaveTick { .. } => "autosave-tick",
            Self::SaveDone => "save-done",
            Self::SaveFailed(_) => "save-failed",
            Self::SubmitDone => "submit-done",
            Self::SubmitFailed(_) => "submit-failed",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }
}

/// Side effects requested by state entry, executed by the session layer.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryAction {
    /// Full reset of values, draft bookkeeping and validation errors
    /// (entering `Empty`).
    ResetForm,
    /// Surface the current validation errors (entering `Invalid`).
    SurfaceValidationErrors,
    /// Show the failure modal (entering `Failure`).
    ShowFailure(FailureNotice),
}

/// A rejected event.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("event '{event}' is not valid in state '{state}'")]
pub struct TransitionRejected {
    pub state: &'static str,
    pub event: &'static str,
}

/// The result of handling an event: the states passed through (auto
/// transitions included) and the entry actions to run, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Advance {
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// Every state entered while handling the event, in order. Empty for
    /// no-op events (edits, unripe autosave ticks).
    pub entered: Vec<LifecycleState>,
    pub actions: Vec<EntryAction>,
}

impl Advance {
    fn noop(state: LifecycleState) -> Self {
        Self {
            from: state,
            to: state,
            entered: Vec::new(),
            actions: Vec::new(),
        }
    }
}

/// Row key of the transition table: the guard-resolved shape of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Done,
    LoadFailed,
    SubmitValid,
    SubmitInvalid,
    UpdateValid,
    UpdateInvalid,
    Clear,
    Reload,
    SaveDone,
    SaveFailed,
    SubmitDone,
    SubmitFailed,
    Retry,
    Cancel,
}

/// The lifecycle transition table. `Edited` and `AutosaveTick` are handled
/// by guards before table lookup; everything else is data.
const TRANSITIONS: &[(LifecycleState, Trigger, LifecycleState)] = &[
    (LifecycleState::Loading, Trigger::Done, LifecycleState::Idle),
    (LifecycleState::Loading, Trigger::LoadFailed, LifecycleState::Error),
    (LifecycleState::Idle, Trigger::SubmitValid, LifecycleState::Submitting),
    (LifecycleState::Idle, Trigger::SubmitInvalid, LifecycleState::Invalid),
    (LifecycleState::Idle, Trigger::UpdateValid, LifecycleState::Updating),
    (LifecycleState::Idle, Trigger::UpdateInvalid, LifecycleState::Invalid),
    (LifecycleState::Idle, Trigger::Clear, LifecycleState::Empty),
    (LifecycleState::Idle, Trigger::Reload, LifecycleState::Loading),
    (LifecycleState::Invalid, Trigger::SubmitValid, LifecycleState::Submitting),
    (LifecycleState::Invalid, Trigger::SubmitInvalid, LifecycleState::Invalid),
    (LifecycleState::Invalid, Trigger::UpdateValid, LifecycleState::Updating),
    (LifecycleState::Invalid, Trigger::UpdateInvalid, LifecycleState::Invalid),
    (LifecycleState::Invalid, Trigger::Clear, LifecycleState::Empty),
    (LifecycleState::Invalid, Trigger::Reload, LifecycleState::Loading),
    (LifecycleState::Submitting, Trigger::SubmitDone, LifecycleState::Submitted),
    (LifecycleState::Submitting, Trigger::SubmitFailed, LifecycleState::Failure),
    (LifecycleState::Updating, Trigger::SubmitDone, LifecycleState::Submitted),
    (LifecycleState::Updating, Trigger::SubmitFailed, LifecycleState::Failure),
    (LifecycleState::Saving, Trigger::SaveDone, LifecycleState::Idle),
    (LifecycleState::Saving, Trigger::SaveFailed, LifecycleState::Failure),
    (LifecycleState::Failure, Trigger::Retry, LifecycleState::Submitting),
    (LifecycleState::Failure, Trigger::Cancel, LifecycleState::Idle),
    (LifecycleState::Failure, Trigger::Reload, LifecycleState::Loading),
    (LifecycleState::Error, Trigger::Reload, LifecycleState::Loading),
];

/// The lifecycle state machine of one form instance.
pub struct LifecycleMachine {
    state: LifecycleState,
    clock: Arc<dyn Clock>,
    /// Last moment the form was active while idle (idle entry or edit).
    idle_activity_at: Option<DateTime<Utc>>,
    /// When the draft was last written by autosave.
    last_saved_at: Option<DateTime<Utc>>,
    /// Notice shown while in `Failure`.
    failure: Option<FailureNotice>,
}

impl LifecycleMachine {
    /// Creates a machine in `Loading` with the given time source.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: LifecycleState::Loading,
            clock,
            idle_activity_at: None,
            last_saved_at: None,
            failure: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The machine's current time, from the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The failure notice while in `Failure`, if any.
    pub fn failure(&self) -> Option<&FailureNotice> {
        self.failure.as_ref()
    }

    /// Handles an event. Guarded no-ops (edits, unripe autosave ticks)
    /// return an [`Advance`] with no entered states; unsupported events are
    /// rejected.
    pub fn handle(&mut self, event: LifecycleEvent) -> Result<Advance, TransitionRejected> {
        match &event {
            LifecycleEvent::Edited => return self.handle_edited(),
            LifecycleEvent::AutosaveTick { can_save } => {
                return self.handle_autosave_tick(*can_save)
            }
            _ => {}
        }

        let trigger = match &event {
            LifecycleEvent::Done => Trigger::Done,
            LifecycleEvent::LoadFailed => Trigger::LoadFailed,
            LifecycleEvent::Submit { valid: true } => Trigger::SubmitValid,
            LifecycleEvent::Submit { valid: false } => Trigger::SubmitInvalid,
            LifecycleEvent::UpdateRecord { valid: true } => Trigger::UpdateValid,
            LifecycleEvent::UpdateRecord { valid: false } => Trigger::UpdateInvalid,
            LifecycleEvent::Clear => Trigger::Clear,
            LifecycleEvent::Reload => Trigger::Reload,
            LifecycleEvent::SaveDone => Trigger::SaveDone,
            LifecycleEvent::SaveFailed(_) => Trigger::SaveFailed,
            LifecycleEvent::SubmitDone => Trigger::SubmitDone,
            LifecycleEvent::SubmitFailed(_) => Trigger::SubmitFailed,
            LifecycleEvent::Retry => Trigger::Retry,
            LifecycleEvent::Cancel => Trigger::Cancel,
            LifecycleEvent::Edited | LifecycleEvent::AutosaveTick { .. } => unreachable!(),
        };

        let target = TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == self.state && *t == trigger)
            .map(|(_, _, to)| *to)
            .ok_or(TransitionRejected {
                state: self.state.as_str(),
                event: event.as_str(),
            })?;

        if trigger == Trigger::SaveDone {
            self.last_saved_at = Some(self.clock.now());
        }

        let event_name = event.as_str();
        let notice = match event {
            LifecycleEvent::SaveFailed(notice) | LifecycleEvent::SubmitFailed(notice) => {
                Some(notice)
            }
            _ => None,
        };

        let from = self.state;
        let mut entered = Vec::new();
        let mut actions = Vec::new();

        self.enter(target, notice, &mut entered, &mut actions);

        // Auto transitions: submitted → empty (reset on entry) → idle.
        while let Some(next) = match self.state {
            LifecycleState::Submitted => Some(LifecycleState::Empty),
            LifecycleState::Empty => Some(LifecycleState::Idle),
            _ => None,
        } {
            self.enter(next, None, &mut entered, &mut actions);
        }

        let advance = Advance {
            from,
            to: self.state,
            entered,
            actions,
        };
        tracing::debug!(from = %advance.from, to = %advance.to, event = event_name, "lifecycle transition");
        Ok(advance)
    }

    fn handle_edited(&mut self) -> Result<Advance, TransitionRejected> {
        match self.state {
            // Edits do not leave idle, but they restart the autosave
            // countdown.
            LifecycleState::Idle => {
                self.idle_activity_at = Some(self.clock.now());
                Ok(Advance::noop(self.state))
            }
            // Corrections while invalid are allowed; validity is re-checked
            // on the next submit.
            LifecycleState::Invalid => Ok(Advance::noop(self.state)),
            _ => Err(TransitionRejected {
                state: self.state.as_str(),
                event: "edited",
            }),
        }
    }

    fn handle_autosave_tick(&mut self, can_save: bool) -> Result<Advance, TransitionRejected> {
        if self.state != LifecycleState::Idle {
            // Ticks race with user activity; outside idle they are inert.
            return Ok(Advance::noop(self.state));
        }

        if !can_save || !self.autosave_ripe() {
            return Ok(Advance::noop(self.state));
        }

        let from = self.state;
        let mut entered = Vec::new();
        let mut actions = Vec::new();
        self.enter(LifecycleState::Saving, None, &mut entered, &mut actions);

        Ok(Advance {
            from,
            to: self.state,
            entered,
            actions,
        })
    }

    /// Whether enough quiet time has passed for an autosave.
    fn autosave_ripe(&self) -> bool {
        let now = self.clock.now();
        let window = Duration::seconds(AUTOSAVE_IDLE_SECONDS);

        let idle_long_enough = self
            .idle_activity_at
            .map(|at| now - at >= window)
            .unwrap_or(false);

        let save_spacing_ok = self
            .last_saved_at
            .map(|at| now - at >= window)
            .unwrap_or(true);

        idle_long_enough && save_spacing_ok
    }

    fn enter(
        &mut self,
        state: LifecycleState,
        notice: Option<FailureNotice>,
        entered: &mut Vec<LifecycleState>,
        actions: &mut Vec<EntryAction>,
    ) {
        self.state = state;
        entered.push(state);

        match state {
            LifecycleState::Idle => {
                // Entering idle restarts the autosave countdown.
                self.idle_activity_at = Some(self.clock.now());
                self.failure = None;
            }
            LifecycleState::Empty => {
                actions.push(EntryAction::ResetForm);
            }
            LifecycleState::Invalid => {
                actions.push(EntryAction::SurfaceValidationErrors);
            }
            LifecycleState::Failure => {
                let notice = notice.unwrap_or_else(|| {
                    FailureNotice::new("Operation failed", "The request could not be completed.")
                });
                self.failure = Some(notice.clone());
                actions.push(EntryAction::ShowFailure(notice));
            }
            _ => {}
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test clock advanced manually in whole seconds.
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            let start = "2026-01-01T00:00:00Z".parse().expect("valid timestamp");
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        fn advance(&self, seconds: i64) {
            let mut now = self.now.lock().unwrap();
            *now += Duration::seconds(seconds);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn idle_machine(clock: Arc<ManualClock>) -> LifecycleMachine {
        let mut machine = LifecycleMachine::new(clock);
        machine.handle(LifecycleEvent::Done).unwrap();
        machine
    }

    #[test]
    fn test_load_done_enters_idle() {
        let mut machine = LifecycleMachine::new(ManualClock::new());
        assert_eq!(machine.state(), LifecycleState::Loading);

        let advance = machine.handle(LifecycleEvent::Done).unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);
    }

    #[test]
    fn test_load_failure_is_terminal_except_reload() {
        let mut machine = LifecycleMachine::new(ManualClock::new());
        machine.handle(LifecycleEvent::LoadFailed).unwrap();
        assert_eq!(machine.state(), LifecycleState::Error);

        assert!(machine.handle(LifecycleEvent::Submit { valid: true }).is_err());
        assert!(machine.handle(LifecycleEvent::Clear).is_err());

        let advance = machine.handle(LifecycleEvent::Reload).unwrap();
        assert_eq!(advance.to, LifecycleState::Loading);
    }

    #[test]
    fn test_invalid_submit_surfaces_errors() {
        let mut machine = idle_machine(ManualClock::new());

        let advance = machine.handle(LifecycleEvent::Submit { valid: false }).unwrap();
        assert_eq!(advance.to, LifecycleState::Invalid);
        assert_eq!(advance.actions, vec![EntryAction::SurfaceValidationErrors]);

        // Once valid, submit proceeds from invalid.
        let advance = machine.handle(LifecycleEvent::Submit { valid: true }).unwrap();
        assert_eq!(advance.to, LifecycleState::Submitting);
    }

    #[test]
    fn test_successful_submit_cascades_to_idle_with_reset() {
        let mut machine = idle_machine(ManualClock::new());
        machine.handle(LifecycleEvent::Submit { valid: true }).unwrap();

        let advance = machine.handle(LifecycleEvent::SubmitDone).unwrap();
        assert_eq!(
            advance.entered,
            vec![
                LifecycleState::Submitted,
                LifecycleState::Empty,
                LifecycleState::Idle
            ]
        );
        assert_eq!(advance.actions, vec![EntryAction::ResetForm]);
        assert_eq!(machine.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_submit_failure_shows_modal_and_supports_retry() {
        let mut machine = idle_machine(ManualClock::new());
        machine.handle(LifecycleEvent::Submit { valid: true }).unwrap();

        let notice = FailureNotice::new("Submission failed", "backend unavailable");
        let advance = machine
            .handle(LifecycleEvent::SubmitFailed(notice.clone()))
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Failure);
        assert_eq!(advance.actions, vec![EntryAction::ShowFailure(notice.clone())]);
        assert_eq!(machine.failure(), Some(&notice));

        let advance = machine.handle(LifecycleEvent::Retry).unwrap();
        assert_eq!(advance.to, LifecycleState::Submitting);
    }

    #[test]
    fn test_failure_cancel_returns_to_idle_and_clears_notice() {
        let mut machine = idle_machine(ManualClock::new());
        machine.handle(LifecycleEvent::Submit { valid: true }).unwrap();
        machine
            .handle(LifecycleEvent::SubmitFailed(FailureNotice::new("t", "c")))
            .unwrap();

        machine.handle(LifecycleEvent::Cancel).unwrap();
        assert_eq!(machine.state(), LifecycleState::Idle);
        assert!(machine.failure().is_none());
    }

    #[test]
    fn test_clear_resets_through_empty() {
        let mut machine = idle_machine(ManualClock::new());
        let advance = machine.handle(LifecycleEvent::Clear).unwrap();
        assert_eq!(
            advance.entered,
            vec![LifecycleState::Empty, LifecycleState::Idle]
        );
        assert_eq!(advance.actions, vec![EntryAction::ResetForm]);
    }

    #[test]
    fn test_autosave_waits_for_quiet_window() {
        let clock = ManualClock::new();
        let mut machine = idle_machine(clock.clone());

        // Too early.
        clock.advance(9);
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);
        assert!(advance.entered.is_empty());

        // Ripe after ten quiet seconds.
        clock.advance(1);
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Saving);
    }

    #[test]
    fn test_edit_restarts_autosave_countdown() {
        let clock = ManualClock::new();
        let mut machine = idle_machine(clock.clone());

        clock.advance(9);
        machine.handle(LifecycleEvent::Edited).unwrap();
        clock.advance(9);

        // 18s since idle entry, but only 9s since the last edit.
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);

        clock.advance(1);
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Saving);
    }

    #[test]
    fn test_autosave_requires_payload() {
        let clock = ManualClock::new();
        let mut machine = idle_machine(clock.clone());

        clock.advance(30);
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: false })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);
    }

    #[test]
    fn test_autosave_spacing_since_last_save() {
        let clock = ManualClock::new();
        let mut machine = idle_machine(clock.clone());

        clock.advance(10);
        machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(machine.state(), LifecycleState::Saving);
        machine.handle(LifecycleEvent::SaveDone).unwrap();
        assert_eq!(machine.state(), LifecycleState::Idle);

        // Idle long enough, but the previous save was only 9 seconds ago.
        clock.advance(9);
        // Re-enter ripeness by backdating idle activity: entering idle above
        // stamped now-9s, so the idle window is not yet met either; advance
        // to satisfy idle but not spacing is impossible with a single clock,
        // so assert the combined guard instead.
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);

        clock.advance(1);
        let advance = machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Saving);
    }

    #[test]
    fn test_save_failure_enters_failure() {
        let clock = ManualClock::new();
        let mut machine = idle_machine(clock.clone());
        clock.advance(10);
        machine
            .handle(LifecycleEvent::AutosaveTick { can_save: true })
            .unwrap();

        let advance = machine
            .handle(LifecycleEvent::SaveFailed(FailureNotice::new(
                "Draft save failed",
                "backend unavailable",
            )))
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Failure);
    }

    #[test]
    fn test_update_record_mirrors_submit() {
        let mut machine = idle_machine(ManualClock::new());
        let advance = machine
            .handle(LifecycleEvent::UpdateRecord { valid: true })
            .unwrap();
        assert_eq!(advance.to, LifecycleState::Updating);

        let advance = machine.handle(LifecycleEvent::SubmitDone).unwrap();
        assert_eq!(advance.to, LifecycleState::Idle);
    }

    #[test]
    fn test_busy_states() {
        assert!(LifecycleState::Loading.is_busy());
        assert!(LifecycleState::Submitting.is_busy());
        assert!(LifecycleState::Saving.is_busy());
        assert!(!LifecycleState::Idle.is_busy());
        assert!(!LifecycleState::Failure.is_busy());
    }

    #[test]
    fn test_edited_rejected_while_busy() {
        let mut machine = idle_machine(ManualClock::new());
        machine.handle(LifecycleEvent::Submit { valid: true }).unwrap();
        assert!(machine.handle(LifecycleEvent::Edited).is_err());
    }
}
