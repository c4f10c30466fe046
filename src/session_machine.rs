use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::clock::Clock;
use crate::metrics::compute_session_metrics;
use crate::persistence::{SessionStore, StoreError, RECOVERY_KEY};
use crate::scheduler::{Scheduler, TimerKind};
use crate::session::{KeyboardLayout, UserSession};
use crate::time_series::TimeSeriesPoint;
use crate::typing_error::TypingError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Lifecycle of the current-session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Paused,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Ended => write!(f, "Ended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineSettings {
    /// Zero or negative disables auto-pause
    pub inactivity_timeout: Duration,
    pub auto_save_interval: Duration,
    pub metrics_tick: Duration,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::seconds(10),
            auto_save_interval: Duration::seconds(30),
            metrics_tick: Duration::seconds(1),
        }
    }
}

/// What lands in the crash-recovery slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub paused: bool,
    pub session: UserSession,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no live session to save")]
    NoSession,
    #[error("could not encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owner of the single current session.
///
/// All mutation goes through `&mut self` from one caller; timers are virtual
/// and only fire from [`SessionMachine::poll`].
pub struct SessionMachine<S: SessionStore, C: Clock> {
    store: S,
    clock: C,
    settings: MachineSettings,
    scheduler: Scheduler,
    state: SessionState,
    current: Option<UserSession>,
    wpm_samples: Vec<TimeSeriesPoint>,
    /// Whether the recovered session was already paused when it was saved
    interrupted_while_paused: bool,
}

impl<S: SessionStore, C: Clock> SessionMachine<S, C> {
    pub fn new(store: S, clock: C, settings: MachineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            scheduler: Scheduler::new(),
            state: SessionState::Idle,
            current: None,
            wpm_samples: Vec::new(),
            interrupted_while_paused: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == SessionState::Paused
    }

    pub fn session(&self) -> Option<&UserSession> {
        self.current.as_ref()
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// One point per metrics tick since the session started or was recovered
    pub fn wpm_samples(&self) -> &[TimeSeriesPoint] {
        &self.wpm_samples
    }

    /// True after recovering a snapshot that was taken while paused, until
    /// another session starts or this one is discarded.
    pub fn interrupted_while_paused(&self) -> bool {
        self.interrupted_while_paused
    }

    /// Takes effect from the next keystroke.
    pub fn set_inactivity_timeout(&mut self, timeout: Duration) {
        self.settings.inactivity_timeout = timeout;
        if timeout <= Duration::zero() {
            self.scheduler.cancel(TimerKind::Inactivity);
        }
    }

    /// Begin a fresh session, dropping whatever the slot held.
    pub fn start_session(
        &mut self,
        content: impl Into<String>,
        theme: impl Into<String>,
        keyboard_layout: KeyboardLayout,
    ) -> &UserSession {
        if let Some(old) = &self.current {
            if old.is_active {
                tracing::debug!("discarding session {} on restart", old.session_id);
            }
        }

        let now = self.clock.now();
        self.scheduler.cancel_all();
        self.wpm_samples.clear();
        self.interrupted_while_paused = false;

        let session = UserSession::new(content.into(), theme.into(), keyboard_layout, now);
        tracing::info!(
            "session {} started: theme={:?} layout={} chars={}",
            session.session_id,
            session.theme,
            session.keyboard_layout,
            session.content_len()
        );
        self.current = Some(session);
        self.transition(SessionState::Active);

        self.auto_save_session();
        self.arm_background_timers(now);

        self.current_ref()
    }

    /// Record the text typed so far. Ignored unless the session is active.
    pub fn update_progress(&mut self, position: usize, typed_text: impl Into<String>) {
        if self.state != SessionState::Active {
            tracing::debug!("progress update ignored in {} state", self.state);
            return;
        }
        let now = self.clock.now();
        let Some(session) = self.current.as_mut() else {
            return;
        };

        let typed_text = typed_text.into();
        let length = typed_text.chars().count();
        if position != length {
            tracing::debug!("position {position} disagrees with typed length {length}, using length");
        }
        session.user_progress.current_position = length;
        session.user_progress.typed_text = typed_text;

        self.arm_inactivity(now);
    }

    /// Append an error and bump the live error count right away.
    pub fn add_error(&mut self, error: TypingError) {
        if self.state != SessionState::Active {
            tracing::debug!("error at {} ignored in {} state", error.position, self.state);
            return;
        }
        if let Some(session) = self.current.as_mut() {
            session.user_progress.errors.push(error);
            session.metrics.error_count += 1;
        }
    }

    pub fn pause_session(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        self.scheduler.cancel(TimerKind::Inactivity);
        self.transition(SessionState::Paused);
        self.auto_save_session();
    }

    pub fn resume_session(&mut self) {
        if self.state != SessionState::Paused {
            return;
        }
        let now = self.clock.now();
        self.transition(SessionState::Active);
        self.arm_inactivity(now);
        self.auto_save_session();
    }

    /// Close the session. The finished session stays in the slot until
    /// [`SessionMachine::take_ended`] hands it over for archival.
    pub fn end_session(&mut self) -> Option<&UserSession> {
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return None;
        }
        let now = self.clock.now();
        self.scheduler.cancel_all();

        if let Some(session) = self.current.as_mut() {
            session.metrics = compute_session_metrics(
                &session.user_progress.typed_text,
                &session.content,
                &session.user_progress.errors,
                session.start_time,
                now,
            );
            session.end_time = Some(now.max(session.start_time));
            session.is_active = false;
            tracing::info!(
                "session {} ended: wpm={} accuracy={} errors={}",
                session.session_id,
                session.metrics.wpm,
                session.metrics.accuracy,
                session.metrics.error_count
            );
        }
        self.transition(SessionState::Ended);
        self.clear_snapshot();

        self.current.as_ref()
    }

    /// Move an ended session out of the slot, returning the machine to idle.
    pub fn take_ended(&mut self) -> Option<UserSession> {
        if self.state != SessionState::Ended {
            return None;
        }
        self.transition(SessionState::Idle);
        self.current.take()
    }

    /// Drop the current session without ending it, e.g. when the user
    /// declines to continue a recovered session.
    pub fn discard_session(&mut self) {
        if let Some(session) = self.current.take() {
            tracing::info!("session {} discarded", session.session_id);
        }
        self.scheduler.cancel_all();
        self.wpm_samples.clear();
        self.interrupted_while_paused = false;
        self.clear_snapshot();
        self.transition(SessionState::Idle);
    }

    /// Restore an interrupted session from the recovery slot.
    ///
    /// Only runs from idle. The restored session comes back paused; the caller
    /// resumes it once the user agrees to continue.
    pub fn recover_session(&mut self) -> Option<UserSession> {
        if self.state != SessionState::Idle {
            tracing::debug!("recovery skipped in {} state", self.state);
            return None;
        }

        let raw = match self.store.load(RECOVERY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("could not read recovery snapshot: {e}");
                return None;
            }
        };

        let snapshot = match serde_json::from_str::<RecoverySnapshot>(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("discarding corrupt recovery snapshot: {e}");
                if let Err(e) = self.store.remove(RECOVERY_KEY) {
                    tracing::warn!("could not remove corrupt snapshot: {e}");
                }
                return None;
            }
        };

        if !snapshot.session.is_active {
            return None;
        }

        let mut session = snapshot.session;
        session.user_progress.current_position = session.user_progress.typed_text.chars().count();
        tracing::info!(
            "recovered session {} saved at {} ({} of {} chars typed, {})",
            session.session_id,
            snapshot.saved_at,
            session.user_progress.current_position,
            session.content_len(),
            if snapshot.paused { "paused" } else { "active" }
        );

        let now = self.clock.now();
        self.scheduler.cancel_all();
        self.wpm_samples.clear();
        self.current = Some(session);
        self.interrupted_while_paused = snapshot.paused;
        self.transition(SessionState::Paused);
        self.arm_background_timers(now);

        self.current.clone()
    }

    /// Best-effort snapshot: failures are logged and the session carries on.
    pub fn auto_save_session(&mut self) {
        if let Err(e) = self.try_auto_save() {
            tracing::warn!("auto-save failed, session continues in memory: {e}");
        }
    }

    pub fn try_auto_save(&self) -> Result<(), SnapshotError> {
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(SnapshotError::NoSession);
        }
        let session = self.current.as_ref().ok_or(SnapshotError::NoSession)?;
        let snapshot = RecoverySnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.clock.now(),
            paused: self.state == SessionState::Paused,
            session: session.clone(),
        };
        let payload = serde_json::to_string(&snapshot)?;
        self.store.save(RECOVERY_KEY, &payload)?;
        tracing::debug!("snapshot saved ({} bytes)", payload.len());
        Ok(())
    }

    /// Wholesale recompute of the live metrics. Skipped while paused.
    pub fn update_metrics(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        let now = self.clock.now();
        if let Some(session) = self.current.as_mut() {
            session.metrics = compute_session_metrics(
                &session.user_progress.typed_text,
                &session.content,
                &session.user_progress.errors,
                session.start_time,
                now,
            );
            self.wpm_samples.push(TimeSeriesPoint::new(
                session.metrics.time_elapsed as f64,
                session.metrics.wpm as f64,
            ));
        }
    }

    /// Fire every timer that is due at the clock's current time.
    pub fn poll(&mut self) -> Vec<TimerKind> {
        let now = self.clock.now();
        let fired = self.scheduler.due(now);
        for kind in &fired {
            tracing::trace!("timer {kind:?} fired");
            match kind {
                TimerKind::MetricsTick => self.update_metrics(),
                TimerKind::Inactivity => {
                    tracing::debug!("no keystrokes for {}s, pausing", self.settings.inactivity_timeout.num_seconds());
                    self.pause_session();
                }
                TimerKind::AutoSave => self.auto_save_session(),
            }
        }
        fired
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!("session state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn arm_inactivity(&mut self, now: DateTime<Utc>) {
        if self.settings.inactivity_timeout > Duration::zero() {
            self.scheduler
                .arm_once(TimerKind::Inactivity, now, self.settings.inactivity_timeout);
        }
    }

    fn arm_background_timers(&mut self, now: DateTime<Utc>) {
        self.scheduler
            .arm_interval(TimerKind::AutoSave, now, self.settings.auto_save_interval);
        self.scheduler
            .arm_interval(TimerKind::MetricsTick, now, self.settings.metrics_tick);
    }

    fn clear_snapshot(&self) {
        if let Err(e) = self.store.remove(RECOVERY_KEY) {
            tracing::warn!("could not clear recovery snapshot: {e}");
        }
    }

    fn current_ref(&self) -> &UserSession {
        match &self.current {
            Some(session) => session,
            None => unreachable!("session slot filled just above"),
        }
    }
}
