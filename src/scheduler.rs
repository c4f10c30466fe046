use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use std::collections::HashMap;

/// The timers the session machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Recompute metrics
    MetricsTick,
    /// Auto-pause after a stretch without keystrokes
    Inactivity,
    /// Persist the crash-recovery snapshot
    AutoSave,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: DateTime<Utc>,
    period: Option<Duration>,
}

/// Virtual-time timer table.
///
/// Nothing fires on its own: the owner asks for `due(now)` and handles what
/// comes back, so tests advance time by moving a clock instead of sleeping.
/// Each kind has at most one pending timer; arming it again replaces it.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerKind, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A deadline past the end of representable time never fires, so the
    /// timer is left disarmed.
    pub fn arm_once(&mut self, kind: TimerKind, now: DateTime<Utc>, delay: Duration) {
        let Some(deadline) = now.checked_add_signed(delay) else {
            tracing::warn!("{kind:?} delay {delay} overflows, timer not armed");
            self.timers.remove(&kind);
            return;
        };
        self.timers.insert(
            kind,
            Timer {
                deadline,
                period: None,
            },
        );
    }

    /// Non-positive periods are ignored.
    pub fn arm_interval(&mut self, kind: TimerKind, now: DateTime<Utc>, period: Duration) {
        if period <= Duration::zero() {
            tracing::debug!("ignoring {kind:?} interval with non-positive period");
            return;
        }
        let Some(deadline) = now.checked_add_signed(period) else {
            tracing::warn!("{kind:?} period {period} overflows, timer not armed");
            self.timers.remove(&kind);
            return;
        };
        self.timers.insert(
            kind,
            Timer {
                deadline,
                period: Some(period),
            },
        );
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.timers.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<DateTime<Utc>> {
        self.timers.get(&kind).map(|t| t.deadline)
    }

    /// Pop every timer whose deadline is at or before `now`, earliest first.
    ///
    /// One-shot timers are removed. Interval timers fire once even if several
    /// periods were missed, then move to the first deadline after `now`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerKind> {
        let fired: Vec<(TimerKind, Timer)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .map(|(kind, timer)| (*kind, *timer))
            .sorted_by_key(|(_, timer)| timer.deadline)
            .collect();

        for (kind, timer) in &fired {
            match timer.period {
                Some(period) => match next_deadline(timer.deadline, period, now) {
                    Some(next) => {
                        if let Some(t) = self.timers.get_mut(kind) {
                            t.deadline = next;
                        }
                    }
                    None => {
                        tracing::warn!("{kind:?} interval ran past representable time, disarming");
                        self.timers.remove(kind);
                    }
                },
                None => {
                    self.timers.remove(kind);
                }
            }
        }

        fired.into_iter().map(|(kind, _)| kind).collect()
    }
}

/// First `deadline + k * period` strictly after `now`, `None` on overflow.
fn next_deadline(deadline: DateTime<Utc>, period: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut next = deadline.checked_add_signed(period)?;
    while next <= now {
        next = next.checked_add_signed(period)?;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from(std::time::UNIX_EPOCH)
    }

    #[test]
    fn one_shot_fires_once() {
        let mut s = Scheduler::new();
        s.arm_once(TimerKind::Inactivity, t0(), Duration::seconds(10));

        assert!(s.due(t0() + Duration::seconds(9)).is_empty());
        assert_eq!(s.due(t0() + Duration::seconds(10)), vec![TimerKind::Inactivity]);
        assert!(!s.is_armed(TimerKind::Inactivity));
        assert!(s.due(t0() + Duration::seconds(60)).is_empty());
    }

    #[test]
    fn rearming_replaces_deadline() {
        let mut s = Scheduler::new();
        s.arm_once(TimerKind::Inactivity, t0(), Duration::seconds(10));
        s.arm_once(TimerKind::Inactivity, t0() + Duration::seconds(8), Duration::seconds(10));

        assert!(s.due(t0() + Duration::seconds(12)).is_empty());
        assert_eq!(
            s.deadline(TimerKind::Inactivity),
            Some(t0() + Duration::seconds(18))
        );
    }

    #[test]
    fn interval_keeps_firing() {
        let mut s = Scheduler::new();
        s.arm_interval(TimerKind::AutoSave, t0(), Duration::seconds(30));

        assert_eq!(s.due(t0() + Duration::seconds(30)), vec![TimerKind::AutoSave]);
        assert_eq!(s.due(t0() + Duration::seconds(60)), vec![TimerKind::AutoSave]);
        assert!(s.is_armed(TimerKind::AutoSave));
    }

    #[test]
    fn missed_periods_collapse_into_one_firing() {
        let mut s = Scheduler::new();
        s.arm_interval(TimerKind::AutoSave, t0(), Duration::seconds(30));

        assert_eq!(s.due(t0() + Duration::seconds(125)), vec![TimerKind::AutoSave]);
        assert_eq!(
            s.deadline(TimerKind::AutoSave),
            Some(t0() + Duration::seconds(150))
        );
    }

    #[test]
    fn due_timers_come_back_in_deadline_order() {
        let mut s = Scheduler::new();
        s.arm_interval(TimerKind::AutoSave, t0(), Duration::seconds(5));
        s.arm_once(TimerKind::Inactivity, t0(), Duration::seconds(3));
        s.arm_interval(TimerKind::MetricsTick, t0(), Duration::seconds(1));

        assert_eq!(
            s.due(t0() + Duration::seconds(6)),
            vec![TimerKind::MetricsTick, TimerKind::Inactivity, TimerKind::AutoSave]
        );
    }

    #[test]
    fn cancel_and_cancel_all() {
        let mut s = Scheduler::new();
        s.arm_interval(TimerKind::AutoSave, t0(), Duration::seconds(5));
        s.arm_once(TimerKind::Inactivity, t0(), Duration::seconds(3));

        s.cancel(TimerKind::Inactivity);
        assert!(!s.is_armed(TimerKind::Inactivity));
        assert!(s.is_armed(TimerKind::AutoSave));

        s.cancel_all();
        assert!(s.due(t0() + Duration::seconds(100)).is_empty());
    }

    #[test]
    fn overflowing_delays_leave_timer_disarmed() {
        let mut s = Scheduler::new();
        s.arm_once(TimerKind::Inactivity, t0(), Duration::seconds(10));
        s.arm_once(TimerKind::Inactivity, DateTime::<Utc>::MAX_UTC, Duration::seconds(10));
        assert!(!s.is_armed(TimerKind::Inactivity));

        s.arm_interval(TimerKind::AutoSave, DateTime::<Utc>::MAX_UTC, Duration::seconds(1));
        assert!(!s.is_armed(TimerKind::AutoSave));
        assert!(s.due(DateTime::<Utc>::MAX_UTC).is_empty());
    }

    #[test]
    fn interval_near_the_end_of_time_disarms() {
        let mut s = Scheduler::new();
        let late = DateTime::<Utc>::MAX_UTC - Duration::seconds(15);
        s.arm_interval(TimerKind::AutoSave, late, Duration::seconds(10));

        assert_eq!(s.due(DateTime::<Utc>::MAX_UTC), vec![TimerKind::AutoSave]);
        assert!(!s.is_armed(TimerKind::AutoSave));
    }

    #[test]
    fn zero_period_interval_is_ignored() {
        let mut s = Scheduler::new();
        s.arm_interval(TimerKind::MetricsTick, t0(), Duration::zero());
        assert!(!s.is_armed(TimerKind::MetricsTick));
    }
}
