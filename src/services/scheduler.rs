use crate::models::SessionBounds;

/// Polling gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Paused,
    Active,
}

/// What a call to [`SessionScheduler::tick`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Paused -> Active: the caller should seed one fetch task per instrument.
    Resumed,
    /// Active -> Paused: stop submitting new tasks.
    Paused,
}

/// Two-state machine gating when live polling runs.
///
/// Polling resumes `resume_wait` seconds before each session open and pauses
/// `pause_wait` seconds after each close. Evaluation is idempotent: ticking
/// in the same state with the same clock is a no-op.
pub struct SessionScheduler {
    resume_wait: f64,
    pause_wait: f64,
    state: SessionState,
}

impl SessionScheduler {
    pub fn new(resume_wait: f64, pause_wait: f64) -> Self {
        SessionScheduler { resume_wait, pause_wait, state: SessionState::Paused }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Evaluate the gate against wall-clock time `now` (epoch seconds) and
    /// the session bounds for the current trading day.
    pub fn tick(&mut self, now: f64, bounds: &SessionBounds) -> Option<Transition> {
        match self.state {
            SessionState::Paused => {
                let in_am = now >= bounds.am_open - self.resume_wait && now < bounds.am_close;
                let in_pm = now >= bounds.pm_open - self.resume_wait && now < bounds.pm_close;
                if in_am || in_pm {
                    self.state = SessionState::Active;
                    Some(Transition::Resumed)
                } else {
                    None
                }
            }
            SessionState::Active => {
                let lunch = now >= bounds.am_close + self.pause_wait
                    && now < bounds.pm_open - self.resume_wait;
                let after_close = now >= bounds.pm_close + self.pause_wait;
                if lunch || after_close {
                    self.state = SessionState::Paused;
                    Some(Transition::Paused)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Session bounds on an arbitrary day: 09:30/12:00/13:00/16:00 expressed
    // as seconds from midnight; the machine only compares offsets.
    fn bounds() -> SessionBounds {
        SessionBounds {
            am_open: 34200.0,
            am_close: 43200.0,
            pm_open: 46800.0,
            pm_close: 57600.0,
        }
    }

    #[test]
    fn test_resume_lead_time() {
        let b = bounds();
        let mut s = SessionScheduler::new(300.0, 300.0);
        // 09:24:59 with resume_wait 300s: still paused
        assert_eq!(s.tick(b.am_open - 301.0, &b), None);
        assert_eq!(s.state(), SessionState::Paused);
        // 09:25:01: active
        assert_eq!(s.tick(b.am_open - 299.0, &b), Some(Transition::Resumed));
        assert_eq!(s.state(), SessionState::Active);
    }

    #[test]
    fn test_idempotent_in_same_window() {
        let b = bounds();
        let mut s = SessionScheduler::new(300.0, 300.0);
        assert_eq!(s.tick(b.am_open, &b), Some(Transition::Resumed));
        // Re-evaluating mid-window changes nothing
        assert_eq!(s.tick(b.am_open + 60.0, &b), None);
        assert_eq!(s.tick(b.am_open + 120.0, &b), None);
        assert_eq!(s.state(), SessionState::Active);
    }

    #[test]
    fn test_lunch_pause_and_pm_resume() {
        let b = bounds();
        let mut s = SessionScheduler::new(300.0, 300.0);
        s.tick(b.am_open, &b);
        // Just after the AM close: still inside pause_wait lag
        assert_eq!(s.tick(b.am_close + 299.0, &b), None);
        assert_eq!(s.tick(b.am_close + 300.0, &b), Some(Transition::Paused));
        // PM resume lead
        assert_eq!(s.tick(b.pm_open - 300.0, &b), Some(Transition::Resumed));
    }

    #[test]
    fn test_final_close() {
        let b = bounds();
        let mut s = SessionScheduler::new(300.0, 300.0);
        s.tick(b.pm_open, &b);
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.tick(b.pm_close + 299.0, &b), None);
        assert_eq!(s.tick(b.pm_close + 300.0, &b), Some(Transition::Paused));
        // Stays paused overnight
        assert_eq!(s.tick(b.pm_close + 10_000.0, &b), None);
    }

    #[test]
    fn test_no_transition_during_lunch_hold() {
        let b = bounds();
        let mut s = SessionScheduler::new(300.0, 300.0);
        s.tick(b.am_open, &b);
        // Inside the lunch gap but before pause_wait has elapsed the state holds
        assert_eq!(s.tick(b.am_close + 100.0, &b), None);
        assert_eq!(s.state(), SessionState::Active);
    }
}
