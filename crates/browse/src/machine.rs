//! Query session state machine.
//!
//! Pure transitions; timers and requests are driven by the orchestrator from the
//! returned [`Effect`]s. Every timer and response carries the sequence or generation it
//! was armed with, and a transition only fires when that tag is still current.
//!
//! | phase       | event                     | next        | effect                 |
//! |-------------|---------------------------|-------------|------------------------|
//! | any         | edit                      | Debouncing  | ArmDebounce            |
//! | Debouncing  | debounce elapsed (seq ok) | -           | StartFetch             |
//! | any         | immediate                 | -           | StartFetch             |
//! | any         | fetch started             | Fetching    | ArmOverlay (not pages) |
//! | any         | cache hit                 | Resolved    | Commit                 |
//! | Fetching    | overlay due (gen ok)      | Fetching    | ShowOverlay            |
//! | Fetching    | success (gen ok)          | Resolved    | Commit                 |
//! | Fetching    | failure (gen ok)          | Failed      | Fail                   |
//! | any         | stale tag / cancellation  | unchanged   | Discard                |

#![forbid(unsafe_code)]

use kagami_api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Debouncing { seq: u64 },
    Fetching { generation: u64, pagination_only: bool, overlay: bool },
    Resolved,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Arm the debounce timer; `cancel_in_flight` asks to supersede the running request.
    ArmDebounce { seq: u64, cancel_in_flight: bool },
    StartFetch { pagination_only: bool },
    ArmOverlay { generation: u64 },
    ShowOverlay,
    Commit,
    Fail,
    Discard,
}

#[derive(Debug)]
pub struct QueryMachine {
    phase: QueryPhase,
    seq: u64,
}

impl Default for QueryMachine {
    fn default() -> Self {
        Self { phase: QueryPhase::Idle, seq: 0 }
    }
}

impl QueryMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    /// A filter edit: (re)start the debounce window. Older timers become stale.
    pub fn edit(&mut self) -> Effect {
        let cancel_in_flight = matches!(self.phase, QueryPhase::Fetching { .. });
        self.seq += 1;
        self.phase = QueryPhase::Debouncing { seq: self.seq };
        Effect::ArmDebounce { seq: self.seq, cancel_in_flight }
    }

    pub fn debounce_elapsed(&mut self, seq: u64) -> Effect {
        match self.phase {
            QueryPhase::Debouncing { seq: cur } if cur == seq => Effect::StartFetch { pagination_only: false },
            _ => Effect::Discard,
        }
    }

    /// Bypass the debounce window (pagination, clear, retry, mount).
    pub fn immediate(&mut self, pagination_only: bool) -> Effect {
        self.seq += 1;
        Effect::StartFetch { pagination_only }
    }

    pub fn fetch_started(&mut self, generation: u64, pagination_only: bool) -> Option<Effect> {
        self.phase = QueryPhase::Fetching { generation, pagination_only, overlay: false };
        (!pagination_only).then_some(Effect::ArmOverlay { generation })
    }

    pub fn cache_hit(&mut self) -> Effect {
        self.phase = QueryPhase::Resolved;
        Effect::Commit
    }

    /// A snapshot was restored wholesale; nothing is pending.
    pub fn restored(&mut self) {
        self.seq += 1;
        self.phase = QueryPhase::Resolved;
    }

    pub fn overlay_due(&mut self, generation: u64) -> Effect {
        match &mut self.phase {
            QueryPhase::Fetching { generation: g, pagination_only: false, overlay } if *g == generation => {
                *overlay = true;
                Effect::ShowOverlay
            }
            _ => Effect::Discard,
        }
    }

    pub fn settled_ok(&mut self, generation: u64) -> Effect {
        if !self.is_fetching(generation) {
            return Effect::Discard;
        }
        self.phase = QueryPhase::Resolved;
        Effect::Commit
    }

    pub fn settled_err(&mut self, generation: u64, err: &ApiError) -> Effect {
        if err.is_cancellation() || !self.is_fetching(generation) {
            return Effect::Discard;
        }
        self.phase = QueryPhase::Failed;
        Effect::Fail
    }

    fn is_fetching(&self, generation: u64) -> bool {
        matches!(self.phase, QueryPhase::Fetching { generation: g, .. } if g == generation)
    }

    /// A non-pagination request is in flight.
    pub fn searching(&self) -> bool {
        matches!(self.phase, QueryPhase::Fetching { pagination_only: false, .. })
    }

    /// The delayed full overlay is visible.
    pub fn overlay_visible(&self) -> bool {
        matches!(self.phase, QueryPhase::Fetching { overlay: true, .. })
    }

    pub fn failed(&self) -> bool {
        self.phase == QueryPhase::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_edit_makes_earlier_timer_stale() {
        let mut m = QueryMachine::new();
        let Effect::ArmDebounce { seq: a, .. } = m.edit() else { panic!("expected debounce") };
        let Effect::ArmDebounce { seq: b, .. } = m.edit() else { panic!("expected debounce") };
        assert_eq!(m.debounce_elapsed(a), Effect::Discard);
        assert_eq!(m.debounce_elapsed(b), Effect::StartFetch { pagination_only: false });
    }

    #[test]
    fn pagination_never_shows_overlay() {
        let mut m = QueryMachine::new();
        assert_eq!(m.fetch_started(1, true), None);
        assert_eq!(m.overlay_due(1), Effect::Discard);
        assert!(!m.searching());
        assert_eq!(m.fetch_started(2, false), Some(Effect::ArmOverlay { generation: 2 }));
        assert_eq!(m.overlay_due(1), Effect::Discard);
        assert_eq!(m.overlay_due(2), Effect::ShowOverlay);
        assert!(m.overlay_visible());
    }

    #[test]
    fn stale_and_cancelled_settlements_are_discarded() {
        let mut m = QueryMachine::new();
        m.fetch_started(1, false);
        m.fetch_started(2, false);
        assert_eq!(m.settled_ok(1), Effect::Discard);
        assert_eq!(m.settled_err(2, &ApiError::Cancelled), Effect::Discard);
        assert_eq!(m.settled_err(2, &ApiError::Timeout), Effect::Fail);
        assert!(m.failed());
        assert_eq!(m.settled_ok(2), Effect::Discard);
    }

    #[test]
    fn edit_during_fetch_requests_cancel() {
        let mut m = QueryMachine::new();
        m.fetch_started(7, false);
        assert!(matches!(m.edit(), Effect::ArmDebounce { cancel_in_flight: true, .. }));
        assert!(matches!(m.edit(), Effect::ArmDebounce { cancel_in_flight: false, .. }));
    }
}
