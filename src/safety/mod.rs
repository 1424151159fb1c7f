//! Freshness-driven safety supervisor: aggregates one or more named
//! data sources, each with its own staleness and escalation budget, and
//! drives a sticky Normal → Degraded → Emergency state machine.
//!
//! Built around a fixed-capacity source table (no heap) and the same
//! callback-on-`update` event style used by
//! [`crate::protocol::management::registry::Registry::update_claims`]
//! instead of a subscriber list.
use core::cmp::Ordering;

/// Action a consumer should take while one or more sources are stale.
/// Ordered worst-last so the supervisor can pick the most conservative
/// action across several simultaneously-stale sources with a plain max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DegradedAction {
    /// Keep using the last good value.
    HoldLast,
    /// Reduce output toward a safe level over time.
    RampDown,
    /// Disable the dependent function outright.
    Disable,
    /// Stop immediately; no safe continued operation is possible.
    Immediate,
}

/// Supervisor state. Ordering reflects severity, not a chronological
/// guarantee — `update` only ever moves Normal→Degraded→Emergency or
/// Degraded→Normal; Emergency only clears via [`SafetyPolicy::reset_to_normal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SafeState {
    Normal,
    Degraded,
    Emergency,
}

/// One freshness requirement: a named data source, how stale it may
/// get before the supervisor considers it degraded, and how long it
/// may stay degraded before the supervisor escalates to emergency.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessRequirement {
    pub name: &'static str,
    pub max_age_ms: u32,
    pub escalation_ms: u32,
    pub action: DegradedAction,
}

impl FreshnessRequirement {
    pub const fn new(
        name: &'static str,
        max_age_ms: u32,
        escalation_ms: u32,
        action: DegradedAction,
    ) -> Self {
        Self {
            name,
            max_age_ms,
            escalation_ms,
            action,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Source {
    req: FreshnessRequirement,
    age_ms: u32,
}

impl Source {
    const fn new(req: FreshnessRequirement) -> Self {
        Self { req, age_ms: 0 }
    }

    fn is_stale(&self) -> bool {
        self.age_ms > self.req.max_age_ms
    }
}

/// Supervisor-wide defaults. Individual [`FreshnessRequirement`]s always
/// carry their own `max_age_ms`/`escalation_ms`; the config only
/// supplies the action reported by [`SafetyPolicy::current_action`]
/// while no source is stale.
#[derive(Debug, Clone, Copy)]
pub struct SafetyConfig {
    default_degraded_action: DegradedAction,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            default_degraded_action: DegradedAction::HoldLast,
        }
    }
}

impl SafetyConfig {
    pub fn with_default_degraded_action(mut self, action: DegradedAction) -> Self {
        self.default_degraded_action = action;
        self
    }
}

/// Callbacks fired while [`SafetyPolicy::update`], [`SafetyPolicy::trigger_emergency`],
/// or [`SafetyPolicy::reset_to_normal`] run. All methods default to a
/// no-op so callers only implement what they need.
pub trait SafetyEvents {
    /// The overall state changed.
    fn on_state_change(&mut self, _old: SafeState, _new: SafeState) {}
    /// A source just crossed from fresh to stale.
    fn on_source_timeout(&mut self, _name: &str) {}
    /// The supervisor entered emergency, either via escalation or
    /// [`SafetyPolicy::trigger_emergency`].
    fn on_emergency(&mut self, _reason: &str) {}
}

/// No-op event sink for callers that only want the returned state.
impl SafetyEvents for () {}

/// A fixed-capacity supervisor over up to `N` named freshness
/// requirements.
pub struct SafetyPolicy<const N: usize> {
    config: SafetyConfig,
    sources: [Option<Source>; N],
    state: SafeState,
    degraded_elapsed_ms: u32,
}

impl<const N: usize> Default for SafetyPolicy<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SafetyPolicy<N> {
    pub const fn new() -> Self {
        Self::with_config(SafetyConfig {
            default_degraded_action: DegradedAction::HoldLast,
        })
    }

    pub const fn with_config(config: SafetyConfig) -> Self {
        const NONE: Option<Source> = None;
        Self {
            config,
            sources: [NONE; N],
            state: SafeState::Normal,
            degraded_elapsed_ms: 0,
        }
    }

    pub fn state(&self) -> SafeState {
        self.state
    }

    pub fn is_safe(&self) -> bool {
        self.state == SafeState::Normal
    }

    pub fn is_degraded(&self) -> bool {
        self.state == SafeState::Degraded
    }

    /// Register a freshness requirement. Returns `false` if the table
    /// is full or `name` is already registered.
    pub fn require_freshness(&mut self, req: FreshnessRequirement) -> bool {
        if self.sources.iter().flatten().any(|s| s.req.name == req.name) {
            return false;
        }
        for slot in self.sources.iter_mut() {
            if slot.is_none() {
                *slot = Some(Source::new(req));
                return true;
            }
        }
        false
    }

    /// Stamp `source` as having reported just now, clearing its age.
    pub fn report_alive(&mut self, source: &str) {
        if let Some(s) = self
            .sources
            .iter_mut()
            .flatten()
            .find(|s| s.req.name == source)
        {
            s.age_ms = 0;
        }
    }

    fn worst_stale(&self) -> Option<&Source> {
        self.sources
            .iter()
            .flatten()
            .filter(|s| s.is_stale())
            .max_by(|a, b| match a.req.action.cmp(&b.req.action) {
                Ordering::Equal => a.req.escalation_ms.cmp(&b.req.escalation_ms),
                other => other,
            })
    }

    /// The action a consumer should take right now: the default action
    /// while `Normal`, otherwise the worst action among currently-stale
    /// sources.
    pub fn current_action(&self) -> DegradedAction {
        match self.state {
            SafeState::Normal => self.config.default_degraded_action,
            _ => self
                .worst_stale()
                .map(|s| s.req.action)
                .unwrap_or(self.config.default_degraded_action),
        }
    }

    fn transition(&mut self, new: SafeState, events: &mut impl SafetyEvents) {
        if self.state != new {
            let old = self.state;
            self.state = new;
            events.on_state_change(old, new);
        }
    }

    /// Advance the supervisor's clock by `elapsed_ms`, ages every
    /// registered source, and performs at most one state transition.
    pub fn update(&mut self, elapsed_ms: u32, events: &mut impl SafetyEvents) -> SafeState {
        if self.state == SafeState::Emergency {
            for s in self.sources.iter_mut().flatten() {
                s.age_ms = s.age_ms.saturating_add(elapsed_ms);
            }
            return self.state;
        }

        let mut newly_stale: [Option<&'static str>; N] = [None; N];
        let mut newly_stale_count = 0usize;
        for s in self.sources.iter_mut().flatten() {
            let was_stale = s.is_stale();
            s.age_ms = s.age_ms.saturating_add(elapsed_ms);
            if s.is_stale() && !was_stale {
                newly_stale[newly_stale_count] = Some(s.req.name);
                newly_stale_count += 1;
            }
        }

        let any_stale = self.sources.iter().flatten().any(|s| s.is_stale());

        match (self.state, any_stale) {
            (SafeState::Normal, true) => {
                self.degraded_elapsed_ms = 0;
                self.transition(SafeState::Degraded, events);
                for name in newly_stale.iter().take(newly_stale_count).flatten() {
                    events.on_source_timeout(name);
                }
            }
            (SafeState::Degraded, true) => {
                for name in newly_stale.iter().take(newly_stale_count).flatten() {
                    events.on_source_timeout(name);
                }
                self.degraded_elapsed_ms = self.degraded_elapsed_ms.saturating_add(elapsed_ms);
                let escalation_ms = self.worst_stale().map(|s| s.req.escalation_ms);
                if let Some(escalation_ms) = escalation_ms {
                    if self.degraded_elapsed_ms >= escalation_ms {
                        self.transition(SafeState::Emergency, events);
                        events.on_emergency("freshness escalation timeout");
                    }
                }
            }
            (SafeState::Degraded, false) => {
                self.degraded_elapsed_ms = 0;
                self.transition(SafeState::Normal, events);
            }
            (SafeState::Normal, false) => {}
            (SafeState::Emergency, _) => unreachable!("handled above"),
        }

        self.state
    }

    /// Force immediate entry into emergency, e.g. on an operator
    /// override or an unrecoverable fault detected elsewhere.
    pub fn trigger_emergency(&mut self, reason: &str, events: &mut impl SafetyEvents) {
        self.transition(SafeState::Emergency, events);
        events.on_emergency(reason);
    }

    /// The only way out of `Emergency`. Also clears every source's age
    /// and the escalation timer, matching a full supervisor restart.
    pub fn reset_to_normal(&mut self, events: &mut impl SafetyEvents) {
        for s in self.sources.iter_mut().flatten() {
            s.age_ms = 0;
        }
        self.degraded_elapsed_ms = 0;
        self.transition(SafeState::Normal, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        state_changes: u32,
        last_old: Option<SafeState>,
        last_new: Option<SafeState>,
        timed_out: Option<&'static str>,
        emergency_reason: Option<&'static str>,
    }

    impl SafetyEvents for Recorder {
        fn on_state_change(&mut self, old: SafeState, new: SafeState) {
            self.state_changes += 1;
            self.last_old = Some(old);
            self.last_new = Some(new);
        }
        fn on_source_timeout(&mut self, name: &str) {
            self.timed_out = Some(match name {
                "heartbeat" => "heartbeat",
                "command" => "command",
                "speed" => "speed",
                "src" => "src",
                _ => "other",
            });
        }
        fn on_emergency(&mut self, reason: &str) {
            self.emergency_reason = Some(match reason {
                "sensor failure" => "sensor failure",
                "operator override" => "operator override",
                "critical fault" => "critical fault",
                _ => "freshness escalation timeout",
            });
        }
    }

    #[test]
    fn default_configuration_is_normal_and_safe() {
        let policy: SafetyPolicy<4> = SafetyPolicy::new();
        assert_eq!(policy.state(), SafeState::Normal);
        assert!(policy.is_safe());
        assert!(!policy.is_degraded());
    }

    #[test]
    fn stays_normal_while_source_reports_within_timeout() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            500,
            2000,
            DegradedAction::HoldLast,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("heartbeat");
        for _ in 0..3 {
            policy.update(100, &mut ev);
            assert!(policy.is_safe());
        }
    }

    #[test]
    fn transitions_to_degraded_when_source_is_stale() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            500,
            2000,
            DegradedAction::HoldLast,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("heartbeat");
        policy.update(600, &mut ev);
        assert!(policy.is_degraded());
        assert!(!policy.is_safe());
    }

    #[test]
    fn never_seen_source_is_stale_immediately() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            500,
            2000,
            DegradedAction::HoldLast,
        ));
        let mut ev = Recorder::default();
        policy.update(600, &mut ev);
        assert!(policy.is_degraded());
    }

    #[test]
    fn escalates_to_emergency_after_escalation_timeout() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "command",
            200,
            1000,
            DegradedAction::Immediate,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("command");
        policy.update(300, &mut ev);
        assert!(policy.is_degraded());
        policy.update(500, &mut ev);
        assert!(policy.is_degraded());
        policy.update(600, &mut ev);
        assert_eq!(policy.state(), SafeState::Emergency);
    }

    #[test]
    fn recovers_from_degraded_if_source_comes_back() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "command",
            200,
            1000,
            DegradedAction::Immediate,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("command");
        policy.update(300, &mut ev);
        assert!(policy.is_degraded());
        policy.report_alive("command");
        policy.update(10, &mut ev);
        assert!(policy.is_safe());
    }

    #[test]
    fn recovery_requires_all_sources_fresh() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            500,
            2000,
            DegradedAction::HoldLast,
        ));
        policy.require_freshness(FreshnessRequirement::new(
            "speed",
            300,
            1500,
            DegradedAction::RampDown,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("heartbeat");
        policy.report_alive("speed");
        policy.update(400, &mut ev);
        assert!(policy.is_degraded());
        policy.report_alive("speed");
        policy.update(10, &mut ev);
        assert!(policy.is_safe());
    }

    #[test]
    fn trigger_emergency_from_normal_and_degraded() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        let mut ev = Recorder::default();
        policy.trigger_emergency("sensor failure", &mut ev);
        assert_eq!(policy.state(), SafeState::Emergency);
        assert_eq!(ev.emergency_reason, Some("sensor failure"));
    }

    #[test]
    fn reset_to_normal_clears_emergency_and_source_ages() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "src",
            100,
            500,
            DegradedAction::HoldLast,
        ));
        let mut ev = Recorder::default();
        policy.update(200, &mut ev);
        assert!(policy.is_degraded());
        policy.reset_to_normal(&mut ev);
        assert!(policy.is_safe());
        policy.update(50, &mut ev);
        assert!(policy.is_safe());
    }

    #[test]
    fn emergency_is_sticky_until_explicit_reset() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "src",
            100,
            500,
            DegradedAction::HoldLast,
        ));
        let mut ev = Recorder::default();
        policy.update(200, &mut ev);
        policy.update(600, &mut ev);
        assert_eq!(policy.state(), SafeState::Emergency);

        policy.report_alive("src");
        policy.update(10, &mut ev);
        assert_eq!(policy.state(), SafeState::Emergency);

        policy.reset_to_normal(&mut ev);
        assert!(policy.is_safe());
    }

    #[test]
    fn current_action_returns_worst_among_stale_sources() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "sensor_a",
            200,
            1000,
            DegradedAction::HoldLast,
        ));
        policy.require_freshness(FreshnessRequirement::new(
            "sensor_b",
            300,
            1000,
            DegradedAction::Disable,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("sensor_a");
        policy.report_alive("sensor_b");
        policy.update(100, &mut ev);
        assert_eq!(policy.current_action(), DegradedAction::HoldLast);

        policy.update(400, &mut ev);
        assert!(policy.is_degraded());
        assert_eq!(policy.current_action(), DegradedAction::Disable);
    }

    #[test]
    fn current_action_returns_specific_source_when_only_one_stale() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "sensor_a",
            200,
            1000,
            DegradedAction::HoldLast,
        ));
        policy.require_freshness(FreshnessRequirement::new(
            "sensor_b",
            300,
            1000,
            DegradedAction::Disable,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("sensor_a");
        policy.report_alive("sensor_b");
        policy.update(250, &mut ev);
        assert!(policy.is_degraded());
        assert_eq!(policy.current_action(), DegradedAction::HoldLast);
    }

    #[test]
    fn state_change_event_fires_on_degradation() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            200,
            1000,
            DegradedAction::Immediate,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("heartbeat");
        policy.update(300, &mut ev);
        assert_eq!(ev.state_changes, 1);
        assert_eq!(ev.last_old, Some(SafeState::Normal));
        assert_eq!(ev.last_new, Some(SafeState::Degraded));
    }

    #[test]
    fn source_timeout_event_names_the_stale_source() {
        let mut policy: SafetyPolicy<4> = SafetyPolicy::new();
        policy.require_freshness(FreshnessRequirement::new(
            "heartbeat",
            200,
            1000,
            DegradedAction::Immediate,
        ));
        let mut ev = Recorder::default();
        policy.report_alive("heartbeat");
        policy.update(300, &mut ev);
        assert_eq!(ev.timed_out, Some("heartbeat"));
    }

    #[test]
    fn degraded_action_total_order() {
        assert!(DegradedAction::HoldLast < DegradedAction::RampDown);
        assert!(DegradedAction::RampDown < DegradedAction::Disable);
        assert!(DegradedAction::Disable < DegradedAction::Immediate);
    }
}
