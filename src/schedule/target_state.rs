//! Per-target scheduling state

use crate::config::TargetConfig;
use crate::schedule::BlackoutWindow;
use chrono::{DateTime, Duration, Utc};

/// Tracks one target's cadence between runs
///
/// The next-due time advances only when a run actually starts; blackout
/// suppression leaves it alone so the backlog drains as soon as the window
/// ends.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub slug: String,

    /// Configured gap between run starts
    interval: Duration,

    /// Earliest time the next run may be admitted
    next_due: DateTime<Utc>,

    /// Set while a run for this target is in flight
    in_flight: bool,

    /// When the current or last run started
    last_started: Option<DateTime<Utc>>,

    blackouts: Vec<BlackoutWindow>,
}

impl TargetState {
    /// Builds the state for one target, due immediately
    ///
    /// Fails if a blackout window does not parse; config validation rejects
    /// those up front, so a failure here means the state was built from an
    /// unvalidated config.
    pub fn new(target: &TargetConfig, now: DateTime<Utc>) -> Result<Self, String> {
        let blackouts = target
            .blackout
            .iter()
            .map(|spec| BlackoutWindow::parse(&spec.start, &spec.end))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            slug: target.slug.clone(),
            interval: target.interval(),
            next_due: now,
            in_flight: false,
            last_started: None,
            blackouts,
        })
    }

    /// Applies a changed target definition, keeping the cadence state
    ///
    /// Next-due, in-flight, and last-started survive, so a config reload
    /// never re-admits a running target or resets an interval wait. The new
    /// interval takes effect from the next start.
    pub fn sync_config(&mut self, target: &TargetConfig) -> Result<(), String> {
        self.blackouts = target
            .blackout
            .iter()
            .map(|spec| BlackoutWindow::parse(&spec.start, &spec.end))
            .collect::<Result<Vec<_>, _>>()?;
        self.interval = target.interval();
        Ok(())
    }

    /// Whether a run may be admitted at `now`, blackouts aside
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.in_flight && now >= self.next_due
    }

    /// Whether `now` falls inside one of the target's blackout windows
    pub fn in_blackout(&self, now: DateTime<Utc>) -> bool {
        let time = now.time();
        self.blackouts.iter().any(|window| window.contains(time))
    }

    /// Marks a run started and schedules the next one
    ///
    /// The next-due time is anchored to this run's start, not its end:
    /// `now + interval + jitter`.
    pub fn record_start(&mut self, now: DateTime<Utc>, jitter: Duration) {
        self.in_flight = true;
        self.last_started = Some(now);
        self.next_due = now + self.interval + jitter;
    }

    /// Marks the in-flight run finished
    pub fn record_finish(&mut self) {
        self.in_flight = false;
    }

    /// Marks the in-flight run deferred and pulls the next attempt closer
    ///
    /// A deferred run never consumed its resources, so it retries after the
    /// (short) deferral delay instead of waiting out the full interval.
    pub fn record_deferral(&mut self, now: DateTime<Utc>, retry_after: Duration) {
        self.in_flight = false;
        self.next_due = now + retry_after;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    pub fn last_started(&self) -> Option<DateTime<Utc>> {
        self.last_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListingSpec, RuleKind};
    use chrono::TimeZone;

    fn create_test_target(slug: &str, interval_minutes: u64) -> TargetConfig {
        TargetConfig {
            slug: slug.to_string(),
            name: "Test Target".to_string(),
            url: "https://example.com/jobs".to_string(),
            interval_minutes,
            enabled: true,
            requires_browser: false,
            proxy: Default::default(),
            max_pages: 1,
            timeout_secs: None,
            channel: None,
            template: None,
            blackout: vec![],
            listing: ListingSpec {
                selector: "a.job-listing-link".to_string(),
                kind: RuleKind::Css,
                link_attr: "href".to_string(),
                fields: vec![],
            },
            content_fields: vec![],
            pagination: None,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_new_target_is_due_immediately() {
        let now = at(9, 0);
        let state = TargetState::new(&create_test_target("jobs", 30), now).unwrap();

        assert!(state.is_due(now));
        assert!(!state.is_in_flight());
        assert!(state.last_started().is_none());
    }

    #[test]
    fn test_not_due_while_in_flight() {
        let now = at(9, 0);
        let mut state = TargetState::new(&create_test_target("jobs", 30), now).unwrap();

        state.record_start(now, Duration::zero());
        assert!(!state.is_due(now));
        // Even well past the interval, an in-flight target stays blocked
        assert!(!state.is_due(at(11, 0)));

        state.record_finish();
        assert!(state.is_due(at(11, 0)));
    }

    #[test]
    fn test_interval_gates_next_run() {
        let started = at(9, 0);
        let mut state = TargetState::new(&create_test_target("jobs", 30), started).unwrap();

        state.record_start(started, Duration::zero());
        state.record_finish();

        assert_eq!(state.next_due(), at(9, 30));
        assert!(!state.is_due(at(9, 29)));
        assert!(state.is_due(at(9, 30)));
    }

    #[test]
    fn test_next_due_anchored_to_start_with_jitter() {
        let started = at(9, 0);
        let mut state = TargetState::new(&create_test_target("jobs", 30), started).unwrap();

        state.record_start(started, Duration::seconds(7));
        assert_eq!(state.next_due(), started + Duration::minutes(30) + Duration::seconds(7));
        assert_eq!(state.last_started(), Some(started));
    }

    #[test]
    fn test_deferral_retries_sooner_than_interval() {
        let started = at(9, 0);
        let mut state = TargetState::new(&create_test_target("jobs", 30), started).unwrap();

        state.record_start(started, Duration::zero());
        state.record_deferral(at(9, 0), Duration::seconds(60));

        assert!(!state.is_in_flight());
        assert_eq!(state.next_due(), at(9, 1));
        assert!(state.is_due(at(9, 1)));
    }

    #[test]
    fn test_sync_config_keeps_cadence() {
        let started = at(9, 0);
        let mut state = TargetState::new(&create_test_target("jobs", 30), started).unwrap();
        state.record_start(started, Duration::zero());

        let mut changed = create_test_target("jobs", 10);
        changed.blackout = vec![crate::config::BlackoutSpec {
            start: "06:00".to_string(),
            end: "08:00".to_string(),
        }];
        state.sync_config(&changed).unwrap();

        // The running state survives; the new blackout applies at once
        assert!(state.is_in_flight());
        assert_eq!(state.next_due(), at(9, 30));
        assert!(state.in_blackout(at(7, 0)));

        // The shortened interval takes effect from the next start
        state.record_finish();
        state.record_start(at(9, 30), Duration::zero());
        assert_eq!(state.next_due(), at(9, 40));
    }

    #[test]
    fn test_blackout_membership() {
        let mut target = create_test_target("jobs", 30);
        target.blackout = vec![crate::config::BlackoutSpec {
            start: "06:00".to_string(),
            end: "08:00".to_string(),
        }];
        let state = TargetState::new(&target, at(5, 0)).unwrap();

        assert!(!state.in_blackout(at(5, 59)));
        assert!(state.in_blackout(at(6, 0)));
        assert!(state.in_blackout(at(7, 30)));
        assert!(!state.in_blackout(at(8, 0)));
    }

    #[test]
    fn test_bad_blackout_fails_construction() {
        let mut target = create_test_target("jobs", 30);
        target.blackout = vec![crate::config::BlackoutSpec {
            start: "nope".to_string(),
            end: "08:00".to_string(),
        }];
        assert!(TargetState::new(&target, at(5, 0)).is_err());
    }
}
