//! Run admission
//!
//! The scheduler owns every target's cadence state and the global
//! concurrency limit. Each tick scans for due targets and tries to admit
//! them; admission hands back a token holding a semaphore permit, so the
//! in-flight run count can never exceed the configured bound.

use crate::config::Config;
use crate::schedule::TargetState;
use crate::ConfigError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Token for one admitted run
///
/// Holds a slot of the global concurrency limit; the slot frees when the
/// token drops at the end of the run's task.
pub struct Admission {
    /// The admitted target
    pub slug: String,

    /// The concurrency permit for this run
    pub _permit: OwnedSemaphorePermit,
}

/// Admits runs for due targets under the global concurrency limit
pub struct Scheduler {
    /// Cadence state per enabled target
    states: HashMap<String, TargetState>,

    /// Global limit on concurrent runs
    limit: Arc<Semaphore>,

    /// Upper bound for the random next-due offset (seconds)
    jitter_max_secs: u64,

    /// Retry delay applied when a run defers
    defer_retry: Duration,
}

impl Scheduler {
    /// Builds the scheduler from the loaded config
    ///
    /// Disabled targets get no state and are never considered. Every
    /// enabled target starts due immediately.
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        let mut states = HashMap::new();
        for target in config.targets.iter().filter(|t| t.enabled) {
            let state = TargetState::new(target, now).map_err(|e| {
                ConfigError::Validation(format!("Target '{}': {}", target.slug, e))
            })?;
            states.insert(target.slug.clone(), state);
        }

        Ok(Self {
            states,
            limit: Arc::new(Semaphore::new(config.engine.max_concurrent_runs as usize)),
            jitter_max_secs: config.engine.jitter_max_secs,
            defer_retry: Duration::seconds(config.engine.defer_retry_secs as i64),
        })
    }

    /// Reconciles the schedule with a re-read config
    ///
    /// Surviving targets keep their cadence state (next-due, in-flight) and
    /// pick up interval and blackout changes; new targets start due
    /// immediately; vanished or disabled targets stop being admitted, with
    /// any in-flight run left to finish on its own. On error the schedule
    /// is unchanged.
    pub fn sync_targets(&mut self, config: &Config, now: DateTime<Utc>) -> Result<(), ConfigError> {
        let mut states = HashMap::new();
        for target in config.targets.iter().filter(|t| t.enabled) {
            let state = match self.states.get(&target.slug) {
                Some(existing) => {
                    let mut state = existing.clone();
                    state.sync_config(target).map_err(|e| {
                        ConfigError::Validation(format!("Target '{}': {}", target.slug, e))
                    })?;
                    state
                }
                None => {
                    debug!(target = %target.slug, "target added to schedule");
                    TargetState::new(target, now).map_err(|e| {
                        ConfigError::Validation(format!("Target '{}': {}", target.slug, e))
                    })?
                }
            };
            states.insert(target.slug.clone(), state);
        }

        for slug in self.states.keys().filter(|slug| !states.contains_key(*slug)) {
            debug!(target = %slug, "target dropped from schedule");
        }
        self.states = states;
        self.jitter_max_secs = config.engine.jitter_max_secs;
        self.defer_retry = Duration::seconds(config.engine.defer_retry_secs as i64);
        Ok(())
    }

    /// Targets eligible for admission at `now`, most overdue first
    ///
    /// A target in a blackout window is excluded without touching its
    /// next-due time, so it surfaces again the moment the window ends.
    pub fn due_targets(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<&TargetState> = self
            .states
            .values()
            .filter(|state| state.is_due(now) && !state.in_blackout(now))
            .collect();

        due.sort_by(|a, b| a.next_due().cmp(&b.next_due()).then(a.slug.cmp(&b.slug)));
        due.into_iter().map(|state| state.slug.clone()).collect()
    }

    /// Tries to admit a run for one target
    ///
    /// Re-checks eligibility, then takes a concurrency slot without
    /// waiting. On admission the target's next-due time advances to
    /// `now + interval + jitter`.
    ///
    /// # Returns
    ///
    /// * `Some(Admission)` - The run may start; the token holds its slot
    /// * `None` - Not due, in a blackout, already in flight, or no slot free
    pub fn try_admit(&mut self, slug: &str, now: DateTime<Utc>) -> Option<Admission> {
        let state = self.states.get_mut(slug)?;
        if !state.is_due(now) || state.in_blackout(now) {
            return None;
        }

        let permit = self.limit.clone().try_acquire_owned().ok()?;

        let jitter = Duration::seconds(fastrand::u64(0..=self.jitter_max_secs) as i64);
        state.record_start(now, jitter);
        debug!(target = slug, next_due = %state.next_due(), "run admitted");

        Some(Admission {
            slug: slug.to_string(),
            _permit: permit,
        })
    }

    /// Records that a target's run finished (done or failed)
    pub fn complete(&mut self, slug: &str) {
        if let Some(state) = self.states.get_mut(slug) {
            state.record_finish();
        }
    }

    /// Records that a target's run deferred for lack of resources
    ///
    /// The target retries after the deferral delay instead of waiting out
    /// its full interval.
    pub fn defer(&mut self, slug: &str, now: DateTime<Utc>) {
        let retry_after = self.defer_retry;
        if let Some(state) = self.states.get_mut(slug) {
            state.record_deferral(now, retry_after);
            debug!(target = slug, next_due = %state.next_due(), "run deferred");
        }
    }

    /// Cadence state for one target
    pub fn state(&self, slug: &str) -> Option<&TargetState> {
        self.states.get(slug)
    }

    /// Free run slots under the global limit
    pub fn available_slots(&self) -> usize {
        self.limit.available_permits()
    }

    /// Number of scheduled (enabled) targets
    pub fn target_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BlackoutSpec, Config, EngineConfig, ListingSpec, RuleKind, StorageConfig, TargetConfig,
        UserAgentConfig,
    };
    use chrono::TimeZone;

    fn create_test_target(slug: &str, interval_minutes: u64) -> TargetConfig {
        TargetConfig {
            slug: slug.to_string(),
            name: format!("Target {}", slug),
            url: format!("https://example.com/{}", slug),
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
                selector: "a.item".to_string(),
                kind: RuleKind::Css,
                link_attr: "href".to_string(),
                fields: vec![],
            },
            content_fields: vec![],
            pagination: None,
        }
    }

    fn create_test_config(targets: Vec<TargetConfig>, max_concurrent: u32) -> Config {
        Config {
            engine: EngineConfig {
                max_concurrent_runs: max_concurrent,
                jitter_max_secs: 0,
                defer_retry_secs: 60,
                ..EngineConfig::default()
            },
            fetch: Default::default(),
            browser: Default::default(),
            proxy: Default::default(),
            notify: Default::default(),
            storage: StorageConfig {
                database_path: "/tmp/test.db".to_string(),
            },
            user_agent: UserAgentConfig {
                agent_name: "TestWatcher".to_string(),
                agent_version: "1.0".to_string(),
                contact_url: "https://example.com/about".to_string(),
                contact_email: "admin@example.com".to_string(),
            },
            targets,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_enabled_targets_start_due() {
        let config = create_test_config(
            vec![create_test_target("jobs", 30), create_test_target("news", 15)],
            4,
        );
        let scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        assert_eq!(scheduler.target_count(), 2);
        assert_eq!(scheduler.due_targets(at(9, 0)), vec!["jobs", "news"]);
    }

    #[test]
    fn test_disabled_target_never_scheduled() {
        let mut disabled = create_test_target("dark", 30);
        disabled.enabled = false;
        let config = create_test_config(vec![create_test_target("jobs", 30), disabled], 4);

        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();
        assert_eq!(scheduler.target_count(), 1);
        assert_eq!(scheduler.due_targets(at(9, 0)), vec!["jobs"]);
        assert!(scheduler.try_admit("dark", at(9, 0)).is_none());
    }

    #[test]
    fn test_at_most_one_run_per_target() {
        let config = create_test_config(vec![create_test_target("jobs", 30)], 4);
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        let admission = scheduler.try_admit("jobs", at(9, 0));
        assert!(admission.is_some());

        // The same target cannot be admitted again while in flight,
        // regardless of how overdue it becomes
        assert!(scheduler.due_targets(at(11, 0)).is_empty());
        assert!(scheduler.try_admit("jobs", at(11, 0)).is_none());

        drop(admission);
        scheduler.complete("jobs");
        assert_eq!(scheduler.due_targets(at(11, 0)), vec!["jobs"]);
    }

    #[test]
    fn test_interval_gates_readmission() {
        let config = create_test_config(vec![create_test_target("jobs", 30)], 4);
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        let admission = scheduler.try_admit("jobs", at(9, 0)).unwrap();
        drop(admission);
        scheduler.complete("jobs");

        // Next run is anchored to the previous start plus the interval
        assert!(scheduler.due_targets(at(9, 29)).is_empty());
        assert_eq!(scheduler.due_targets(at(9, 30)), vec!["jobs"]);
    }

    #[test]
    fn test_global_limit_bounds_admissions() {
        let config = create_test_config(
            vec![create_test_target("jobs", 30), create_test_target("news", 30)],
            1,
        );
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        let first = scheduler.try_admit("jobs", at(9, 0));
        assert!(first.is_some());
        assert_eq!(scheduler.available_slots(), 0);

        // Second target is due but no slot is free
        let second = scheduler.try_admit("news", at(9, 0));
        assert!(second.is_none());

        // Dropping the admission frees the slot for the other target
        drop(first);
        scheduler.complete("jobs");
        assert_eq!(scheduler.available_slots(), 1);
        assert!(scheduler.try_admit("news", at(9, 0)).is_some());
    }

    #[test]
    fn test_blackout_suppresses_without_advancing() {
        let mut target = create_test_target("jobs", 30);
        target.blackout = vec![BlackoutSpec {
            start: "06:00".to_string(),
            end: "08:00".to_string(),
        }];
        let config = create_test_config(vec![target], 4);

        let mut scheduler = Scheduler::from_config(&config, at(6, 30)).unwrap();
        let due_before = scheduler.state("jobs").unwrap().next_due();

        // During the window nothing is admitted
        assert!(scheduler.due_targets(at(6, 30)).is_empty());
        assert!(scheduler.try_admit("jobs", at(6, 30)).is_none());

        // Suppression left the next-due time alone
        assert_eq!(scheduler.state("jobs").unwrap().next_due(), due_before);

        // First scan after the window ends admits the overdue target
        assert_eq!(scheduler.due_targets(at(8, 0)), vec!["jobs"]);
        assert!(scheduler.try_admit("jobs", at(8, 0)).is_some());
    }

    #[test]
    fn test_deferral_retries_after_short_delay() {
        let config = create_test_config(vec![create_test_target("jobs", 30)], 4);
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        let admission = scheduler.try_admit("jobs", at(9, 0)).unwrap();
        drop(admission);
        scheduler.defer("jobs", at(9, 0));

        // Due again after the 60s deferral delay, not the 30min interval
        assert!(scheduler.due_targets(at(9, 0)).is_empty());
        assert_eq!(
            scheduler.state("jobs").unwrap().next_due(),
            at(9, 0) + Duration::seconds(60)
        );
        assert_eq!(scheduler.due_targets(at(9, 1)), vec!["jobs"]);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let mut target_config = create_test_config(vec![create_test_target("jobs", 30)], 4);
        target_config.engine.jitter_max_secs = 10;

        for _ in 0..20 {
            let mut scheduler = Scheduler::from_config(&target_config, at(9, 0)).unwrap();
            let _admission = scheduler.try_admit("jobs", at(9, 0)).unwrap();

            let next_due = scheduler.state("jobs").unwrap().next_due();
            let offset = next_due - (at(9, 0) + Duration::minutes(30));
            assert!(offset >= Duration::zero());
            assert!(offset <= Duration::seconds(10));
        }
    }

    #[test]
    fn test_sync_keeps_surviving_target_cadence() {
        let config = create_test_config(vec![create_test_target("jobs", 30)], 4);
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();
        drop(scheduler.try_admit("jobs", at(9, 0)));
        scheduler.complete("jobs");

        // The reload shortens the interval and adds a target
        let reloaded = create_test_config(
            vec![create_test_target("jobs", 10), create_test_target("news", 15)],
            4,
        );
        scheduler.sync_targets(&reloaded, at(9, 5)).unwrap();

        assert_eq!(scheduler.target_count(), 2);
        // The survivor keeps the next-due time from its last start
        assert_eq!(scheduler.state("jobs").unwrap().next_due(), at(9, 30));
        assert_eq!(scheduler.due_targets(at(9, 5)), vec!["news"]);
        // The newcomer is due the moment it appears
        assert!(scheduler.try_admit("news", at(9, 5)).is_some());
    }

    #[test]
    fn test_sync_drops_vanished_target() {
        let config = create_test_config(
            vec![create_test_target("jobs", 30), create_test_target("news", 15)],
            4,
        );
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();
        let admission = scheduler.try_admit("jobs", at(9, 0)).unwrap();

        let reloaded = create_test_config(vec![create_test_target("news", 15)], 4);
        scheduler.sync_targets(&reloaded, at(9, 0)).unwrap();

        assert_eq!(scheduler.target_count(), 1);
        assert!(scheduler.state("jobs").is_none());
        assert!(scheduler.try_admit("jobs", at(11, 0)).is_none());

        // The dropped target's in-flight run still finishes as a no-op
        drop(admission);
        scheduler.complete("jobs");
        assert_eq!(scheduler.due_targets(at(9, 0)), vec!["news"]);
    }

    #[test]
    fn test_due_targets_most_overdue_first() {
        let config = create_test_config(
            vec![create_test_target("jobs", 30), create_test_target("news", 10)],
            4,
        );
        let mut scheduler = Scheduler::from_config(&config, at(9, 0)).unwrap();

        // Run both once so their next-due times diverge
        drop(scheduler.try_admit("jobs", at(9, 0)));
        scheduler.complete("jobs");
        drop(scheduler.try_admit("news", at(9, 0)));
        scheduler.complete("news");

        // news (due 9:10) is more overdue than jobs (due 9:30)
        assert_eq!(scheduler.due_targets(at(10, 0)), vec!["news", "jobs"]);
    }
}
