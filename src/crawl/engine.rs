//! The engine: tick loop, job spawning, maintenance sweeps
//!
//! One engine owns the scheduler, the pools, the store, and the notifier.
//! `run` is the daemon loop; `run_once` is the operator's immediate pass
//! that skips interval and blackout gating but still goes through the
//! pools, the dedup store, and the notifier. A watched config file is
//! re-read every tick and applied in place when its hash changes.

use crate::config::{load_config_with_hash, Config, TargetConfig};
use crate::crawl::job::{run_job, JobReport, RunContext, RunOutcome};
use crate::extract::CompiledStructure;
use crate::fetch::{build_http_client, BackoffPolicy, FetchError};
use crate::notify::build_notifier;
use crate::pool::{BrowserPool, ProxyPool};
use crate::schedule::Scheduler;
use crate::store::SqliteStore;
use crate::ConfigError;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The crawl engine
///
/// # Example
///
/// ```no_run
/// use vedette::config::load_config_with_hash;
/// use vedette::crawl::Engine;
///
/// # async fn example() -> vedette::Result<()> {
/// let (config, hash) = load_config_with_hash("vedette.toml".as_ref())?;
/// let mut engine = Engine::new(config, hash)?;
/// engine.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: Arc<Config>,
    ctx: Arc<RunContext>,
    scheduler: Scheduler,
    targets: HashMap<String, (Arc<TargetConfig>, Arc<CompiledStructure>)>,
    stale_cutoff_secs: u64,

    /// Re-read every tick when set; a changed hash rebuilds the target set
    config_path: Option<PathBuf>,
}

impl Engine {
    /// Builds an engine from a validated config
    ///
    /// Opens the store, compiles every enabled target's rules, and builds
    /// the pools and the notifier. Nothing is fetched yet.
    pub fn new(config: Config, config_hash: String) -> crate::Result<Self> {
        let mut targets = HashMap::new();
        for target in config.targets.iter().filter(|t| t.enabled) {
            let structure = CompiledStructure::compile(target)?;
            targets.insert(
                target.slug.clone(),
                (Arc::new(target.clone()), Arc::new(structure)),
            );
        }

        let store = SqliteStore::new(Path::new(&config.storage.database_path))?;
        let scheduler = Scheduler::from_config(&config, Utc::now())?;
        let client =
            build_http_client(&config.user_agent, &config.fetch, None).map_err(FetchError::from)?;
        let browser = Arc::new(BrowserPool::new(&config.browser));
        let proxies = Arc::new(ProxyPool::new(&config.proxy, &config.user_agent, &config.fetch)?);
        let notifier = build_notifier(&config.notify)?;

        // The sweep must never flag a run the process itself still bounds,
        // so the stale cutoff sits above every target's own budget.
        let longest_budget = config
            .targets
            .iter()
            .map(|t| t.run_timeout(&config.engine).as_secs())
            .max()
            .unwrap_or(config.engine.run_timeout_secs);
        let stale_cutoff_secs = config.engine.stale_run_secs.max(longest_budget + 60);

        let ctx = Arc::new(RunContext {
            engine: config.engine.clone(),
            notify: config.notify.clone(),
            client,
            backoff: BackoffPolicy::from_config(&config.fetch),
            browser,
            proxies,
            store: Arc::new(Mutex::new(store)),
            notifier,
            config_hash,
        });

        Ok(Engine {
            config: Arc::new(config),
            ctx,
            scheduler,
            targets,
            stale_cutoff_secs,
            config_path: None,
        })
    }

    /// Watches a config file: the daemon re-reads it every tick and applies
    /// changes in place
    pub fn watch_config_file(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    /// The daemon loop: tick, admit, reap, sweep, until Ctrl-C
    ///
    /// In-flight runs are drained before this returns.
    pub async fn run(&mut self) -> crate::Result<()> {
        info!(
            targets = self.scheduler.target_count(),
            tick_secs = self.config.engine.tick_interval_secs,
            max_concurrent = self.config.engine.max_concurrent_runs,
            "engine starting"
        );

        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.engine.tick_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.config.engine.sweep_interval_secs));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut jobs: JoinSet<JobReport> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.reload_config_if_changed();
                    self.admit_due(&mut jobs, &mut running);
                }
                _ = sweep.tick() => self.maintenance_sweep(),
                Some(joined) = jobs.join_next_with_id(), if !jobs.is_empty() => {
                    self.reap(joined, &mut running);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(in_flight = jobs.len(), "shutdown signal, draining runs");
                    break;
                }
            }
        }

        while let Some(joined) = jobs.join_next_with_id().await {
            self.reap(joined, &mut running);
        }
        info!("engine stopped");
        Ok(())
    }

    /// One immediate pass over all enabled targets, or one by slug
    ///
    /// Interval and blackout gating do not apply; the global concurrency
    /// bound does.
    pub async fn run_once(&mut self, slug: Option<&str>) -> crate::Result<()> {
        let selected: Vec<(Arc<TargetConfig>, Arc<CompiledStructure>)> = match slug {
            Some(slug) => {
                let Some(entry) = self.targets.get(slug) else {
                    return Err(ConfigError::Validation(format!(
                        "no enabled target with slug '{slug}'"
                    ))
                    .into());
                };
                vec![entry.clone()]
            }
            None => {
                let mut entries: Vec<_> = self.targets.values().cloned().collect();
                entries.sort_by(|a, b| a.0.slug.cmp(&b.0.slug));
                entries
            }
        };

        info!(targets = selected.len(), "single pass starting");
        let limit = Arc::new(tokio::sync::Semaphore::new(
            self.config.engine.max_concurrent_runs as usize,
        ));
        let mut jobs: JoinSet<JobReport> = JoinSet::new();
        for (target, structure) in selected {
            let ctx = Arc::clone(&self.ctx);
            let limit = Arc::clone(&limit);
            jobs.spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                run_job(ctx, target, structure).await
            });
        }

        let mut not_done = 0u32;
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(report) => {
                    if !matches!(report.outcome, RunOutcome::Done) {
                        not_done += 1;
                    }
                }
                Err(e) => {
                    error!(error = %e, "run task aborted");
                    not_done += 1;
                }
            }
        }
        if not_done > 0 {
            warn!(not_done, "single pass finished with incomplete runs");
        } else {
            info!("single pass finished");
        }
        Ok(())
    }

    /// Re-reads the watched config file and applies it when its hash changed
    ///
    /// A file that no longer loads or validates is logged and skipped; the
    /// running config stays in force.
    fn reload_config_if_changed(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        let (config, hash) = match load_config_with_hash(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config re-read failed, keeping the running config");
                return;
            }
        };
        if hash == self.ctx.config_hash {
            return;
        }

        info!(path = %path.display(), hash = %hash, "config file changed, applying");
        if let Err(e) = self.apply_config(config, hash) {
            warn!(error = %e, "changed config could not be applied, keeping the running config");
        }
    }

    /// Applies a re-read config: rules, schedule, client, and notifier
    ///
    /// The pools, the store, and the loop cadences keep their startup
    /// shape; in-flight runs finish under the config they started with.
    fn apply_config(&mut self, config: Config, config_hash: String) -> crate::Result<()> {
        let mut targets = HashMap::new();
        for target in config.targets.iter().filter(|t| t.enabled) {
            let structure = CompiledStructure::compile(target)?;
            targets.insert(
                target.slug.clone(),
                (Arc::new(target.clone()), Arc::new(structure)),
            );
        }
        let client =
            build_http_client(&config.user_agent, &config.fetch, None).map_err(FetchError::from)?;
        let notifier = build_notifier(&config.notify)?;
        self.scheduler.sync_targets(&config, Utc::now())?;

        let longest_budget = config
            .targets
            .iter()
            .map(|t| t.run_timeout(&config.engine).as_secs())
            .max()
            .unwrap_or(config.engine.run_timeout_secs);
        self.stale_cutoff_secs = config.engine.stale_run_secs.max(longest_budget + 60);

        self.ctx = Arc::new(RunContext {
            engine: config.engine.clone(),
            notify: config.notify.clone(),
            client,
            backoff: BackoffPolicy::from_config(&config.fetch),
            browser: Arc::clone(&self.ctx.browser),
            proxies: Arc::clone(&self.ctx.proxies),
            store: Arc::clone(&self.ctx.store),
            notifier,
            config_hash,
        });
        self.targets = targets;
        self.config = Arc::new(config);

        info!(
            targets = self.scheduler.target_count(),
            "changed config applied"
        );
        Ok(())
    }

    /// Admits every due target the limits allow and spawns its job
    fn admit_due(&mut self, jobs: &mut JoinSet<JobReport>, running: &mut HashMap<Id, String>) {
        let now = Utc::now();
        let due = self.scheduler.due_targets(now);
        if due.is_empty() {
            return;
        }
        debug!(
            due = due.len(),
            free_slots = self.scheduler.available_slots(),
            "tick"
        );

        for slug in due {
            let Some(admission) = self.scheduler.try_admit(&slug, now) else {
                debug!(target = %slug, "admission denied, retried next tick");
                continue;
            };
            let Some((target, structure)) = self.targets.get(&slug) else {
                // Scheduler and target map are built from the same config
                self.scheduler.complete(&slug);
                continue;
            };

            let ctx = Arc::clone(&self.ctx);
            let target = Arc::clone(target);
            let structure = Arc::clone(structure);
            let handle = jobs.spawn(async move {
                let _admission = admission;
                run_job(ctx, target, structure).await
            });
            running.insert(handle.id(), slug);
        }
    }

    /// Feeds one finished job back into the scheduler
    fn reap(
        &mut self,
        joined: Result<(Id, JobReport), JoinError>,
        running: &mut HashMap<Id, String>,
    ) {
        match joined {
            Ok((id, report)) => {
                running.remove(&id);
                match &report.outcome {
                    RunOutcome::Deferred { .. } => self.scheduler.defer(&report.slug, Utc::now()),
                    _ => self.scheduler.complete(&report.slug),
                }
            }
            Err(e) => {
                // Jobs absorb their own errors, so this is a bug; unblock
                // the target either way
                if let Some(slug) = running.remove(&e.id()) {
                    error!(target = %slug, error = %e, "run task aborted");
                    self.scheduler.complete(&slug);
                } else {
                    error!(error = %e, "run task aborted before registration");
                }
            }
        }
    }

    /// Marks runs orphaned by a dead process and prunes old reports
    fn maintenance_sweep(&self) {
        let now = Utc::now();
        let stale_cutoff = now - chrono::Duration::seconds(self.stale_cutoff_secs as i64);
        let retention_cutoff =
            now - chrono::Duration::days(self.config.engine.retention_days as i64);

        let mut store = self.ctx.store.lock().unwrap();
        match store.mark_stale_runs(stale_cutoff) {
            Ok(0) => {}
            Ok(swept) => warn!(swept, "stale running reports marked failed"),
            Err(e) => error!(error = %e, "stale-run sweep failed"),
        }
        match store.prune_runs(retention_cutoff) {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "old run reports pruned"),
            Err(e) => error!(error = %e, "run report pruning failed"),
        }
    }
}

/// Builds an [`Engine`] and runs the daemon loop until shutdown
///
/// The config file at `config_path` is re-read every tick, so edits to it
/// take effect without a restart.
///
/// # Example
///
/// ```no_run
/// use vedette::config::load_config_with_hash;
///
/// # async fn example() -> vedette::Result<()> {
/// let (config, hash) = load_config_with_hash("vedette.toml".as_ref())?;
/// vedette::crawl::run_daemon(config, hash, "vedette.toml".into()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_daemon(
    config: Config,
    config_hash: String,
    config_path: PathBuf,
) -> crate::Result<()> {
    let mut engine = Engine::new(config, config_hash)?;
    engine.watch_config_file(config_path);
    engine.run().await
}
