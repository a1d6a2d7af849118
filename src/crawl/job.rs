//! One crawl run, start to finish
//!
//! A job leases its resources, walks the target's listing pages, enriches
//! new candidates from their own pages when content rules exist, records
//! seen items, and hands new ones to the notifier. Every exit path releases
//! the leases (drop guards) and writes the run report row. Every network
//! call is bounded by the run's time budget, so a slow page ends the walk
//! instead of stretching it. A job never panics and never returns an error
//! to the engine; everything it has to say is in the [`JobReport`].

use crate::config::{EngineConfig, NotifyConfig, TargetConfig};
use crate::crawl::walker::{PaginationWalker, StopReason, WalkDecision};
use crate::extract::{
    extract_fields, extract_listing_page, fingerprint_url, Candidate, CompiledStructure,
    ExtractError,
};
use crate::fetch::{fetch_page, render_page, BackoffPolicy, FetchedPage};
use crate::notify::{contains_ignore_token, render_message, Delivery, Notifier};
use crate::pool::{BrowserLease, BrowserPool, ProxyLease, ProxyPool};
use crate::store::{RunCounters, RunStatus, SeenOutcome, SqliteStore};
use chrono::Utc;
use reqwest::Client;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Consecutive page-level fetch failures after which a run aborts
const MAX_PAGE_FAILURE_STREAK: u32 = 3;

/// Shared handles a run needs, owned by the engine and cloned per job
pub struct RunContext {
    pub engine: EngineConfig,
    pub notify: NotifyConfig,
    pub client: Client,
    pub backoff: BackoffPolicy,
    pub browser: Arc<BrowserPool>,
    pub proxies: Arc<ProxyPool>,
    pub store: Arc<Mutex<SqliteStore>>,
    pub notifier: Arc<dyn Notifier>,
    pub config_hash: String,
}

/// Terminal state of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The walk finished; partial page failures may still be counted
    Done,
    /// The run aborted
    Failed { reason: String },
    /// A required pool was exhausted; the scheduler retries later
    Deferred { reason: String },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Done => RunStatus::Done,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Deferred { .. } => RunStatus::Deferred,
        }
    }
}

/// What a finished run hands back to the engine
#[derive(Debug)]
pub struct JobReport {
    pub slug: String,
    pub outcome: RunOutcome,
    pub counters: RunCounters,
    pub duration_ms: u64,
}

/// Executes one crawl run for a target
///
/// Always records a run report row, whatever the outcome. The report row
/// and the returned [`JobReport`] carry the same counters.
pub async fn run_job(
    ctx: Arc<RunContext>,
    target: Arc<TargetConfig>,
    structure: Arc<CompiledStructure>,
) -> JobReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    let deadline = clock + target.run_timeout(&ctx.engine);

    info!(target = %target.slug, url = %target.url, "run starting");

    let run_id = {
        let mut store = ctx.store.lock().unwrap();
        store.insert_run(&target.slug, &ctx.config_hash, started_at)
    };
    let run_id = match run_id {
        Ok(id) => id,
        Err(e) => {
            error!(target = %target.slug, error = %e, "could not record run start");
            return JobReport {
                slug: target.slug.clone(),
                outcome: RunOutcome::Failed {
                    reason: format!("run report insert failed: {e}"),
                },
                counters: RunCounters::default(),
                duration_ms: clock.elapsed().as_millis() as u64,
            };
        }
    };

    let mut counters = RunCounters::default();
    let outcome = crawl_target(&ctx, &target, &structure, deadline, &mut counters).await;

    let duration_ms = clock.elapsed().as_millis() as u64;
    let error_message = match &outcome {
        RunOutcome::Done => None,
        RunOutcome::Failed { reason } | RunOutcome::Deferred { reason } => Some(reason.as_str()),
    };
    {
        let mut store = ctx.store.lock().unwrap();
        if let Err(e) = store.finish_run(run_id, outcome.status(), counters, duration_ms, error_message)
        {
            error!(target = %target.slug, error = %e, "could not record run result");
        }
    }

    match &outcome {
        RunOutcome::Done => {
            info!(
                target = %target.slug,
                pages = counters.pages_fetched,
                extracted = counters.items_extracted,
                new = counters.items_new,
                failures = counters.failures,
                duration_ms,
                "run finished"
            );
            if counters.items_new == 0 {
                warn_on_empty_streak(&ctx, &target.slug);
            }
        }
        RunOutcome::Failed { reason } => {
            warn!(target = %target.slug, reason = %reason, duration_ms, "run failed");
        }
        RunOutcome::Deferred { reason } => {
            info!(target = %target.slug, reason = %reason, "run deferred");
        }
    }

    JobReport {
        slug: target.slug.clone(),
        outcome,
        counters,
        duration_ms,
    }
}

/// The run body: leasing, then the pagination walk
///
/// Leases live on this stack frame, so every return path releases them.
async fn crawl_target(
    ctx: &RunContext,
    target: &TargetConfig,
    structure: &CompiledStructure,
    deadline: Instant,
    counters: &mut RunCounters,
) -> RunOutcome {
    debug!(target = %target.slug, "leasing resources");

    // Rendered fetches leave egress to the render service, so browser
    // targets never hold a proxy slot.
    let proxy = if target.requires_browser {
        None
    } else {
        match ctx.proxies.lease(target.proxy, &target.slug, Instant::now()) {
            Ok(lease) => lease,
            Err(e) if e.is_unavailable() => {
                return RunOutcome::Deferred {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                return RunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    };

    let mut browser = None;
    if target.requires_browser {
        match ctx.browser.lease().await {
            Ok(lease) => browser = Some(lease),
            Err(e) if e.is_unavailable() => {
                return RunOutcome::Deferred {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                return RunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    let mut current = match Url::parse(&target.url) {
        Ok(url) => url,
        Err(e) => {
            return RunOutcome::Failed {
                reason: format!("entry URL does not parse: {e}"),
            }
        }
    };

    let client = proxy
        .as_ref()
        .map(|lease| lease.client().clone())
        .unwrap_or_else(|| ctx.client.clone());
    let mut walker = PaginationWalker::new(target.max_pages, ctx.engine.early_stop_pages);
    let mut failure_streak = 0u32;

    loop {
        if Instant::now() >= deadline {
            info!(
                target = %target.slug,
                pages = walker.pages_walked(),
                stop = StopReason::BudgetExhausted.as_str(),
                "walk stopped"
            );
            break;
        }

        debug!(target = %target.slug, url = %current, "fetching listing page");
        let fetched = within_budget(
            deadline,
            fetch_listing(ctx, &client, browser.as_mut(), proxy.as_ref(), &current),
        )
        .await;
        let page = match fetched {
            None => {
                info!(
                    target = %target.slug,
                    pages = walker.pages_walked(),
                    stop = StopReason::BudgetExhausted.as_str(),
                    "walk stopped"
                );
                break;
            }
            Some(Ok(page)) => page,
            Some(Err(reason)) => {
                counters.failures += 1;
                // A render error here already survived one session
                // replacement; the session pool is the broken part.
                if browser.is_some() {
                    return RunOutcome::Failed {
                        reason: format!("render failed after session replacement: {reason}"),
                    };
                }
                failure_streak += 1;
                if failure_streak >= MAX_PAGE_FAILURE_STREAK {
                    return RunOutcome::Failed {
                        reason: format!(
                            "{failure_streak} consecutive page failures, last: {reason}"
                        ),
                    };
                }
                // Without the page there is no next-page reference, so
                // the walk ends here with whatever was collected.
                warn!(target = %target.slug, url = %current, error = %reason, "listing page failed, walk ends");
                break;
            }
        };
        failure_streak = 0;
        counters.pages_fetched += 1;

        // Parse and extract synchronously; the parsed document never
        // crosses an await.
        let listing = extract_listing_page(&page.body, &page.final_url, structure);
        counters.items_extracted += listing.candidates.len() as u32;
        debug!(
            target = %target.slug,
            url = %current,
            candidates = listing.candidates.len(),
            "listing page extracted"
        );

        let fresh = filter_new(ctx, &target.slug, listing.candidates);
        let new_on_page = fresh.len() as u32;

        if let Err(reason) = process_candidates(
            ctx,
            target,
            structure,
            &client,
            browser.as_mut(),
            proxy.as_ref(),
            fresh,
            deadline,
            counters,
            &mut failure_streak,
        )
        .await
        {
            return RunOutcome::Failed { reason };
        }

        let next = listing
            .next_ref
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok());
        match walker.observe_page(new_on_page, next) {
            WalkDecision::Continue(url) => current = url,
            WalkDecision::Stop(reason) => {
                debug!(
                    target = %target.slug,
                    pages = walker.pages_walked(),
                    stop = reason.as_str(),
                    "walk stopped"
                );
                break;
            }
        }
    }

    RunOutcome::Done
}

/// Bounds one awaited call by the run deadline
///
/// `None` means the budget ran out before the call finished. Callers stop
/// the walk on `None` instead of counting it as a page failure.
async fn within_budget<T>(deadline: Instant, call: impl Future<Output = T>) -> Option<T> {
    tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), call)
        .await
        .ok()
}

/// Fetches one listing page, rendered or direct
///
/// Direct fetch outcomes feed the proxy health tracker. A failed render
/// replaces the browser session and retries once; the caller fails the run
/// when that retry also fails.
async fn fetch_listing(
    ctx: &RunContext,
    client: &Client,
    browser: Option<&mut BrowserLease>,
    proxy: Option<&ProxyLease>,
    url: &Url,
) -> Result<FetchedPage, String> {
    match browser {
        Some(lease) => render_with_replacement(ctx, lease, url).await,
        None => {
            let result = fetch_page(client, url, &ctx.backoff).await;
            if let Some(lease) = proxy {
                match &result {
                    Ok(_) => lease.report_success(),
                    Err(_) => lease.report_failure(Instant::now()),
                }
            }
            result.map_err(|e| e.to_string())
        }
    }
}

/// Renders a page through the leased session, replacing the session and
/// retrying once on failure
async fn render_with_replacement(
    ctx: &RunContext,
    lease: &mut BrowserLease,
    url: &Url,
) -> Result<FetchedPage, String> {
    let timeout = ctx.browser.render_timeout();
    match render_page(&ctx.client, lease.endpoint(), url, timeout).await {
        Ok(page) => Ok(page),
        Err(first) => {
            warn!(
                endpoint = %lease.endpoint(),
                url = %url,
                error = %first,
                "render failed, replacing browser session"
            );
            lease.replace_session();
            render_page(&ctx.client, lease.endpoint(), url, timeout)
                .await
                .map_err(|e| e.to_string())
        }
    }
}

/// Drops candidates whose fingerprint is already recorded
///
/// This is an advisory snapshot so the run skips secondary fetches for old
/// items; the authoritative check is the insert in [`publish_item`].
fn filter_new(
    ctx: &RunContext,
    slug: &str,
    candidates: Vec<Candidate>,
) -> Vec<(Candidate, String)> {
    let store = ctx.store.lock().unwrap();
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let fingerprint = fingerprint_url(&candidate.url);
            match store.is_new(slug, &fingerprint) {
                Ok(true) => Some((candidate, fingerprint)),
                Ok(false) => None,
                Err(e) => {
                    warn!(target = %slug, url = %candidate.url, error = %e, "novelty check failed, candidate skipped");
                    None
                }
            }
        })
        .collect()
}

/// Enriches, records, and announces one listing page's new candidates
///
/// With content rules, each candidate's own page is fetched first:
/// sequentially through the leased browser session, or batched up to the
/// fan-out cap for direct targets. Returns `Err` when the consecutive
/// page-failure bound is hit or a render fails past its replacement retry;
/// either aborts the whole run.
#[allow(clippy::too_many_arguments)]
async fn process_candidates(
    ctx: &RunContext,
    target: &TargetConfig,
    structure: &CompiledStructure,
    client: &Client,
    browser: Option<&mut BrowserLease>,
    proxy: Option<&ProxyLease>,
    fresh: Vec<(Candidate, String)>,
    deadline: Instant,
    counters: &mut RunCounters,
    failure_streak: &mut u32,
) -> Result<(), String> {
    if fresh.is_empty() {
        return Ok(());
    }

    if !structure.has_content_rules() {
        for (candidate, fingerprint) in fresh {
            publish_item(
                ctx,
                target,
                candidate.fields,
                &candidate.url,
                &fingerprint,
                deadline,
                counters,
            )
            .await;
        }
        return Ok(());
    }

    if let Some(lease) = browser {
        // One session, so candidate pages render one at a time
        for (candidate, fingerprint) in fresh {
            if Instant::now() >= deadline {
                debug!(target = %target.slug, "time budget hit, remaining candidates dropped");
                return Ok(());
            }
            let url = match Url::parse(&candidate.url) {
                Ok(url) => url,
                Err(e) => {
                    debug!(target = %target.slug, url = %candidate.url, error = %e, "candidate URL does not parse, skipped");
                    counters.failures += 1;
                    continue;
                }
            };
            let rendered =
                match within_budget(deadline, render_with_replacement(ctx, lease, &url)).await {
                    None => {
                        debug!(target = %target.slug, "time budget hit, remaining candidates dropped");
                        return Ok(());
                    }
                    Some(Ok(page)) => page,
                    Some(Err(reason)) => {
                        counters.failures += 1;
                        return Err(format!(
                            "render failed after session replacement: {reason}"
                        ));
                    }
                };
            handle_content_page(
                ctx,
                target,
                structure,
                candidate,
                fingerprint,
                Ok(rendered.body),
                deadline,
                counters,
                failure_streak,
            )
            .await?;
        }
        return Ok(());
    }

    let fanout = ctx.engine.content_fanout.max(1) as usize;
    let mut queue = fresh.into_iter();
    loop {
        let batch: Vec<(Candidate, String)> = queue.by_ref().take(fanout).collect();
        if batch.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            debug!(target = %target.slug, "time budget hit, remaining candidates dropped");
            break;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for (candidate, fingerprint) in batch {
            let client = client.clone();
            let backoff = ctx.backoff;
            let raw_url = candidate.url.clone();
            let handle = tokio::spawn(within_budget(deadline, async move {
                let url = Url::parse(&raw_url).map_err(|e| e.to_string())?;
                fetch_page(&client, &url, &backoff)
                    .await
                    .map(|page| page.body)
                    .map_err(|e| e.to_string())
            }));
            handles.push((candidate, fingerprint, handle));
        }

        for (candidate, fingerprint, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Some(Err(format!("candidate fetch task failed: {e}"))),
            };
            // A candidate cut off by the deadline is neither a page failure
            // nor proxy feedback; the walk stops at the next budget check.
            let Some(fetched) = outcome else {
                debug!(target = %target.slug, url = %candidate.url, "time budget hit, candidate dropped");
                continue;
            };
            if let Some(lease) = proxy {
                match &fetched {
                    Ok(_) => lease.report_success(),
                    Err(_) => lease.report_failure(Instant::now()),
                }
            }
            handle_content_page(
                ctx,
                target,
                structure,
                candidate,
                fingerprint,
                fetched,
                deadline,
                counters,
                failure_streak,
            )
            .await?;
        }
    }

    Ok(())
}

/// Folds one candidate-page fetch result into the run
///
/// A fetch failure skips the candidate and feeds the consecutive-failure
/// bound; a missing required field skips the candidate only.
#[allow(clippy::too_many_arguments)]
async fn handle_content_page(
    ctx: &RunContext,
    target: &TargetConfig,
    structure: &CompiledStructure,
    candidate: Candidate,
    fingerprint: String,
    fetched: Result<String, String>,
    deadline: Instant,
    counters: &mut RunCounters,
    failure_streak: &mut u32,
) -> Result<(), String> {
    let body = match fetched {
        Ok(body) => body,
        Err(reason) => {
            counters.failures += 1;
            *failure_streak += 1;
            if *failure_streak >= MAX_PAGE_FAILURE_STREAK {
                return Err(format!(
                    "{} consecutive page failures, last: {reason}",
                    *failure_streak
                ));
            }
            warn!(target = %target.slug, url = %candidate.url, error = %reason, "candidate page failed, skipped");
            return Ok(());
        }
    };
    *failure_streak = 0;
    counters.pages_fetched += 1;

    match extract_fields(&body, &structure.content_fields) {
        Ok(content) => {
            let fields = merge_fields(candidate.fields, content);
            publish_item(ctx, target, fields, &candidate.url, &fingerprint, deadline, counters)
                .await;
        }
        Err(ExtractError::MissingField { field }) => {
            debug!(target = %target.slug, url = %candidate.url, field = %field, "required field missing, candidate skipped");
            counters.failures += 1;
        }
        Err(e) => {
            debug!(target = %target.slug, url = %candidate.url, error = %e, "field extraction failed, candidate skipped");
            counters.failures += 1;
        }
    }
    Ok(())
}

/// Inline listing fields merged with content-page fields; the content page
/// wins when both carry the same key
fn merge_fields(
    inline: BTreeMap<String, String>,
    content: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = inline;
    merged.extend(content);
    merged
}

/// Records one item and, if this run won the insert, notifies
///
/// Losing the insert race is the same as having seen the item before. The
/// seen record stands even when delivery fails or is suppressed, so an item
/// is announced at most once.
async fn publish_item(
    ctx: &RunContext,
    target: &TargetConfig,
    fields: BTreeMap<String, String>,
    url: &str,
    fingerprint: &str,
    deadline: Instant,
    counters: &mut RunCounters,
) {
    let recorded = {
        let mut store = ctx.store.lock().unwrap();
        store.record_seen(&target.slug, fingerprint, url)
    };
    match recorded {
        Ok(SeenOutcome::Inserted) => {}
        Ok(SeenOutcome::AlreadySeen) => {
            debug!(target = %target.slug, url = %url, "seen record already present");
            return;
        }
        Err(e) => {
            warn!(target = %target.slug, url = %url, error = %e, "could not record seen item");
            counters.failures += 1;
            return;
        }
    }
    counters.items_new += 1;

    let template = target
        .template
        .as_deref()
        .unwrap_or(&ctx.notify.default_template);
    let message = render_message(template, &target.name, url, &fields);
    if contains_ignore_token(&message, &ctx.notify.ignore_tokens) {
        debug!(target = %target.slug, url = %url, "notification suppressed by ignore token");
        return;
    }

    let delivery = Delivery {
        target_slug: target.slug.clone(),
        channel: target
            .channel
            .clone()
            .or_else(|| ctx.notify.default_channel.clone()),
        message,
        item_url: url.to_string(),
    };
    match within_budget(deadline, ctx.notifier.deliver(&delivery)).await {
        Some(Ok(())) => {}
        // Single attempt; the miss is logged and the seen record stands
        Some(Err(e)) => {
            warn!(target = %target.slug, url = %url, error = %e, "notification delivery failed");
        }
        None => {
            warn!(target = %target.slug, url = %url, "delivery skipped, run budget exhausted");
        }
    }
}

/// Flags a target whose recent runs all came back empty
fn warn_on_empty_streak(ctx: &RunContext, slug: &str) {
    let threshold = ctx.engine.empty_run_warning_threshold;
    if threshold == 0 {
        return;
    }
    let streak = {
        let store = ctx.store.lock().unwrap();
        store.zero_new_streak(slug, threshold)
    };
    match streak {
        Ok(runs) if runs >= threshold => {
            warn!(
                target = %slug,
                runs,
                "no new items in the last {runs} runs; the selectors may be stale"
            );
        }
        Ok(_) => {}
        Err(e) => debug!(target = %slug, error = %e, "empty-run check failed"),
    }
}
