use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Vedette
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub storage: StorageConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// Engine-wide scheduling and run behavior
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between scheduler ticks
    #[serde(rename = "tick-interval-secs", default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Maximum number of crawl runs in flight at once
    #[serde(rename = "max-concurrent-runs", default = "default_max_concurrent")]
    pub max_concurrent_runs: u32,

    /// Default per-run time budget (seconds); targets may override
    #[serde(rename = "run-timeout-secs", default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Delay before retrying a run deferred for lack of resources (seconds)
    #[serde(rename = "defer-retry-secs", default = "default_defer_retry")]
    pub defer_retry_secs: u64,

    /// Upper bound on the random offset added to each next-run time (seconds)
    #[serde(rename = "jitter-max-secs", default = "default_jitter_max")]
    pub jitter_max_secs: u64,

    /// Consecutive zero-new listing pages before pagination stops early;
    /// 0 disables the heuristic
    #[serde(rename = "early-stop-pages", default = "default_early_stop")]
    pub early_stop_pages: u32,

    /// Concurrent candidate-page fetches within one listing page
    #[serde(rename = "content-fanout", default = "default_content_fanout")]
    pub content_fanout: u32,

    /// Consecutive zero-new runs before a target is flagged in the log
    #[serde(
        rename = "empty-run-warning-threshold",
        default = "default_empty_run_threshold"
    )]
    pub empty_run_warning_threshold: u32,

    /// Days to keep run reports before pruning
    #[serde(rename = "retention-days", default = "default_retention_days")]
    pub retention_days: u32,

    /// Age (seconds) after which a still-running run report is swept to failed
    #[serde(rename = "stale-run-secs", default = "default_stale_run")]
    pub stale_run_secs: u64,

    /// Seconds between maintenance sweeps (stale runs, retention)
    #[serde(rename = "sweep-interval-secs", default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_tick_interval() -> u64 {
    5
}
fn default_max_concurrent() -> u32 {
    4
}
fn default_run_timeout() -> u64 {
    300
}
fn default_defer_retry() -> u64 {
    60
}
fn default_jitter_max() -> u64 {
    10
}
fn default_early_stop() -> u32 {
    2
}
fn default_content_fanout() -> u32 {
    4
}
fn default_empty_run_threshold() -> u32 {
    5
}
fn default_retention_days() -> u32 {
    7
}
fn default_stale_run() -> u64 {
    900
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_concurrent_runs: default_max_concurrent(),
            run_timeout_secs: default_run_timeout(),
            defer_retry_secs: default_defer_retry(),
            jitter_max_secs: default_jitter_max(),
            early_stop_pages: default_early_stop(),
            content_fanout: default_content_fanout(),
            empty_run_warning_threshold: default_empty_run_threshold(),
            retention_days: default_retention_days(),
            stale_run_secs: default_stale_run(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// HTTP fetch behavior
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Whole-request timeout for a direct fetch (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total attempts per URL before the fetch is reported failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts (milliseconds)
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Cap on the backoff delay (milliseconds)
    #[serde(rename = "backoff-max-ms", default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    250
}
fn default_backoff_max() -> u64 {
    5000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

/// Rendered-fetch (browser session) pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Render service endpoints; one session slot per entry
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// How long a job waits for a free session before deferring (seconds)
    #[serde(rename = "lease-wait-secs", default = "default_lease_wait")]
    pub lease_wait_secs: u64,

    /// Whole-request timeout for a rendered fetch (seconds)
    #[serde(rename = "render-timeout-secs", default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

fn default_lease_wait() -> u64 {
    5
}
fn default_render_timeout() -> u64 {
    60
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            lease_wait_secs: default_lease_wait(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy endpoint URLs (e.g. "http://10.0.0.1:3128")
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Consecutive failures before a proxy is demoted
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a demoted proxy sits out before re-admission (seconds)
    #[serde(rename = "cooldown-secs", default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown() -> u64 {
    300
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL new items are POSTed to; log-only delivery when absent
    #[serde(rename = "webhook-url")]
    pub webhook_url: Option<String>,

    /// Delivery request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_notify_timeout")]
    pub timeout_secs: u64,

    /// Messages containing any of these substrings are suppressed
    #[serde(rename = "ignore-tokens", default)]
    pub ignore_tokens: Vec<String>,

    /// Message template used when a target does not carry its own
    #[serde(rename = "default-template", default = "default_template")]
    pub default_template: String,

    /// Delivery channel used when a target does not carry its own
    #[serde(rename = "default-channel")]
    pub default_channel: Option<String>,
}

fn default_notify_timeout() -> u64 {
    10
}
fn default_template() -> String {
    "[{target}] {title}\n{url}".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
            ignore_tokens: Vec::new(),
            default_template: default_template(),
            default_channel: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the watch agent
    #[serde(rename = "agent-name")]
    pub agent_name: String,

    /// Version of the watch agent
    #[serde(rename = "agent-version")]
    pub agent_version: String,

    /// URL with information about the agent
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for agent-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// One monitored target: identity, cadence, policies, extraction rules
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Stable identifier used in the store and in logs
    pub slug: String,

    /// Human-readable name used in notifications
    pub name: String,

    /// Entry URL of the listing to watch
    pub url: String,

    /// Minutes between runs
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: u64,

    /// Disabled targets are never scheduled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fetch through a leased browser session instead of a direct request
    #[serde(rename = "requires-browser", default)]
    pub requires_browser: bool,

    /// Proxy selection policy for this target's fetches
    #[serde(default)]
    pub proxy: ProxyPolicy,

    /// Maximum listing pages walked per run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-run time budget override (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    /// Delivery channel override
    pub channel: Option<String>,

    /// Message template override
    pub template: Option<String>,

    /// Time-of-day windows (UTC) during which runs are suppressed
    #[serde(default)]
    pub blackout: Vec<BlackoutSpec>,

    /// Rule that yields candidate items on a listing page
    pub listing: ListingSpec,

    /// Named field rules evaluated against each candidate's own page
    #[serde(rename = "content-fields", default)]
    pub content_fields: Vec<FieldSpec>,

    /// Rule that yields the next-page reference, if the listing paginates
    pub pagination: Option<PaginationSpec>,
}

fn default_enabled() -> bool {
    true
}
fn default_max_pages() -> u32 {
    1
}

impl TargetConfig {
    /// Per-run time budget, falling back to the engine default
    pub fn run_timeout(&self, engine: &EngineConfig) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(engine.run_timeout_secs))
    }

    /// Run interval as a chrono duration
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.interval_minutes as i64)
    }
}

/// Proxy selection policy for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPolicy {
    /// Direct connection, no proxy
    #[default]
    None,
    /// Pick the next healthy proxy per run
    Rotate,
    /// Keep using the same proxy for this target while it stays healthy
    Sticky,
}

impl ProxyPolicy {
    /// Whether this policy draws from the proxy pool at all
    pub fn uses_pool(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Which selector dialect a rule string is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// CSS selector, e.g. "a.job-listing-link"
    #[default]
    Css,
    /// Absolute element path, e.g. "/html/body/div[2]/ul/li/a"
    Path,
}

/// Listing rule: selects the candidate item elements on a listing page
#[derive(Debug, Clone, Deserialize)]
pub struct ListingSpec {
    /// Selector matching one element per candidate item
    pub selector: String,

    #[serde(default)]
    pub kind: RuleKind,

    /// Attribute on the matched element (or a nested anchor) holding the item link
    #[serde(rename = "link-attr", default = "default_link_attr")]
    pub link_attr: String,

    /// Inline field rules evaluated within each matched element
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

fn default_link_attr() -> String {
    "href".to_string()
}

/// One named field extraction rule
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    /// Field name in the extracted item
    pub name: String,

    /// Selector locating the field's element
    pub selector: String,

    #[serde(default)]
    pub kind: RuleKind,

    /// Attribute to read; element text when absent
    pub attr: Option<String>,

    /// Required fields abort the candidate (not the run) when missing
    #[serde(default)]
    pub required: bool,
}

/// Pagination rule: selects the next-page reference on a listing page
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationSpec {
    /// Selector matching the next-page element
    pub selector: String,

    #[serde(default)]
    pub kind: RuleKind,

    /// Attribute holding the next-page link
    #[serde(default = "default_link_attr")]
    pub attr: String,
}

/// One time-of-day blackout window, "HH:MM" endpoints, UTC
#[derive(Debug, Clone, Deserialize)]
pub struct BlackoutSpec {
    pub start: String,
    pub end: String,
}
