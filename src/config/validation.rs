use crate::config::types::{
    BrowserConfig, Config, EngineConfig, FetchConfig, FieldSpec, NotifyConfig, ProxyConfig,
    RuleKind, StorageConfig, TargetConfig, UserAgentConfig,
};
use crate::extract::PathExpr;
use crate::schedule::BlackoutWindow;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_fetch_config(&config.fetch)?;
    validate_browser_config(&config.browser)?;
    validate_proxy_config(&config.proxy)?;
    validate_notify_config(&config.notify)?;
    validate_storage_config(&config.storage)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_targets(config)?;
    Ok(())
}

/// Validates engine configuration
///
/// Upper bounds keep every configured duration inside the range the
/// schedule arithmetic can represent.
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.tick_interval_secs < 1 || config.tick_interval_secs > 3600 {
        return Err(ConfigError::Validation(format!(
            "tick-interval-secs must be between 1 and 3600, got {}",
            config.tick_interval_secs
        )));
    }

    if config.max_concurrent_runs < 1 || config.max_concurrent_runs > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-runs must be between 1 and 100, got {}",
            config.max_concurrent_runs
        )));
    }

    if config.content_fanout < 1 {
        return Err(ConfigError::Validation(
            "content-fanout must be >= 1".to_string(),
        ));
    }

    if config.run_timeout_secs < 1 || config.run_timeout_secs > 86_400 {
        return Err(ConfigError::Validation(format!(
            "run-timeout-secs must be between 1 and 86400, got {}",
            config.run_timeout_secs
        )));
    }

    if config.defer_retry_secs > 86_400 {
        return Err(ConfigError::Validation(format!(
            "defer-retry-secs must be at most 86400, got {}",
            config.defer_retry_secs
        )));
    }

    if config.jitter_max_secs > 3600 {
        return Err(ConfigError::Validation(format!(
            "jitter-max-secs must be at most 3600, got {}",
            config.jitter_max_secs
        )));
    }

    if config.stale_run_secs > 604_800 {
        return Err(ConfigError::Validation(format!(
            "stale-run-secs must be at most 604800, got {}",
            config.stale_run_secs
        )));
    }

    if config.retention_days < 1 || config.retention_days > 3650 {
        return Err(ConfigError::Validation(format!(
            "retention-days must be between 1 and 3650, got {}",
            config.retention_days
        )));
    }

    if config.sweep_interval_secs < 1 || config.sweep_interval_secs > 86_400 {
        return Err(ConfigError::Validation(format!(
            "sweep-interval-secs must be between 1 and 86400, got {}",
            config.sweep_interval_secs
        )));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) must not exceed backoff-max-ms ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    if !(1..=300).contains(&config.request_timeout_secs)
        || !(1..=300).contains(&config.connect_timeout_secs)
    {
        return Err(ConfigError::Validation(
            "fetch timeouts must be between 1 and 300 seconds".to_string(),
        ));
    }

    Ok(())
}

/// Validates browser pool configuration
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    for endpoint in &config.endpoints {
        let url = Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid browser endpoint '{}': {}", endpoint, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Browser endpoint '{}' must use http or https",
                endpoint
            )));
        }
    }

    if config.lease_wait_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "lease-wait-secs must be at most 600, got {}",
            config.lease_wait_secs
        )));
    }

    if config.render_timeout_secs < 1 || config.render_timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "render-timeout-secs must be between 1 and 600, got {}",
            config.render_timeout_secs
        )));
    }

    Ok(())
}

/// Validates proxy pool configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for endpoint in &config.endpoints {
        Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy endpoint '{}': {}", endpoint, e))
        })?;
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure-threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_secs > 86_400 {
        return Err(ConfigError::Validation(format!(
            "cooldown-secs must be at most 86400, got {}",
            config.cooldown_secs
        )));
    }

    Ok(())
}

/// Validates notification configuration
fn validate_notify_config(config: &NotifyConfig) -> Result<(), ConfigError> {
    if let Some(url) = &config.webhook_url {
        Url::parse(url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webhook-url: {}", e)))?;
    }

    if config.default_template.is_empty() {
        return Err(ConfigError::Validation(
            "default-template cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 || config.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "notify timeout-secs must be between 1 and 300, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate agent name: non-empty, alphanumeric + hyphens only
    if config.agent_name.is_empty() {
        return Err(ConfigError::Validation(
            "agent-name cannot be empty".to_string(),
        ));
    }

    if !config
        .agent_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "agent-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.agent_name
        )));
    }

    // Validate contact URL
    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    // Validate contact email (basic validation)
    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates the target list: non-empty, unique slugs, each target sound
fn validate_targets(config: &Config) -> Result<(), ConfigError> {
    if config.targets.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[target]] must be configured".to_string(),
        ));
    }

    let mut slugs = HashSet::new();
    for target in &config.targets {
        if !slugs.insert(target.slug.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate target slug '{}'",
                target.slug
            )));
        }
        validate_target(target, config)?;
    }

    Ok(())
}

/// Validates a single target entry
fn validate_target(target: &TargetConfig, config: &Config) -> Result<(), ConfigError> {
    if target.slug.is_empty() {
        return Err(ConfigError::Validation(
            "Target slug cannot be empty".to_string(),
        ));
    }

    if !target
        .slug
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Target slug '{}' must contain only alphanumeric characters, hyphens, and underscores",
            target.slug
        )));
    }

    if target.name.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Target '{}' must have a non-empty name",
            target.slug
        )));
    }

    let url = Url::parse(&target.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Target '{}' URL '{}': {}", target.slug, target.url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Target '{}' URL must use http or https",
            target.slug
        )));
    }

    // A year-plus interval is a typo, and an unbounded one would overflow
    // the schedule arithmetic
    if target.interval_minutes < 1 || target.interval_minutes > 527_040 {
        return Err(ConfigError::Validation(format!(
            "Target '{}': interval-minutes must be between 1 and 527040, got {}",
            target.slug, target.interval_minutes
        )));
    }

    if target.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "Target '{}': max-pages must be >= 1",
            target.slug
        )));
    }

    if let Some(timeout) = target.timeout_secs {
        if !(1..=86_400).contains(&timeout) {
            return Err(ConfigError::Validation(format!(
                "Target '{}': timeout-secs must be between 1 and 86400, got {}",
                target.slug, timeout
            )));
        }
    }

    // Policies must have the resources they need
    if target.proxy.uses_pool() && config.proxy.endpoints.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Target '{}' uses a proxy policy but [proxy] has no endpoints",
            target.slug
        )));
    }

    if target.requires_browser && config.browser.endpoints.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Target '{}' requires a browser but [browser] has no endpoints",
            target.slug
        )));
    }

    // Blackout windows must parse; equal endpoints would be a zero- or
    // all-day window, neither of which is expressible on purpose
    for window in &target.blackout {
        BlackoutWindow::parse(&window.start, &window.end).map_err(|e| {
            ConfigError::Validation(format!("Target '{}' blackout: {}", target.slug, e))
        })?;
    }

    // All rules must compile so a typo surfaces at load, not mid-run
    validate_rule(&target.slug, "listing.selector", target.listing.kind, &target.listing.selector)?;
    validate_fields(&target.slug, "listing.fields", &target.listing.fields)?;
    validate_fields(&target.slug, "content-fields", &target.content_fields)?;
    if let Some(pagination) = &target.pagination {
        validate_rule(
            &target.slug,
            "pagination.selector",
            pagination.kind,
            &pagination.selector,
        )?;
    }

    Ok(())
}

/// Validates a set of field rules: unique non-empty names, compiling selectors
fn validate_fields(slug: &str, context: &str, fields: &[FieldSpec]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for field in fields {
        if field.name.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Target '{}': {} entry has an empty name",
                slug, context
            )));
        }
        if !names.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Target '{}': duplicate field name '{}' in {}",
                slug, field.name, context
            )));
        }
        validate_rule(slug, &format!("{}.{}", context, field.name), field.kind, &field.selector)?;
    }
    Ok(())
}

/// Checks that a rule string compiles in its declared dialect
fn validate_rule(slug: &str, context: &str, kind: RuleKind, selector: &str) -> Result<(), ConfigError> {
    if selector.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Target '{}': {} cannot be empty",
            slug, context
        )));
    }

    match kind {
        RuleKind::Css => {
            Selector::parse(selector).map_err(|e| {
                ConfigError::Validation(format!(
                    "Target '{}': {} is not a valid CSS selector ('{}'): {:?}",
                    slug, context, selector, e
                ))
            })?;
        }
        RuleKind::Path => {
            PathExpr::parse(selector).map_err(|e| {
                ConfigError::Validation(format!(
                    "Target '{}': {} is not a valid path expression ('{}'): {}",
                    slug, context, selector, e
                ))
            })?;
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact-email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{BlackoutSpec, ListingSpec, ProxyPolicy};

    fn test_target() -> TargetConfig {
        TargetConfig {
            slug: "jobs".to_string(),
            name: "Example Jobs".to_string(),
            url: "https://example.com/jobs".to_string(),
            interval_minutes: 30,
            enabled: true,
            requires_browser: false,
            proxy: ProxyPolicy::None,
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

    fn test_config() -> Config {
        Config {
            engine: EngineConfig::default(),
            fetch: FetchConfig::default(),
            browser: BrowserConfig::default(),
            proxy: ProxyConfig::default(),
            notify: NotifyConfig::default(),
            storage: StorageConfig {
                database_path: "./vedette.db".to_string(),
            },
            user_agent: UserAgentConfig {
                agent_name: "TestWatcher".to_string(),
                agent_version: "1.0".to_string(),
                contact_url: "https://example.com/about".to_string(),
                contact_email: "admin@example.com".to_string(),
            },
            targets: vec![test_target()],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&test_config()).is_ok());
    }

    #[test]
    fn test_no_targets_rejected() {
        let mut config = test_config();
        config.targets.clear();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let mut config = test_config();
        config.targets.push(test_target());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate target slug"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = test_config();
        config.targets[0].interval_minutes = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let mut config = test_config();
        config.targets[0].interval_minutes = u64::MAX / 60_000;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("interval-minutes"));
    }

    #[test]
    fn test_oversized_target_timeout_rejected() {
        let mut config = test_config();
        config.targets[0].timeout_secs = Some(u64::MAX);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oversized_engine_durations_rejected() {
        let mut config = test_config();
        config.engine.jitter_max_secs = 1 << 40;
        assert!(validate(&config).is_err());

        let mut config = test_config();
        config.engine.defer_retry_secs = u64::MAX / 2;
        assert!(validate(&config).is_err());

        let mut config = test_config();
        config.engine.run_timeout_secs = u64::MAX;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_slug_rejected() {
        let mut config = test_config();
        config.targets[0].slug = "bad slug!".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut config = test_config();
        config.targets[0].url = "ftp://example.com/jobs".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_css_selector_rejected() {
        let mut config = test_config();
        config.targets[0].listing.selector = "a[".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_path_expression_rejected() {
        let mut config = test_config();
        config.targets[0].listing.kind = RuleKind::Path;
        config.targets[0].listing.selector = "not-a-path".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_valid_path_expression_accepted() {
        let mut config = test_config();
        config.targets[0].listing.kind = RuleKind::Path;
        config.targets[0].listing.selector = "/html/body/div[2]/ul/li/a".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_proxy_policy_without_endpoints_rejected() {
        let mut config = test_config();
        config.targets[0].proxy = ProxyPolicy::Rotate;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("no endpoints"));
    }

    #[test]
    fn test_browser_requirement_without_endpoints_rejected() {
        let mut config = test_config();
        config.targets[0].requires_browser = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blackout_equal_endpoints_rejected() {
        let mut config = test_config();
        config.targets[0].blackout = vec![BlackoutSpec {
            start: "06:00".to_string(),
            end: "06:00".to_string(),
        }];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blackout_midnight_wrap_accepted() {
        let mut config = test_config();
        config.targets[0].blackout = vec![BlackoutSpec {
            start: "22:00".to_string(),
            end: "06:00".to_string(),
        }];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_field_name_rejected() {
        let mut config = test_config();
        let field = FieldSpec {
            name: "title".to_string(),
            selector: "h2".to_string(),
            kind: RuleKind::Css,
            attr: None,
            required: false,
        };
        config.targets[0].content_fields = vec![field.clone(), field];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
    }
}
