//! HTTP client construction
//!
//! One shared direct client serves plain fetches; the proxy pool builds one
//! client per proxy endpoint at startup so leasing a proxy is just handing
//! out a prebuilt client.

use crate::config::{FetchConfig, UserAgentConfig};
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Builds an HTTP client with the watch engine's identity and timeouts
///
/// When `proxy` is given, all traffic through the client is routed via that
/// proxy endpoint.
///
/// # Arguments
///
/// * `agent` - The user agent configuration
/// * `fetch` - Timeout settings
/// * `proxy` - Optional proxy endpoint URL
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use vedette::config::{FetchConfig, UserAgentConfig};
/// use vedette::fetch::build_http_client;
///
/// let agent = UserAgentConfig {
///     agent_name: "Vedette".to_string(),
///     agent_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&agent, &FetchConfig::default(), None).unwrap();
/// ```
pub fn build_http_client(
    agent: &UserAgentConfig,
    fetch: &FetchConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    // Format: AgentName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        agent.agent_name, agent.agent_version, agent.contact_url, agent.contact_email
    );

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(fetch.request_timeout_secs))
        .connect_timeout(Duration::from_secs(fetch.connect_timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(endpoint) = proxy {
        builder = builder.proxy(Proxy::all(endpoint)?);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_agent() -> UserAgentConfig {
        UserAgentConfig {
            agent_name: "TestWatcher".to_string(),
            agent_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&create_test_agent(), &FetchConfig::default(), None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        let client = build_http_client(
            &create_test_agent(),
            &FetchConfig::default(),
            Some("http://proxy.internal:8080"),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_http_client_rejects_bad_proxy() {
        let client = build_http_client(
            &create_test_agent(),
            &FetchConfig::default(),
            Some("not a proxy url"),
        );
        assert!(client.is_err());
    }
}
