//! Item fingerprinting
//!
//! A candidate's identity is the SHA-256 of its normalized URL. Normalization
//! collapses the variants a site serves for the same item (scheme, case,
//! tracking parameters, trailing slashes) so the dedup store sees one
//! fingerprint per item rather than one per link spelling.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that carry tracking state rather than item identity
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "source",
];

/// Normalizes an item URL for fingerprinting
///
/// Rules applied:
/// - Scheme and host lowercased, `http` folded into `https`
/// - A leading `www.` dropped from the host
/// - Fragment removed
/// - Tracking parameters removed, remaining parameters sorted by key
/// - Trailing slash removed from non-root paths
///
/// Returns None if the URL does not parse.
pub fn normalize_item_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let mut normalized = parsed.clone();
    normalized.set_fragment(None);

    if normalized.set_host(Some(&host)).is_err() {
        return None;
    }
    if normalized.scheme() == "http" && normalized.set_scheme("https").is_err() {
        return None;
    }

    // Drop tracking parameters and put the rest in a stable order
    let mut params: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        normalized.set_query(None);
    } else {
        let query = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        normalized.set_query(Some(&query));
    }

    let mut result = normalized.to_string();
    if result.ends_with('/') && normalized.path() != "/" {
        result.pop();
    }

    Some(result)
}

/// Computes the dedup fingerprint for an item URL
///
/// The fingerprint is the hex SHA-256 of the normalized URL. URLs that fail
/// to parse fall back to hashing the trimmed raw string, so every candidate
/// gets a stable identity.
pub fn fingerprint_url(raw: &str) -> String {
    let normalized = normalize_item_url(raw).unwrap_or_else(|| raw.trim().to_string());
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_scheme_and_host() {
        assert_eq!(
            normalize_item_url("HTTP://WWW.Example.COM/jobs/1"),
            Some("https://example.com/jobs/1".to_string())
        );
    }

    #[test]
    fn test_normalize_strips_fragment() {
        assert_eq!(
            normalize_item_url("https://example.com/jobs/1#details"),
            Some("https://example.com/jobs/1".to_string())
        );
    }

    #[test]
    fn test_normalize_strips_tracking_params() {
        assert_eq!(
            normalize_item_url("https://example.com/jobs/1?utm_source=feed&utm_campaign=x"),
            Some("https://example.com/jobs/1".to_string())
        );
    }

    #[test]
    fn test_normalize_sorts_remaining_params() {
        assert_eq!(
            normalize_item_url("https://example.com/jobs?page=2&dept=eng"),
            Some("https://example.com/jobs?dept=eng&page=2".to_string())
        );
    }

    #[test]
    fn test_normalize_keeps_meaningful_params_drops_tracking() {
        assert_eq!(
            normalize_item_url("https://example.com/jobs?id=7&fbclid=abc"),
            Some("https://example.com/jobs?id=7".to_string())
        );
    }

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(
            normalize_item_url("https://example.com/jobs/"),
            Some("https://example.com/jobs".to_string())
        );
        // Root path keeps its slash
        assert_eq!(
            normalize_item_url("https://example.com/"),
            Some("https://example.com/".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_item_url("not a url").is_none());
    }

    #[test]
    fn test_fingerprint_is_stable_across_variants() {
        let a = fingerprint_url("http://www.example.com/jobs/1?utm_source=x");
        let b = fingerprint_url("https://example.com/jobs/1#top");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_for_different_items() {
        assert_ne!(
            fingerprint_url("https://example.com/jobs/1"),
            fingerprint_url("https://example.com/jobs/2")
        );
    }

    #[test]
    fn test_fingerprint_handles_unparseable_input() {
        // Falls back to hashing the raw string rather than panicking
        let fp = fingerprint_url("   not a url   ");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint_url("not a url"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint_url("https://example.com/jobs/1");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
