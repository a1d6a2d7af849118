//! Pure extraction over parsed documents
//!
//! Everything here takes an HTML string plus compiled rules and returns
//! candidates, field maps, or next-page references. Parsing is best-effort:
//! malformed markup yields whatever the parser salvages, never an error.
//! Nothing in this module performs I/O.

use crate::extract::rules::{
    CompiledField, CompiledListing, CompiledPagination, CompiledStructure, ExtractError,
};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// A candidate item produced by a listing rule: a resolved link plus any
/// inline fields pulled from the listing page itself
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Absolute URL of the item
    pub url: String,
    /// Inline fields from the listing page, keyed by field name
    pub fields: BTreeMap<String, String>,
}

/// Everything a crawl run needs from one listing page
#[derive(Debug)]
pub struct ListingPage {
    /// Candidate items in document order
    pub candidates: Vec<Candidate>,
    /// Absolute next-page URL, if the pagination rule matched one
    pub next_ref: Option<String>,
}

/// Evaluates a target's listing and pagination rules against a page in a
/// single parse
pub fn extract_listing_page(
    html: &str,
    base_url: &Url,
    structure: &CompiledStructure,
) -> ListingPage {
    let document = Html::parse_document(html);
    let candidates = candidates_from(&document, base_url, &structure.listing);
    let next_ref = structure
        .pagination
        .as_ref()
        .and_then(|rule| next_from(&document, base_url, rule));
    ListingPage {
        candidates,
        next_ref,
    }
}

/// Runs a listing rule against a page and returns candidates in document
/// order
///
/// Elements without a resolvable link are skipped with a diagnostic; an
/// item that cannot be addressed cannot be deduplicated or delivered.
/// Missing optional inline fields are omitted from the field map; a missing
/// required inline field drops that candidate only.
///
/// # Arguments
///
/// * `html` - Raw page content
/// * `base_url` - Page URL, for resolving relative links
/// * `listing` - Compiled listing rule
pub fn extract_candidates(html: &str, base_url: &Url, listing: &CompiledListing) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    candidates_from(&document, base_url, listing)
}

fn candidates_from(document: &Html, base_url: &Url, listing: &CompiledListing) -> Vec<Candidate> {
    let matches = listing.rule.select_all(document);

    if matches.is_empty() {
        debug!(page = %base_url, "listing rule matched no elements");
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for element in matches {
        let Some(url) = candidate_link(element, &listing.link_attr, base_url) else {
            debug!(page = %base_url, "listing match without a resolvable link, skipped");
            continue;
        };

        match fields_within(element, &listing.fields) {
            Ok(fields) => candidates.push(Candidate { url, fields }),
            Err(ExtractError::MissingField { field }) => {
                debug!(page = %base_url, field = %field, "candidate missing required inline field, skipped");
            }
            Err(e) => {
                debug!(page = %base_url, error = %e, "candidate field extraction failed, skipped");
            }
        }
    }

    candidates
}

/// Pulls the item link from a matched listing element
///
/// Reads the link attribute off the element itself first, then falls back
/// to the first nested `<a href>` for container-style listing rules.
fn candidate_link(element: ElementRef<'_>, link_attr: &str, base_url: &Url) -> Option<String> {
    if let Some(href) = element.value().attr(link_attr) {
        return resolve_link(href, base_url);
    }

    let anchor = Selector::parse("a[href]").ok()?;
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr(link_attr).or_else(|| a.value().attr("href")))
        .and_then(|href| resolve_link(href, base_url))
}

/// Evaluates named field rules against a candidate's own page
///
/// First match wins for every field. Missing optional fields are omitted;
/// a missing required field fails the candidate with
/// `ExtractError::MissingField`.
///
/// # Arguments
///
/// * `html` - Raw content of the candidate's page
/// * `fields` - Compiled content field rules
pub fn extract_fields(
    html: &str,
    fields: &[CompiledField],
) -> Result<BTreeMap<String, String>, ExtractError> {
    let document = Html::parse_document(html);
    let mut map = BTreeMap::new();

    for field in fields {
        match field_value_from(field.rule.select_first(&document), field) {
            Some(value) => {
                map.insert(field.name.clone(), value);
            }
            None if field.required => {
                return Err(ExtractError::MissingField {
                    field: field.name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(map)
}

/// Runs a pagination rule against a page, returning the next page's
/// absolute URL if one is referenced
pub fn find_next_page(html: &str, base_url: &Url, pagination: &CompiledPagination) -> Option<String> {
    let document = Html::parse_document(html);
    next_from(&document, base_url, pagination)
}

fn next_from(document: &Html, base_url: &Url, pagination: &CompiledPagination) -> Option<String> {
    let element = pagination.rule.select_first(document)?;
    let href = element.value().attr(&pagination.attr)?;
    resolve_link(href, base_url)
}

/// Field extraction scoped to one listing element
fn fields_within(
    element: ElementRef<'_>,
    fields: &[CompiledField],
) -> Result<BTreeMap<String, String>, ExtractError> {
    let mut map = BTreeMap::new();

    for field in fields {
        let first = field.rule.select_within(element).into_iter().next();
        match field_value_from(first, field) {
            Some(value) => {
                map.insert(field.name.clone(), value);
            }
            None if field.required => {
                return Err(ExtractError::MissingField {
                    field: field.name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(map)
}

/// Reads a field's value from its matched element: a named attribute, or
/// the element's trimmed text
fn field_value_from(element: Option<ElementRef<'_>>, field: &CompiledField) -> Option<String> {
    let element = element?;
    let value = match &field.attr {
        Some(attr) => element.value().attr(attr)?.trim().to_string(),
        None => element.text().collect::<String>().trim().to_string(),
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only anchors
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    // Skip empty hrefs
    if href.is_empty() {
        return None;
    }

    // Skip special schemes
    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    // Skip fragment-only links (same page anchors)
    if href.starts_with('#') {
        return None;
    }

    // Try to resolve the URL
    match base_url.join(href) {
        Ok(absolute_url) => {
            // Only accept HTTP and HTTPS URLs
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleKind;
    use crate::extract::rules::CompiledRule;

    fn base_url() -> Url {
        Url::parse("https://example.com/jobs").unwrap()
    }

    fn listing(selector: &str) -> CompiledListing {
        CompiledListing {
            rule: CompiledRule::compile(RuleKind::Css, selector).unwrap(),
            link_attr: "href".to_string(),
            fields: vec![],
        }
    }

    fn field(name: &str, selector: &str, required: bool) -> CompiledField {
        CompiledField {
            name: name.to_string(),
            rule: CompiledRule::compile(RuleKind::Css, selector).unwrap(),
            attr: None,
            required,
        }
    }

    #[test]
    fn test_candidates_in_document_order() {
        let html = r#"<html><body>
            <a class="job-listing-link" href="/jobs/1">First</a>
            <a class="job-listing-link" href="/jobs/2">Second</a>
            <a class="job-listing-link" href="/jobs/3">Third</a>
        </body></html>"#;

        let candidates = extract_candidates(html, &base_url(), &listing("a.job-listing-link"));
        let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/jobs/1",
                "https://example.com/jobs/2",
                "https://example.com/jobs/3"
            ]
        );
    }

    #[test]
    fn test_candidate_without_link_skipped() {
        let html = r#"<html><body>
            <a class="job-listing-link" href="/jobs/1">Linked</a>
            <a class="job-listing-link">No href</a>
        </body></html>"#;

        let candidates = extract_candidates(html, &base_url(), &listing("a.job-listing-link"));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_container_listing_uses_nested_anchor() {
        let html = r#"<html><body>
            <div class="job"><a href="/jobs/1">One</a></div>
            <div class="job"><a href="/jobs/2">Two</a></div>
        </body></html>"#;

        let candidates = extract_candidates(html, &base_url(), &listing("div.job"));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url, "https://example.com/jobs/1");
    }

    #[test]
    fn test_inline_fields_extracted_within_element() {
        let html = r#"<html><body>
            <div class="job"><a href="/jobs/1">x</a><span class="when">today</span></div>
            <div class="job"><a href="/jobs/2">y</a></div>
        </body></html>"#;

        let mut spec = listing("div.job");
        spec.fields = vec![field("when", "span.when", false)];

        let candidates = extract_candidates(html, &base_url(), &spec);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].fields.get("when").map(String::as_str), Some("today"));
        // Missing optional inline field is omitted, not an error
        assert!(candidates[1].fields.get("when").is_none());
    }

    #[test]
    fn test_malformed_markup_is_best_effort() {
        let html = r#"<html><body><a class="job-listing-link" href="/jobs/1">Broken<div><span>"#;
        let candidates = extract_candidates(html, &base_url(), &listing("a.job-listing-link"));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_no_matches_yields_empty() {
        let html = r#"<html><body><p>nothing here</p></body></html>"#;
        let candidates = extract_candidates(html, &base_url(), &listing("a.job-listing-link"));
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_extract_fields_first_match_wins() {
        let html = r#"<html><body>
            <h2 class="job-title">First Title</h2>
            <h2 class="job-title">Second Title</h2>
        </body></html>"#;

        let fields = vec![field("title", "h2.job-title", false)];
        let map = extract_fields(html, &fields).unwrap();
        assert_eq!(map.get("title").map(String::as_str), Some("First Title"));
    }

    #[test]
    fn test_extract_fields_missing_optional_omitted() {
        let html = r#"<html><body><p>no title here</p></body></html>"#;
        let fields = vec![field("title", "h2.job-title", false)];
        let map = extract_fields(html, &fields).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_extract_fields_missing_required_errors() {
        let html = r#"<html><body><p>no title here</p></body></html>"#;
        let fields = vec![field("title", "h2.job-title", true)];
        let err = extract_fields(html, &fields).unwrap_err();
        assert!(matches!(err, ExtractError::MissingField { .. }));
    }

    #[test]
    fn test_extract_fields_trims_text() {
        let html = r#"<html><body><h2 class="job-title">  Spaced Out  </h2></body></html>"#;
        let fields = vec![field("title", "h2.job-title", false)];
        let map = extract_fields(html, &fields).unwrap();
        assert_eq!(map.get("title").map(String::as_str), Some("Spaced Out"));
    }

    #[test]
    fn test_extract_field_from_attribute() {
        let html = r#"<html><body><time class="posted" datetime="2026-01-03">Jan 3</time></body></html>"#;
        let mut date_field = field("posted", "time.posted", false);
        date_field.attr = Some("datetime".to_string());
        let map = extract_fields(html, &[date_field]).unwrap();
        assert_eq!(map.get("posted").map(String::as_str), Some("2026-01-03"));
    }

    #[test]
    fn test_find_next_page() {
        let html = r#"<html><body><a class="next" href="?page=2">Next</a></body></html>"#;
        let pagination = CompiledPagination {
            rule: CompiledRule::compile(RuleKind::Css, "a.next").unwrap(),
            attr: "href".to_string(),
        };
        let next = find_next_page(html, &base_url(), &pagination);
        assert_eq!(next.as_deref(), Some("https://example.com/jobs?page=2"));
    }

    #[test]
    fn test_find_next_page_absent() {
        let html = r#"<html><body><p>last page</p></body></html>"#;
        let pagination = CompiledPagination {
            rule: CompiledRule::compile(RuleKind::Css, "a.next").unwrap(),
            attr: "href".to_string(),
        };
        assert!(find_next_page(html, &base_url(), &pagination).is_none());
    }

    #[test]
    fn test_listing_page_single_parse() {
        let html = r#"<html><body>
            <a class="job-listing-link" href="/jobs/1">One</a>
            <a class="job-listing-link" href="/jobs/2">Two</a>
            <a class="next" href="?page=2">Next</a>
        </body></html>"#;

        let structure = CompiledStructure {
            listing: listing("a.job-listing-link"),
            content_fields: vec![],
            pagination: Some(CompiledPagination {
                rule: CompiledRule::compile(RuleKind::Css, "a.next").unwrap(),
                attr: "href".to_string(),
            }),
        };

        let page = extract_listing_page(html, &base_url(), &structure);
        assert_eq!(page.candidates.len(), 2);
        assert_eq!(page.next_ref.as_deref(), Some("https://example.com/jobs?page=2"));
    }

    #[test]
    fn test_listing_page_without_pagination_rule() {
        let html = r#"<html><body><a class="job-listing-link" href="/jobs/1">One</a></body></html>"#;
        let structure = CompiledStructure {
            listing: listing("a.job-listing-link"),
            content_fields: vec![],
            pagination: None,
        };

        let page = extract_listing_page(html, &base_url(), &structure);
        assert_eq!(page.candidates.len(), 1);
        assert!(page.next_ref.is_none());
    }

    #[test]
    fn test_resolve_link_rules() {
        let base = base_url();
        assert_eq!(
            resolve_link("/x", &base),
            Some("https://example.com/x".to_string())
        );
        assert!(resolve_link("javascript:void(0)", &base).is_none());
        assert!(resolve_link("mailto:a@b.com", &base).is_none());
        assert!(resolve_link("tel:+123", &base).is_none());
        assert!(resolve_link("data:text/html,x", &base).is_none());
        assert!(resolve_link("#anchor", &base).is_none());
        assert!(resolve_link("", &base).is_none());
    }
}
