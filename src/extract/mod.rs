//! Selector engine: compiled rules, pure extraction, item fingerprints
//!
//! Rules come in two kinds, CSS selectors and rooted tag paths, and are
//! compiled once per target at startup. Extraction itself is pure: parsed
//! document in, candidates and field maps out, with no I/O and no failures
//! beyond an explicitly missing required field.

mod engine;
mod fingerprint;
mod rules;

pub use engine::{
    extract_candidates, extract_fields, extract_listing_page, find_next_page, Candidate,
    ListingPage,
};
pub use fingerprint::{fingerprint_url, normalize_item_url};
pub use rules::{
    CompiledField, CompiledListing, CompiledPagination, CompiledRule, CompiledStructure,
    ExtractError, PathExpr,
};
