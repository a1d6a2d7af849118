//! Selector rule kinds and their compiled forms
//!
//! Rules arrive from configuration as strings in one of two dialects: CSS
//! selectors (handled by scraper) or absolute element paths like
//! `/html/body/div[2]/ul/li/a`. Both compile to a [`CompiledRule`] that can
//! be evaluated against a document or within a single element.

use crate::config::{RuleKind, TargetConfig};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Extraction-specific errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid CSS selector '{selector}': {message}")]
    BadSelector { selector: String, message: String },

    #[error("Invalid path expression '{expr}': {message}")]
    BadPathExpr { expr: String, message: String },

    #[error("Required field '{field}' produced no value")]
    MissingField { field: String },
}

/// One step of a path expression: a tag name with an optional 1-based index
/// among same-tag siblings
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathStep {
    tag: String,
    index: Option<usize>,
}

/// A parsed absolute element path, e.g. `/html/body/div[2]/a`
///
/// Steps walk element children only; an index selects among siblings with
/// the same tag (`div[2]` is the second `div` child), and a step without an
/// index matches all same-tag children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    steps: Vec<PathStep>,
}

impl PathExpr {
    /// Parses a path expression string
    ///
    /// # Arguments
    ///
    /// * `expr` - Expression of the form `/tag/tag[n]/...`
    ///
    /// # Returns
    ///
    /// * `Ok(PathExpr)` - Parsed expression
    /// * `Err(ExtractError)` - Malformed expression
    pub fn parse(expr: &str) -> Result<Self, ExtractError> {
        let bad = |message: &str| ExtractError::BadPathExpr {
            expr: expr.to_string(),
            message: message.to_string(),
        };

        let trimmed = expr.trim();
        if !trimmed.starts_with('/') {
            return Err(bad("must start with '/'"));
        }

        let mut steps = Vec::new();
        for segment in trimmed.split('/').skip(1) {
            if segment.is_empty() {
                return Err(bad("empty path segment"));
            }
            steps.push(Self::parse_step(segment, &bad)?);
        }

        if steps.is_empty() {
            return Err(bad("no path segments"));
        }

        Ok(Self { steps })
    }

    fn parse_step(
        segment: &str,
        bad: &dyn Fn(&str) -> ExtractError,
    ) -> Result<PathStep, ExtractError> {
        let (tag, index) = match segment.find('[') {
            Some(open) => {
                if !segment.ends_with(']') {
                    return Err(bad("unclosed index bracket"));
                }
                let index_str = &segment[open + 1..segment.len() - 1];
                let index: usize = index_str
                    .parse()
                    .map_err(|_| bad("index must be a positive integer"))?;
                if index == 0 {
                    return Err(bad("indexes are 1-based"));
                }
                (&segment[..open], Some(index))
            }
            None => (segment, None),
        };

        if tag.is_empty()
            || !tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(bad("tag names must be alphanumeric"));
        }

        Ok(PathStep {
            tag: tag.to_ascii_lowercase(),
            index,
        })
    }

    /// Evaluates against a whole document; the first step must name the
    /// document's root element (normally `html`)
    pub fn select_document<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        let root = document.root_element();
        let Some((first, rest)) = self.steps.split_first() else {
            return Vec::new();
        };

        if root.value().name() != first.tag || !matches!(first.index, None | Some(1)) {
            return Vec::new();
        }

        descend(vec![root], rest)
    }

    /// Evaluates relative to an element, walking its children
    pub fn select_element<'a>(&self, element: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        descend(vec![element], &self.steps)
    }
}

/// Walks one generation per step, keeping matching children only
fn descend<'a>(mut current: Vec<ElementRef<'a>>, steps: &[PathStep]) -> Vec<ElementRef<'a>> {
    for step in steps {
        let mut next = Vec::new();
        for parent in &current {
            let matching: Vec<ElementRef<'a>> = parent
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == step.tag)
                .collect();
            match step.index {
                Some(i) => {
                    if let Some(el) = matching.get(i - 1) {
                        next.push(*el);
                    }
                }
                None => next.extend(matching),
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

/// A rule compiled into its evaluatable form
#[derive(Debug, Clone)]
pub enum CompiledRule {
    Css(Selector),
    Path(PathExpr),
}

impl CompiledRule {
    /// Compiles a rule string in the given dialect
    pub fn compile(kind: RuleKind, selector: &str) -> Result<Self, ExtractError> {
        match kind {
            RuleKind::Css => Selector::parse(selector)
                .map(Self::Css)
                .map_err(|e| ExtractError::BadSelector {
                    selector: selector.to_string(),
                    message: format!("{:?}", e),
                }),
            RuleKind::Path => PathExpr::parse(selector).map(Self::Path),
        }
    }

    /// All matches in document order
    pub fn select_all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        match self {
            Self::Css(selector) => document.select(selector).collect(),
            Self::Path(path) => path.select_document(document),
        }
    }

    /// First match in document order, for single-valued rules
    pub fn select_first<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        self.select_all(document).into_iter().next()
    }

    /// Matches scoped to one element's subtree (CSS: descendants; path:
    /// children per step)
    pub fn select_within<'a>(&self, element: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match self {
            Self::Css(selector) => element.select(selector).collect(),
            Self::Path(path) => path.select_element(element),
        }
    }
}

/// Compiled named-field rule
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub rule: CompiledRule,
    /// Attribute to read; element text when absent
    pub attr: Option<String>,
    pub required: bool,
}

/// Compiled listing rule: candidate elements plus how to pull the item link
#[derive(Debug, Clone)]
pub struct CompiledListing {
    pub rule: CompiledRule,
    pub link_attr: String,
    pub fields: Vec<CompiledField>,
}

/// Compiled pagination rule
#[derive(Debug, Clone)]
pub struct CompiledPagination {
    pub rule: CompiledRule,
    pub attr: String,
}

/// A target's full rule set, compiled once per run
#[derive(Debug, Clone)]
pub struct CompiledStructure {
    pub listing: CompiledListing,
    pub content_fields: Vec<CompiledField>,
    pub pagination: Option<CompiledPagination>,
}

impl CompiledStructure {
    /// Compiles every rule a target declares
    ///
    /// Config validation already compiled these once, so failures here mean
    /// the config changed shape underneath us; they still surface as
    /// `ExtractError` rather than panicking.
    pub fn compile(target: &TargetConfig) -> Result<Self, ExtractError> {
        let listing = CompiledListing {
            rule: CompiledRule::compile(target.listing.kind, &target.listing.selector)?,
            link_attr: target.listing.link_attr.clone(),
            fields: compile_fields(&target.listing.fields)?,
        };

        let content_fields = compile_fields(&target.content_fields)?;

        let pagination = match &target.pagination {
            Some(spec) => Some(CompiledPagination {
                rule: CompiledRule::compile(spec.kind, &spec.selector)?,
                attr: spec.attr.clone(),
            }),
            None => None,
        };

        Ok(Self {
            listing,
            content_fields,
            pagination,
        })
    }

    /// Whether candidates need a secondary fetch of their own page
    pub fn has_content_rules(&self) -> bool {
        !self.content_fields.is_empty()
    }
}

fn compile_fields(specs: &[crate::config::FieldSpec]) -> Result<Vec<CompiledField>, ExtractError> {
    specs
        .iter()
        .map(|spec| {
            Ok(CompiledField {
                name: spec.name.clone(),
                rule: CompiledRule::compile(spec.kind, &spec.selector)?,
                attr: spec.attr.clone(),
                required: spec.required,
            })
        })
        .collect()
}
