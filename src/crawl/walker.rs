//! Pagination walk state
//!
//! A walker is per-run state fed one observed page at a time. It decides
//! whether the run follows the next-page reference or stops, and why. It
//! performs no fetching itself.

use url::Url;

/// Why a pagination walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page carried no next-page reference
    NoNextRef,
    /// The target's maximum page depth was reached
    MaxDepth,
    /// Consecutive pages yielded no new candidates (early-stop heuristic)
    NoNewItems,
    /// The run's time budget ran out before the walk finished
    BudgetExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NoNextRef => "no-next-ref",
            StopReason::MaxDepth => "max-depth",
            StopReason::NoNewItems => "no-new-items",
            StopReason::BudgetExhausted => "budget-exhausted",
        }
    }
}

/// What the run should do after a page has been processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkDecision {
    /// Fetch the given page next
    Continue(Url),
    /// End the walk
    Stop(StopReason),
}

/// Tracks depth and the zero-new-candidate streak across one run's pages
///
/// `early_stop_pages` is the number of consecutive pages with zero new
/// candidates after which the walk gives up; `0` disables the heuristic.
#[derive(Debug)]
pub struct PaginationWalker {
    max_pages: u32,
    early_stop_pages: u32,
    pages_walked: u32,
    zero_new_streak: u32,
}

impl PaginationWalker {
    pub fn new(max_pages: u32, early_stop_pages: u32) -> Self {
        PaginationWalker {
            max_pages,
            early_stop_pages,
            pages_walked: 0,
            zero_new_streak: 0,
        }
    }

    /// Records one processed page and decides whether the walk continues
    ///
    /// # Arguments
    ///
    /// * `new_items` - Candidates on this page not yet in the dedup store
    /// * `next_ref` - The page's resolved next-page reference, if any
    pub fn observe_page(&mut self, new_items: u32, next_ref: Option<Url>) -> WalkDecision {
        self.pages_walked += 1;
        if new_items == 0 {
            self.zero_new_streak += 1;
        } else {
            self.zero_new_streak = 0;
        }

        if self.early_stop_pages > 0 && self.zero_new_streak >= self.early_stop_pages {
            return WalkDecision::Stop(StopReason::NoNewItems);
        }
        let Some(next) = next_ref else {
            return WalkDecision::Stop(StopReason::NoNextRef);
        };
        if self.pages_walked >= self.max_pages {
            return WalkDecision::Stop(StopReason::MaxDepth);
        }
        WalkDecision::Continue(next)
    }

    /// Pages observed so far in this run
    pub fn pages_walked(&self) -> u32 {
        self.pages_walked
    }
}
