//! Client-side re-filtering of fetched result sets.
//!
//! A caller holding a page of ranked candidates can tighten or loosen the
//! similarity cutoff locally, without another round trip. Browse pages carry
//! no scores, so they pass through untouched.

use crate::catalog::CatalogItem;
use crate::index::SearchHit;

/// Re-apply a similarity threshold to a candidate set.
///
/// Pure and total: the input is never mutated, thresholds outside [0.0, 1.0]
/// are clamped into range (NaN counts as no threshold), and the boundary is
/// inclusive. Relative order is preserved.
pub fn reapply(hits: &[SearchHit], min_score: f32) -> Vec<SearchHit> {
    let cutoff = if min_score.is_nan() {
        0.0
    } else {
        min_score.clamp(0.0, 1.0)
    };

    hits.iter()
        .filter(|hit| hit.similarity >= cutoff)
        .cloned()
        .collect()
}

/// A fetched result set, from the consumer's point of view.
///
/// Only ranked sets carry scores, so only ranked sets respond to `refine`.
#[derive(Debug, Clone)]
pub enum ResultView {
    Ranked(Vec<SearchHit>),
    Browse(Vec<CatalogItem>),
}

impl ResultView {
    pub fn refine(&self, min_score: f32) -> ResultView {
        match self {
            ResultView::Ranked(hits) => ResultView::Ranked(reapply(hits, min_score)),
            ResultView::Browse(items) => ResultView::Browse(items.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ResultView::Ranked(hits) => hits.len(),
            ResultView::Browse(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
