//! The pull loop: advances the per-segment span cursors exactly as far as a
//! request needs, under the retrieve and count budgets.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::hits::HitsState;
use crate::index::Index;
use crate::query::{CompiledQuery, SegmentSpans, SpanMatch};
use crate::{Hit, SearchSettings};

/// Cursor position of an in-progress pull: which segment we are on and the
/// open span cursor within it.
pub(super) struct FetchState<'a> {
    query: Arc<CompiledQuery>,
    segment: usize,
    spans: Option<SegmentSpans<'a>>,
}

impl<'a> FetchState<'a> {
    pub(super) fn new(query: Arc<CompiledQuery>) -> FetchState<'a> {
        FetchState {
            query,
            segment: 0,
            spans: None,
        }
    }

    /// The next occurrence in (segment, doc, start, end) order, as a global
    /// doc id, or `None` once every segment is exhausted.
    fn next(&mut self, index: &'a dyn Index) -> Option<(u32, SpanMatch)> {
        loop {
            if let Some(spans) = self.spans.as_mut() {
                if let Some((local, m)) = spans.next() {
                    let base = index.segment(self.segment).doc_base();
                    return Some((base + local, m));
                }
                self.spans = None;
                self.segment += 1;
            }
            if self.segment >= index.segment_count() {
                return None;
            }
            self.spans = Some(SegmentSpans::new(
                index.segment(self.segment),
                self.query.clone(),
            ));
        }
    }
}

/// Pull until `n` hits are buffered, the source is exhausted, or the count
/// budget triggers. The caller holds the state lock.
pub(super) fn ensure_read<'a>(
    index: &'a dyn Index,
    settings: &SearchSettings,
    state: &mut HitsState<'a>,
    n: u64,
) -> Result<()> {
    while !state.done() && (state.hits.len() as u64) < n {
        if settings.cancel.is_cancelled() {
            // Closed for good: both flags stick and the cursor is dropped,
            // so later calls return immediately without touching counters.
            state.max_hits_retrieved = true;
            state.max_hits_counted = true;
            state.fetch = None;
            return Err(SearchError::Cancelled);
        }

        // The count limit is checked strictly before consuming the next
        // occurrence, so counting stops exactly at the ceiling.
        if settings.max_to_count.reached(state.hits_counted) {
            state.max_hits_counted = true;
            debug!(counted = state.hits_counted, "count budget reached");
            break;
        }

        let next = match state.fetch.as_mut() {
            Some(fetch) => fetch.next(index),
            None => None,
        };
        match next {
            Some((doc, m)) => process_occurrence(settings, state, doc, m),
            None => {
                state.source_exhausted = true;
                state.fetch = None;
            }
        }
    }
    Ok(())
}

/// Count one occurrence and buffer it if the retrieve budget still allows.
pub(super) fn process_occurrence(
    settings: &SearchSettings,
    state: &mut HitsState<'_>,
    doc: u32,
    m: SpanMatch,
) {
    state.hits_counted += 1;
    if !state.max_hits_retrieved && settings.max_to_retrieve.reached(state.hits.len() as u64) {
        state.max_hits_retrieved = true;
        debug!(retrieved = state.hits.len(), "retrieve budget reached");
    }
    if state.previous_doc != Some(doc) {
        state.docs_counted += 1;
        if !state.max_hits_retrieved {
            state.docs_retrieved += 1;
        }
        state.previous_doc = Some(doc);
    }
    if !state.max_hits_retrieved {
        state.hits.push(Hit::new(doc, m.start, m.end));
        if !m.captures.is_empty() {
            state.captured.push(m.captures);
        }
    }
}

/// Drain all segments on the rayon pool, then replay the merged occurrence
/// list (segments in order) through the same budget accounting as the
/// sequential pull.
pub(super) fn drain_parallel<'a>(
    index: &'a dyn Index,
    query: &Arc<CompiledQuery>,
    settings: &SearchSettings,
    state: &mut HitsState<'a>,
) -> Result<()> {
    let per_segment: Vec<Vec<(u32, SpanMatch)>> = (0..index.segment_count())
        .into_par_iter()
        .map(|ord| {
            let seg = index.segment(ord);
            let base = seg.doc_base();
            let mut spans = SegmentSpans::new(seg, query.clone());
            let mut out = Vec::new();
            while let Some((local, m)) = spans.next() {
                settings.cancel.check()?;
                out.push((base + local, m));
            }
            Ok(out)
        })
        .collect::<Result<_>>()?;

    for (doc, m) in per_segment.into_iter().flatten() {
        if settings.max_to_count.reached(state.hits_counted) {
            state.max_hits_counted = true;
            return Ok(());
        }
        process_occurrence(settings, state, doc, m);
    }
    state.source_exhausted = true;
    Ok(())
}
