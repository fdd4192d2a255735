//! The hit stream engine: incremental, budget-bounded retrieval of match
//! occurrences, with random-access semantics over a partially filled buffer
//! and derived views (window, sample, sort) layered on top.

mod contexts;
mod fetch;
mod views;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::ExecContext;
use crate::doc;
use crate::error::{Result, SearchError};
use crate::index::Index;
use crate::kwic::{Concordance, Kwic};
use crate::pattern::TextPattern;
use crate::query::{CaptureVec, CompiledQuery};
use crate::{ConcordanceSource, Hit, SearchSettings, Span};

pub use contexts::{TermFrequency, TermFrequencyList};
pub use views::{HitProperty, SampleSpec};

use fetch::FetchState;

/// Mutable stream state, one per query execution, guarded by the `Hits`
/// mutex. Counters only ever grow; the sticky flags never reset.
struct HitsState<'a> {
    hits: Vec<Hit>,
    /// Parallel to `hits`; only populated when the query captures groups.
    captured: Vec<CaptureVec>,
    hits_counted: u64,
    docs_counted: u64,
    docs_retrieved: u64,
    previous_doc: Option<u32>,
    max_hits_retrieved: bool,
    max_hits_counted: bool,
    source_exhausted: bool,
    /// Permutation over `hits` indices; `None` means original order.
    sort_order: Option<Vec<u32>>,
    fetch: Option<FetchState<'a>>,
}

impl<'a> HitsState<'a> {
    fn empty() -> HitsState<'a> {
        HitsState {
            hits: Vec::new(),
            captured: Vec::new(),
            hits_counted: 0,
            docs_counted: 0,
            docs_retrieved: 0,
            previous_doc: None,
            max_hits_retrieved: false,
            max_hits_counted: false,
            source_exhausted: false,
            sort_order: None,
            fetch: None,
        }
    }

    fn done(&self) -> bool {
        self.source_exhausted || self.max_hits_counted
    }

    /// Raw buffer index for logical index `i` under the current sort order.
    fn raw_index(&self, i: usize) -> Option<usize> {
        match &self.sort_order {
            Some(order) => order.get(i).map(|&r| r as usize),
            None => (i < self.hits.len()).then_some(i),
        }
    }
}

/// A lazily materialized set of hits for one query execution.
///
/// All accessors pull from the underlying span source exactly as far as the
/// request demands and no further; two independent budgets
/// ([`SearchSettings::max_to_retrieve`], [`SearchSettings::max_to_count`])
/// bound how much is kept and how much is counted.
pub struct Hits<'a> {
    index: &'a dyn Index,
    settings: SearchSettings,
    query: Option<Arc<CompiledQuery>>,
    capture_names: Vec<String>,
    state: Mutex<HitsState<'a>>,
}

impl<'a> Hits<'a> {
    /// Rewrite and translate a pattern against the index's main field, then
    /// set up a (not yet started) pull over all segments.
    pub fn from_pattern(
        index: &'a dyn Index,
        pattern: TextPattern,
        settings: SearchSettings,
    ) -> Result<Hits<'a>> {
        let ctx = ExecContext::new(index)?;
        let query = pattern.compile(&ctx)?;
        Ok(Hits::from_query(index, query, settings))
    }

    /// Set up a lazy pull for an already compiled query.
    pub fn from_query(
        index: &'a dyn Index,
        query: CompiledQuery,
        settings: SearchSettings,
    ) -> Hits<'a> {
        let query = Arc::new(query);
        let mut state = HitsState::empty();
        state.fetch = Some(FetchState::new(query.clone()));
        Hits {
            index,
            settings,
            capture_names: query.capture_names().to_vec(),
            query: Some(query),
            state: Mutex::new(state),
        }
    }

    /// Drain every segment in parallel, then apply the budgets to the merged,
    /// segment-ordered occurrence list.
    pub fn from_query_parallel(
        index: &'a dyn Index,
        query: CompiledQuery,
        settings: SearchSettings,
    ) -> Result<Hits<'a>> {
        let query = Arc::new(query);
        let mut state = HitsState::empty();
        fetch::drain_parallel(index, &query, &settings, &mut state)?;
        Ok(Hits {
            index,
            settings,
            capture_names: query.capture_names().to_vec(),
            query: Some(query),
            state: Mutex::new(state),
        })
    }

    /// A fully materialized hit list (no source to pull from). Counters are
    /// derived from the list itself.
    pub fn from_list(index: &'a dyn Index, hits: Vec<Hit>, settings: SearchSettings) -> Hits<'a> {
        Hits::from_parts(index, hits, Vec::new(), Vec::new(), settings)
    }

    fn from_parts(
        index: &'a dyn Index,
        hits: Vec<Hit>,
        captured: Vec<CaptureVec>,
        capture_names: Vec<String>,
        settings: SearchSettings,
    ) -> Hits<'a> {
        let mut state = HitsState::empty();
        state.hits_counted = hits.len() as u64;
        let mut docs = 0u64;
        let mut previous = None;
        for hit in &hits {
            if previous != Some(hit.doc) {
                docs += 1;
                previous = Some(hit.doc);
            }
        }
        state.docs_counted = docs;
        state.docs_retrieved = docs;
        state.previous_doc = previous;
        state.source_exhausted = true;
        state.hits = hits;
        state.captured = captured;
        Hits {
            index,
            settings,
            query: None,
            capture_names,
            state: Mutex::new(state),
        }
    }

    pub fn index(&self) -> &'a dyn Index {
        self.index
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HitsState<'a>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Guarantee at least `n` hits are buffered, or the source is exhausted,
    /// or the count limit triggered, whichever comes first. Idempotent past
    /// the point already reached.
    pub fn ensure_read(&self, n: u64) -> Result<()> {
        let mut state = self.lock();
        fetch::ensure_read(self.index, &self.settings, &mut state, n)
    }

    fn ensure_all_read(&self) -> Result<()> {
        self.ensure_read(u64::MAX)
    }

    /// The hit at logical index `i`, or `None` past the end of the stream.
    pub fn get(&self, i: usize) -> Result<Option<Hit>> {
        self.ensure_read(i as u64 + 1)?;
        let state = self.lock();
        Ok(state.raw_index(i).map(|r| state.hits[r]))
    }

    /// Number of hits retrieved (forces a full drain).
    pub fn size(&self) -> Result<u64> {
        self.ensure_all_read()?;
        Ok(self.lock().hits.len() as u64)
    }

    /// Number of hits counted (forces a full drain). Differs from [`size`]
    /// exactly when the retrieve budget triggered before the count budget.
    ///
    /// [`size`]: Hits::size
    pub fn total_size(&self) -> Result<u64> {
        self.ensure_all_read()?;
        Ok(self.lock().hits_counted)
    }

    /// Cheap existence probe: are there at least `n` hits? Does not commit
    /// to counting the rest.
    pub fn size_at_least(&self, n: u64) -> Result<bool> {
        self.ensure_read(n)?;
        Ok(self.lock().hits.len() as u64 >= n)
    }

    pub fn done_fetching(&self) -> bool {
        self.lock().done()
    }

    pub fn count_so_far_hits_counted(&self) -> u64 {
        self.lock().hits_counted
    }

    pub fn count_so_far_hits_retrieved(&self) -> u64 {
        self.lock().hits.len() as u64
    }

    pub fn count_so_far_docs_counted(&self) -> u64 {
        self.lock().docs_counted
    }

    pub fn count_so_far_docs_retrieved(&self) -> u64 {
        self.lock().docs_retrieved
    }

    /// Did the retrieve budget trigger?
    pub fn max_hits_retrieved(&self) -> bool {
        self.lock().max_hits_retrieved
    }

    /// Did the count budget trigger?
    pub fn max_hits_counted(&self) -> bool {
        self.lock().max_hits_counted
    }

    pub fn has_captured_groups(&self) -> bool {
        !self.capture_names.is_empty()
    }

    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }

    /// The capture spans of the hit at logical index `i`, one slot per
    /// capture name, or `None` when the query has no captures or `i` is out
    /// of range.
    pub fn captured_groups(&self, i: usize) -> Result<Option<Vec<Option<Span>>>> {
        if !self.has_captured_groups() {
            return Ok(None);
        }
        self.ensure_read(i as u64 + 1)?;
        let state = self.lock();
        Ok(state
            .raw_index(i)
            .and_then(|r| state.captured.get(r))
            .map(|caps| caps.iter().copied().collect()))
    }

    /// The page `[first, first + size)` of this hit set, clamped to the hits
    /// available. `first` past the end of a non-empty set is an error.
    pub fn window(&self, first: u64, size: u64) -> Result<Hits<'a>> {
        views::window(self, first, size)
    }

    /// Uniform sample without replacement, preserving original order.
    /// Requires a full drain.
    pub fn sample(&self, spec: SampleSpec, seed: u64) -> Result<Hits<'a>> {
        views::sample(self, spec, seed)
    }

    /// Sort by a hit property. Requires a full drain; the returned hits keep
    /// the raw buffer order internally and sort through a permutation.
    pub fn sorted_by(&self, property: &HitProperty, reverse: bool) -> Result<Hits<'a>> {
        views::sorted_by(self, property, reverse)
    }

    /// The hit at logical index `i` rendered as annotated context tokens.
    pub fn kwic(&self, i: usize) -> Result<Kwic> {
        let hit = self
            .get(i)?
            .ok_or_else(|| SearchError::WindowOutOfRange {
                first: i as u64,
                available: self.lock().hits.len() as u64,
            })?;
        contexts::kwic(self.index, &self.settings, hit)
    }

    /// The hit at logical index `i` rendered as left/hit/right fragments,
    /// using the configured concordance strategy.
    pub fn concordance(&self, i: usize) -> Result<Concordance> {
        let hit = self
            .get(i)?
            .ok_or_else(|| SearchError::WindowOutOfRange {
                first: i as u64,
                available: self.lock().hits.len() as u64,
            })?;
        match self.settings.concordances {
            ConcordanceSource::ForwardIndex => {
                Ok(contexts::kwic(self.index, &self.settings, hit)?.to_concordance())
            }
            ConcordanceSource::ContentStore => {
                let mut rendered = doc::concordances_from_content_store(
                    self.index,
                    &self.settings,
                    hit.doc,
                    &[hit],
                )?;
                rendered.pop().ok_or_else(|| {
                    SearchError::MalformedIndex("content store produced no concordance".to_string())
                })
            }
        }
    }

    /// Frequency table over the context tokens around every hit, excluding
    /// the tokens of the hits themselves. Requires a full drain.
    pub fn collocations(&self, annotation: Option<&str>) -> Result<TermFrequencyList> {
        self.ensure_all_read()?;
        let state = self.lock();
        contexts::collocations(self.index, &self.settings, &state.hits, annotation)
    }

    /// Copy of the logical hit order (sorted if a sort is active).
    fn logical_hits(&self) -> (Vec<Hit>, Vec<CaptureVec>) {
        let state = self.lock();
        match &state.sort_order {
            None => (state.hits.clone(), state.captured.clone()),
            Some(order) => {
                let hits = order.iter().map(|&r| state.hits[r as usize]).collect();
                let captured = if state.captured.is_empty() {
                    Vec::new()
                } else {
                    order
                        .iter()
                        .map(|&r| state.captured[r as usize].clone())
                        .collect()
                };
                (hits, captured)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemIndexBuilder;
    use crate::pattern::parse_cql;
    use crate::Budget;

    /// Ten documents; the pattern word occurs in document 3 at word
    /// positions 5 and 9 and in document 7 at position 2.
    fn ten_doc_index() -> crate::mem::MemIndex {
        let mut b = MemIndexBuilder::new();
        for d in 0..10 {
            let text = match d {
                3 => "w0 w1 w2 w3 w4 fox w6 w7 w8 fox",
                7 => "w0 w1 fox w3",
                _ => "w0 w1 w2 w3",
            };
            b = b.add_document(text);
        }
        b.build()
    }

    fn fox_hits(index: &crate::mem::MemIndex, settings: SearchSettings) -> Hits<'_> {
        Hits::from_pattern(index, TextPattern::term("fox"), settings).unwrap()
    }

    #[test]
    fn capped_retrieval_keeps_counting() {
        let index = ten_doc_index();
        let hits = fox_hits(
            &index,
            SearchSettings::default().with_max_to_retrieve(Budget::Max(2)),
        );
        assert_eq!(hits.size().unwrap(), 2);
        assert_eq!(hits.total_size().unwrap(), 3);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(3, 5, 6)));
        assert_eq!(hits.get(1).unwrap(), Some(Hit::new(3, 9, 10)));
        assert_eq!(hits.get(2).unwrap(), None);
        assert_eq!(hits.count_so_far_docs_retrieved(), 1);
        assert_eq!(hits.count_so_far_docs_counted(), 2);
        assert!(hits.max_hits_retrieved());
        assert!(!hits.max_hits_counted());
    }

    #[test]
    fn count_budget_stops_exactly_at_ceiling() {
        let index = ten_doc_index();
        let hits = fox_hits(
            &index,
            SearchSettings::default()
                .with_max_to_retrieve(Budget::Max(1))
                .with_max_to_count(Budget::Max(2)),
        );
        assert_eq!(hits.size().unwrap(), 1);
        assert_eq!(hits.total_size().unwrap(), 2);
        assert!(hits.max_hits_retrieved());
        assert!(hits.max_hits_counted());
    }

    #[test]
    fn unbounded_drain_finds_everything() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        assert_eq!(hits.size().unwrap(), 3);
        assert_eq!(hits.total_size().unwrap(), 3);
        assert!(!hits.max_hits_retrieved());
        assert!(!hits.max_hits_counted());
        assert!(hits.done_fetching());
    }

    #[test]
    fn counters_are_monotonic_across_ensure_read() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        let mut last = (0, 0, 0);
        for n in [1, 1, 2, 3, 100] {
            hits.ensure_read(n).unwrap();
            let now = (
                hits.count_so_far_hits_counted(),
                hits.count_so_far_docs_counted(),
                hits.count_so_far_docs_retrieved(),
            );
            assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2);
            last = now;
        }
    }

    #[test]
    fn hits_arrive_in_doc_position_order() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        let n = hits.size().unwrap() as usize;
        let mut previous = None;
        for i in 0..n {
            let hit = hits.get(i).unwrap().unwrap();
            let key = (hit.doc, hit.start, hit.end);
            if let Some(prev) = previous {
                assert!(key >= prev);
            }
            previous = Some(key);
        }
    }

    #[test]
    fn lazy_pull_stops_at_requested_index() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        assert!(hits.size_at_least(1).unwrap());
        assert!(hits.count_so_far_hits_counted() < 3);
        assert!(!hits.done_fetching());
        assert!(!hits.size_at_least(4).unwrap());
    }

    #[test]
    fn cancellation_leaves_object_inert() {
        let index = ten_doc_index();
        let settings = SearchSettings::default();
        let token = settings.cancel.clone();
        let hits = fox_hits(&index, settings);
        token.cancel();
        assert!(matches!(hits.ensure_read(1), Err(SearchError::Cancelled)));
        assert!(hits.max_hits_retrieved());
        assert!(hits.max_hits_counted());
        let counted = hits.count_so_far_hits_counted();
        // Later calls return immediately without mutating counters.
        hits.ensure_read(100).unwrap();
        assert_eq!(hits.count_so_far_hits_counted(), counted);
    }

    #[test]
    fn parallel_drain_matches_sequential() {
        let mut b = MemIndexBuilder::new().segment_size(1);
        for d in 0..10 {
            let text = match d {
                3 => "w0 w1 w2 w3 w4 fox w6 w7 w8 fox",
                7 => "w0 w1 fox w3",
                _ => "w0 w1 w2 w3",
            };
            b = b.add_document(text);
        }
        let index = b.build();
        let ctx = ExecContext::new(&index).unwrap();
        let query = TextPattern::term("fox").compile(&ctx).unwrap();

        let settings = SearchSettings::default().with_max_to_retrieve(Budget::Max(2));
        let parallel = Hits::from_query_parallel(&index, query.clone(), settings.clone()).unwrap();
        let sequential = Hits::from_query(&index, query, settings);
        assert_eq!(parallel.size().unwrap(), sequential.size().unwrap());
        assert_eq!(parallel.total_size().unwrap(), sequential.total_size().unwrap());
        assert_eq!(parallel.get(0).unwrap(), sequential.get(0).unwrap());
        assert_eq!(parallel.get(1).unwrap(), sequential.get(1).unwrap());
    }

    #[test]
    fn window_clamps_and_rejects_out_of_range() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        let page = hits.window(1, 5).unwrap();
        assert_eq!(page.size().unwrap(), 2);
        assert_eq!(page.get(0).unwrap(), Some(Hit::new(3, 9, 10)));

        assert!(matches!(
            hits.window(3, 1),
            Err(SearchError::WindowOutOfRange { first: 3, .. })
        ));

        let none = Hits::from_pattern(&index, TextPattern::term("absent"), SearchSettings::default())
            .unwrap();
        assert_eq!(none.window(0, 5).unwrap().size().unwrap(), 0);
    }

    #[test]
    fn sampling_rules() {
        let index = MemIndexBuilder::new()
            .add_document("fox fox fox fox")
            .build();
        let hits = fox_hits(&index, SearchSettings::default());
        assert_eq!(hits.sample(SampleSpec::Ratio(0.0), 7).unwrap().size().unwrap(), 0);
        assert_eq!(hits.sample(SampleSpec::Ratio(0.5), 7).unwrap().size().unwrap(), 2);
        // Rounds to zero but a positive ratio keeps at least one hit.
        assert_eq!(hits.sample(SampleSpec::Ratio(0.01), 7).unwrap().size().unwrap(), 1);
        assert_eq!(hits.sample(SampleSpec::Count(99), 7).unwrap().size().unwrap(), 4);
        assert!(hits.sample(SampleSpec::Ratio(1.5), 7).is_err());

        // Samples are order-preserving subsequences of the original.
        let sampled = hits.sample(SampleSpec::Ratio(0.5), 42).unwrap();
        let mut previous = None;
        for i in 0..sampled.size().unwrap() as usize {
            let hit = sampled.get(i).unwrap().unwrap();
            if let Some(prev) = previous {
                assert!((hit.doc, hit.start) > prev);
            }
            previous = Some((hit.doc, hit.start));
        }
    }

    #[test]
    fn sorting_by_doc_with_reversal() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        let sorted = hits.sorted_by(&HitProperty::Doc, true).unwrap();
        assert_eq!(sorted.get(0).unwrap(), Some(Hit::new(7, 2, 3)));
        assert_eq!(sorted.get(2).unwrap(), Some(Hit::new(3, 5, 6)));
        // The underlying buffer keeps original order; only the view sorts.
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(3, 5, 6)));
    }

    #[test]
    fn sorting_by_hit_text() {
        let index = MemIndexBuilder::new()
            .add_document("b d")
            .add_document("a c")
            .build();
        let hits = Hits::from_pattern(
            &index,
            TextPattern::AnyToken { min: 1, max: 1 },
            SearchSettings::default(),
        )
        .unwrap();
        let sorted = hits
            .sorted_by(&HitProperty::HitText { annotation: None }, false)
            .unwrap();
        assert_eq!(sorted.get(0).unwrap(), Some(Hit::new(1, 0, 1)));
        assert_eq!(sorted.get(1).unwrap(), Some(Hit::new(0, 0, 1)));
        assert_eq!(sorted.get(2).unwrap(), Some(Hit::new(1, 1, 2)));
        assert_eq!(sorted.get(3).unwrap(), Some(Hit::new(0, 1, 2)));
    }

    #[test]
    fn no_capture_groups_without_capture_nodes() {
        let index = ten_doc_index();
        let hits = fox_hits(&index, SearchSettings::default());
        assert!(!hits.has_captured_groups());
        assert!(hits.capture_names().is_empty());
        assert_eq!(hits.captured_groups(0).unwrap(), None);
    }

    #[test]
    fn capture_groups_record_spans() {
        let index = MemIndexBuilder::new().add_document("the quick fox").build();
        let pattern = parse_cql(r#"A:"quick" "fox""#).unwrap();
        let hits = Hits::from_pattern(&index, pattern, SearchSettings::default()).unwrap();
        assert_eq!(hits.size().unwrap(), 1);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 1, 3)));
        assert!(hits.has_captured_groups());
        assert_eq!(hits.capture_names(), &["A".to_string()]);
        assert_eq!(
            hits.captured_groups(0).unwrap(),
            Some(vec![Some(Span::new(1, 2))])
        );
    }

    #[test]
    fn forward_index_and_content_store_concordances_agree() {
        let index = MemIndexBuilder::new()
            .add_document("The quick brown fox jumps over the lazy dog.")
            .build();
        let pattern = parse_cql(r#""brown" "fox""#).unwrap();
        let settings = SearchSettings::default().with_context_size(2);

        let forward = Hits::from_pattern(&index, pattern.clone(), settings.clone()).unwrap();
        let from_tokens = forward.concordance(0).unwrap();
        assert_eq!(from_tokens.left, "The quick ");
        assert_eq!(from_tokens.hit, "brown fox");
        assert_eq!(from_tokens.right, " jumps over");

        let settings = settings.with_concordances(ConcordanceSource::ContentStore);
        let store = Hits::from_pattern(&index, pattern, settings).unwrap();
        assert_eq!(store.concordance(0).unwrap(), from_tokens);
    }

    #[test]
    fn missing_offsets_error_when_filling_disabled() {
        // A match past every stored token offset cannot happen with the mem
        // builder, so exercise the fallback path with a doctored hit list.
        let index = MemIndexBuilder::new().add_document("only three words").build();
        let settings = SearchSettings::default()
            .with_concordances(ConcordanceSource::ContentStore)
            .with_fill_missing_offsets(false);
        let hits = Hits::from_list(&index, vec![Hit::new(0, 20, 21)], settings);
        assert!(matches!(
            hits.concordance(0),
            Err(SearchError::MissingCharacterOffsets { doc: 0 })
        ));
    }

    #[test]
    fn collocations_merge_folded_surface_forms() {
        let index = MemIndexBuilder::new()
            .add_document("The quick fox")
            .add_document("the lazy fox")
            .build();
        let hits = fox_hits(&index, SearchSettings::default().with_context_size(2));
        let colloc = hits.collocations(None).unwrap();
        assert_eq!(colloc.frequency("the"), 2);
        assert_eq!(colloc.frequency("quick"), 1);
        assert_eq!(colloc.frequency("lazy"), 1);
        assert_eq!(colloc.frequency("fox"), 0);
        assert_eq!(colloc.get(0).unwrap().term, "the");
    }

    #[test]
    fn lemma_annotation_query() {
        let index = MemIndexBuilder::new()
            .add_document("walked walking fox")
            .build();
        let pattern = parse_cql(r#"[lemma="walk"]"#).unwrap();
        let hits = Hits::from_pattern(&index, pattern, SearchSettings::default()).unwrap();
        assert_eq!(hits.size().unwrap(), 2);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 0, 1)));
        assert_eq!(hits.get(1).unwrap(), Some(Hit::new(0, 1, 2)));
    }

    #[test]
    fn tag_queries_match_element_spans() {
        let index = MemIndexBuilder::new()
            .add_document(r#"plain <ne type="person">John Smith</ne> tail"#)
            .build();
        let hits = Hits::from_pattern(
            &index,
            parse_cql("<ne/>").unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(hits.size().unwrap(), 1);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 1, 3)));

        let by_attr = Hits::from_pattern(
            &index,
            parse_cql(r#"<ne type="person"/>"#).unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(by_attr.size().unwrap(), 1);

        let wrong_attr = Hits::from_pattern(
            &index,
            parse_cql(r#"<ne type="place"/>"#).unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(wrong_attr.size().unwrap(), 0);
    }

    #[test]
    fn repetition_and_gap_queries() {
        let index = MemIndexBuilder::new().add_document("ha ha ha").build();
        let hits = Hits::from_pattern(
            &index,
            parse_cql(r#""ha"{2,3}"#).unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(hits.size().unwrap(), 3);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 0, 2)));
        assert_eq!(hits.get(1).unwrap(), Some(Hit::new(0, 0, 3)));
        assert_eq!(hits.get(2).unwrap(), Some(Hit::new(0, 1, 3)));

        let index = MemIndexBuilder::new().add_document("a x b").build();
        let gap = Hits::from_pattern(
            &index,
            parse_cql(r#""a" [] "b""#).unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(gap.size().unwrap(), 1);
        assert_eq!(gap.get(0).unwrap(), Some(Hit::new(0, 0, 3)));
    }

    #[test]
    fn unbounded_repetition_over_zero_width_tags_terminates() {
        let index = MemIndexBuilder::new().add_document("a <br/> b").build();
        let hits = Hits::from_pattern(
            &index,
            parse_cql("<br/>+").unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(hits.size().unwrap(), 1);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 1, 1)));
    }

    #[test]
    fn quoted_sensitivity_prefix_forces_exact_case() {
        let index = MemIndexBuilder::new().add_document("fox Fox").build();
        let hits = Hits::from_pattern(
            &index,
            parse_cql(r#""(?-i)Fox""#).unwrap(),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(hits.size().unwrap(), 1);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 1, 2)));
    }

    #[test]
    fn negation_complements_token_positions() {
        let index = MemIndexBuilder::new().add_document("a fox b").build();
        let hits = Hits::from_pattern(
            &index,
            TextPattern::not(TextPattern::term("fox")),
            SearchSettings::default(),
        )
        .unwrap();
        assert_eq!(hits.size().unwrap(), 2);
        assert_eq!(hits.get(0).unwrap(), Some(Hit::new(0, 0, 1)));
        assert_eq!(hits.get(1).unwrap(), Some(Hit::new(0, 2, 3)));
    }

    #[test]
    fn broad_expansion_is_rejected() {
        let index = MemIndexBuilder::new()
            .add_document("fog fox")
            .max_clause_count(1)
            .build();
        let err = Hits::from_pattern(
            &index,
            TextPattern::Prefix("fo".into()),
            SearchSettings::default(),
        );
        assert!(matches!(err, Err(SearchError::QueryTooBroad { limit: 1 })));
    }
}
