//! Executable query layer: the compiled [`SpanQuery`] tree and its
//! per-segment evaluation into `(doc, start, end)` occurrences, emitted in
//! lexicographic order with capture spans attached.

use std::collections::HashSet;

use smallvec::{smallvec, SmallVec};

use crate::context::AnnotKey;
use crate::index::SegmentReader;
use crate::Span;

/// Per-hit capture array; two slots cover most patterns without spilling.
pub type CaptureVec = SmallVec<[Option<Span>; 2]>;

/// A translated, index-resolved query: the executable tree plus the ordered
/// names of its capture groups (slot `i` holds group `capture_names[i]`).
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    root: SpanQuery,
    capture_names: Vec<String>,
}

impl CompiledQuery {
    pub fn new(root: SpanQuery, capture_names: Vec<String>) -> CompiledQuery {
        CompiledQuery {
            root,
            capture_names,
        }
    }

    pub fn root(&self) -> &SpanQuery {
        &self.root
    }

    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }

    pub fn capture_count(&self) -> usize {
        self.capture_names.len()
    }
}

/// One executable query node. Produced by pattern translation; never built
/// directly by callers.
#[derive(Clone, PartialEq, Debug)]
pub enum SpanQuery {
    /// A single term of one annotation variant. `Or(vec![])` is the
    /// canonical match-nothing query (a term absent from the dictionary).
    Term { key: AnnotKey, term: u32 },
    Or(Vec<SpanQuery>),
    /// Spans matching every include clause and no exclude clause
    /// (position-filter semantics: spans compare by exact (start, end)).
    AndNot {
        include: Vec<SpanQuery>,
        exclude: Vec<SpanQuery>,
    },
    /// Adjacent spans, joined where one ends exactly where the next starts.
    Sequence(Vec<SpanQuery>),
    /// Token complement: single-token spans at every position where the
    /// clause does not start a match.
    Not {
        clause: Box<SpanQuery>,
        ignore_last_token: bool,
    },
    AnyToken {
        min: u32,
        max: u32,
    },
    Expansion {
        clause: Box<SpanQuery>,
        left: bool,
        min: u32,
        max: u32,
    },
    Repetition {
        clause: Box<SpanQuery>,
        min: u32,
        max: u32,
    },
    Capture {
        slot: usize,
        clause: Box<SpanQuery>,
    },
    Tags {
        field: String,
        name: String,
        attrs: Vec<(String, String)>,
    },
}

/// One occurrence within a document: span plus per-slot capture spans.
#[derive(Clone, PartialEq, Debug)]
pub struct SpanMatch {
    pub start: u32,
    pub end: u32,
    pub captures: CaptureVec,
}

impl SpanMatch {
    fn new(start: u32, end: u32, n_captures: usize) -> SpanMatch {
        SpanMatch {
            start,
            end,
            captures: smallvec![None; n_captures],
        }
    }
}

/// Which local documents of a segment can possibly match.
enum DocCandidates {
    All,
    /// Sorted, deduplicated local doc ids.
    Sorted(Vec<u32>),
}

impl DocCandidates {
    fn union(self, other: DocCandidates) -> DocCandidates {
        match (self, other) {
            (DocCandidates::All, _) | (_, DocCandidates::All) => DocCandidates::All,
            (DocCandidates::Sorted(a), DocCandidates::Sorted(b)) => {
                let mut merged = Vec::with_capacity(a.len() + b.len());
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        std::cmp::Ordering::Less => {
                            merged.push(a[i]);
                            i += 1;
                        }
                        std::cmp::Ordering::Greater => {
                            merged.push(b[j]);
                            j += 1;
                        }
                        std::cmp::Ordering::Equal => {
                            merged.push(a[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                merged.extend_from_slice(&a[i..]);
                merged.extend_from_slice(&b[j..]);
                DocCandidates::Sorted(merged)
            }
        }
    }

    fn intersect(self, other: DocCandidates) -> DocCandidates {
        match (self, other) {
            (DocCandidates::All, other) => other,
            (this, DocCandidates::All) => this,
            (DocCandidates::Sorted(a), DocCandidates::Sorted(b)) => {
                let mut out = Vec::with_capacity(a.len().min(b.len()));
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        std::cmp::Ordering::Less => i += 1,
                        std::cmp::Ordering::Greater => j += 1,
                        std::cmp::Ordering::Equal => {
                            out.push(a[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                DocCandidates::Sorted(out)
            }
        }
    }
}

impl SpanQuery {
    fn candidate_docs(&self, seg: &dyn SegmentReader) -> DocCandidates {
        match self {
            SpanQuery::Term { key, term } => {
                DocCandidates::Sorted(seg.term_docs(key, *term).to_vec())
            }
            SpanQuery::Or(clauses) => clauses
                .iter()
                .map(|c| c.candidate_docs(seg))
                .fold(DocCandidates::Sorted(Vec::new()), DocCandidates::union),
            SpanQuery::AndNot { include, .. } if !include.is_empty() => include
                .iter()
                .map(|c| c.candidate_docs(seg))
                .fold(DocCandidates::All, DocCandidates::intersect),
            SpanQuery::Sequence(clauses) => clauses
                .iter()
                .map(|c| c.candidate_docs(seg))
                .fold(DocCandidates::All, DocCandidates::intersect),
            SpanQuery::Expansion { clause, .. }
            | SpanQuery::Repetition { clause, .. }
            | SpanQuery::Capture { clause, .. } => clause.candidate_docs(seg),
            // Complements and position-only queries can match anywhere.
            _ => DocCandidates::All,
        }
    }

    /// All matches of this query in one document, ordered by (start, end),
    /// one match per distinct span.
    fn eval(&self, seg: &dyn SegmentReader, doc: u32, n_captures: usize) -> Vec<SpanMatch> {
        match self {
            SpanQuery::Term { key, term } => seg
                .postings(key, *term, doc)
                .iter()
                .map(|&pos| SpanMatch::new(pos, pos + 1, n_captures))
                .collect(),

            SpanQuery::Or(clauses) => {
                let mut all: Vec<SpanMatch> = Vec::new();
                for clause in clauses {
                    all.extend(clause.eval(seg, doc, n_captures));
                }
                normalize(all)
            }

            SpanQuery::AndNot { include, exclude } => {
                let mut iter = include.iter();
                let mut result = match iter.next() {
                    Some(first) => first.eval(seg, doc, n_captures),
                    None => return Vec::new(),
                };
                for clause in iter {
                    let spans: HashSet<(u32, u32)> = clause
                        .eval(seg, doc, n_captures)
                        .iter()
                        .map(|m| (m.start, m.end))
                        .collect();
                    result.retain(|m| spans.contains(&(m.start, m.end)));
                }
                for clause in exclude {
                    let spans: HashSet<(u32, u32)> = clause
                        .eval(seg, doc, n_captures)
                        .iter()
                        .map(|m| (m.start, m.end))
                        .collect();
                    result.retain(|m| !spans.contains(&(m.start, m.end)));
                }
                result
            }

            SpanQuery::Sequence(clauses) => {
                let mut iter = clauses.iter();
                let mut result = match iter.next() {
                    Some(first) => first.eval(seg, doc, n_captures),
                    None => return Vec::new(),
                };
                for clause in iter {
                    let next = clause.eval(seg, doc, n_captures);
                    result = join_adjacent(&result, &next);
                    if result.is_empty() {
                        break;
                    }
                }
                result
            }

            SpanQuery::Not {
                clause,
                ignore_last_token,
            } => {
                let len = seg.doc_len(doc);
                let effective = if *ignore_last_token {
                    len.saturating_sub(1)
                } else {
                    len
                };
                let starts: HashSet<u32> = clause
                    .eval(seg, doc, n_captures)
                    .iter()
                    .map(|m| m.start)
                    .collect();
                (0..effective)
                    .filter(|pos| !starts.contains(pos))
                    .map(|pos| SpanMatch::new(pos, pos + 1, n_captures))
                    .collect()
            }

            SpanQuery::AnyToken { min, max } => {
                let len = seg.doc_len(doc);
                let mut out = Vec::new();
                for start in 0..len {
                    let max = (*max).min(len - start);
                    for n in (*min).max(1)..=max {
                        out.push(SpanMatch::new(start, start + n, n_captures));
                    }
                }
                out
            }

            SpanQuery::Expansion {
                clause,
                left,
                min,
                max,
            } => {
                let len = seg.doc_len(doc);
                let mut out = Vec::new();
                for m in clause.eval(seg, doc, n_captures) {
                    for extra in *min..=*max {
                        if *left {
                            if extra > m.start {
                                break;
                            }
                            let mut stretched = m.clone();
                            stretched.start = m.start - extra;
                            out.push(stretched);
                        } else {
                            let end = match m.end.checked_add(extra) {
                                Some(end) if end <= len => end,
                                _ => break,
                            };
                            let mut stretched = m.clone();
                            stretched.end = end;
                            out.push(stretched);
                        }
                    }
                }
                normalize(out)
            }

            SpanQuery::Repetition { clause, min, max } => {
                let base = clause.eval(seg, doc, n_captures);
                if base.is_empty() {
                    return Vec::new();
                }
                // Zero-width matches join to themselves without advancing, so
                // they count at level one but never extend a longer level;
                // every join step then makes progress and the loop is bounded
                // by the document length even for an unbounded `max`.
                let step: Vec<SpanMatch> = base
                    .iter()
                    .filter(|m| m.end > m.start)
                    .cloned()
                    .collect();
                let mut out = Vec::new();
                let mut level = base;
                let mut n = 1u32;
                loop {
                    if n >= *min {
                        out.extend(level.iter().cloned());
                    }
                    if n >= *max || level.is_empty() {
                        break;
                    }
                    level = join_adjacent(&level, &step);
                    if level.is_empty() {
                        break;
                    }
                    n += 1;
                }
                normalize(out)
            }

            SpanQuery::Capture { slot, clause } => {
                let mut matches = clause.eval(seg, doc, n_captures);
                for m in &mut matches {
                    m.captures[*slot] = Some(Span::new(m.start, m.end));
                }
                matches
            }

            SpanQuery::Tags { field, name, attrs } => {
                let mut spans: Vec<Span> = seg.tag_spans(field, name, doc).to_vec();
                // Attribute filters keep only tags whose span starts exactly
                // where a matching attribute span starts.
                for (attr, value) in attrs {
                    let starts: HashSet<u32> = seg
                        .tag_attr_spans(field, name, attr, value, doc)
                        .iter()
                        .map(|s| s.start)
                        .collect();
                    spans.retain(|s| starts.contains(&s.start));
                }
                spans
                    .iter()
                    .map(|s| SpanMatch::new(s.start, s.end, n_captures))
                    .collect()
            }
        }
    }
}

/// Sort by (start, end) and drop duplicate spans, keeping the first (its
/// captures win).
fn normalize(mut matches: Vec<SpanMatch>) -> Vec<SpanMatch> {
    matches.sort_by_key(|m| (m.start, m.end));
    matches.dedup_by(|b, a| a.start == b.start && a.end == b.end);
    matches
}

/// All concatenations of a match from `left` with an adjacent match from
/// `right` (left ends where right starts). Captures merge, right wins a slot
/// both filled.
fn join_adjacent(left: &[SpanMatch], right: &[SpanMatch]) -> Vec<SpanMatch> {
    let mut by_start: Vec<&SpanMatch> = right.iter().collect();
    by_start.sort_by_key(|m| m.start);
    let starts: Vec<u32> = by_start.iter().map(|m| m.start).collect();

    let mut out = Vec::new();
    for l in left {
        let from = starts.partition_point(|&s| s < l.end);
        for r in &by_start[from..] {
            if r.start != l.end {
                break;
            }
            let mut joined = l.clone();
            joined.end = r.end;
            for (slot, cap) in r.captures.iter().enumerate() {
                if cap.is_some() {
                    joined.captures[slot] = *cap;
                }
            }
            out.push(joined);
        }
    }
    normalize(out)
}

/// Cursor over one segment's matches for a compiled query, in (doc, start,
/// end) order. Documents are evaluated one at a time, on demand.
pub struct SegmentSpans<'a> {
    seg: &'a dyn SegmentReader,
    query: std::sync::Arc<CompiledQuery>,
    docs: DocCursor,
    current: std::vec::IntoIter<SpanMatch>,
    current_doc: u32,
}

enum DocCursor {
    All { next: u32, count: u32 },
    Sorted(std::vec::IntoIter<u32>),
}

impl DocCursor {
    fn next(&mut self) -> Option<u32> {
        match self {
            DocCursor::All { next, count } => {
                if next < count {
                    let doc = *next;
                    *next += 1;
                    Some(doc)
                } else {
                    None
                }
            }
            DocCursor::Sorted(iter) => iter.next(),
        }
    }
}

impl<'a> SegmentSpans<'a> {
    pub fn new(seg: &'a dyn SegmentReader, query: std::sync::Arc<CompiledQuery>) -> SegmentSpans<'a> {
        let docs = match query.root().candidate_docs(seg) {
            DocCandidates::All => DocCursor::All {
                next: 0,
                count: seg.doc_count(),
            },
            DocCandidates::Sorted(docs) => DocCursor::Sorted(docs.into_iter()),
        };
        SegmentSpans {
            seg,
            query,
            docs,
            current: Vec::new().into_iter(),
            current_doc: 0,
        }
    }

    /// The next occurrence as (local doc id, match), or `None` once the
    /// segment is exhausted.
    pub fn next(&mut self) -> Option<(u32, SpanMatch)> {
        loop {
            if let Some(m) = self.current.next() {
                return Some((self.current_doc, m));
            }
            let doc = self.docs.next()?;
            self.current_doc = doc;
            self.current = self
                .query
                .root()
                .eval(self.seg, doc, self.query.capture_count())
                .into_iter();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn m(start: u32, end: u32) -> SpanMatch {
        SpanMatch::new(start, end, 0)
    }

    #[test]
    fn join_requires_adjacency() {
        let joined = join_adjacent(&[m(0, 2), m(3, 4)], &[m(2, 3), m(5, 6)]);
        assert_eq!(joined, vec![m(0, 3)]);
    }

    #[test]
    fn join_merges_captures() {
        let mut l = SpanMatch::new(0, 1, 2);
        l.captures[0] = Some(Span::new(0, 1));
        let mut r = SpanMatch::new(1, 2, 2);
        r.captures[1] = Some(Span::new(1, 2));
        let joined = join_adjacent(&[l], &[r]);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].captures[0], Some(Span::new(0, 1)));
        assert_eq!(joined[0].captures[1], Some(Span::new(1, 2)));
    }

    #[test]
    fn normalize_orders_and_dedups() {
        let out = normalize(vec![m(2, 3), m(0, 1), m(2, 3), m(0, 2)]);
        assert_eq!(out, vec![m(0, 1), m(0, 2), m(2, 3)]);
    }

    #[test]
    fn doc_candidates_set_ops() {
        let a = DocCandidates::Sorted(vec![1, 3, 5]);
        let b = DocCandidates::Sorted(vec![3, 4, 5, 7]);
        match a.intersect(b) {
            DocCandidates::Sorted(v) => assert_eq!(v, vec![3, 5]),
            DocCandidates::All => panic!("expected sorted"),
        }
        let a = DocCandidates::Sorted(vec![1, 3]);
        let b = DocCandidates::Sorted(vec![2, 3]);
        match a.union(b) {
            DocCandidates::Sorted(v) => assert_eq!(v, vec![1, 2, 3]),
            DocCandidates::All => panic!("expected sorted"),
        }
    }
}
