//! Forward-index context extraction: per-hit context arrays, KWIC
//! rendering, and collocation counting over context tokens.

use std::collections::{BTreeMap, HashMap};

use smartstring::alias::CompactString;

use crate::context::{desensitize, Variant};
use crate::error::{Result, SearchError};
use crate::index::{ForwardIndex, Index};
use crate::kwic::Kwic;
use crate::{Hit, SearchSettings};

/// Per-hit context records, one per hit, in hit order. Each record is
/// `[hit_start, right_start, length]` followed by one contiguous block of
/// `length` tokens per context source, sources in declaration order. The
/// blocks are deliberately not interleaved token-by-token: [`tokens`]
/// returns a whole source block as a single slice, and each block is
/// written with one `extend` per source per document batch.
///
/// [`tokens`]: Contexts::tokens
pub(super) struct Contexts {
    n_sources: usize,
    records: Vec<Vec<u32>>,
}

const HEADER: usize = 3;

impl Contexts {
    /// Batch-build contexts for hits grouped per document: one forward-index
    /// range retrieval per document per source. The first source fixes the
    /// three header ints; later sources reuse those boundaries.
    pub(super) fn build(
        index: &dyn Index,
        settings: &SearchSettings,
        field: &str,
        annotations: &[&str],
        hits: &[Hit],
    ) -> Result<Contexts> {
        let ctx = settings.context_size;
        let sources = annotations
            .iter()
            .map(|a| {
                index
                    .forward_index(field, a)
                    .ok_or_else(|| SearchError::UnknownAnnotation(a.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut by_doc: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, hit) in hits.iter().enumerate() {
            by_doc.entry(hit.doc).or_default().push(i);
        }

        let mut records = vec![Vec::new(); hits.len()];
        for (&doc, hit_indices) in &by_doc {
            settings.cancel.check()?;
            for (s, fi) in sources.iter().enumerate() {
                let doc_len = fi.doc_tokens(doc).len() as u32;
                let ranges: Vec<(u32, u32)> = hit_indices
                    .iter()
                    .map(|&i| {
                        let hit = hits[i];
                        (hit.start.saturating_sub(ctx), hit.end.saturating_add(ctx).min(doc_len))
                    })
                    .collect();
                let parts = fi.retrieve_parts(doc, &ranges);
                for ((&i, part), &(ctx_start, _)) in
                    hit_indices.iter().zip(parts).zip(&ranges)
                {
                    let record = &mut records[i];
                    if s == 0 {
                        let hit = hits[i];
                        record.push(hit.start - ctx_start);
                        record.push(hit.end - ctx_start);
                        record.push(part.len() as u32);
                    }
                    record.extend(part);
                }
            }
        }
        Ok(Contexts {
            n_sources: sources.len(),
            records,
        })
    }

    fn hit_start(&self, i: usize) -> u32 {
        self.records[i][0]
    }

    fn right_start(&self, i: usize) -> u32 {
        self.records[i][1]
    }

    fn length(&self, i: usize) -> u32 {
        self.records[i][2]
    }

    fn tokens(&self, i: usize, source: usize) -> &[u32] {
        let len = self.length(i) as usize;
        let from = HEADER + source * len;
        &self.records[i][from..from + len]
    }
}

/// One collocation entry: a folded surface form and how often it occurred
/// in hit contexts.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TermFrequency {
    pub term: String,
    pub frequency: u64,
}

/// Collocation frequencies, most frequent first (ties ordered by term).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TermFrequencyList {
    entries: Vec<TermFrequency>,
}

impl TermFrequencyList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TermFrequency> {
        self.entries.iter()
    }

    pub fn get(&self, i: usize) -> Option<&TermFrequency> {
        self.entries.get(i)
    }

    pub fn frequency(&self, term: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.term == term)
            .map(|e| e.frequency)
            .unwrap_or(0)
    }
}

/// Count every context token around every hit, excluding the tokens inside
/// the hit spans themselves. Surface forms are folded the same way
/// insensitive search folds them, and identical folded forms merge by
/// summing.
pub(super) fn collocations(
    index: &dyn Index,
    settings: &SearchSettings,
    hits: &[Hit],
    annotation: Option<&str>,
) -> Result<TermFrequencyList> {
    let meta = index.metadata();
    let field = meta.main_field.clone();
    let annotation = match annotation {
        Some(a) => a.to_string(),
        None => meta
            .field(&field)
            .ok_or_else(|| SearchError::UnknownField(field.clone()))?
            .main_annotation
            .clone(),
    };
    let fi = index
        .forward_index(&field, &annotation)
        .ok_or_else(|| SearchError::UnknownAnnotation(annotation.clone()))?;

    let contexts = Contexts::build(index, settings, &field, &[annotation.as_str()], hits)?;

    let mut freq: HashMap<String, u64> = HashMap::new();
    for i in 0..hits.len() {
        let hit_start = contexts.hit_start(i);
        let right_start = contexts.right_start(i);
        for (pos, &term) in contexts.tokens(i, 0).iter().enumerate() {
            let pos = pos as u32;
            if pos >= hit_start && pos < right_start {
                continue;
            }
            let surface = desensitize(fi.terms().get(term).unwrap_or(""), Variant::Insensitive);
            *freq.entry(surface).or_insert(0) += 1;
        }
    }

    let mut entries: Vec<TermFrequency> = freq
        .into_iter()
        .map(|(term, frequency)| TermFrequency { term, frequency })
        .collect();
    entries.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.term.cmp(&b.term)));
    Ok(TermFrequencyList { entries })
}

/// Render one hit as annotated context tokens from the forward index.
pub(super) fn kwic(index: &dyn Index, settings: &SearchSettings, hit: Hit) -> Result<Kwic> {
    let meta = index.metadata();
    let field = meta.main_field.clone();
    let fm = meta
        .field(&field)
        .ok_or_else(|| SearchError::UnknownField(field.clone()))?;
    let annotations: Vec<String> = fm.annotations.iter().map(|a| a.name.clone()).collect();

    let ctx = settings.context_size;
    let sources = annotations
        .iter()
        .map(|a| {
            index
                .forward_index(&field, a)
                .ok_or_else(|| SearchError::UnknownAnnotation(a.clone()))
        })
        .collect::<Result<Vec<&dyn ForwardIndex>>>()?;

    let doc_len = sources
        .first()
        .map(|fi| fi.doc_tokens(hit.doc).len() as u32)
        .unwrap_or(0);
    let ctx_start = hit.start.saturating_sub(ctx);
    let ctx_end = hit.end.saturating_add(ctx).min(doc_len);
    let len = (ctx_end - ctx_start) as usize;

    let per_source: Vec<Vec<u32>> = sources
        .iter()
        .map(|fi| {
            fi.retrieve_parts(hit.doc, &[(ctx_start, ctx_end)])
                .pop()
                .unwrap_or_default()
        })
        .collect();

    // Token-major layout: all annotation values of token 0, then token 1...
    let mut tokens: Vec<CompactString> = Vec::with_capacity(len * sources.len());
    for pos in 0..len {
        for (fi, ids) in sources.iter().zip(&per_source) {
            let text = ids.get(pos).and_then(|&id| fi.terms().get(id)).unwrap_or("");
            tokens.push(CompactString::from(text));
        }
    }

    Ok(Kwic {
        annotations,
        tokens,
        hit_start: (hit.start - ctx_start) as usize,
        hit_end: (hit.end - ctx_start) as usize,
    })
}
