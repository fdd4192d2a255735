//! Derived, read-only views over a hit set: paging, uniform sampling and
//! property sorting. Views copy hits (and captures), never context, and
//! never reorder the source's own buffer.

use std::collections::HashSet;

use crate::context::{desensitize, Variant};
use crate::error::{Result, SearchError};
use crate::hits::Hits;
use crate::index::Index;
use crate::{Hit, SearchSettings};

/// How many hits a sample should keep.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SampleSpec {
    /// Fraction of the full hit set, in `[0, 1]`.
    Ratio(f64),
    /// Absolute number of hits (clamped to the hits available).
    Count(u64),
}

/// A sortable property of a hit. Context-dependent properties read the
/// forward index of the given annotation (the field's main annotation when
/// `None`).
#[derive(Clone, PartialEq, Debug)]
pub enum HitProperty {
    Doc,
    Position,
    HitText { annotation: Option<String> },
    LeftContext { annotation: Option<String> },
    RightContext { annotation: Option<String> },
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug)]
enum SortKey {
    Pos([u32; 3]),
    Words(Vec<String>),
}

impl HitProperty {
    fn key(&self, index: &dyn Index, settings: &SearchSettings, hit: Hit) -> Result<SortKey> {
        let ctx = settings.context_size;
        match self {
            HitProperty::Doc => Ok(SortKey::Pos([hit.doc, hit.start, hit.end])),
            HitProperty::Position => Ok(SortKey::Pos([hit.start, hit.doc, hit.end])),
            HitProperty::HitText { annotation } => Ok(SortKey::Words(surface_words(
                index,
                annotation.as_deref(),
                hit.doc,
                hit.start,
                hit.end,
            )?)),
            HitProperty::LeftContext { annotation } => {
                // Sorting on the left context compares right to left, so the
                // word nearest the hit is the most significant.
                let mut words = surface_words(
                    index,
                    annotation.as_deref(),
                    hit.doc,
                    hit.start.saturating_sub(ctx),
                    hit.start,
                )?;
                words.reverse();
                Ok(SortKey::Words(words))
            }
            HitProperty::RightContext { annotation } => Ok(SortKey::Words(surface_words(
                index,
                annotation.as_deref(),
                hit.doc,
                hit.end,
                hit.end.saturating_add(ctx),
            )?)),
        }
    }
}

/// Insensitively folded surface forms for a token range of one document.
fn surface_words(
    index: &dyn Index,
    annotation: Option<&str>,
    doc: u32,
    start: u32,
    end: u32,
) -> Result<Vec<String>> {
    let meta = index.metadata();
    let field = &meta.main_field;
    let annotation = match annotation {
        Some(a) => a,
        None => meta
            .field(field)
            .ok_or_else(|| SearchError::UnknownField(field.clone()))?
            .main_annotation
            .as_str(),
    };
    let fi = index
        .forward_index(field, annotation)
        .ok_or_else(|| SearchError::UnknownAnnotation(annotation.to_string()))?;
    let tokens = fi.doc_tokens(doc);
    let start = (start as usize).min(tokens.len());
    let end = (end as usize).min(tokens.len()).max(start);
    Ok(tokens[start..end]
        .iter()
        .map(|&id| desensitize(fi.terms().get(id).unwrap_or(""), Variant::Insensitive))
        .collect())
}

pub(super) fn window<'a>(source: &Hits<'a>, first: u64, size: u64) -> Result<Hits<'a>> {
    source.ensure_read(first.saturating_add(size))?;
    let (hits, captured) = source.logical_hits();
    let available = hits.len() as u64;
    if first > 0 && first >= available {
        return Err(SearchError::WindowOutOfRange { first, available });
    }
    let start = first as usize;
    let end = (first.saturating_add(size)).min(available) as usize;
    let window_captured = if captured.is_empty() {
        Vec::new()
    } else {
        captured[start..end].to_vec()
    };
    Ok(Hits::from_parts(
        source.index,
        hits[start..end].to_vec(),
        window_captured,
        source.capture_names.clone(),
        source.settings.clone(),
    ))
}

pub(super) fn sample<'a>(source: &Hits<'a>, spec: SampleSpec, seed: u64) -> Result<Hits<'a>> {
    source.ensure_all_read()?;
    let (hits, captured) = {
        let state = source.lock();
        (state.hits.clone(), state.captured.clone())
    };
    let n = hits.len();

    let k = match spec {
        SampleSpec::Ratio(r) => {
            if !(0.0..=1.0).contains(&r) {
                return Err(SearchError::InvalidSample(format!(
                    "ratio {r} outside [0, 1]"
                )));
            }
            let k = (n as f64 * r).round() as usize;
            // Any positive ratio over a non-empty set keeps at least one hit.
            if r > 0.0 && k == 0 && n > 0 {
                1
            } else {
                k
            }
        }
        SampleSpec::Count(c) => (c as usize).min(n),
    };

    // Uniform without replacement: reject duplicate indices, then re-insert
    // in ascending order so the sample preserves the original hit order.
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut chosen = HashSet::with_capacity(k);
    while chosen.len() < k {
        chosen.insert(rng.usize(..n));
    }
    let mut picked: Vec<usize> = chosen.into_iter().collect();
    picked.sort_unstable();

    let sampled: Vec<Hit> = picked.iter().map(|&i| hits[i]).collect();
    let sampled_captured = if captured.is_empty() {
        Vec::new()
    } else {
        picked.iter().map(|&i| captured[i].clone()).collect()
    };
    Ok(Hits::from_parts(
        source.index,
        sampled,
        sampled_captured,
        source.capture_names.clone(),
        source.settings.clone(),
    ))
}

pub(super) fn sorted_by<'a>(
    source: &Hits<'a>,
    property: &HitProperty,
    reverse: bool,
) -> Result<Hits<'a>> {
    source.ensure_all_read()?;
    let (hits, captured) = {
        let state = source.lock();
        (state.hits.clone(), state.captured.clone())
    };
    let keys = hits
        .iter()
        .map(|&h| property.key(source.index, &source.settings, h))
        .collect::<Result<Vec<_>>>()?;

    let mut order: Vec<u32> = (0..hits.len() as u32).collect();
    order.sort_by(|&a, &b| keys[a as usize].cmp(&keys[b as usize]));
    if reverse {
        // Linear index reversal instead of flipping the comparator.
        order.reverse();
    }

    let sorted = Hits::from_parts(
        source.index,
        hits,
        captured,
        source.capture_names.clone(),
        source.settings.clone(),
    );
    sorted.lock().sort_order = Some(order);
    Ok(sorted)
}
