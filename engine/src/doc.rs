//! Content-store concordance strategy: resolve word positions to character
//! offsets with one positional term-vector scan per document, cut the three
//! fragments out of the stored text, and repair markup well-formedness per
//! fragment.

use std::collections::HashMap;

use memchr::{memchr, memchr_iter};
use tracing::warn;

use crate::error::{Result, SearchError};
use crate::index::Index;
use crate::kwic::Concordance;
use crate::{Hit, SearchSettings, TagRepair};

/// Build concordances for a batch of hits that all lie in one document.
pub(crate) fn concordances_from_content_store(
    index: &dyn Index,
    settings: &SearchSettings,
    doc: u32,
    hits: &[Hit],
) -> Result<Vec<Concordance>> {
    let meta = index.metadata();
    let field = meta.main_field.clone();
    let store = index
        .content_store(&field)
        .ok_or_else(|| SearchError::MalformedIndex(format!("field {field} has no content store")))?;

    // Clamp context boundaries to the document where we can know its length.
    let doc_len = meta
        .field(&field)
        .and_then(|fm| index.forward_index(&field, &fm.main_annotation))
        .map(|fi| fi.doc_tokens(doc).len() as u32);
    let last_word = doc_len.map(|len| len.saturating_sub(1));
    let clamp = |word: u32| match last_word {
        Some(last) => word.min(last),
        None => word,
    };

    let ctx = settings.context_size;

    // The boundary word positions each hit needs: start offsets for the two
    // left boundaries, end offsets for the two right boundaries.
    let mut want_start: HashMap<u32, Option<u32>> = HashMap::new();
    let mut want_end: HashMap<u32, Option<u32>> = HashMap::new();
    for hit in hits {
        want_start.insert(hit.start.saturating_sub(ctx), None);
        want_start.insert(hit.start, None);
        if hit.is_empty() {
            if ctx > 0 {
                want_end.insert(clamp(hit.start + ctx - 1), None);
            }
        } else {
            want_end.insert(hit.end - 1, None);
            want_end.insert(clamp(hit.end - 1 + ctx), None);
        }
    }

    // One scan over the positional term vector resolves every boundary the
    // first time its exact word position is seen, and records the document's
    // lowest/highest offsets as the fallback defaults.
    let mut min_start: Option<u32> = None;
    let mut max_end: Option<u32> = None;
    for entry in store.term_vector(doc) {
        for offset in entry.positions {
            min_start = Some(min_start.map_or(offset.start_char, |m| m.min(offset.start_char)));
            max_end = Some(max_end.map_or(offset.end_char, |m| m.max(offset.end_char)));
            if let Some(slot) = want_start.get_mut(&offset.position) {
                slot.get_or_insert(offset.start_char);
            }
            if let Some(slot) = want_end.get_mut(&offset.position) {
                slot.get_or_insert(offset.end_char);
            }
        }
    }

    let min_start = min_start.unwrap_or(0);
    let max_end = max_end.unwrap_or(0);
    let unresolved = want_start.values().chain(want_end.values()).any(|v| v.is_none());
    if unresolved {
        if !settings.fill_missing_offsets {
            return Err(SearchError::MissingCharacterOffsets { doc });
        }
        warn!(doc, "unresolved character offsets, defaulting to document bounds");
    }
    let start_of = |word: u32| want_start.get(&word).copied().flatten().unwrap_or(min_start);
    let end_of = |word: u32| want_end.get(&word).copied().flatten().unwrap_or(max_end);

    let content = store.content(doc);
    let cut = |from: u32, to: u32| -> &str {
        let from = (from as usize).min(content.len());
        let to = (to as usize).min(content.len()).max(from);
        &content[from..to]
    };

    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        let left_from = start_of(hit.start.saturating_sub(ctx));
        let (left, hit_text, right) = if hit.is_empty() {
            // Zero-length hit: empty hit text at the word boundary, never a
            // negative-length substring.
            let anchor = if last_word.map_or(false, |last| hit.start > last) {
                max_end
            } else {
                start_of(hit.start)
            };
            let right_to = if ctx > 0 {
                end_of(clamp(hit.start + ctx - 1))
            } else {
                anchor
            };
            (cut(left_from, anchor), "", cut(anchor, right_to))
        } else {
            let hit_from = start_of(hit.start);
            let hit_to = end_of(hit.end - 1);
            let right_to = end_of(clamp(hit.end - 1 + ctx));
            (cut(left_from, hit_from), cut(hit_from, hit_to), cut(hit_to, right_to))
        };
        out.push(Concordance {
            left: repair_fragment(left, settings.tag_repair),
            hit: repair_fragment(hit_text, settings.tag_repair),
            right: repair_fragment(right, settings.tag_repair),
        });
    }
    Ok(out)
}

enum TagKind {
    Open,
    Close,
    SelfClosing,
}

struct FragmentTag<'a> {
    from: usize,
    to: usize,
    name: &'a str,
    kind: TagKind,
    matched: bool,
}

fn scan_tags(fragment: &str) -> Vec<FragmentTag<'_>> {
    let bytes = fragment.as_bytes();
    let mut tags = Vec::new();
    for open in memchr_iter(b'<', bytes) {
        let Some(close) = memchr(b'>', &bytes[open..]) else {
            continue;
        };
        let to = open + close + 1;
        let inner = &fragment[open + 1..to - 1];
        let (kind, name_part) = if let Some(rest) = inner.strip_prefix('/') {
            (TagKind::Close, rest)
        } else if let Some(rest) = inner.strip_suffix('/') {
            (TagKind::SelfClosing, rest)
        } else {
            (TagKind::Open, inner)
        };
        let name = name_part
            .split([' ', '\t', '\n'])
            .next()
            .unwrap_or(name_part);
        tags.push(FragmentTag {
            from: open,
            to,
            name,
            kind,
            matched: false,
        });
    }
    tags
}

/// Make a cut-up markup fragment well-formed again by inserting the missing
/// half of every unbalanced tag, or stripping unbalanced tags, per the
/// index-level policy.
pub fn repair_fragment(fragment: &str, policy: TagRepair) -> String {
    let mut tags = scan_tags(fragment);
    if tags.is_empty() {
        return fragment.to_string();
    }

    let mut stack: Vec<usize> = Vec::new();
    let mut unmatched_closes: Vec<usize> = Vec::new();
    for i in 0..tags.len() {
        match tags[i].kind {
            TagKind::SelfClosing => tags[i].matched = true,
            TagKind::Open => stack.push(i),
            TagKind::Close => match stack.last() {
                Some(&top) if tags[top].name == tags[i].name => {
                    stack.pop();
                    tags[top].matched = true;
                    tags[i].matched = true;
                }
                _ => unmatched_closes.push(i),
            },
        }
    }

    match policy {
        TagRepair::Insert => {
            let mut out = String::with_capacity(fragment.len() + 16);
            // A close with no open is missing its open before the fragment;
            // later closes nest inside earlier ones, so prepend in reverse.
            for &i in unmatched_closes.iter().rev() {
                out.push_str(&format!("<{}>", tags[i].name));
            }
            out.push_str(fragment);
            for &i in stack.iter().rev() {
                out.push_str(&format!("</{}>", tags[i].name));
            }
            out
        }
        TagRepair::Strip => {
            let mut out = String::with_capacity(fragment.len());
            let mut pos = 0;
            for tag in &tags {
                if tag.matched {
                    continue;
                }
                if tag.from >= pos {
                    out.push_str(&fragment[pos..tag.from]);
                    pos = tag.to;
                }
            }
            out.push_str(&fragment[pos..]);
            out
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemIndexBuilder;

    #[test]
    fn zero_length_hits_cut_empty_fragments() {
        let index = MemIndexBuilder::new()
            .add_document("one two three four")
            .build();
        let settings = SearchSettings::default().with_context_size(1);

        // Mid-document: the hit anchors at the start of the word it points
        // at and contributes no text of its own.
        let out =
            concordances_from_content_store(&index, &settings, 0, &[Hit::new(0, 2, 2)]).unwrap();
        assert_eq!(out[0].left, "two ");
        assert_eq!(out[0].hit, "");
        assert_eq!(out[0].right, "three");

        // Past the last word: the hit anchors at the end of the document.
        let out =
            concordances_from_content_store(&index, &settings, 0, &[Hit::new(0, 4, 4)]).unwrap();
        assert_eq!(out[0].left, "four");
        assert_eq!(out[0].hit, "");
        assert_eq!(out[0].right, "");
    }

    #[test]
    fn balanced_fragment_is_unchanged() {
        let s = "plain <b>bold</b> text <br/>";
        assert_eq!(repair_fragment(s, TagRepair::Insert), s);
        assert_eq!(repair_fragment(s, TagRepair::Strip), s);
    }

    #[test]
    fn insert_adds_missing_halves() {
        assert_eq!(
            repair_fragment("cut <em>middle", TagRepair::Insert),
            "cut <em>middle</em>"
        );
        assert_eq!(
            repair_fragment("middle</em> cut", TagRepair::Insert),
            "<em>middle</em> cut"
        );
        assert_eq!(
            repair_fragment("</b></a>x", TagRepair::Insert),
            "<a><b></b></a>x"
        );
    }

    #[test]
    fn strip_removes_unbalanced_tags() {
        assert_eq!(
            repair_fragment("cut <em>middle", TagRepair::Strip),
            "cut middle"
        );
        assert_eq!(
            repair_fragment("middle</em> cut", TagRepair::Strip),
            "middle cut"
        );
    }

    #[test]
    fn nested_unbalanced_opens_close_in_order() {
        assert_eq!(
            repair_fragment("<a>x<b>y", TagRepair::Insert),
            "<a>x<b>y</b></a>"
        );
    }
}
