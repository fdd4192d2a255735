//! Read-side index abstraction. The query engine runs against these traits;
//! [`crate::mem`] provides the in-memory implementation used throughout the
//! test suite, and on-disk formats can slot in behind the same interface.

use std::collections::HashMap;

use smartstring::alias::CompactString;

use crate::context::AnnotKey;
use crate::Span;

/// Which sensitivity variants an annotation was indexed with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SensitivitySetting {
    OnlySensitive,
    OnlyInsensitive,
    SensitiveAndInsensitive,
    /// All four variants: sensitive, insensitive, case-only, diacritics-only.
    CaseAndDiacriticsSeparate,
}

#[derive(Clone, Debug)]
pub struct AnnotationMetadata {
    pub name: String,
    pub sensitivity: SensitivitySetting,
}

#[derive(Clone, Debug)]
pub struct FieldMetadata {
    pub name: String,
    /// The annotation a bare term query searches.
    pub main_annotation: String,
    pub annotations: Vec<AnnotationMetadata>,
    /// Whether every document of this field ends in a synthetic closing
    /// token that position-complement queries must not match.
    pub has_closing_token: bool,
}

impl FieldMetadata {
    pub fn annotation(&self, name: &str) -> Option<&AnnotationMetadata> {
        self.annotations.iter().find(|a| a.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct IndexMetadata {
    pub main_field: String,
    pub fields: Vec<FieldMetadata>,
}

impl IndexMetadata {
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Interned term strings for one annotation variant. Term ids are dense
/// and stable for the lifetime of the index.
#[derive(Clone, Debug, Default)]
pub struct TermDict {
    terms: Vec<CompactString>,
    lookup: HashMap<CompactString, u32>,
}

impl TermDict {
    pub fn intern(&mut self, term: &str) -> u32 {
        if let Some(&id) = self.lookup.get(term) {
            return id;
        }
        let id = self.terms.len() as u32;
        self.terms.push(CompactString::from(term));
        self.lookup.insert(CompactString::from(term), id);
        id
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.terms.get(id as usize).map(|t| t.as_str())
    }

    pub fn id(&self, term: &str) -> Option<u32> {
        self.lookup.get(term).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.terms.iter().enumerate().map(|(i, t)| (i as u32, t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// One self-contained slice of the index. Document ids inside a segment are
/// local; `doc_base` maps them into the index-wide id space.
pub trait SegmentReader: Sync {
    fn doc_count(&self) -> u32;

    /// First global document id of this segment.
    fn doc_base(&self) -> u32;

    /// Token length of a document (local id), including any closing token.
    fn doc_len(&self, doc: u32) -> u32;

    /// Sorted word positions at which `term` occurs in `doc` under the
    /// given annotation variant. Empty when the term does not occur.
    fn postings(&self, key: &AnnotKey, term: u32, doc: u32) -> &[u32];

    /// Sorted local ids of the documents containing `term`.
    fn term_docs(&self, key: &AnnotKey, term: u32) -> &[u32];

    /// Token spans covered by `<tag>` elements in `doc`, sorted by start.
    fn tag_spans(&self, field: &str, tag: &str, doc: u32) -> &[Span];

    /// Spans of `<tag attr="value">` elements, same order as `tag_spans`.
    fn tag_attr_spans(&self, field: &str, tag: &str, attr: &str, value: &str, doc: u32) -> &[Span];
}

/// Token-position-to-term storage: the inverse of the postings lists. Used
/// for context extraction and forward-index concordances.
pub trait ForwardIndex: Sync {
    /// The dictionary the stored term ids refer to (the sensitive variant).
    fn terms(&self) -> &TermDict;

    /// All term ids of a document (global id), in token order.
    fn doc_tokens(&self, doc: u32) -> &[u32];

    /// Term ids for several position ranges of one document. Ranges are
    /// clamped to the document; `start > end` yields an empty part.
    fn retrieve_parts(&self, doc: u32, ranges: &[(u32, u32)]) -> Vec<Vec<u32>> {
        let tokens = self.doc_tokens(doc);
        ranges
            .iter()
            .map(|&(start, end)| {
                let start = (start as usize).min(tokens.len());
                let end = (end as usize).min(tokens.len()).max(start);
                tokens[start..end].to_vec()
            })
            .collect()
    }
}

/// A position plus the character range it was tokenized from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TokenOffset {
    pub position: u32,
    pub start_char: u32,
    pub end_char: u32,
}

/// One term's occurrences in a document, with character offsets.
pub struct TermVectorEntry<'a> {
    pub term: &'a str,
    pub positions: &'a [TokenOffset],
}

/// Original document text plus the per-term character offsets needed to cut
/// concordances straight out of it.
pub trait ContentStore: Sync {
    /// The stored original content of a document (global id).
    fn content(&self, doc: u32) -> &str;

    /// Per-term occurrence lists for a document. Order is unspecified.
    fn term_vector(&self, doc: u32) -> Box<dyn Iterator<Item = TermVectorEntry<'_>> + '_>;
}

/// A searchable corpus. Everything the engine reads goes through here.
pub trait Index: Sync {
    fn metadata(&self) -> &IndexMetadata;

    fn segment_count(&self) -> usize;

    fn segment(&self, ord: usize) -> &dyn SegmentReader;

    /// The term dictionary of one annotation variant, or `None` when the
    /// variant is not stored.
    fn term_dict(&self, key: &AnnotKey) -> Option<&TermDict>;

    fn forward_index(&self, field: &str, annotation: &str) -> Option<&dyn ForwardIndex>;

    fn content_store(&self, field: &str) -> Option<&dyn ContentStore>;

    /// How many terms a single pattern node may expand to before the query
    /// is rejected as too broad.
    fn max_clause_count(&self) -> usize {
        1024
    }
}
