//! In-memory reference index: implements every collaborator contract of
//! [`crate::index`] end to end, built from plain or lightly marked-up text.
//! This is the substrate the test suite runs against.

use std::collections::HashMap;

use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

use crate::context::{desensitize, AnnotKey, Variant};
use crate::index::{
    AnnotationMetadata, ContentStore, FieldMetadata, ForwardIndex, Index, IndexMetadata,
    SegmentReader, SensitivitySetting, TermDict, TermVectorEntry, TokenOffset,
};
use crate::Span;

pub const FIELD: &str = "contents";
pub const WORD: &str = "word";
pub const LEMMA: &str = "lemma";
pub const PUNCT: &str = "punct";

const EMPTY_POSITIONS: &[u32] = &[];
const EMPTY_SPANS: &[Span] = &[];

/// Builds a [`MemIndex`]. Documents are tokenized with Unicode word
/// segmentation; `<tag>`/`<tag attr="v">` markup becomes tag spans, the text
/// between words (markup included) becomes the punct annotation, and lemmas
/// come from a Snowball stemmer.
pub struct MemIndexBuilder {
    docs: Vec<String>,
    segment_size: usize,
    max_clause_count: usize,
}

impl Default for MemIndexBuilder {
    fn default() -> MemIndexBuilder {
        MemIndexBuilder::new()
    }
}

impl MemIndexBuilder {
    pub fn new() -> MemIndexBuilder {
        MemIndexBuilder {
            docs: Vec::new(),
            segment_size: usize::MAX,
            max_clause_count: 1024,
        }
    }

    pub fn add_document(mut self, text: &str) -> Self {
        self.docs.push(text.to_string());
        self
    }

    /// Documents per segment; everything lands in one segment by default.
    pub fn segment_size(mut self, docs: usize) -> Self {
        self.segment_size = docs.max(1);
        self
    }

    pub fn max_clause_count(mut self, limit: usize) -> Self {
        self.max_clause_count = limit;
        self
    }

    pub fn build(self) -> MemIndex {
        let stemmer = Stemmer::create(Algorithm::English);
        let tokenized: Vec<DocTokens> = self.docs.iter().map(|d| tokenize(d)).collect();

        let mut word_fi = MemForwardIndex::default();
        let mut lemma_fi = MemForwardIndex::default();
        let mut punct_fi = MemForwardIndex::default();
        let mut word_insensitive = TermDict::default();

        let mut vectors = Vec::with_capacity(tokenized.len());
        for doc in &tokenized {
            let mut word_ids = Vec::with_capacity(doc.words.len());
            let mut lemma_ids = Vec::with_capacity(doc.words.len());
            let mut punct_ids = Vec::with_capacity(doc.words.len());
            let mut vector: Vec<(String, Vec<TokenOffset>)> = Vec::new();
            let mut vector_slots: HashMap<&str, usize> = HashMap::new();

            for (pos, word) in doc.words.iter().enumerate() {
                word_ids.push(word_fi.dict.intern(&word.surface));
                word_insensitive.intern(&desensitize(&word.surface, Variant::Insensitive));
                let lemma = desensitize(
                    &stemmer.stem(&word.surface.to_lowercase()),
                    Variant::Insensitive,
                );
                lemma_ids.push(lemma_fi.dict.intern(&lemma));
                punct_ids.push(punct_fi.dict.intern(&doc.puncts[pos]));

                let slot = *vector_slots.entry(word.surface.as_str()).or_insert_with(|| {
                    vector.push((word.surface.clone(), Vec::new()));
                    vector.len() - 1
                });
                vector[slot].1.push(TokenOffset {
                    position: pos as u32,
                    start_char: word.start,
                    end_char: word.end,
                });
            }
            word_fi.docs.push(word_ids);
            lemma_fi.docs.push(lemma_ids);
            punct_fi.docs.push(punct_ids);
            vectors.push(vector);
        }

        let keys = MemIndex::keys();
        let mut segments = Vec::new();
        for (seg_ord, chunk) in tokenized.chunks(self.segment_size).enumerate() {
            let doc_base = (seg_ord * self.segment_size) as u32;
            let mut segment = MemSegment {
                doc_base,
                doc_lens: chunk.iter().map(|d| d.words.len() as u32).collect(),
                postings: HashMap::new(),
                tags: HashMap::new(),
                tag_attrs: HashMap::new(),
            };
            for (local, doc) in chunk.iter().enumerate() {
                let local = local as u32;
                let global = (doc_base + local) as usize;
                for (pos, _) in doc.words.iter().enumerate() {
                    let pos = pos as u32;
                    segment.add_posting(&keys.word_sensitive, word_fi.docs[global][pos as usize], local, pos);
                    let insens_term = word_insensitive
                        .id(&desensitize(
                            &doc.words[pos as usize].surface,
                            Variant::Insensitive,
                        ))
                        .unwrap_or(0);
                    segment.add_posting(&keys.word_insensitive, insens_term, local, pos);
                    segment.add_posting(&keys.lemma, lemma_fi.docs[global][pos as usize], local, pos);
                    segment.add_posting(&keys.punct, punct_fi.docs[global][pos as usize], local, pos);
                }
                for tag in &doc.tags {
                    segment
                        .tags
                        .entry(tag.name.clone())
                        .or_default()
                        .entry(local)
                        .or_default()
                        .push(tag.span);
                    for (attr, value) in &tag.attrs {
                        segment
                            .tag_attrs
                            .entry((tag.name.clone(), attr.clone(), value.clone()))
                            .or_default()
                            .entry(local)
                            .or_default()
                            .push(tag.span);
                    }
                }
            }
            segment.finish();
            segments.push(segment);
        }

        let mut term_dicts = HashMap::new();
        term_dicts.insert(keys.word_sensitive.clone(), word_fi.dict.clone());
        term_dicts.insert(keys.word_insensitive.clone(), word_insensitive);
        term_dicts.insert(keys.lemma.clone(), lemma_fi.dict.clone());
        term_dicts.insert(keys.punct.clone(), punct_fi.dict.clone());

        let mut forward = HashMap::new();
        forward.insert(WORD.to_string(), word_fi);
        forward.insert(LEMMA.to_string(), lemma_fi);
        forward.insert(PUNCT.to_string(), punct_fi);

        MemIndex {
            metadata: MemIndex::metadata_template(),
            segments,
            term_dicts,
            forward,
            content: MemContentStore {
                docs: self.docs,
                vectors,
            },
            max_clause_count: self.max_clause_count,
        }
    }
}

struct Keys {
    word_sensitive: AnnotKey,
    word_insensitive: AnnotKey,
    lemma: AnnotKey,
    punct: AnnotKey,
}

struct WordToken {
    surface: String,
    start: u32,
    end: u32,
}

struct TagInstance {
    name: String,
    attrs: Vec<(String, String)>,
    span: Span,
}

struct DocTokens {
    words: Vec<WordToken>,
    /// Raw text between each word and the next (markup included); the last
    /// entry runs to the end of the document.
    puncts: Vec<String>,
    tags: Vec<TagInstance>,
}

fn tokenize(text: &str) -> DocTokens {
    let mut words: Vec<WordToken> = Vec::new();
    let mut tags = Vec::new();
    let mut open: Vec<(String, Vec<(String, String)>, u32)> = Vec::new();

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            let Some(rel) = memchr::memchr(b'>', &bytes[i..]) else {
                break;
            };
            let raw = &text[i + 1..i + rel];
            let here = words.len() as u32;
            if let Some(name) = raw.strip_prefix('/') {
                if let Some(at) = open.iter().rposition(|(n, _, _)| n == name.trim()) {
                    let (name, attrs, start) = open.remove(at);
                    tags.push(TagInstance {
                        name,
                        attrs,
                        span: Span::new(start, here),
                    });
                }
            } else {
                let raw = raw.strip_suffix('/').unwrap_or(raw);
                let (name, attrs) = parse_tag(raw);
                if text[i + 1..i + rel].ends_with('/') {
                    tags.push(TagInstance {
                        name,
                        attrs,
                        span: Span::new(here, here),
                    });
                } else {
                    open.push((name, attrs, here));
                }
            }
            i += rel + 1;
        } else {
            let next = memchr::memchr(b'<', &bytes[i..])
                .map(|rel| i + rel)
                .unwrap_or(bytes.len());
            for (off, w) in text[i..next].unicode_word_indices() {
                words.push(WordToken {
                    surface: w.to_string(),
                    start: (i + off) as u32,
                    end: (i + off + w.len()) as u32,
                });
            }
            i = next;
        }
    }
    // Unclosed tags run to the end of the document.
    let here = words.len() as u32;
    for (name, attrs, start) in open.into_iter().rev() {
        tags.push(TagInstance {
            name,
            attrs,
            span: Span::new(start, here),
        });
    }

    let puncts = (0..words.len())
        .map(|k| {
            let from = words[k].end as usize;
            let to = words
                .get(k + 1)
                .map(|w| w.start as usize)
                .unwrap_or(text.len());
            text[from..to].to_string()
        })
        .collect();

    DocTokens {
        words,
        puncts,
        tags,
    }
}

fn parse_tag(raw: &str) -> (String, Vec<(String, String)>) {
    let mut parts = raw.split_whitespace();
    let name = parts.next().unwrap_or("").to_string();
    let attrs = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.to_string(), v.trim_matches('"').to_string()))
        })
        .collect();
    (name, attrs)
}

struct TermPostings {
    docs: Vec<u32>,
    by_doc: HashMap<u32, Vec<u32>>,
}

pub struct MemSegment {
    doc_base: u32,
    doc_lens: Vec<u32>,
    postings: HashMap<AnnotKey, HashMap<u32, TermPostings>>,
    tags: HashMap<String, HashMap<u32, Vec<Span>>>,
    tag_attrs: HashMap<(String, String, String), HashMap<u32, Vec<Span>>>,
}

impl MemSegment {
    fn add_posting(&mut self, key: &AnnotKey, term: u32, doc: u32, pos: u32) {
        self.postings
            .entry(key.clone())
            .or_default()
            .entry(term)
            .or_insert_with(|| TermPostings {
                docs: Vec::new(),
                by_doc: HashMap::new(),
            })
            .by_doc
            .entry(doc)
            .or_default()
            .push(pos);
    }

    fn finish(&mut self) {
        for terms in self.postings.values_mut() {
            for postings in terms.values_mut() {
                postings.docs = postings.by_doc.keys().copied().collect();
                postings.docs.sort_unstable();
                for positions in postings.by_doc.values_mut() {
                    positions.sort_unstable();
                }
            }
        }
        for per_doc in self.tags.values_mut().chain(self.tag_attrs.values_mut()) {
            for spans in per_doc.values_mut() {
                spans.sort_by_key(|s| (s.start, s.end));
            }
        }
    }
}

impl SegmentReader for MemSegment {
    fn doc_count(&self) -> u32 {
        self.doc_lens.len() as u32
    }

    fn doc_base(&self) -> u32 {
        self.doc_base
    }

    fn doc_len(&self, doc: u32) -> u32 {
        self.doc_lens.get(doc as usize).copied().unwrap_or(0)
    }

    fn postings(&self, key: &AnnotKey, term: u32, doc: u32) -> &[u32] {
        self.postings
            .get(key)
            .and_then(|terms| terms.get(&term))
            .and_then(|p| p.by_doc.get(&doc))
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY_POSITIONS)
    }

    fn term_docs(&self, key: &AnnotKey, term: u32) -> &[u32] {
        self.postings
            .get(key)
            .and_then(|terms| terms.get(&term))
            .map(|p| p.docs.as_slice())
            .unwrap_or(EMPTY_POSITIONS)
    }

    fn tag_spans(&self, field: &str, tag: &str, doc: u32) -> &[Span] {
        if field != FIELD {
            return EMPTY_SPANS;
        }
        self.tags
            .get(tag)
            .and_then(|per_doc| per_doc.get(&doc))
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY_SPANS)
    }

    fn tag_attr_spans(&self, field: &str, tag: &str, attr: &str, value: &str, doc: u32) -> &[Span] {
        if field != FIELD {
            return EMPTY_SPANS;
        }
        self.tag_attrs
            .get(&(tag.to_string(), attr.to_string(), value.to_string()))
            .and_then(|per_doc| per_doc.get(&doc))
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY_SPANS)
    }
}

#[derive(Default)]
struct MemForwardIndex {
    dict: TermDict,
    docs: Vec<Vec<u32>>,
}

impl ForwardIndex for MemForwardIndex {
    fn terms(&self) -> &TermDict {
        &self.dict
    }

    fn doc_tokens(&self, doc: u32) -> &[u32] {
        self.docs
            .get(doc as usize)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY_POSITIONS)
    }
}

struct MemContentStore {
    docs: Vec<String>,
    vectors: Vec<Vec<(String, Vec<TokenOffset>)>>,
}

impl ContentStore for MemContentStore {
    fn content(&self, doc: u32) -> &str {
        self.docs.get(doc as usize).map(|s| s.as_str()).unwrap_or("")
    }

    fn term_vector(&self, doc: u32) -> Box<dyn Iterator<Item = TermVectorEntry<'_>> + '_> {
        match self.vectors.get(doc as usize) {
            Some(vector) => Box::new(vector.iter().map(|(term, positions)| TermVectorEntry {
                term,
                positions,
            })),
            None => Box::new(std::iter::empty()),
        }
    }
}

/// A fully in-memory [`Index`] over the `contents` field with word, lemma
/// and punct annotations.
pub struct MemIndex {
    metadata: IndexMetadata,
    segments: Vec<MemSegment>,
    term_dicts: HashMap<AnnotKey, TermDict>,
    forward: HashMap<String, MemForwardIndex>,
    content: MemContentStore,
    max_clause_count: usize,
}

impl MemIndex {
    fn keys() -> Keys {
        Keys {
            word_sensitive: AnnotKey {
                field: FIELD.to_string(),
                annotation: WORD.to_string(),
                variant: Variant::Sensitive,
            },
            word_insensitive: AnnotKey {
                field: FIELD.to_string(),
                annotation: WORD.to_string(),
                variant: Variant::Insensitive,
            },
            lemma: AnnotKey {
                field: FIELD.to_string(),
                annotation: LEMMA.to_string(),
                variant: Variant::Insensitive,
            },
            punct: AnnotKey {
                field: FIELD.to_string(),
                annotation: PUNCT.to_string(),
                variant: Variant::Insensitive,
            },
        }
    }

    fn metadata_template() -> IndexMetadata {
        IndexMetadata {
            main_field: FIELD.to_string(),
            fields: vec![FieldMetadata {
                name: FIELD.to_string(),
                main_annotation: WORD.to_string(),
                annotations: vec![
                    AnnotationMetadata {
                        name: WORD.to_string(),
                        sensitivity: SensitivitySetting::SensitiveAndInsensitive,
                    },
                    AnnotationMetadata {
                        name: LEMMA.to_string(),
                        sensitivity: SensitivitySetting::OnlyInsensitive,
                    },
                    AnnotationMetadata {
                        name: PUNCT.to_string(),
                        sensitivity: SensitivitySetting::OnlyInsensitive,
                    },
                ],
                has_closing_token: false,
            }],
        }
    }
}

impl Index for MemIndex {
    fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, ord: usize) -> &dyn SegmentReader {
        &self.segments[ord]
    }

    fn term_dict(&self, key: &AnnotKey) -> Option<&TermDict> {
        self.term_dicts.get(key)
    }

    fn forward_index(&self, field: &str, annotation: &str) -> Option<&dyn ForwardIndex> {
        if field != FIELD {
            return None;
        }
        self.forward.get(annotation).map(|fi| fi as &dyn ForwardIndex)
    }

    fn content_store(&self, field: &str) -> Option<&dyn ContentStore> {
        (field == FIELD).then_some(&self.content as &dyn ContentStore)
    }

    fn max_clause_count(&self) -> usize {
        self.max_clause_count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenizer_records_words_offsets_and_punct() {
        let doc = tokenize("The quick, brown fox.");
        let surfaces: Vec<&str> = doc.words.iter().map(|w| w.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["The", "quick", "brown", "fox"]);
        assert_eq!(doc.puncts, vec![" ", ", ", " ", "."]);
        assert_eq!(doc.words[1].start, 4);
        assert_eq!(doc.words[1].end, 9);
    }

    #[test]
    fn tokenizer_records_tag_spans() {
        let doc = tokenize(r#"outside <ne type="person">John Smith</ne> inside"#);
        let surfaces: Vec<&str> = doc.words.iter().map(|w| w.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["outside", "John", "Smith", "inside"]);
        assert_eq!(doc.tags.len(), 1);
        assert_eq!(doc.tags[0].name, "ne");
        assert_eq!(doc.tags[0].attrs, vec![("type".to_string(), "person".to_string())]);
        assert_eq!(doc.tags[0].span, Span::new(1, 3));
    }

    #[test]
    fn segments_split_documents_and_keep_local_ids() {
        let index = MemIndexBuilder::new()
            .add_document("a b")
            .add_document("b c")
            .add_document("c d")
            .segment_size(2)
            .build();
        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.segment(0).doc_count(), 2);
        assert_eq!(index.segment(1).doc_count(), 1);
        assert_eq!(index.segment(1).doc_base(), 2);

        let key = MemIndex::keys().word_insensitive;
        let dict = index.term_dict(&key).unwrap();
        let c = dict.id("c").unwrap();
        assert_eq!(index.segment(1).term_docs(&key, c), &[0]);
        assert_eq!(index.segment(1).postings(&key, c, 0), &[0]);
    }

    #[test]
    fn word_is_indexed_in_both_variants() {
        let index = MemIndexBuilder::new().add_document("Fox fox FOX").build();
        let keys = MemIndex::keys();
        let sens = index.term_dict(&keys.word_sensitive).unwrap();
        assert_eq!(sens.len(), 3);
        let insens = index.term_dict(&keys.word_insensitive).unwrap();
        assert_eq!(insens.len(), 1);
        let folded = insens.id("fox").unwrap();
        assert_eq!(index.segment(0).postings(&keys.word_insensitive, folded, 0), &[0, 1, 2]);
    }

    #[test]
    fn lemma_folds_inflection() {
        let index = MemIndexBuilder::new().add_document("walked walking walks").build();
        let fi = index.forward_index(FIELD, LEMMA).unwrap();
        let tokens = fi.doc_tokens(0);
        assert_eq!(tokens[0], tokens[1]);
        assert_eq!(tokens[1], tokens[2]);
        assert_eq!(fi.terms().get(tokens[0]), Some("walk"));
    }

    #[test]
    fn content_store_round_trips_offsets() {
        let index = MemIndexBuilder::new().add_document("The quick fox").build();
        let store = index.content_store(FIELD).unwrap();
        assert_eq!(store.content(0), "The quick fox");
        let mut seen = Vec::new();
        for entry in store.term_vector(0) {
            for off in entry.positions {
                seen.push((entry.term.to_string(), off.position, off.start_char, off.end_char));
            }
        }
        seen.sort_by_key(|(_, p, _, _)| *p);
        assert_eq!(seen[1], ("quick".to_string(), 1, 4, 9));
    }
}
