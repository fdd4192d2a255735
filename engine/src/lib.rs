use bytemuck::{Pod, Zeroable};

pub mod cancel;
pub mod context;
pub mod doc;
pub mod error;
pub mod hits;
pub mod index;
pub mod kwic;
pub mod mem;
pub mod pattern;
pub mod query;

pub use cancel::CancelToken;
pub use context::{ExecContext, Variant};
pub use error::SearchError;
pub use hits::{HitProperty, Hits, SampleSpec, TermFrequency, TermFrequencyList};
pub use kwic::{Concordance, Kwic};
pub use pattern::TextPattern;
pub use query::CompiledQuery;

/// One match occurrence: a document id plus a word-position span.
/// `end` is exclusive (the first word position after the hit).
#[derive(Pod, Zeroable, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Hit {
    pub doc: u32,
    pub start: u32,
    pub end: u32,
}

impl Hit {
    pub fn new(doc: u32, start: u32, end: u32) -> Hit {
        Hit { doc, start, end }
    }

    /// Hit length in tokens. Zero-length hits are legal (boundary matches).
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A start/end word-position pair without a document id, used for
/// captured sub-group positions inside the enclosing hit's document.
#[derive(Pod, Zeroable, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Span {
        Span { start, end }
    }
}

/// A retrieval or counting budget. `Unlimited` disables the limit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Budget {
    #[default]
    Unlimited,
    Max(u64),
}

impl Budget {
    /// True once `n` has consumed the whole budget.
    pub fn reached(self, n: u64) -> bool {
        match self {
            Budget::Unlimited => false,
            Budget::Max(m) => n >= m,
        }
    }
}

/// Which storage concordances are built from. Index-level choice, not per call.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ConcordanceSource {
    #[default]
    ForwardIndex,
    ContentStore,
}

/// How to make cut-up markup fragments well-formed again.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TagRepair {
    /// Re-insert the missing half of every unbalanced tag.
    #[default]
    Insert,
    /// Strip unbalanced tags from the fragment.
    Strip,
}

/// Settings for one query execution: retrieval/count budgets, context size,
/// concordance strategy and the cooperative cancellation token.
#[derive(Clone, Debug)]
pub struct SearchSettings {
    pub max_to_retrieve: Budget,
    pub max_to_count: Budget,
    pub context_size: u32,
    pub concordances: ConcordanceSource,
    /// When character-offset resolution leaves gaps, fall back to the
    /// document's observed min/max offsets instead of failing.
    pub fill_missing_offsets: bool,
    pub tag_repair: TagRepair,
    pub cancel: CancelToken,
}

impl Default for SearchSettings {
    fn default() -> SearchSettings {
        SearchSettings {
            max_to_retrieve: Budget::Unlimited,
            max_to_count: Budget::Unlimited,
            context_size: 5,
            concordances: ConcordanceSource::ForwardIndex,
            fill_missing_offsets: true,
            tag_repair: TagRepair::Insert,
            cancel: CancelToken::new(),
        }
    }
}

impl SearchSettings {
    pub fn with_max_to_retrieve(mut self, budget: Budget) -> Self {
        self.max_to_retrieve = budget;
        self
    }

    pub fn with_max_to_count(mut self, budget: Budget) -> Self {
        self.max_to_count = budget;
        self
    }

    pub fn with_context_size(mut self, size: u32) -> Self {
        self.context_size = size;
        self
    }

    pub fn with_concordances(mut self, source: ConcordanceSource) -> Self {
        self.concordances = source;
        self
    }

    pub fn with_fill_missing_offsets(mut self, fill: bool) -> Self {
        self.fill_missing_offsets = fill;
        self
    }

    pub fn with_tag_repair(mut self, repair: TagRepair) -> Self {
        self.tag_repair = repair;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
