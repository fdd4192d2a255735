use thiserror::Error;

/// Everything that can go wrong while translating a pattern or pulling hits.
///
/// Engine-internal recoveries (offset default-filling) never surface here;
/// everything else does. Nothing is logged-and-swallowed inside the pull loop.
#[derive(Error, Debug)]
pub enum SearchError {
    /// A wildcard/regex/prefix expansion exceeded the index's clause ceiling.
    #[error("query too broad: expands to more than {limit} terms")]
    QueryTooBroad { limit: usize },

    /// Automaton construction for a regex blew up before matching started.
    #[error("pattern too large to compile")]
    PatternTooLarge,

    /// A regex or wildcard pattern that cannot be parsed at all.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Content-store offset resolution left unresolved boundaries and
    /// default-filling was disabled.
    #[error("could not find all character offsets in document {doc}")]
    MissingCharacterOffsets { doc: u32 },

    /// Cooperative cancellation was observed mid-pull. The hits object is
    /// inert but still readable afterwards.
    #[error("search was cancelled")]
    Cancelled,

    #[error("window start {first} past the last available hit ({available})")]
    WindowOutOfRange { first: u64, available: u64 },

    #[error("invalid sample parameter: {0}")]
    InvalidSample(String),

    #[error("no such annotation: {0}")]
    UnknownAnnotation(String),

    #[error("no such field: {0}")]
    UnknownField(String),

    /// The index advertises no usable sensitivity variant for an annotation.
    /// Indicates a broken index, not a user error.
    #[error("malformed index: {0}")]
    MalformedIndex(String),
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
