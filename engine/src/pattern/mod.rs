//! Pattern algebra: the immutable [`TextPattern`] tree, its normalizing
//! rewrite rules, and translation into an executable [`SpanQuery`] tree.
//!
//! A pattern describes *what* to match in corpus terms; translation resolves
//! it against a concrete index (term dictionaries, sensitivity variants) and
//! expands prefix/wildcard/regex nodes into term sets.

pub mod parser;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::context::ExecContext;
use crate::error::{Result, SearchError};
use crate::query::{CompiledQuery, SpanQuery};

pub use parser::parse_cql;

/// Identity of one capture-group node. Two capture nodes are interchangeable
/// only when they are literally the same node, so each construction gets a
/// fresh id and equality compares ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CaptureSlot(u64);

impl CaptureSlot {
    pub fn fresh() -> CaptureSlot {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        CaptureSlot(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One node of the pattern tree. Every combinator owns its children;
/// [`TextPattern::rewrite`] builds a new tree rather than mutating.
#[derive(Clone, PartialEq, Debug)]
pub enum TextPattern {
    /// A literal term, constant length 1.
    Term(String),
    /// A literal prefix (the degraded form of `foo*`).
    Prefix(String),
    /// Glob-style pattern over a single token: `*` and `?`.
    Wildcard(String),
    /// Regex over a single token; always whole-token anchored.
    Regex(String),
    /// Any `min..=max` consecutive tokens.
    AnyToken { min: u32, max: u32 },
    /// Adjacent clauses, in order.
    Sequence(Vec<TextPattern>),
    /// Positions matching all of `include` and none of `exclude`. Plain AND
    /// is an `AndNot` with an empty exclude list.
    AndNot {
        include: Vec<TextPattern>,
        exclude: Vec<TextPattern>,
    },
    Or(Vec<TextPattern>),
    /// Token complement of a single-token clause.
    Not(Box<TextPattern>),
    /// Stretch the clause by `min..=max` extra tokens to the left or right.
    Expansion {
        clause: Box<TextPattern>,
        left: bool,
        min: u32,
        max: u32,
    },
    /// `min..=max` adjacent repeats of the clause.
    Repetition {
        clause: Box<TextPattern>,
        min: u32,
        max: u32,
    },
    /// Case/diacritics sensitivity override for the subtree.
    Sensitive {
        clause: Box<TextPattern>,
        case: bool,
        diacritics: bool,
    },
    /// Re-target the subtree at a named annotation of the field.
    Annotation {
        name: String,
        clause: Box<TextPattern>,
    },
    /// Named capture of the clause's matched span.
    Capture {
        name: String,
        slot: CaptureSlot,
        clause: Box<TextPattern>,
    },
    /// A markup element span, optionally filtered on attribute values.
    Tags {
        name: String,
        attrs: Vec<(String, String)>,
    },
}

impl TextPattern {
    pub fn term(t: impl Into<String>) -> TextPattern {
        TextPattern::Term(t.into())
    }

    pub fn seq(clauses: Vec<TextPattern>) -> TextPattern {
        TextPattern::Sequence(clauses)
    }

    pub fn and(clauses: Vec<TextPattern>) -> TextPattern {
        TextPattern::AndNot {
            include: clauses,
            exclude: Vec::new(),
        }
    }

    pub fn or(clauses: Vec<TextPattern>) -> TextPattern {
        TextPattern::Or(clauses)
    }

    pub fn not(clause: TextPattern) -> TextPattern {
        TextPattern::Not(Box::new(clause))
    }

    /// A capture node with a fresh slot id.
    pub fn capture(name: impl Into<String>, clause: TextPattern) -> TextPattern {
        TextPattern::Capture {
            name: name.into(),
            slot: CaptureSlot::fresh(),
            clause: Box::new(clause),
        }
    }

    pub fn repeat(clause: TextPattern, min: u32, max: u32) -> TextPattern {
        TextPattern::Repetition {
            clause: Box::new(clause),
            min,
            max,
        }
    }

    /// Can this pattern match a zero-length span? Only relevant inside
    /// sequences, where the rewrite splits such clauses out.
    fn matches_empty(&self) -> bool {
        match self {
            TextPattern::Repetition { min, .. } => *min == 0,
            TextPattern::AnyToken { min, .. } => *min == 0,
            TextPattern::Capture { clause, .. } | TextPattern::Sensitive { clause, .. } => {
                clause.matches_empty()
            }
            _ => false,
        }
    }

    /// Normalize into an equivalent but cheaper tree. One pass reaches the
    /// normal form; a second pass is a no-op.
    pub fn rewrite(self) -> TextPattern {
        match self {
            TextPattern::Wildcard(pat) => rewrite_wildcard(pat),
            TextPattern::Regex(pat) => rewrite_regex(pat),

            TextPattern::Not(clause) => match clause.rewrite() {
                // Double negation cancels out.
                TextPattern::Not(inner) => *inner,
                other => TextPattern::Not(Box::new(other)),
            },

            TextPattern::Or(clauses) => rewrite_or(clauses),
            TextPattern::AndNot { include, exclude } => rewrite_and_not(include, exclude),
            TextPattern::Sequence(clauses) => rewrite_sequence(clauses),

            TextPattern::Repetition { clause, min, max } => {
                let clause = clause.rewrite();
                if min == 1 && max == 1 {
                    return clause;
                }
                match clause {
                    // Repeating "any token" is just a longer any-token run.
                    TextPattern::AnyToken { min: 1, max: 1 } => TextPattern::AnyToken { min, max },
                    clause => TextPattern::Repetition {
                        clause: Box::new(clause),
                        min,
                        max,
                    },
                }
            }

            TextPattern::Expansion {
                clause,
                left,
                min,
                max,
            } => {
                let clause = clause.rewrite();
                if min == 0 && max == 0 {
                    return clause;
                }
                match clause {
                    // Same-direction expansions add up.
                    TextPattern::Expansion {
                        clause: inner,
                        left: inner_left,
                        min: imin,
                        max: imax,
                    } if inner_left == left => TextPattern::Expansion {
                        clause: inner,
                        left,
                        min: min + imin,
                        max: max + imax,
                    },
                    clause => TextPattern::Expansion {
                        clause: Box::new(clause),
                        left,
                        min,
                        max,
                    },
                }
            }

            TextPattern::Sensitive {
                clause,
                case,
                diacritics,
            } => TextPattern::Sensitive {
                clause: Box::new(clause.rewrite()),
                case,
                diacritics,
            },
            TextPattern::Annotation { name, clause } => TextPattern::Annotation {
                name,
                clause: Box::new(clause.rewrite()),
            },
            TextPattern::Capture { name, slot, clause } => TextPattern::Capture {
                name,
                slot,
                clause: Box::new(clause.rewrite()),
            },

            leaf => leaf,
        }
    }

    /// Rewrite, then translate against the given context, producing the
    /// executable query plus the ordered capture-group names.
    pub fn compile(self, ctx: &ExecContext) -> Result<CompiledQuery> {
        let mut capture_names = Vec::new();
        let root = self.rewrite().translate(ctx, &mut capture_names)?;
        Ok(CompiledQuery::new(root, capture_names))
    }

    fn translate(&self, ctx: &ExecContext, captures: &mut Vec<String>) -> Result<SpanQuery> {
        match self {
            TextPattern::Term(t) => {
                let key = ctx.annot_key()?;
                let folded = ctx.desensitize(t)?;
                let dict = match ctx.index().term_dict(&key) {
                    Some(dict) => dict,
                    None => return Ok(SpanQuery::Or(Vec::new())),
                };
                Ok(match dict.id(&folded) {
                    Some(term) => SpanQuery::Term { key, term },
                    None => SpanQuery::Or(Vec::new()),
                })
            }
            TextPattern::Prefix(p) => {
                let folded = ctx.desensitize(p)?;
                expand_terms(ctx, |term| term.starts_with(folded.as_str()))
            }
            TextPattern::Wildcard(pat) => {
                let re = token_regex(&wildcard_to_regex(&ctx.desensitize(pat)?))?;
                expand_terms(ctx, |term| re.is_match(term))
            }
            TextPattern::Regex(pat) => {
                let re = token_regex(&ctx.desensitize(pat)?)?;
                expand_terms(ctx, |term| re.is_match(term))
            }

            TextPattern::AnyToken { min, max } => {
                if *min == 0 {
                    return Err(SearchError::InvalidPattern(
                        "a token gap that can be empty cannot stand alone".to_string(),
                    ));
                }
                Ok(SpanQuery::AnyToken {
                    min: *min,
                    max: *max,
                })
            }

            TextPattern::Sequence(clauses) => {
                let translated = clauses
                    .iter()
                    .map(|c| c.translate(ctx, captures))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match translated.len() {
                    1 => translated.into_iter().next().unwrap_or(SpanQuery::Or(Vec::new())),
                    _ => SpanQuery::Sequence(translated),
                })
            }

            TextPattern::AndNot { include, exclude } => {
                if include.is_empty() && exclude.is_empty() {
                    return Err(SearchError::InvalidPattern(
                        "empty AND expression".to_string(),
                    ));
                }
                let include = include
                    .iter()
                    .map(|c| c.translate(ctx, captures))
                    .collect::<Result<Vec<_>>>()?;
                let exclude = exclude
                    .iter()
                    .map(|c| c.translate(ctx, captures))
                    .collect::<Result<Vec<_>>>()?;
                if include.is_empty() {
                    // All clauses negative: match positions outside any of them.
                    return Ok(SpanQuery::Not {
                        clause: Box::new(SpanQuery::Or(exclude)),
                        ignore_last_token: ctx.always_has_closing_token(),
                    });
                }
                if exclude.is_empty() && include.len() == 1 {
                    return Ok(include
                        .into_iter()
                        .next()
                        .unwrap_or(SpanQuery::Or(Vec::new())));
                }
                Ok(SpanQuery::AndNot { include, exclude })
            }

            TextPattern::Or(clauses) => {
                let mut translated = clauses
                    .iter()
                    .map(|c| c.translate(ctx, captures))
                    .collect::<Result<Vec<_>>>()?;
                Ok(if translated.len() == 1 {
                    translated.pop().unwrap_or(SpanQuery::Or(Vec::new()))
                } else {
                    SpanQuery::Or(translated)
                })
            }

            TextPattern::Not(clause) => Ok(SpanQuery::Not {
                clause: Box::new(clause.translate(ctx, captures)?),
                ignore_last_token: ctx.always_has_closing_token(),
            }),

            TextPattern::Expansion {
                clause,
                left,
                min,
                max,
            } => Ok(SpanQuery::Expansion {
                clause: Box::new(clause.translate(ctx, captures)?),
                left: *left,
                min: *min,
                max: *max,
            }),

            TextPattern::Repetition { clause, min, max } => {
                if *min == 0 {
                    return Err(SearchError::InvalidPattern(
                        "a repetition that can match the empty sequence cannot stand alone"
                            .to_string(),
                    ));
                }
                let clause = clause.translate(ctx, captures)?;
                Ok(if *min == 1 && *max == 1 {
                    clause
                } else {
                    SpanQuery::Repetition {
                        clause: Box::new(clause),
                        min: *min,
                        max: *max,
                    }
                })
            }

            TextPattern::Sensitive {
                clause,
                case,
                diacritics,
            } => clause.translate(&ctx.with_sensitivity(*case, *diacritics), captures),

            TextPattern::Annotation { name, clause } => {
                clause.translate(&ctx.with_annotation(name), captures)
            }

            TextPattern::Capture { name, clause, .. } => {
                let slot = captures.len();
                captures.push(name.clone());
                Ok(SpanQuery::Capture {
                    slot,
                    clause: Box::new(clause.translate(ctx, captures)?),
                })
            }

            TextPattern::Tags { name, attrs } => Ok(SpanQuery::Tags {
                field: ctx.field().to_string(),
                name: name.clone(),
                attrs: attrs.clone(),
            }),
        }
    }
}

fn rewrite_wildcard(pat: String) -> TextPattern {
    let mut collapsed = String::with_capacity(pat.len());
    let mut last_star = false;
    for c in pat.chars() {
        if c == '*' && last_star {
            continue;
        }
        last_star = c == '*';
        collapsed.push(c);
    }

    if collapsed == "*" {
        return TextPattern::AnyToken { min: 1, max: 1 };
    }
    if !collapsed.contains(['*', '?']) {
        return TextPattern::Term(collapsed);
    }
    if let Some(stem) = collapsed.strip_suffix('*') {
        if !stem.contains(['*', '?']) {
            return TextPattern::Prefix(stem.to_string());
        }
    }
    TextPattern::Wildcard(collapsed)
}

fn rewrite_regex(pat: String) -> TextPattern {
    // Matching is whole-token already, so explicit anchors are redundant.
    // Anchors go first: the parser anchors every quoted value, and the
    // sensitivity prefix sits inside those anchors.
    let body = pat.strip_prefix('^').unwrap_or(&pat);
    let body = body.strip_suffix('$').unwrap_or(body);

    // Sensitivity-override prefixes become an explicit Sensitive wrapper.
    for (prefix, case, diacritics) in [("(?i)", false, false), ("(?-i)", true, true), ("(?c)", true, true)] {
        if let Some(rest) = body.strip_prefix(prefix) {
            return TextPattern::Sensitive {
                clause: Box::new(TextPattern::Regex(rest.to_string()).rewrite()),
                case,
                diacritics,
            };
        }
    }

    if let Some(glob) = regex_as_wildcard(body) {
        return TextPattern::Wildcard(glob).rewrite();
    }
    if body == pat {
        TextPattern::Regex(pat)
    } else {
        TextPattern::Regex(body.to_string())
    }
}

/// If the regex uses no features beyond `.`, `.*` and `.+` over literal
/// characters, produce the equivalent glob pattern.
fn regex_as_wildcard(body: &str) -> Option<String> {
    let mut glob = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => match chars.peek() {
                Some('*') => {
                    chars.next();
                    glob.push('*');
                }
                Some('+') => {
                    chars.next();
                    glob.push('?');
                    glob.push('*');
                }
                _ => glob.push('?'),
            },
            '\\' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '^' | '$' | '+' | '*' | '?' => {
                return None
            }
            c => glob.push(c),
        }
    }
    Some(glob)
}

fn rewrite_or(clauses: Vec<TextPattern>) -> TextPattern {
    let mut flat = Vec::with_capacity(clauses.len());
    for clause in clauses {
        match clause.rewrite() {
            TextPattern::Or(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    if flat.len() == 1 {
        return flat.remove(0);
    }
    // OR of all-negative clauses: NOT(a) | NOT(b) == NOT(a & b).
    if !flat.is_empty() && flat.iter().all(|c| matches!(c, TextPattern::Not(_))) {
        let include = flat
            .into_iter()
            .map(|c| match c {
                TextPattern::Not(inner) => *inner,
                _ => unreachable!(),
            })
            .collect();
        return TextPattern::Not(Box::new(TextPattern::AndNot {
            include,
            exclude: Vec::new(),
        }));
    }
    TextPattern::Or(flat)
}

fn rewrite_and_not(include: Vec<TextPattern>, exclude: Vec<TextPattern>) -> TextPattern {
    let mut inc = Vec::with_capacity(include.len());
    let mut exc = Vec::with_capacity(exclude.len());
    for clause in include {
        match clause.rewrite() {
            // Nested AND folds into this one.
            TextPattern::AndNot {
                include: i,
                exclude: e,
            } => {
                inc.extend(i);
                exc.extend(e);
            }
            // A negative conjunct is really an exclusion.
            TextPattern::Not(inner) => exc.push(*inner),
            other => inc.push(other),
        }
    }
    for clause in exclude {
        match clause.rewrite() {
            // Excluding a negation is including the clause itself.
            TextPattern::Not(inner) => inc.push(*inner),
            other => exc.push(other),
        }
    }

    if inc.is_empty() && !exc.is_empty() {
        // All-negative AND: NOT(a) & NOT(b) == NOT(a | b).
        let or = if exc.len() == 1 {
            exc.remove(0)
        } else {
            TextPattern::Or(exc)
        };
        return TextPattern::Not(Box::new(or));
    }
    if exc.is_empty() && inc.len() == 1 {
        return inc.remove(0);
    }
    TextPattern::AndNot {
        include: inc,
        exclude: exc,
    }
}

fn rewrite_sequence(clauses: Vec<TextPattern>) -> TextPattern {
    let mut flat = Vec::with_capacity(clauses.len());
    for clause in clauses {
        match clause.rewrite() {
            TextPattern::Sequence(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    if flat.len() == 1 {
        return flat.remove(0);
    }

    // A clause that can match zero tokens splits the sequence into the
    // version with it (at least once) and the version without it.
    if let Some(i) = flat.iter().position(|c| c.matches_empty()) {
        if flat.len() > 1 {
            let mut with = flat.clone();
            with[i] = at_least_once(with[i].clone());
            let mut without = flat;
            without.remove(i);
            return rewrite_or(vec![
                TextPattern::Sequence(with),
                TextPattern::Sequence(without),
            ]);
        }
    }
    TextPattern::Sequence(flat)
}

fn at_least_once(pattern: TextPattern) -> TextPattern {
    match pattern {
        TextPattern::Repetition { clause, max, .. } => TextPattern::Repetition {
            clause,
            min: 1,
            max,
        },
        TextPattern::AnyToken { max, .. } => TextPattern::AnyToken { min: 1, max },
        other => other,
    }
}

/// Compile a whole-token regex, mapping construction failures onto the
/// pattern error taxonomy.
fn token_regex(body: &str) -> Result<regex::Regex> {
    regex::RegexBuilder::new(&format!("^(?:{body})$"))
        .build()
        .map_err(|e| match e {
            regex::Error::CompiledTooBig(_) => SearchError::PatternTooLarge,
            other => SearchError::InvalidPattern(other.to_string()),
        })
}

fn wildcard_to_regex(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len() * 2);
    for c in pat.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// Expand a term-set pattern into an OR over the concrete terms of the
/// resolved annotation variant, bounded by the index's clause ceiling.
fn expand_terms(ctx: &ExecContext, mut matches: impl FnMut(&str) -> bool) -> Result<SpanQuery> {
    let key = ctx.annot_key()?;
    let dict = match ctx.index().term_dict(&key) {
        Some(dict) => dict,
        None => return Ok(SpanQuery::Or(Vec::new())),
    };
    let limit = ctx.index().max_clause_count();
    let mut clauses = Vec::new();
    for (id, term) in dict.iter() {
        if matches(term) {
            if clauses.len() >= limit {
                return Err(SearchError::QueryTooBroad { limit });
            }
            clauses.push(SpanQuery::Term {
                key: key.clone(),
                term: id,
            });
        }
    }
    trace!(
        annotation = %key.annotation,
        clauses = clauses.len(),
        "expanded term-set pattern"
    );
    Ok(match clauses.len() {
        1 => clauses
            .into_iter()
            .next()
            .unwrap_or(SpanQuery::Or(Vec::new())),
        _ => SpanQuery::Or(clauses),
    })
}
