//! Textual corpus query language, lexed with logos and parsed with peg into
//! a [`TextPattern`] tree. The parser does no optimization of its own; every
//! simplification lives in [`TextPattern::rewrite`].
//!
//! ```text
//! [word="dog" & lemma!="cat"] "very"{2,3} adj:[pos="ADJ"] <s/>
//! ```

use logos::Logos;

use crate::error::{Result, SearchError};
use crate::pattern::TextPattern;

#[derive(Debug, Logos, Clone, Copy, PartialEq)]
pub enum CqlToken<'a> {
    #[regex(r#""([^"\\]|\\.)*""#, |l| &l.slice()[1..l.slice().len() - 1])]
    Quoted(&'a str),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_-]*")]
    Ident(&'a str),
    #[regex(r"[0-9]+", |l| l.slice().parse::<u32>().ok())]
    Number(u32),
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("<")]
    TagOpen,
    #[token("/>")]
    TagClose,
    #[token("=")]
    Eq,
    #[token("!=")]
    Neq,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("*")]
    Star,
    #[token("+")]
    Plus,
    #[token("?")]
    Question,
    #[regex(r"\s+", logos::skip)]
    Skip,
}

/// Parse a corpus query expression into a pattern tree.
pub fn parse_cql(input: &str) -> Result<TextPattern> {
    let tokens = CqlToken::lexer(input)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| SearchError::InvalidPattern(format!("unrecognized token in {input:?}")))?;
    cql_grammar::pattern(&tokens)
        .map_err(|e| SearchError::InvalidPattern(format!("{input:?}: expected {}", e.expected)))
}

/// Quoted values carry regex semantics and match the whole token.
fn anchored(value: &str) -> TextPattern {
    TextPattern::Regex(format!("^{value}$"))
}

fn group(mut clauses: Vec<TextPattern>, wrap: fn(Vec<TextPattern>) -> TextPattern) -> TextPattern {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        wrap(clauses)
    }
}

peg::parser! {
    grammar cql_grammar<'a>() for [CqlToken<'a>] {
        pub rule pattern() -> TextPattern
            = alternatives()

        rule alternatives() -> TextPattern
            = l:(sequence() ++ [CqlToken::Pipe]) { group(l, TextPattern::Or) }

        rule sequence() -> TextPattern
            = c:(quantified()+) { group(c, TextPattern::Sequence) }

        rule quantified() -> TextPattern
            = a:atom() q:quantifier()? {
                match q {
                    None => a,
                    Some((min, max)) => TextPattern::repeat(a, min, max),
                }
            }

        rule quantifier() -> (u32, u32)
            = [CqlToken::Star] { (0, u32::MAX) }
            / [CqlToken::Plus] { (1, u32::MAX) }
            / [CqlToken::Question] { (0, 1) }
            / [CqlToken::BraceOpen] n:number() [CqlToken::Comma] m:number() [CqlToken::BraceClose] { (n, m) }
            / [CqlToken::BraceOpen] n:number() [CqlToken::Comma] [CqlToken::BraceClose] { (n, u32::MAX) }
            / [CqlToken::BraceOpen] n:number() [CqlToken::BraceClose] { (n, n) }

        rule atom() -> TextPattern
            = name:ident() [CqlToken::Colon] a:atom() { TextPattern::capture(name, a) }
            / [CqlToken::Quoted(v)] { anchored(v) }
            / [CqlToken::BracketOpen] [CqlToken::BracketClose] { TextPattern::AnyToken { min: 1, max: 1 } }
            / [CqlToken::BracketOpen] e:constraint_or() [CqlToken::BracketClose] { e }
            / [CqlToken::TagOpen] name:ident() attrs:(attr()*) [CqlToken::TagClose] {
                TextPattern::Tags { name, attrs }
            }
            / [CqlToken::ParenOpen] p:alternatives() [CqlToken::ParenClose] { p }

        rule attr() -> (String, String)
            = name:ident() [CqlToken::Eq] [CqlToken::Quoted(v)] { (name, v.to_string()) }

        rule constraint_or() -> TextPattern
            = l:(constraint_and() ++ [CqlToken::Pipe]) { group(l, TextPattern::Or) }

        rule constraint_and() -> TextPattern
            = l:(constraint_atom() ++ [CqlToken::Amp]) { group(l, TextPattern::and) }

        rule constraint_atom() -> TextPattern
            = name:ident() [CqlToken::Eq] [CqlToken::Quoted(v)] {
                TextPattern::Annotation { name, clause: Box::new(anchored(v)) }
            }
            / name:ident() [CqlToken::Neq] [CqlToken::Quoted(v)] {
                TextPattern::not(TextPattern::Annotation { name, clause: Box::new(anchored(v)) })
            }
            / [CqlToken::ParenOpen] e:constraint_or() [CqlToken::ParenClose] { e }

        rule ident() -> String
            = [CqlToken::Ident(v)] { v.to_string() }

        rule number() -> u32
            = [CqlToken::Number(n)] { n }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_quote_is_anchored_regex() {
        assert_eq!(
            parse_cql(r#""dog""#).unwrap(),
            TextPattern::Regex("^dog$".into())
        );
    }

    #[test]
    fn bracket_expression() {
        assert_eq!(
            parse_cql(r#"[lemma="walk"]"#).unwrap(),
            TextPattern::Annotation {
                name: "lemma".into(),
                clause: Box::new(TextPattern::Regex("^walk$".into())),
            }
        );
        assert_eq!(
            parse_cql(r#"[word="a" & lemma!="b"]"#).unwrap(),
            TextPattern::and(vec![
                TextPattern::Annotation {
                    name: "word".into(),
                    clause: Box::new(TextPattern::Regex("^a$".into())),
                },
                TextPattern::not(TextPattern::Annotation {
                    name: "lemma".into(),
                    clause: Box::new(TextPattern::Regex("^b$".into())),
                }),
            ])
        );
    }

    #[test]
    fn any_token_and_quantifiers() {
        assert_eq!(
            parse_cql("[]").unwrap(),
            TextPattern::AnyToken { min: 1, max: 1 }
        );
        assert_eq!(
            parse_cql(r#""a"{2,3}"#).unwrap(),
            TextPattern::repeat(TextPattern::Regex("^a$".into()), 2, 3)
        );
        assert_eq!(
            parse_cql(r#""a"?"#).unwrap(),
            TextPattern::repeat(TextPattern::Regex("^a$".into()), 0, 1)
        );
        assert_eq!(
            parse_cql(r#""a"+"#).unwrap(),
            TextPattern::repeat(TextPattern::Regex("^a$".into()), 1, u32::MAX)
        );
        assert_eq!(
            parse_cql(r#""a"{2,}"#).unwrap(),
            TextPattern::repeat(TextPattern::Regex("^a$".into()), 2, u32::MAX)
        );
    }

    #[test]
    fn sequences_and_alternatives() {
        assert_eq!(
            parse_cql(r#""the" "dog""#).unwrap(),
            TextPattern::seq(vec![
                TextPattern::Regex("^the$".into()),
                TextPattern::Regex("^dog$".into()),
            ])
        );
        assert_eq!(
            parse_cql(r#""cat" | "dog""#).unwrap(),
            TextPattern::or(vec![
                TextPattern::Regex("^cat$".into()),
                TextPattern::Regex("^dog$".into()),
            ])
        );
    }

    #[test]
    fn captures_and_tags() {
        let parsed = parse_cql(r#"adj:[pos="ADJ"]"#).unwrap();
        match parsed {
            TextPattern::Capture { name, clause, .. } => {
                assert_eq!(name, "adj");
                assert_eq!(
                    *clause,
                    TextPattern::Annotation {
                        name: "pos".into(),
                        clause: Box::new(TextPattern::Regex("^ADJ$".into())),
                    }
                );
            }
            other => panic!("expected capture, got {other:?}"),
        }

        assert_eq!(
            parse_cql(r#"<s/>"#).unwrap(),
            TextPattern::Tags { name: "s".into(), attrs: vec![] }
        );
        assert_eq!(
            parse_cql(r#"<ne type="person"/>"#).unwrap(),
            TextPattern::Tags {
                name: "ne".into(),
                attrs: vec![("type".into(), "person".into())],
            }
        );
    }

    #[test]
    fn grouping_parens() {
        assert_eq!(
            parse_cql(r#"("a" | "b") "c""#).unwrap(),
            TextPattern::seq(vec![
                TextPattern::or(vec![
                    TextPattern::Regex("^a$".into()),
                    TextPattern::Regex("^b$".into()),
                ]),
                TextPattern::Regex("^c$".into()),
            ])
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_cql("[word="),
            Err(SearchError::InvalidPattern(_))
        ));
    }
}
