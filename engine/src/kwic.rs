//! Hit rendering value types: the annotated token form ([`Kwic`]) and the
//! plain three-fragment form ([`Concordance`]).

use smartstring::alias::CompactString;

/// A hit as left/hit/right text fragments.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Concordance {
    pub left: String,
    pub hit: String,
    pub right: String,
}

/// A hit as a flat, token-major array of annotation values over the context
/// window: all values of token 0 (one per annotation, in `annotations`
/// order), then token 1, and so on. `hit_start`/`hit_end` are in token
/// units within the window.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Kwic {
    pub annotations: Vec<String>,
    pub tokens: Vec<CompactString>,
    pub hit_start: usize,
    pub hit_end: usize,
}

impl Kwic {
    /// Number of tokens in the context window.
    pub fn token_count(&self) -> usize {
        if self.annotations.is_empty() {
            0
        } else {
            self.tokens.len() / self.annotations.len()
        }
    }

    /// The value of one annotation at one token position.
    pub fn value(&self, position: usize, annotation: &str) -> Option<&str> {
        let a = self.annotations.iter().position(|n| n == annotation)?;
        self.tokens
            .get(position * self.annotations.len() + a)
            .map(|t| t.as_str())
    }

    /// Render into plain fragments. Punctuation is stored *after* the word
    /// it follows, so each fragment boundary falls between a word and its
    /// trailing punctuation: the hit fragment ends at the last hit word and
    /// the right fragment starts with the punctuation after it. This is the
    /// same cut a character-offset content store makes.
    pub fn to_concordance(&self) -> Concordance {
        let word = |pos: usize| self.value(pos, "word").unwrap_or("");
        let punct = |pos: usize| self.value(pos, "punct").unwrap_or("");
        let count = self.token_count();

        let mut left = String::new();
        for pos in 0..self.hit_start {
            left.push_str(word(pos));
            left.push_str(punct(pos));
        }

        let mut hit = String::new();
        for pos in self.hit_start..self.hit_end {
            hit.push_str(word(pos));
            if pos + 1 < self.hit_end {
                hit.push_str(punct(pos));
            }
        }

        let mut right = String::new();
        if self.hit_end > self.hit_start && self.hit_end < count {
            right.push_str(punct(self.hit_end - 1));
        }
        for pos in self.hit_end..count {
            right.push_str(word(pos));
            if pos + 1 < count {
                right.push_str(punct(pos));
            }
        }

        Concordance { left, hit, right }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kwic(words: &[&str], puncts: &[&str], hit_start: usize, hit_end: usize) -> Kwic {
        let mut tokens = Vec::new();
        for (w, p) in words.iter().zip(puncts) {
            tokens.push(CompactString::from(*w));
            tokens.push(CompactString::from(*p));
        }
        Kwic {
            annotations: vec!["word".to_string(), "punct".to_string()],
            tokens,
            hit_start,
            hit_end,
        }
    }

    #[test]
    fn fragments_split_around_trailing_punctuation() {
        let k = kwic(
            &["the", "quick", "brown", "fox"],
            &[" ", " ", " ", "."],
            1,
            3,
        );
        let c = k.to_concordance();
        assert_eq!(c.left, "the ");
        assert_eq!(c.hit, "quick brown");
        assert_eq!(c.right, " fox");
    }

    #[test]
    fn hit_at_window_edges() {
        let k = kwic(&["a", "b"], &[" ", "."], 0, 2);
        let c = k.to_concordance();
        assert_eq!(c.left, "");
        assert_eq!(c.hit, "a b");
        assert_eq!(c.right, "");
    }

    #[test]
    fn zero_length_hit_is_empty() {
        let k = kwic(&["a", "b"], &[" ", "."], 1, 1);
        let c = k.to_concordance();
        assert_eq!(c.left, "a ");
        assert_eq!(c.hit, "");
        assert_eq!(c.right, "b");
    }
}
