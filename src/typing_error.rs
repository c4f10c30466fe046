use chrono::{DateTime, Utc};
use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};

/// The three mutually exclusive ways a typed character can diverge from the
/// reference text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Substitution,
    Omission,
    Insertion,
}

/// One mistyped, omitted or inserted character.
///
/// `expected_char` is absent for an insertion, `typed_char` for an omission.
/// Both are never absent together; the constructors enforce that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingError {
    pub position: usize,
    pub expected_char: Option<char>,
    pub typed_char: Option<char>,
    pub timestamp: DateTime<Utc>,
    pub corrected: bool,
}

impl TypingError {
    /// Returns `None` when neither side carries a character.
    pub fn new(
        position: usize,
        expected_char: Option<char>,
        typed_char: Option<char>,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        if expected_char.is_none() && typed_char.is_none() {
            return None;
        }
        Some(Self {
            position,
            expected_char,
            typed_char,
            timestamp,
            corrected: false,
        })
    }

    pub fn substitution(
        position: usize,
        expected: char,
        typed: char,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position,
            expected_char: Some(expected),
            typed_char: Some(typed),
            timestamp,
            corrected: false,
        }
    }

    pub fn omission(position: usize, expected: char, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            expected_char: Some(expected),
            typed_char: None,
            timestamp,
            corrected: false,
        }
    }

    pub fn insertion(position: usize, typed: char, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            expected_char: None,
            typed_char: Some(typed),
            timestamp,
            corrected: false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match (self.expected_char, self.typed_char) {
            (Some(_), Some(_)) => ErrorKind::Substitution,
            (Some(_), None) => ErrorKind::Omission,
            // deserialized snapshots could in theory carry (None, None); treat as insertion
            (None, _) => ErrorKind::Insertion,
        }
    }
}

/// Positional comparison of a typed string against its reference.
///
/// Differing characters are substitutions, reference characters past the end
/// of `typed` are omissions and typed characters past the end of `reference`
/// are insertions. Every produced error is stamped with `at`.
pub fn classify_errors(reference: &str, typed: &str, at: DateTime<Utc>) -> Vec<TypingError> {
    reference
        .chars()
        .zip_longest(typed.chars())
        .enumerate()
        .filter_map(|(position, pair)| match pair {
            EitherOrBoth::Both(expected, got) if expected != got => {
                Some(TypingError::substitution(position, expected, got, at))
            }
            EitherOrBoth::Both(_, _) => None,
            EitherOrBoth::Left(expected) => Some(TypingError::omission(position, expected, at)),
            EitherOrBoth::Right(got) => Some(TypingError::insertion(position, got, at)),
        })
        .collect()
}

/// Flag every error whose position the user eventually typed correctly.
///
/// This runs over a finished error list; the live engine never flips
/// `corrected` itself.
pub fn mark_corrected(errors: &[TypingError], reference: &str, final_typed: &str) -> Vec<TypingError> {
    let reference: Vec<char> = reference.chars().collect();
    let typed: Vec<char> = final_typed.chars().collect();

    errors
        .iter()
        .map(|error| {
            let fixed = match (reference.get(error.position), typed.get(error.position)) {
                (Some(expected), Some(got)) => expected == got,
                _ => false,
            };
            TypingError {
                corrected: error.corrected || fixed,
                ..error.clone()
            }
        })
        .collect()
}
