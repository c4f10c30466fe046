//! Typing speed and accuracy math.
//!
//! Everything here is pure: the same inputs always give the same snapshot,
//! and every rate returns 0 instead of dividing by a zero elapsed time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::typing_error::TypingError;
use crate::util::round2;

/// Standard typing convention: one word is five characters.
pub const CHARS_PER_WORD: f64 = 5.0;

/// Derived statistics for a session at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub wpm: u32,
    /// Same value as `wpm`; no per-interval samples are available here.
    pub average_wpm: u32,
    pub net_wpm: u32,
    pub accuracy: f64,
    pub total_characters: usize,
    pub correct_characters: usize,
    pub error_count: usize,
    /// Whole seconds since the session started
    pub time_elapsed: u64,
    pub keystrokes_per_minute: u32,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            wpm: 0,
            average_wpm: 0,
            net_wpm: 0,
            accuracy: 100.0,
            total_characters: 0,
            correct_characters: 0,
            error_count: 0,
            time_elapsed: 0,
            keystrokes_per_minute: 0,
        }
    }
}

fn per_minute(amount: f64, elapsed_secs: f64) -> u32 {
    if elapsed_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0;
    }
    let rate = amount / (elapsed_secs / 60.0);
    rate.round().max(0.0) as u32
}

pub fn compute_wpm(characters_typed: usize, elapsed_secs: f64) -> u32 {
    per_minute(characters_typed as f64 / CHARS_PER_WORD, elapsed_secs)
}

pub fn compute_accuracy(correct_characters: usize, total_characters: usize) -> f64 {
    if total_characters == 0 {
        return 100.0;
    }
    let ratio = correct_characters as f64 / total_characters as f64;
    round2(ratio * 100.0).clamp(0.0, 100.0)
}

pub fn compute_keystrokes_per_minute(total_keystrokes: usize, elapsed_secs: f64) -> u32 {
    per_minute(total_keystrokes as f64, elapsed_secs)
}

/// WPM with `error_count / 5` words taken off; saturates at 0.
pub fn compute_net_wpm(characters_typed: usize, error_count: usize, elapsed_secs: f64) -> u32 {
    let words = characters_typed as f64 / CHARS_PER_WORD;
    let penalty = error_count as f64 / CHARS_PER_WORD;
    per_minute((words - penalty).max(0.0), elapsed_secs)
}

/// Recompute every metric of a session from scratch.
///
/// Errors flagged `corrected` are not subtracted from the correct count.
/// `reference` is accepted for symmetry with the error classifier; the counts
/// only depend on what was typed and what was recorded as wrong.
pub fn compute_session_metrics(
    typed_text: &str,
    _reference: &str,
    errors: &[TypingError],
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SessionMetrics {
    let total_characters = typed_text.chars().count();
    let uncorrected = errors.iter().filter(|e| !e.corrected).count();
    let correct_characters = total_characters.saturating_sub(uncorrected);
    let error_count = errors.len();

    let time_elapsed = (now - start_time).num_seconds().max(0) as u64;
    let elapsed = time_elapsed as f64;

    let wpm = compute_wpm(total_characters, elapsed);

    SessionMetrics {
        wpm,
        average_wpm: wpm,
        net_wpm: compute_net_wpm(total_characters, error_count, elapsed),
        accuracy: compute_accuracy(correct_characters, total_characters),
        total_characters,
        correct_characters,
        error_count,
        time_elapsed,
        keystrokes_per_minute: compute_keystrokes_per_minute(total_characters, elapsed),
    }
}
