use crate::clock::Clock;
use crate::persistence::SessionStore;
use crate::session_machine::{SessionMachine, SessionState};
use crate::typing_error::TypingError;

/// Outcome of one keystroke against the reference text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Correct,
    Incorrect,
    /// The session was not accepting input
    Ignored,
}

/// Type `c` at the cursor.
///
/// A mismatch records a substitution, typing past the end of the reference
/// records an insertion. The cursor always advances.
pub fn apply_char<S: SessionStore, C: Clock>(machine: &mut SessionMachine<S, C>, c: char) -> Keystroke {
    if machine.state() != SessionState::Active {
        return Keystroke::Ignored;
    }
    let Some(session) = machine.session() else {
        return Keystroke::Ignored;
    };

    let position = session.user_progress.current_position;
    let expected = session.expected_char();
    let mut typed = session.user_progress.typed_text.clone();
    typed.push(c);

    let now = machine.now();
    machine.update_progress(position + 1, typed);

    match expected {
        Some(expected) if expected == c => Keystroke::Correct,
        Some(expected) => {
            machine.add_error(TypingError::substitution(position, expected, c, now));
            Keystroke::Incorrect
        }
        None => {
            machine.add_error(TypingError::insertion(position, c, now));
            Keystroke::Incorrect
        }
    }
}

/// Remove the last typed character.
///
/// Errors already recorded stay in the list; whether they were fixed is
/// decided later by `typing_error::mark_corrected`.
pub fn apply_backspace<S: SessionStore, C: Clock>(machine: &mut SessionMachine<S, C>) -> Keystroke {
    if machine.state() != SessionState::Active {
        return Keystroke::Ignored;
    }
    let Some(session) = machine.session() else {
        return Keystroke::Ignored;
    };

    let mut typed = session.user_progress.typed_text.clone();
    if typed.pop().is_none() {
        return Keystroke::Ignored;
    }
    let position = session.user_progress.current_position.saturating_sub(1);
    machine.update_progress(position, typed);
    Keystroke::Correct
}
