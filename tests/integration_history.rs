use tempfile::tempdir;

use themetype::clock::ManualClock;
use themetype::history::{HistoricalSession, HistoryDb, HistoryError};
use themetype::persistence::MemorySessionStore;
use themetype::session::KeyboardLayout;
use themetype::session_machine::{MachineSettings, SessionMachine};
use themetype::typing_policy::{apply_backspace, apply_char};

fn machine() -> SessionMachine<MemorySessionStore, ManualClock> {
    SessionMachine::new(
        MemorySessionStore::new(),
        ManualClock::default(),
        MachineSettings::default(),
    )
}

/// Type `keys` ('\x08' is backspace) over `secs` seconds and archive the result.
fn finished(theme: &str, text: &str, keys: &str, secs: i64) -> HistoricalSession {
    let mut m = machine();
    m.start_session(text, theme, KeyboardLayout::Qwerty);
    m.clock().advance_secs(secs);
    for c in keys.chars() {
        if c == '\x08' {
            apply_backspace(&mut m);
        } else {
            apply_char(&mut m, c);
        }
    }
    m.end_session();
    HistoricalSession::from_session(&m.take_ended().unwrap()).unwrap()
}

#[test]
fn archive_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("history.db");

    let fast = finished("science", "0123456789", "0123456789", 6);
    let slow = finished("nature", "0123456789", "0123456789", 12);
    {
        let db = HistoryDb::open(&path).unwrap();
        db.record(&fast).unwrap();
        db.record(&slow).unwrap();
    }

    let db = HistoryDb::open(&path).unwrap();
    let summary = db.summary().unwrap();
    assert_eq!(summary.session_count, 2);
    assert_eq!(summary.best_wpm, 20);
    assert_eq!(summary.average_wpm, 15.0);
    assert_eq!(summary.total_practice_secs, 18);

    let stored = db.get(fast.session_id).unwrap().unwrap();
    assert_eq!(stored, fast);

    let themes: Vec<String> = db.theme_breakdown().unwrap().into_iter().map(|t| t.theme).collect();
    assert_eq!(themes.len(), 2);
    assert!(themes.contains(&"science".to_string()));
}

#[test]
fn corrected_mistakes_are_counted() {
    let record = finished("general", "cat", "cx\x08at", 3);
    assert_eq!(record.error_count, 1);
    assert_eq!(record.corrected_errors, 1);
    assert!(record.completed);
}

#[test]
fn active_sessions_cannot_be_archived() {
    let mut m = machine();
    let session = m.start_session("text", "general", KeyboardLayout::Qwerty).clone();
    assert!(matches!(
        HistoricalSession::from_session(&session),
        Err(HistoryError::NotEnded(id)) if id == session.session_id
    ));
}

#[test]
fn csv_export_has_a_row_per_session() {
    let db = HistoryDb::open_in_memory().unwrap();
    db.record(&finished("history", "abcde", "abcde", 5)).unwrap();
    db.record(&finished("history", "abcde", "abxde", 5)).unwrap();

    let mut out = Vec::new();
    assert_eq!(db.export_csv(&mut out).unwrap(), 2);

    let mut reader = csv::Reader::from_reader(out.as_slice());
    let headers = reader.headers().unwrap().clone();
    assert!(headers.iter().any(|h| h == "session_id"));
    assert!(headers.iter().any(|h| h == "accuracy"));
    assert_eq!(reader.records().count(), 2);
}

#[test]
fn clearing_empties_the_summary() {
    let db = HistoryDb::open_in_memory().unwrap();
    let record = finished("general", "abc", "abc", 2);
    db.record(&record).unwrap();
    assert!(db.delete(record.session_id).unwrap());
    assert!(!db.delete(record.session_id).unwrap());

    db.record(&finished("general", "abc", "abc", 2)).unwrap();
    assert_eq!(db.clear_all().unwrap(), 1);
    assert_eq!(db.summary().unwrap().session_count, 0);
    assert_eq!(db.summary().unwrap().average_wpm, 0.0);
}
