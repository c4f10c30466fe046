use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;

use themetype::clock::ManualClock;
use themetype::persistence::{FileSessionStore, SessionStore, RECOVERY_KEY};
use themetype::scheduler::TimerKind;
use themetype::session::KeyboardLayout;
use themetype::session_machine::{MachineSettings, SessionMachine, SessionState};
use themetype::typing_policy::apply_char;

fn machine(store: FileSessionStore) -> SessionMachine<FileSessionStore, ManualClock> {
    SessionMachine::new(store, ManualClock::default(), MachineSettings::default())
}

// A session interrupted mid-way comes back from disk in a fresh process.
#[test]
fn interrupted_session_survives_restart() {
    let dir = tempdir().unwrap();
    let snapshot = FileSessionStore::with_dir(dir.path()).path_for(RECOVERY_KEY);

    let session_id = {
        let mut first = machine(FileSessionStore::with_dir(dir.path()));
        let id = first
            .start_session("hello world", "nature", KeyboardLayout::Qwertz)
            .session_id;
        for c in "hellp".chars() {
            apply_char(&mut first, c);
        }
        first.clock().advance_secs(31);
        let fired = first.poll();
        assert!(fired.contains(&TimerKind::Inactivity));
        assert!(fired.contains(&TimerKind::AutoSave));
        assert!(first.is_paused());
        id
    };
    assert!(snapshot.exists());

    let mut second = machine(FileSessionStore::with_dir(dir.path()));
    let recovered = second.recover_session().expect("snapshot recovered");
    assert_eq!(recovered.session_id, session_id);
    assert_eq!(recovered.keyboard_layout, KeyboardLayout::Qwertz);
    assert_eq!(recovered.user_progress.typed_text, "hellp");
    assert_eq!(recovered.user_progress.current_position, 5);
    assert_eq!(recovered.user_progress.errors.len(), 1);
    assert_eq!(second.state(), SessionState::Paused);

    second.resume_session();
    for c in " world".chars() {
        apply_char(&mut second, c);
    }
    let ended = second.end_session().expect("session ended");
    assert!(!ended.is_active);
    assert_eq!(ended.metrics.error_count, 1);
    assert!(!snapshot.exists());
}

#[test]
fn corrupt_snapshot_is_ignored_and_removed() {
    let dir = tempdir().unwrap();
    let store = FileSessionStore::with_dir(dir.path());
    let path = store.path_for(RECOVERY_KEY);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{ not json").unwrap();

    let mut m = machine(store);
    assert!(m.recover_session().is_none());
    assert_eq!(m.state(), SessionState::Idle);
    assert!(!path.exists());
}

#[test]
fn discarded_session_leaves_no_snapshot() {
    let dir = tempdir().unwrap();
    let store = FileSessionStore::with_dir(dir.path());

    let mut m = machine(store.clone());
    m.start_session("some text", "general", KeyboardLayout::Qwerty);
    assert_matches!(store.load(RECOVERY_KEY), Ok(Some(_)));

    m.discard_session();
    assert_matches!(store.load(RECOVERY_KEY), Ok(None));
    assert!(machine(store).recover_session().is_none());
}

#[test]
fn last_save_wins() {
    let dir = tempdir().unwrap();
    let store = FileSessionStore::with_dir(dir.path());

    let mut a = machine(store.clone());
    a.start_session("first text", "general", KeyboardLayout::Qwerty);
    let mut b = machine(store.clone());
    let second_id = b
        .start_session("second text", "history", KeyboardLayout::Dvorak)
        .session_id;

    let recovered = machine(store).recover_session().unwrap();
    assert_eq!(recovered.session_id, second_id);
    assert_eq!(recovered.content, "second text");
}
