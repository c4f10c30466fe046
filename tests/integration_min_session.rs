// Drives the compiled binary through a PTY to exercise the real event loop
// and crossterm input handling.
//
// Requires a TTY; expectrl allocates a pseudo terminal. Unix-only and ignored
// by default. Run with: `cargo test --test integration_min_session -- --ignored`.

#![cfg(unix)]

use std::time::Duration;

use expectrl::{spawn, Eof};

#[test]
#[ignore]
fn minimal_session_completes_and_exits() -> Result<(), Box<dyn std::error::Error>> {
    let home = tempfile::tempdir()?;
    let bin = assert_cmd::cargo::cargo_bin("themetype");
    let cmd = format!("env HOME={} {} -p hi", home.path().display(), bin.display());

    let mut p = spawn(cmd)?;
    std::thread::sleep(Duration::from_millis(200));

    // finishing the prompt moves to the results screen
    p.send("hi")?;
    std::thread::sleep(Duration::from_millis(200));

    // esc quits from results
    p.send("\x1b")?;
    p.expect(Eof)?;

    assert!(home
        .path()
        .join(".local/state/themetype/history.db")
        .exists());
    Ok(())
}
