use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::app_dirs::AppDirs;
use crate::session::{KeyboardLayout, UserSession};
use crate::typing_error::mark_corrected;
use crate::util::{mean, round2, std_dev};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session {0} has not ended")]
    NotEnded(Uuid),
}

/// Aggregate record of one finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalSession {
    pub session_id: Uuid,
    pub theme: String,
    pub keyboard_layout: KeyboardLayout,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub wpm: u32,
    pub net_wpm: u32,
    pub accuracy: f64,
    pub total_characters: usize,
    pub correct_characters: usize,
    pub error_count: usize,
    pub corrected_errors: usize,
    pub keystrokes_per_minute: u32,
    pub completed: bool,
}

impl HistoricalSession {
    /// Condense an ended session.
    pub fn from_session(session: &UserSession) -> Result<Self, HistoryError> {
        let ended_at = match session.end_time {
            Some(end) if !session.is_active => end,
            _ => return Err(HistoryError::NotEnded(session.session_id)),
        };
        let progress = &session.user_progress;
        let corrected_errors = mark_corrected(&progress.errors, &session.content, &progress.typed_text)
            .iter()
            .filter(|e| e.corrected)
            .count();
        let metrics = &session.metrics;

        Ok(Self {
            session_id: session.session_id,
            theme: session.theme.clone(),
            keyboard_layout: session.keyboard_layout,
            started_at: session.start_time,
            ended_at,
            duration_secs: session.duration_secs().unwrap_or(0),
            wpm: metrics.wpm,
            net_wpm: metrics.net_wpm,
            accuracy: metrics.accuracy,
            total_characters: metrics.total_characters,
            correct_characters: metrics.correct_characters,
            error_count: metrics.error_count,
            corrected_errors,
            keystrokes_per_minute: metrics.keystrokes_per_minute,
            completed: session.is_complete(),
        })
    }
}

/// Totals across every archived session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    pub session_count: usize,
    pub average_wpm: f64,
    pub best_wpm: u32,
    pub average_accuracy: f64,
    pub total_practice_secs: u64,
    /// Spread of per-session WPM, a rough consistency measure
    pub wpm_std_dev: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeSummary {
    pub theme: String,
    pub sessions: i64,
    pub average_wpm: f64,
    pub average_accuracy: f64,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    theme TEXT NOT NULL,
    keyboard_layout TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    duration_secs INTEGER NOT NULL,
    wpm INTEGER NOT NULL,
    net_wpm INTEGER NOT NULL,
    accuracy REAL NOT NULL,
    total_characters INTEGER NOT NULL,
    correct_characters INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    corrected_errors INTEGER NOT NULL,
    keystrokes_per_minute INTEGER NOT NULL,
    completed BOOLEAN NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_theme ON sessions(theme);
"#;

const COLUMNS: &str = "session_id, theme, keyboard_layout, started_at, ended_at, duration_secs, \
     wpm, net_wpm, accuracy, total_characters, correct_characters, error_count, \
     corrected_errors, keystrokes_per_minute, completed";

/// SQLite archive of finished sessions
#[derive(Debug)]
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open the archive in the default state directory
    pub fn open_default() -> Result<Self, HistoryError> {
        let path = AppDirs::history_db_path().unwrap_or_else(|| PathBuf::from("themetype_history.db"));
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Archive a session; recording the same id twice keeps the later copy.
    pub fn record(&self, session: &HistoricalSession) -> Result<(), HistoryError> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO sessions ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                session.session_id.to_string(),
                session.theme,
                session.keyboard_layout.to_string(),
                session.started_at.to_rfc3339(),
                session.ended_at.to_rfc3339(),
                session.duration_secs as i64,
                session.wpm,
                session.net_wpm,
                session.accuracy,
                session.total_characters as i64,
                session.correct_characters as i64,
                session.error_count as i64,
                session.corrected_errors as i64,
                session.keystrokes_per_minute,
                session.completed,
            ],
        )?;
        tracing::debug!("archived session {}", session.session_id);
        Ok(())
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoricalSession>, HistoryError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sessions ORDER BY started_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_session)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Oldest first
    pub fn all(&self) -> Result<Vec<HistoricalSession>, HistoryError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM sessions ORDER BY started_at ASC"))?;
        let rows = stmt.query_map([], row_to_session)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn get(&self, session_id: Uuid) -> Result<Option<HistoricalSession>, HistoryError> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE session_id = ?1"),
                [session_id.to_string()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Returns whether a record was removed
    pub fn delete(&self, session_id: Uuid) -> Result<bool, HistoryError> {
        let removed = self.conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            [session_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Returns the number of records removed
    pub fn clear_all(&self) -> Result<usize, HistoryError> {
        Ok(self.conn.execute("DELETE FROM sessions", [])?)
    }

    pub fn summary(&self) -> Result<HistorySummary, HistoryError> {
        let sessions = self.all()?;
        let wpms: Vec<f64> = sessions.iter().map(|s| s.wpm as f64).collect();
        let accuracies: Vec<f64> = sessions.iter().map(|s| s.accuracy).collect();

        Ok(HistorySummary {
            session_count: sessions.len(),
            average_wpm: mean(&wpms).map(round2).unwrap_or(0.0),
            best_wpm: sessions.iter().map(|s| s.wpm).max().unwrap_or(0),
            average_accuracy: mean(&accuracies).map(round2).unwrap_or(0.0),
            total_practice_secs: sessions.iter().map(|s| s.duration_secs).sum(),
            wpm_std_dev: std_dev(&wpms).map(round2).unwrap_or(0.0),
        })
    }

    pub fn theme_breakdown(&self) -> Result<Vec<ThemeSummary>, HistoryError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT theme, COUNT(*), AVG(wpm), AVG(accuracy)
            FROM sessions
            GROUP BY theme
            ORDER BY COUNT(*) DESC, theme ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ThemeSummary {
                theme: row.get(0)?,
                sessions: row.get(1)?,
                average_wpm: round2(row.get(2)?),
                average_accuracy: round2(row.get(3)?),
            })
        })?;
        let mut summary = Vec::new();
        for row in rows {
            summary.push(row?);
        }
        Ok(summary)
    }

    /// Write every record as CSV with a header row; returns the row count.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<usize, HistoryError> {
        let sessions = self.all()?;
        let mut out = csv::Writer::from_writer(writer);
        for session in &sessions {
            out.serialize(session)?;
        }
        out.flush()?;
        Ok(sessions.len())
    }
}

fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_session(row: &Row) -> rusqlite::Result<HistoricalSession> {
    let id: String = row.get(0)?;
    let session_id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let layout: String = row.get(2)?;

    Ok(HistoricalSession {
        session_id,
        theme: row.get(1)?,
        keyboard_layout: KeyboardLayout::parse(&layout).unwrap_or_default(),
        started_at: parse_time(row, 3)?,
        ended_at: parse_time(row, 4)?,
        duration_secs: row.get::<_, i64>(5)?.max(0) as u64,
        wpm: row.get(6)?,
        net_wpm: row.get(7)?,
        accuracy: row.get(8)?,
        total_characters: row.get::<_, i64>(9)?.max(0) as usize,
        correct_characters: row.get::<_, i64>(10)?.max(0) as usize,
        error_count: row.get::<_, i64>(11)?.max(0) as usize,
        corrected_errors: row.get::<_, i64>(12)?.max(0) as usize,
        keystrokes_per_minute: row.get(13)?,
        completed: row.get(14)?,
    })
}
