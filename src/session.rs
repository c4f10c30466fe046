use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::SessionMetrics;
use crate::typing_error::TypingError;

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KeyboardLayout {
    #[default]
    Qwerty,
    Azerty,
    Qwertz,
    Dvorak,
    Colemak,
}

impl KeyboardLayout {
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Where the user is in the reference text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    /// Always equal to the character length of `typed_text`
    pub current_position: usize,
    pub typed_text: String,
    pub errors: Vec<TypingError>,
}

/// A single practice session, the aggregate the session machine owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: Uuid,
    pub theme: String,
    pub keyboard_layout: KeyboardLayout,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub content: String,
    pub user_progress: UserProgress,
    pub metrics: SessionMetrics,
}

impl UserSession {
    pub fn new(
        content: String,
        theme: String,
        keyboard_layout: KeyboardLayout,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            theme,
            keyboard_layout,
            start_time,
            end_time: None,
            is_active: true,
            content,
            user_progress: UserProgress::default(),
            metrics: SessionMetrics::default(),
        }
    }

    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Reference character at the cursor, if the text has not run out.
    pub fn expected_char(&self) -> Option<char> {
        self.content.chars().nth(self.user_progress.current_position)
    }

    pub fn is_complete(&self) -> bool {
        self.user_progress.current_position >= self.content_len()
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds().max(0) as u64)
    }
}
