//! Practice text: request validation, providers, retry and the stale-response
//! gate.

use include_dir::{include_dir, Dir};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

static THEME_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/themes");

pub const MIN_TARGET_LENGTH: usize = 50;
pub const MAX_TARGET_LENGTH: usize = 5000;
pub const MAX_THEME_LENGTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("invalid theme: {0}")]
    InvalidTheme(String),
    #[error("target length {length} outside {min}..={max}")]
    InvalidLength {
        length: usize,
        min: usize,
        max: usize,
    },
    #[error("invalid language code {0:?}")]
    InvalidLanguage(String),
    #[error("no content available for theme {0:?}")]
    UnknownTheme(String),
    #[error("language {0:?} is not supported by this provider")]
    UnsupportedLanguage(String),
    #[error("provider returned no text")]
    Empty,
    #[error("network error: {0}")]
    Network(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no content provider configured")]
    NotConfigured,
}

impl ContentError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContentError::Network(_) | ContentError::Provider(_))
    }
}

/// A validated request for practice text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    theme: String,
    target_length: usize,
    language: String,
}

impl ContentRequest {
    pub fn new(theme: &str, target_length: usize, language: &str) -> Result<Self, ContentError> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(ContentError::InvalidTheme("theme is empty".into()));
        }
        if theme.chars().count() > MAX_THEME_LENGTH {
            return Err(ContentError::InvalidTheme(format!(
                "longer than {MAX_THEME_LENGTH} characters"
            )));
        }
        if let Some(bad) = theme
            .chars()
            .find(|c| !(c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '\'' | '&' | ',')))
        {
            return Err(ContentError::InvalidTheme(format!("unexpected character {bad:?}")));
        }

        if !(MIN_TARGET_LENGTH..=MAX_TARGET_LENGTH).contains(&target_length) {
            return Err(ContentError::InvalidLength {
                length: target_length,
                min: MIN_TARGET_LENGTH,
                max: MAX_TARGET_LENGTH,
            });
        }

        let language = language.trim().to_ascii_lowercase();
        if language.len() != 2 || !language.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(ContentError::InvalidLanguage(language));
        }

        Ok(Self {
            theme: theme.to_string(),
            target_length,
            language,
        })
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn target_length(&self) -> usize {
        self.target_length
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub text: String,
    pub word_count: usize,
    pub source_label: String,
    pub metadata: BTreeMap<String, String>,
}

impl Content {
    pub fn new(text: String, source_label: impl Into<String>) -> Self {
        let word_count = text.split_whitespace().count();
        Self {
            text,
            word_count,
            source_label: source_label.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Anything that can turn a request into practice text.
pub trait ContentProvider {
    fn request_content(&self, request: &ContentRequest) -> Result<Content, ContentError>;
}

#[derive(Deserialize, Clone, Debug)]
pub struct ThemeCorpus {
    pub name: String,
    pub description: String,
    pub sentences: Vec<String>,
}

/// Offline provider that strings together sentences from the bundled
/// theme corpora.
#[derive(Debug, Clone)]
pub struct ThemeCorpusProvider {
    corpora: Vec<ThemeCorpus>,
    seed: Option<u64>,
}

impl ThemeCorpusProvider {
    pub fn new() -> Self {
        Self {
            corpora: load_bundled_corpora(),
            seed: None,
        }
    }

    /// Same request, same text.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }

    pub fn themes(&self) -> Vec<&str> {
        self.corpora.iter().map(|c| c.name.as_str()).collect()
    }

    fn find(&self, theme: &str) -> Option<&ThemeCorpus> {
        let wanted = theme.trim().to_lowercase();
        self.corpora.iter().find(|c| c.name == wanted)
    }
}

impl Default for ThemeCorpusProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn load_bundled_corpora() -> Vec<ThemeCorpus> {
    let mut corpora: Vec<ThemeCorpus> = THEME_DIR
        .files()
        .filter_map(|file| {
            let name = file.path().display().to_string();
            let Some(text) = file.contents_utf8() else {
                tracing::warn!("theme file {name} is not utf-8");
                return None;
            };
            match serde_json::from_str::<ThemeCorpus>(text) {
                Ok(corpus) if !corpus.sentences.is_empty() => Some(corpus),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("skipping theme file {name}: {e}");
                    None
                }
            }
        })
        .collect();
    corpora.sort_by(|a, b| a.name.cmp(&b.name));
    corpora
}

impl ContentProvider for ThemeCorpusProvider {
    fn request_content(&self, request: &ContentRequest) -> Result<Content, ContentError> {
        if request.language() != "en" {
            return Err(ContentError::UnsupportedLanguage(request.language().to_string()));
        }
        let corpus = self
            .find(request.theme())
            .ok_or_else(|| ContentError::UnknownTheme(request.theme().to_string()))?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut text = String::new();
        let mut used = 0usize;
        let mut deck: Vec<&String> = Vec::new();
        while text.chars().count() < request.target_length() {
            if deck.is_empty() {
                deck = corpus.sentences.iter().collect();
                deck.shuffle(&mut rng);
            }
            let Some(sentence) = deck.pop() else {
                break;
            };
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(sentence.trim());
            used += 1;
        }

        Ok(Content::new(text, format!("corpus:{}", corpus.name))
            .with_meta("theme", &corpus.name)
            .with_meta("language", request.language())
            .with_meta("sentences", used))
    }
}

/// Hands out one fixed text regardless of the request.
#[derive(Debug, Clone)]
pub struct StaticContentProvider {
    text: String,
    label: String,
}

impl StaticContentProvider {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }

    /// Line breaks and runs of whitespace collapse to single spaces.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(Self::new(text, format!("file:{}", path.display())))
    }
}

impl ContentProvider for StaticContentProvider {
    fn request_content(&self, _request: &ContentRequest) -> Result<Content, ContentError> {
        if self.text.trim().is_empty() {
            return Err(ContentError::Empty);
        }
        Ok(Content::new(self.text.clone(), self.label.clone()))
    }
}

/// Try `primary`; on any failure ask `secondary`.
#[derive(Debug, Clone)]
pub struct FallbackProvider<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> FallbackProvider<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: ContentProvider, B: ContentProvider> ContentProvider for FallbackProvider<A, B> {
    fn request_content(&self, request: &ContentRequest) -> Result<Content, ContentError> {
        match self.primary.request_content(request) {
            Ok(content) => Ok(content),
            Err(e) => {
                tracing::warn!("primary content provider failed, falling back: {e}");
                self.secondary
                    .request_content(request)
                    .map(|content| content.with_meta("fallback", true))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Ask `provider` up to `policy.max_attempts` times with exponential backoff.
///
/// `sleep` is called between attempts so callers (and tests) decide how
/// waiting happens. Non-retryable errors return immediately.
pub fn fetch_with_retry<P, F>(
    provider: &P,
    request: &ContentRequest,
    policy: &RetryPolicy,
    mut sleep: F,
) -> Result<Content, ContentError>
where
    P: ContentProvider + ?Sized,
    F: FnMut(Duration),
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match provider.request_content(request) {
            Ok(content) => return Ok(content),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!("content attempt {attempt}/{attempts} failed ({e}), retrying in {delay:?}");
                sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!("content request for {:?} failed: {e}", request.theme());
                return Err(e);
            }
        }
    }
}

/// Identifies one content fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestTicket(u64);

/// Keeps only the newest fetch's answer.
///
/// Every fetch takes a ticket; a response arriving with an older ticket than
/// the latest one handed out belongs to a session the user already left and
/// is dropped.
#[derive(Debug, Default)]
pub struct RequestGate {
    latest: u64,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> RequestTicket {
        self.latest += 1;
        RequestTicket(self.latest)
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        ticket.0 == self.latest
    }

    /// `None` when the response is stale.
    pub fn accept<T>(&self, ticket: RequestTicket, response: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(response)
        } else {
            tracing::debug!("dropping stale content response {} (latest {})", ticket.0, self.latest);
            None
        }
    }
}
