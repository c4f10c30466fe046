use std::time::Duration;

use crate::clock::Clock;
use crate::content::{
    fetch_with_retry, Content, ContentError, ContentProvider, ContentRequest, RequestGate, RequestTicket,
    RetryPolicy,
};
use crate::history::{HistoricalSession, HistoryDb, HistorySummary};
use crate::persistence::SessionStore;
use crate::runtime::{AppEvent, KeyInput};
use crate::session::{KeyboardLayout, UserSession};
use crate::session_machine::{SessionMachine, SessionState};
use crate::time_series::TimeSeriesPoint;
use crate::typing_policy::{apply_backspace, apply_char};

const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Asking whether to continue an interrupted session
    Recovery,
    Typing,
    Results,
    History,
}

/// Where new practice text comes from.
pub struct ContentPlan {
    pub provider: Box<dyn ContentProvider>,
    pub request: ContentRequest,
    pub retry: RetryPolicy,
    pub layout: KeyboardLayout,
    pub sleep: fn(Duration),
}

/// State of the practice shell, independent of the terminal.
pub struct App<S: SessionStore, C: Clock> {
    pub machine: SessionMachine<S, C>,
    pub screen: Screen,
    pub history: Option<HistoryDb>,
    pub recent: Vec<HistoricalSession>,
    pub summary: HistorySummary,
    /// Last finished session, kept for the results screen
    pub finished: Option<UserSession>,
    pub finished_samples: Vec<TimeSeriesPoint>,
    pub last_record: Option<HistoricalSession>,
    pub should_quit: bool,
    plan: ContentPlan,
    gate: RequestGate,
}

impl<S: SessionStore, C: Clock> App<S, C> {
    pub fn new(machine: SessionMachine<S, C>, plan: ContentPlan, history: Option<HistoryDb>) -> Self {
        let mut app = Self {
            machine,
            screen: Screen::Typing,
            history,
            recent: Vec::new(),
            summary: HistorySummary::default(),
            finished: None,
            finished_samples: Vec::new(),
            last_record: None,
            should_quit: false,
            plan,
            gate: RequestGate::new(),
        };
        app.refresh_history();
        app
    }

    /// Offer an interrupted session if one was saved, otherwise fetch fresh
    /// text and start typing.
    pub fn begin(&mut self) -> Result<(), ContentError> {
        if self.machine.recover_session().is_some() {
            self.screen = Screen::Recovery;
            return Ok(());
        }
        self.new_session()
    }

    pub fn new_session(&mut self) -> Result<(), ContentError> {
        let ticket = self.begin_fetch();
        let result = fetch_with_retry(
            self.plan.provider.as_ref(),
            &self.plan.request,
            &self.plan.retry,
            self.plan.sleep,
        );
        self.complete_fetch(ticket, result).map(|_| ())
    }

    /// Claim a ticket for a content fetch. Any fetch begun earlier becomes
    /// stale, so a slow provider answering late cannot replace a newer session.
    pub fn begin_fetch(&mut self) -> RequestTicket {
        self.gate.begin()
    }

    /// Start typing the fetched text if `ticket` is still the latest.
    ///
    /// Returns `Ok(false)` for a stale response, which is dropped along with
    /// any error it carried.
    pub fn complete_fetch(
        &mut self,
        ticket: RequestTicket,
        result: Result<Content, ContentError>,
    ) -> Result<bool, ContentError> {
        let Some(result) = self.gate.accept(ticket, result) else {
            tracing::debug!("dropping stale content response {ticket:?}");
            return Ok(false);
        };
        let content = result?;
        tracing::info!(
            "fetched {} words from {} for theme {:?}",
            content.word_count,
            content.source_label,
            self.plan.request.theme()
        );
        self.start_with(content.text);
        Ok(true)
    }

    /// Practise the same text again.
    pub fn restart(&mut self) {
        if let Some(text) = self.finished.as_ref().map(|s| s.content.clone()) {
            self.start_with(text);
        }
    }

    fn start_with(&mut self, text: String) {
        let theme = self.plan.request.theme().to_string();
        self.machine.start_session(text, theme, self.plan.layout);
        self.screen = Screen::Typing;
    }

    pub fn handle(&mut self, event: AppEvent) -> Result<(), ContentError> {
        match event {
            AppEvent::Tick => {
                self.machine.poll();
            }
            AppEvent::Resize => {}
            AppEvent::Key(KeyInput::Interrupt) => {
                if matches!(self.machine.state(), SessionState::Active | SessionState::Paused)
                    && self.screen == Screen::Typing
                {
                    self.finish();
                }
                self.should_quit = true;
            }
            AppEvent::Key(key) => match self.screen {
                Screen::Recovery => self.on_recovery_key(key)?,
                Screen::Typing => self.on_typing_key(key),
                Screen::Results => self.on_results_key(key)?,
                Screen::History => self.on_history_key(key),
            },
        }
        Ok(())
    }

    fn on_recovery_key(&mut self, key: KeyInput) -> Result<(), ContentError> {
        match key {
            KeyInput::Enter | KeyInput::Char('y') => {
                self.machine.resume_session();
                self.screen = Screen::Typing;
            }
            KeyInput::Char('n') | KeyInput::Esc => {
                self.machine.discard_session();
                self.new_session()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn on_typing_key(&mut self, key: KeyInput) {
        if key == KeyInput::Esc {
            self.finish();
            return;
        }
        if key == KeyInput::Tab {
            match self.machine.state() {
                SessionState::Active => self.machine.pause_session(),
                SessionState::Paused => self.machine.resume_session(),
                _ => {}
            }
            return;
        }
        // any other key wakes a paused session
        if self.machine.is_paused() {
            self.machine.resume_session();
        }
        match key {
            KeyInput::Char(c) => {
                apply_char(&mut self.machine, c);
            }
            KeyInput::Backspace => {
                apply_backspace(&mut self.machine);
            }
            _ => {}
        }
        if self.machine.session().is_some_and(|s| s.is_complete()) {
            self.finish();
        }
    }

    fn on_results_key(&mut self, key: KeyInput) -> Result<(), ContentError> {
        match key {
            KeyInput::Char('n') => self.new_session()?,
            KeyInput::Char('r') => self.restart(),
            KeyInput::Char('h') => self.screen = Screen::History,
            KeyInput::Char('q') | KeyInput::Esc => self.should_quit = true,
            _ => {}
        }
        Ok(())
    }

    fn on_history_key(&mut self, key: KeyInput) {
        match key {
            KeyInput::Char('b') | KeyInput::Backspace | KeyInput::Esc => self.screen = Screen::Results,
            KeyInput::Char('q') => self.should_quit = true,
            _ => {}
        }
    }

    /// End the current session, archive it and show results.
    pub fn finish(&mut self) {
        self.finished_samples = self.machine.wpm_samples().to_vec();
        if self.machine.end_session().is_none() {
            return;
        }
        let Some(session) = self.machine.take_ended() else {
            return;
        };

        match HistoricalSession::from_session(&session) {
            Ok(record) => {
                if let Some(db) = &self.history {
                    if let Err(e) = db.record(&record) {
                        tracing::warn!("could not archive session {}: {e}", record.session_id);
                    }
                }
                self.last_record = Some(record);
            }
            Err(e) => tracing::warn!("session not archived: {e}"),
        }

        self.finished = Some(session);
        self.refresh_history();
        self.screen = Screen::Results;
    }

    fn refresh_history(&mut self) {
        let Some(db) = &self.history else {
            return;
        };
        match (db.recent(RECENT_LIMIT), db.summary()) {
            (Ok(recent), Ok(summary)) => {
                self.recent = recent;
                self.summary = summary;
            }
            (Err(e), _) | (_, Err(e)) => tracing::warn!("could not load history: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::content::StaticContentProvider;
    use crate::persistence::{MemorySessionStore, RECOVERY_KEY};
    use crate::session_machine::MachineSettings;

    fn no_sleep(_: Duration) {}

    fn app_with(text: &str, store: MemorySessionStore) -> App<MemorySessionStore, ManualClock> {
        let machine = SessionMachine::new(store, ManualClock::default(), MachineSettings::default());
        let plan = ContentPlan {
            provider: Box::new(StaticContentProvider::new(text, "test")),
            request: ContentRequest::new("general", 100, "en").unwrap(),
            retry: RetryPolicy::default(),
            layout: KeyboardLayout::Qwerty,
            sleep: no_sleep,
        };
        App::new(machine, plan, Some(HistoryDb::open_in_memory().unwrap()))
    }

    fn type_str(app: &mut App<MemorySessionStore, ManualClock>, text: &str) {
        for c in text.chars() {
            app.handle(AppEvent::Key(KeyInput::Char(c))).unwrap();
        }
    }

    #[test]
    fn typing_the_whole_text_archives_it() {
        let mut app = app_with("hi there", MemorySessionStore::new());
        app.begin().unwrap();
        assert_eq!(app.screen, Screen::Typing);

        app.machine.clock().advance_secs(3);
        type_str(&mut app, "hi thera");

        assert_eq!(app.screen, Screen::Results);
        let record = app.last_record.as_ref().unwrap();
        assert_eq!(record.error_count, 1);
        assert!(record.completed);
        assert_eq!(app.summary.session_count, 1);
        assert_eq!(app.recent.len(), 1);
        assert_eq!(app.machine.state(), SessionState::Idle);
    }

    #[test]
    fn esc_abandons_and_archives_incomplete() {
        let mut app = app_with("hello world", MemorySessionStore::new());
        app.begin().unwrap();
        type_str(&mut app, "hel");
        app.handle(AppEvent::Key(KeyInput::Esc)).unwrap();

        assert_eq!(app.screen, Screen::Results);
        assert!(!app.last_record.as_ref().unwrap().completed);
    }

    #[test]
    fn tab_toggles_pause_and_keys_resume() {
        let mut app = app_with("hello", MemorySessionStore::new());
        app.begin().unwrap();
        app.handle(AppEvent::Key(KeyInput::Tab)).unwrap();
        assert!(app.machine.is_paused());

        type_str(&mut app, "h");
        assert_eq!(app.machine.state(), SessionState::Active);
        assert_eq!(app.machine.session().unwrap().user_progress.typed_text, "h");
    }

    #[test]
    fn ticks_auto_pause() {
        let mut app = app_with("hello", MemorySessionStore::new());
        app.begin().unwrap();
        type_str(&mut app, "he");
        app.machine.clock().advance_secs(11);
        app.handle(AppEvent::Tick).unwrap();
        assert!(app.machine.is_paused());
    }

    #[test]
    fn interrupted_session_is_offered_back() {
        let store = MemorySessionStore::new();
        {
            let mut first = app_with("hello", store.clone());
            first.begin().unwrap();
            type_str(&mut first, "hel");
            first.machine.auto_save_session();
        }
        assert!(store.get(RECOVERY_KEY).is_some());

        let mut second = app_with("other text", store.clone());
        second.begin().unwrap();
        assert_eq!(second.screen, Screen::Recovery);

        second.handle(AppEvent::Key(KeyInput::Enter)).unwrap();
        assert_eq!(second.screen, Screen::Typing);
        type_str(&mut second, "lo");
        assert_eq!(second.screen, Screen::Results);
        assert_eq!(second.finished.as_ref().unwrap().content, "hello");
    }

    #[test]
    fn declining_recovery_starts_fresh() {
        let store = MemorySessionStore::new();
        {
            let mut first = app_with("hello", store.clone());
            first.begin().unwrap();
            type_str(&mut first, "h");
        }
        let mut second = app_with("fresh text", store.clone());
        second.begin().unwrap();
        second.handle(AppEvent::Key(KeyInput::Char('n'))).unwrap();

        assert_eq!(second.screen, Screen::Typing);
        assert_eq!(second.machine.session().unwrap().content, "fresh text");
    }

    #[test]
    fn late_response_from_an_older_fetch_is_dropped() {
        let mut app = app_with("unused", MemorySessionStore::new());
        let older = app.begin_fetch();
        let newer = app.begin_fetch();

        let late = Ok(Content::new("old text".to_string(), "test"));
        assert!(!app.complete_fetch(older, late).unwrap());
        assert!(app.machine.session().is_none());

        let failed = Err(ContentError::Network("timed out".into()));
        assert!(!app.complete_fetch(older, failed).unwrap());

        let fresh = Ok(Content::new("new text".to_string(), "test"));
        assert!(app.complete_fetch(newer, fresh).unwrap());
        assert_eq!(app.machine.session().unwrap().content, "new text");
        assert_eq!(app.screen, Screen::Typing);
    }

    #[test]
    fn new_fetch_supersedes_one_in_flight() {
        let mut app = app_with("current text", MemorySessionStore::new());
        let in_flight = app.begin_fetch();
        app.new_session().unwrap();
        assert_eq!(app.machine.session().unwrap().content, "current text");

        let late = Ok(Content::new("old text".to_string(), "test"));
        assert!(!app.complete_fetch(in_flight, late).unwrap());
        assert_eq!(app.machine.session().unwrap().content, "current text");
    }

    #[test]
    fn results_keys() {
        let mut app = app_with("ab", MemorySessionStore::new());
        app.begin().unwrap();
        type_str(&mut app, "ab");
        assert_eq!(app.screen, Screen::Results);

        app.handle(AppEvent::Key(KeyInput::Char('h'))).unwrap();
        assert_eq!(app.screen, Screen::History);
        app.handle(AppEvent::Key(KeyInput::Esc)).unwrap();
        assert_eq!(app.screen, Screen::Results);

        app.handle(AppEvent::Key(KeyInput::Char('r'))).unwrap();
        assert_eq!(app.screen, Screen::Typing);
        assert_eq!(app.machine.session().unwrap().content, "ab");

        app.handle(AppEvent::Key(KeyInput::Interrupt)).unwrap();
        assert!(app.should_quit);
        assert_eq!(app.summary.session_count, 2);
    }
}
