use std::{
    error::Error,
    fs::{self, File, OpenOptions},
    io::{self, stdin},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing_subscriber::EnvFilter;

use themetype::{
    app::{App, ContentPlan},
    app_dirs::AppDirs,
    clock::{Clock, SystemClock},
    config::{Config, ConfigStore, FileConfigStore},
    content::{
        ContentError, ContentProvider, ContentRequest, FallbackProvider, RetryPolicy,
        StaticContentProvider, ThemeCorpusProvider,
    },
    history::HistoryDb,
    persistence::{FileSessionStore, SessionStore},
    runtime::{CrosstermEventSource, EventSource, Runner},
    session::KeyboardLayout,
    session_machine::{MachineSettings, SessionMachine},
};

const TICK_RATE_MS: u64 = 100;
const LOG_ENV: &str = "THEMETYPE_LOG";

/// Used when the themed corpus has nothing for the requested theme.
const FALLBACK_TEXT: &str = "The quick brown fox jumps over the lazy dog. \
    Pack my box with five dozen liquor jugs. \
    How vexingly quick daft zebras jump. \
    Sphinx of black quartz, judge my vow.";

/// themed typing practice with live metrics and progress history
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Typing practice on themed text with live WPM and accuracy, auto-pause when you stop typing, recovery of interrupted sessions and a local history of past results."
)]
pub struct Cli {
    /// theme of the practice text (general, science, history, nature, technology)
    #[clap(short = 't', long)]
    theme: Option<String>,

    /// keyboard layout recorded with the session
    #[clap(short = 'k', long, value_enum)]
    layout: Option<KeyboardLayout>,

    /// approximate length of the practice text in characters
    #[clap(short = 'n', long)]
    length: Option<usize>,

    /// two-letter language code
    #[clap(short = 'l', long)]
    language: Option<String>,

    /// custom prompt to type instead of themed text
    #[clap(short = 'p', long, conflicts_with = "file")]
    prompt: Option<String>,

    /// read the practice text from a file
    #[clap(short = 'f', long)]
    file: Option<PathBuf>,

    /// seconds without typing before the session pauses, 0 disables
    #[clap(long)]
    inactivity_secs: Option<u64>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// print recent sessions and overall progress
    History {
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// write every archived session to a CSV file
    Export { path: PathBuf },
    /// delete all archived sessions
    ClearHistory,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging();

    let config = apply_overrides(FileConfigStore::new().load(), &cli);

    if let Some(command) = &cli.command {
        return run_command(command);
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let plan = content_plan(&cli, &config)?;
    let machine = SessionMachine::new(
        FileSessionStore::new(),
        SystemClock,
        MachineSettings::from(&config),
    );
    let history = match HistoryDb::open_default() {
        Ok(db) => Some(db),
        Err(e) => {
            tracing::warn!("history unavailable: {e}");
            None
        }
    };

    let mut app = App::new(machine, plan, history);
    app.begin()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let runner = Runner::new(CrosstermEventSource::new(), Duration::from_millis(TICK_RATE_MS));
    let result = start_tui(&mut terminal, &mut app, &runner);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend, S: SessionStore, C: Clock, E: EventSource>(
    terminal: &mut Terminal<B>,
    app: &mut App<S, C>,
    runner: &Runner<E>,
) -> Result<(), Box<dyn Error>> {
    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;
        app.handle(runner.step())?;
        if app.should_quit {
            return Ok(());
        }
    }
}

/// Log to a file in the state directory; the terminal belongs to the UI.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);

    match open_log_file() {
        Some(file) => builder.with_writer(Mutex::new(file)).init(),
        None => builder.with_writer(io::sink).init(),
    }
}

fn open_log_file() -> Option<File> {
    let path = AppDirs::log_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(theme) = &cli.theme {
        config.default_theme = theme.clone();
    }
    if let Some(layout) = cli.layout {
        config.keyboard_layout = layout;
    }
    if let Some(length) = cli.length {
        config.target_length = length;
    }
    if let Some(language) = &cli.language {
        config.language = language.clone();
    }
    if let Some(secs) = cli.inactivity_secs {
        config.inactivity_timeout_secs = secs;
    }
    config
}

fn content_provider(cli: &Cli) -> io::Result<Box<dyn ContentProvider>> {
    if let Some(prompt) = &cli.prompt {
        return Ok(Box::new(StaticContentProvider::new(prompt.clone(), "prompt")));
    }
    if let Some(path) = &cli.file {
        return Ok(Box::new(StaticContentProvider::from_file(path)?));
    }
    Ok(Box::new(FallbackProvider::new(
        ThemeCorpusProvider::new(),
        StaticContentProvider::new(FALLBACK_TEXT, "builtin"),
    )))
}

fn content_plan(cli: &Cli, config: &Config) -> Result<ContentPlan, Box<dyn Error>> {
    let request = build_request(config)?;
    Ok(ContentPlan {
        provider: content_provider(cli)?,
        request,
        retry: RetryPolicy::default(),
        layout: config.keyboard_layout,
        sleep: std::thread::sleep,
    })
}

fn build_request(config: &Config) -> Result<ContentRequest, ContentError> {
    ContentRequest::new(&config.default_theme, config.target_length, &config.language)
}

fn run_command(command: &Command) -> Result<(), Box<dyn Error>> {
    let db = HistoryDb::open_default()?;
    match command {
        Command::History { limit } => {
            let sessions = db.recent(*limit)?;
            if sessions.is_empty() {
                println!("no sessions recorded yet");
                return Ok(());
            }
            println!(
                "{:<17} {:<12} {:>5} {:>7} {:>6} {:>6}",
                "started", "theme", "wpm", "acc", "errors", "secs"
            );
            for s in &sessions {
                println!(
                    "{:<17} {:<12} {:>5} {:>6.1}% {:>6} {:>6}",
                    s.started_at.format("%Y-%m-%d %H:%M"),
                    s.theme,
                    s.wpm,
                    s.accuracy,
                    s.error_count,
                    s.duration_secs
                );
            }
            let summary = db.summary()?;
            println!(
                "\n{} sessions, avg {:.1} wpm (sd {:.1}), best {} wpm, avg {:.1}% accuracy, {} min practised",
                summary.session_count,
                summary.average_wpm,
                summary.wpm_std_dev,
                summary.best_wpm,
                summary.average_accuracy,
                summary.total_practice_secs / 60
            );
            for theme in db.theme_breakdown()? {
                println!(
                    "  {:<12} {:>3} sessions  {:>5.1} wpm  {:>5.1}% acc",
                    theme.theme, theme.sessions, theme.average_wpm, theme.average_accuracy
                );
            }
        }
        Command::Export { path } => {
            let count = db.export_csv(File::create(path)?)?;
            println!("exported {count} sessions to {}", path.display());
        }
        Command::ClearHistory => {
            let count = db.clear_all()?;
            println!("removed {count} sessions");
        }
    }
    Ok(())
}
