// Library surface shared by the binary and the integration tests.
pub mod app;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod content;
pub mod history;
pub mod metrics;
pub mod persistence;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod session_machine;
pub mod time_series;
pub mod typing_error;
pub mod typing_policy;
pub mod ui;
pub mod util;
