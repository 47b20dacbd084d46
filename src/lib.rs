pub mod config;
pub mod db;
pub mod error;
pub mod forward;
pub mod logger;
pub mod server;
pub mod services;

use error::AppResult;

/// Load configuration, start logging and serve until the listener fails.
pub async fn run() -> AppResult<()> {
    // Set up panic hook to log panics before they take down a worker
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        let location = if let Some(location) = panic_info.location() {
            format!("{}:{}:{}", location.file(), location.line(), location.column())
        } else {
            "Unknown location".to_string()
        };

        crate::logger::error(
            "panic",
            &format!(
                "PANIC occurred: message='{}', location='{}', backtrace available via RUST_BACKTRACE=1",
                message, location
            ),
        );
    }));

    let settings = config::load()?;
    match logger::LogLevel::from_str(&settings.log_level) {
        Some(level) => logger::set_level(level),
        None => logger::warn(
            "app",
            &format!("Unknown log_level '{}', keeping default", settings.log_level),
        ),
    }
    logger::init(&settings.resolved_database_path()?);
    logger::info("app", "Application started");

    let state = server::AppState::from_settings(&settings)?;
    server::serve(&settings.listen_addr, state).await
}
