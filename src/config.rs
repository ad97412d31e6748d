use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Jobsift";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory (~/.jobsift/), falling back to the
/// working directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jobsift")
}

/// Default location of the record database.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("jobsift.db")
}

/// Default tracing filter: debug for this crate in debug builds.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "info,jobsift=debug"
    } else {
        "warn,jobsift=info"
    }
}
