/// Database configuration and connection management
pub mod database;

/// Application settings from lotbook.toml and environment variables
pub mod settings;
