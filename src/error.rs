use std::path::PathBuf;

/// Central error type for propd.
#[derive(Debug, thiserror::Error)]
pub enum PropError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("queue full: {0}")]
    QueueFull(&'static str),

    #[error("queue closed: {0}")]
    QueueClosed(&'static str),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("sensor error: {0}")]
    Sensor(String),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("invalid {subsystem} animation index: {index}")]
    InvalidIndex { subsystem: &'static str, index: u8 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watcher(String),
}

pub type Result<T> = std::result::Result<T, PropError>;
