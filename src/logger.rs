use std::fmt::{Display, Formatter};

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Config;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}";

#[derive(Debug)]
pub enum LoggerError {
    InvalidLevel(String),
    InvalidConfig(String),
}

impl Display for LoggerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::InvalidLevel(level) => write!(f, "invalid log level: {}", level),
            LoggerError::InvalidConfig(reason) => write!(f, "invalid logger configuration: {}", reason),
        }
    }
}

pub fn console_config(level: &str) -> Result<LogConfig, LoggerError> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| LoggerError::InvalidLevel(level.to_string()))?;
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| LoggerError::InvalidConfig(format!("{:#?}", e)))
}

/// A log4rs file from the configuration wins over the built-in console setup.
pub fn init(config: &Config) -> Result<(), LoggerError> {
    if let Some(path) = &config.log_config_file {
        return log4rs::init_file(path, Default::default())
            .map_err(|e| LoggerError::InvalidConfig(format!("{:#}", e)));
    }
    log4rs::init_config(console_config(&config.log_level)?)
        .map(|_| ())
        .map_err(|e| LoggerError::InvalidConfig(format!("{:#}", e)))
}
