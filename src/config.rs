//! Process configuration from the environment

use crate::llm::LlmConfig;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    pub llm: LlmConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let db_path = lookup("THREADCHAT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".threadchat").join("chatbot.db")
            },
            PathBuf::from,
        );

        let port = match lookup("THREADCHAT_PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| format!("invalid THREADCHAT_PORT: {value}"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            db_path,
            port,
            llm: LlmConfig::from_lookup(&lookup)?,
        })
    }
}
