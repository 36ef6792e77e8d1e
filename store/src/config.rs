use serde::Deserialize;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Poll interval cannot be 0")]
    InvalidPollInterval,

    #[error("Output path must name a file")]
    InvalidOutputPath,

    #[error("Filesystem store base_dir cannot be empty")]
    EmptyBaseDir,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum Backend {
    Filesystem { base_dir: PathBuf },
    Memory,
}

fn default_output_path() -> PathBuf {
    PathBuf::from(client::DEFAULT_WATCH_PATH)
}

fn default_poll_interval_secs() -> u64 {
    5
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub backend: Backend,
    /// Where the feature file is written
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// Used when the backend cannot push change notifications
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::InvalidPollInterval);
        }
        if self.output_path.file_name().is_none() {
            return Err(ValidationError::InvalidOutputPath);
        }
        if let Backend::Filesystem { base_dir } = &self.backend
            && base_dir.as_os_str().is_empty()
        {
            return Err(ValidationError::EmptyBaseDir);
        }
        Ok(())
    }
}
