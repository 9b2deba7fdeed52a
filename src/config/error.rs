use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file {0:?} is empty")]
    Empty(PathBuf),

    #[error("failed to parse YAML configuration: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("failed to parse TOML configuration: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Individual validation problems, empty for read/parse failures.
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid(problems) => problems,
            _ => &[],
        }
    }
}
