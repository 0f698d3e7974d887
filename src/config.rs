//! Configuration file parsing.
//!
//! Reads `tabulua.toml` configuration files for the CLI. This is separate
//! from a package [`crate::manifest::Manifest`]: this config governs how the
//! tool itself runs (logging, output, file-format filters), not the package
//! data it processes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// One of off, error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory joined files are written to; `None` disables export.
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { export_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// `--file` format filters: only files whose descriptor `type_name`
    /// matches one of these are processed as record files.
    #[serde(default)]
    pub file_formats: Vec<String>,

    /// `--data` format filters: restricts which raw data formats are
    /// accepted (currently only `tsv` is implemented).
    #[serde(default = "default_data_formats")]
    pub data_formats: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { file_formats: Vec::new(), data_formats: default_data_formats() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_formats() -> Vec<String> {
    vec!["tsv".to_string()]
}

const VALID_SECTIONS: &[&str] = &["logging", "output", "input"];

const SECTION_LOGGING: &str = "\
[logging]

  level = \"info\"
    Minimum log level emitted as `timestamp\\tLEVEL\\t[module]\\tmessage` lines.
    Type: string
    Values: \"off\", \"error\", \"warn\", \"info\", \"debug\", \"trace\"
    Default: \"info\"
";

const SECTION_OUTPUT: &str = "\
[output]

  export_dir
    Directory joined/published files are written to. Omit to disable export.
    Type: path (optional)
    Default: none
";

const SECTION_INPUT: &str = "\
[input]

  file_formats = []
    Restrict processing to files whose descriptor type_name is in this list.
    Empty means no restriction.
    Type: list of strings
    Default: []

  data_formats = [\"tsv\"]
    Raw data formats accepted from disk.
    Type: list of strings
    Default: [\"tsv\"]
";

/// Print configuration reference for a specific section, or all sections.
pub fn explain_config(section: &str) -> Result<(), ConfigError> {
    let sections: &[(&str, &str)] =
        &[("logging", SECTION_LOGGING), ("output", SECTION_OUTPUT), ("input", SECTION_INPUT)];

    if section == "all" {
        for (i, (_, text)) in sections.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print!("{text}");
        }
    } else if let Some((_, text)) = sections.iter().find(|(name, _)| *name == section) {
        print!("{text}");
    } else {
        return Err(ConfigError::Validation(format!(
            "unknown config section '{}'. Valid sections: {}",
            section,
            VALID_SECTIONS.join(", ")
        )));
    }

    Ok(())
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if crate::logging::parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::Validation(format!(
                "invalid logging.level '{}'. Valid values: off, error, warn, info, debug, trace",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_and_validate(toml_str: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_valid_log_levels() {
        for value in &["off", "error", "warn", "info", "debug", "trace"] {
            let toml = format!("[logging]\nlevel = \"{value}\"");
            assert!(parse_and_validate(&toml).is_ok(), "level = '{value}' should be valid");
        }
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let toml = "[logging]\nlevel = \"garbage\"";
        let err = parse_and_validate(toml).unwrap_err();
        assert!(err.to_string().contains("invalid logging.level"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input.data_formats, vec!["tsv".to_string()]);
    }

    #[test]
    fn test_export_dir_defaults_to_none() {
        let config = Config::default();
        assert_eq!(config.output.export_dir, None);
    }

    #[test]
    fn test_file_formats_parse() {
        let toml = "[input]\nfile_formats = [\"Enum\", \"Type\"]";
        let config = parse_and_validate(toml).unwrap();
        assert_eq!(config.input.file_formats, vec!["Enum".to_string(), "Type".to_string()]);
    }
}
