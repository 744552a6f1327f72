//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::Config;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parsing TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Document syntax, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// `.toml` selects TOML; anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Load a configuration document from a file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, Format::from_path(path))
}

/// Decode a configuration document from text.
pub fn parse_config(content: &str, format: Format) -> Result<Config, ConfigError> {
    let config = match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Toml => toml::from_str(content)?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("site.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("site.TOML")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("site.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("site")), Format::Json);
    }

    #[test]
    fn test_toml_and_json_agree() {
        let json = parse_config(
            r#"{"apps": {"echo": {"greeting": "hi", "times": 2}}}"#,
            Format::Json,
        )
        .unwrap();
        let toml = parse_config(
            "[apps.echo]\ngreeting = \"hi\"\ntimes = 2\n",
            Format::Toml,
        )
        .unwrap();
        assert_eq!(json.apps, toml.apps);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"apps": {{}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.apps.is_empty());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/site.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/site.json"));
    }
}
