use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::result::Result;

/// Prefix of the environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "WAVEFETCH";

/// Application settings, read from an optional TOML file and
/// `WAVEFETCH_*` environment variables (the latter taking precedence).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Routing service `query` URL
    pub router_url: String,

    /// Path of the SQLite database holding the requests and downloaded segments
    pub database: PathBuf,

    /// Directory where the assembled files are saved
    pub output_dir: PathBuf,

    /// One of `error`, `warn`, `info`, `debug`, `trace`
    pub log_level: String,

    pub user_agent: String,

    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            router_url: "https://www.orfeus-eu.org/eidaws/routing/1/query".to_owned(),
            database: PathBuf::from("wavefetch.sqlite"),
            output_dir: PathBuf::from("."),
            log_level: "info".to_owned(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            connect_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load the settings, layering the file (if given) and the environment over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(
            indoc! {r#"
                router_url = "http://localhost:8080/eidaws/routing/1/query"
                log_level = "debug"
            "#}
            .as_bytes(),
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(
            settings.router_url,
            "http://localhost:8080/eidaws/routing/1/query"
        );
        assert_eq!(settings.level(), tracing::Level::DEBUG);
        assert_eq!(settings.database, PathBuf::from("wavefetch.sqlite"));
        assert_eq!(settings.connect_timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/wavefetch.toml"))).is_err());
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let settings = Settings {
            log_level: "loud".to_owned(),
            ..Settings::default()
        };
        assert_eq!(settings.level(), tracing::Level::INFO);
    }
}
