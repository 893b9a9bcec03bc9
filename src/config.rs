use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://westerncape.overdrive.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const DEFAULT_FORMAT_FILTER: &str = "audiobook-overdrive,audiobook-overdrive-provisional";
/// Upper bound for any pacing delay, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Runtime settings shared by every component. Built once in `main` and
/// handed to constructors by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub data_dir: PathBuf,
    pub format_filter: String,
    pub search_delay: f64,
    pub probe_delay: f64,
    pub harvest_delay: f64,
    pub bbc_pages: u32,
    pub category_prefixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            data_dir: PathBuf::from("data"),
            format_filter: DEFAULT_FORMAT_FILTER.to_string(),
            search_delay: 2.0,
            probe_delay: 0.5,
            harvest_delay: 1.0,
            bbc_pages: 13,
            category_prefixes: vec!["FICTION ".to_string(), "Fiction /".to_string()],
        }
    }
}

impl Settings {
    /// Defaults, then `scout.toml` if present, then `SCOUT_*` environment variables.
    pub fn load() -> Result<Self> {
        let defaults = Settings::default();
        let built = Config::builder()
            .set_default("base_url", defaults.base_url)?
            .set_default("user_agent", defaults.user_agent)?
            .set_default("timeout_secs", defaults.timeout_secs as i64)?
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .set_default("format_filter", defaults.format_filter)?
            .set_default("search_delay", defaults.search_delay)?
            .set_default("probe_delay", defaults.probe_delay)?
            .set_default("harvest_delay", defaults.harvest_delay)?
            .set_default("bbc_pages", i64::from(defaults.bbc_pages))?
            .set_default("category_prefixes", defaults.category_prefixes)?
            .add_source(File::with_name("scout").required(false))
            .add_source(
                Environment::with_prefix("SCOUT")
                    .list_separator(";")
                    .with_list_parse_key("category_prefixes")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble settings")?;
        let settings: Settings = built
            .try_deserialize()
            .context("Invalid settings (check scout.toml and SCOUT_* variables)")?;
        settings.validated().map(Settings::normalized)
    }

    fn validated(self) -> Result<Self> {
        for (key, value) in [
            ("search_delay", self.search_delay),
            ("probe_delay", self.probe_delay),
            ("harvest_delay", self.harvest_delay),
        ] {
            if !value.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&value) {
                bail!("{} must be between 0 and {} seconds, got {}", key, MAX_DELAY_SECS, value);
            }
        }
        Ok(self)
    }

    fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    /// Direct item URL on the catalog.
    pub fn media_url(&self, id: &str) -> String {
        format!("{}/media/{}", self.base_url, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_url_joins_base() {
        let s = Settings {
            base_url: "https://lib.example.com".into(),
            ..Settings::default()
        };
        assert_eq!(s.media_url("8919230"), "https://lib.example.com/media/8919230");
    }

    #[test]
    fn delays_outside_range_are_rejected() {
        assert!(Settings::default().validated().is_ok());
        for bad in [f64::INFINITY, f64::NAN, 1e20, -0.5] {
            let s = Settings {
                probe_delay: bad,
                ..Settings::default()
            };
            let err = s.validated().unwrap_err().to_string();
            assert!(err.contains("probe_delay"), "{}", err);
        }
    }

    #[test]
    fn normalized_strips_trailing_slash() {
        let s = Settings {
            base_url: "https://lib.example.com/".into(),
            ..Settings::default()
        }
        .normalized();
        assert_eq!(s.base_url, "https://lib.example.com");
    }
}
