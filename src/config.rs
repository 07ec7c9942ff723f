use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{DEFAULT_MARKET, DEFAULT_PAGE_CAP};
use crate::coordinator::FetchPlan;
use crate::error::WallpaperError;
use crate::watermark::{DEFAULT_RECORD_FILE, Watermark};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub pic_dir: String,
    pub pic_number: usize,
    pub days_behind: usize,
    pub use_record_db: bool,
    pub record_file: String,
    pub page_cap: usize,
    pub market: String,
    pub skip_existing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pic_dir: "background".to_string(),
            pic_number: 1,
            days_behind: 0,
            use_record_db: false,
            record_file: DEFAULT_RECORD_FILE.to_string(),
            page_cap: DEFAULT_PAGE_CAP,
            market: DEFAULT_MARKET.to_string(),
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub pic_number: Option<usize>,
    pub days_behind: Option<usize>,
    pub use_record_db: bool,
}

impl Config {
    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if overrides.use_record_db {
            self.use_record_db = true;
            return self;
        }
        if let Some(pic_number) = overrides.pic_number {
            self.pic_number = pic_number;
        }
        if let Some(days_behind) = overrides.days_behind {
            self.days_behind = days_behind;
        }
        self
    }

    pub fn validate(&self) -> Result<(), WallpaperError> {
        if self.page_cap == 0 {
            return Err(WallpaperError::InvalidConfig(
                "page_cap must be at least 1".to_string(),
            ));
        }
        if self.pic_dir.trim().is_empty() {
            return Err(WallpaperError::InvalidConfig(
                "pic_dir must not be empty".to_string(),
            ));
        }
        if self.record_file.trim().is_empty() {
            return Err(WallpaperError::InvalidConfig(
                "record_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn output_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.pic_dir)
    }

    pub fn record_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.record_file)
    }

    // Watermark mode covers every day since the watermark; without one it falls back to
    // the configured count and offset.
    pub fn fetch_plan(&self, watermark: Option<Watermark>, today: NaiveDate) -> FetchPlan {
        match (self.use_record_db, watermark) {
            (true, Some(watermark)) => FetchPlan {
                start_offset: 0,
                requested_total: watermark.days_until(today),
                page_cap: self.page_cap,
            },
            _ => FetchPlan {
                start_offset: self.days_behind,
                requested_total: self.pic_number,
                page_cap: self.page_cap,
            },
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    // Only an explicit path has to exist.
    pub fn resolve(path: Option<&str>) -> Result<Config, WallpaperError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path(),
        };

        if path.is_none() && !config_path.exists() {
            debug!(path = %config_path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| WallpaperError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, WallpaperError> {
        let config: Config = serde_json::from_str(content)
            .map_err(|err| WallpaperError::ConfigParse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = ConfigLoader::parse(r#"{"pic_dir": "walls", "pic_number": 4}"#).unwrap();
        assert_eq!(config.pic_dir, "walls");
        assert_eq!(config.pic_number, 4);
        assert_eq!(config.page_cap, DEFAULT_PAGE_CAP);
        assert_eq!(config.market, "zh-CN");
        assert!(config.skip_existing);
    }

    #[test]
    fn watermark_flag_discards_count_and_offset() {
        let overrides = ConfigOverrides {
            pic_number: Some(9),
            days_behind: Some(2),
            use_record_db: true,
        };
        let config = Config::default().apply(&overrides);
        assert!(config.use_record_db);
        assert_eq!(config.pic_number, 1);
        assert_eq!(config.days_behind, 0);
    }
}
