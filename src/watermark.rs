use std::fmt;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::domain::PublishDate;
use crate::error::WallpaperError;

pub const DEFAULT_RECORD_FILE: &str = "record.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(NaiveDate);

impl Watermark {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn as_publish_date(&self) -> PublishDate {
        PublishDate::from_date(self.0)
    }

    pub fn days_until(&self, today: NaiveDate) -> usize {
        (today - self.0).num_days().max(0) as usize
    }

    pub fn to_record(&self) -> WatermarkRecord {
        WatermarkRecord {
            year: self.0.year(),
            month: self.0.month(),
            day: self.0.day(),
        }
    }
}

impl From<PublishDate> for Watermark {
    fn from(date: PublishDate) -> Self {
        Self(date.as_date())
    }
}

impl TryFrom<WatermarkRecord> for Watermark {
    type Error = String;

    fn try_from(record: WatermarkRecord) -> Result<Self, Self::Error> {
        NaiveDate::from_ymd_opt(record.year, record.month, record.day)
            .map(Self)
            .ok_or_else(|| {
                format!(
                    "invalid date {}-{}-{}",
                    record.year, record.month, record.day
                )
            })
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkState {
    Recorded(Watermark),
    Uninitialized,
}

impl WatermarkState {
    pub fn watermark(&self) -> Option<Watermark> {
        match self {
            WatermarkState::Recorded(watermark) => Some(*watermark),
            WatermarkState::Uninitialized => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    Advanced { from: Option<Watermark>, to: Watermark },
    Unchanged { watermark: Option<Watermark> },
    RolledBack { watermark: Option<Watermark> },
    Untracked,
}

#[derive(Debug)]
pub struct WatermarkStore {
    path: Utf8PathBuf,
    state: Option<WatermarkState>,
    permissions: Option<fs::Permissions>,
}

impl WatermarkStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            state: None,
            permissions: None,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn state(&self) -> Option<WatermarkState> {
        self.state
    }

    pub fn load(&mut self) -> Result<WatermarkState, WallpaperError> {
        let state = if self.path.as_std_path().exists() {
            let metadata = fs::metadata(self.path.as_std_path())
                .map_err(|err| self.read_error(err))?;
            self.permissions = Some(metadata.permissions());
            let content = fs::read_to_string(self.path.as_std_path())
                .map_err(|err| self.read_error(err))?;
            let record: WatermarkRecord =
                serde_json::from_str(&content).map_err(|err| self.read_error(err))?;
            let watermark = Watermark::try_from(record).map_err(|err| self.read_error(err))?;
            debug!(path = %self.path, %watermark, "loaded watermark");
            WatermarkState::Recorded(watermark)
        } else {
            debug!(path = %self.path, "no watermark recorded yet");
            WatermarkState::Uninitialized
        };
        self.state = Some(state);
        Ok(state)
    }

    pub fn begin_run(&mut self) -> Result<WatermarkSession<'_>, WallpaperError> {
        let loaded = self.state;
        let state = match loaded {
            Some(state) => state,
            None => self.load()?,
        };
        Ok(WatermarkSession {
            store: self,
            baseline: state.watermark(),
        })
    }

    fn read_error(&self, err: impl fmt::Display) -> WallpaperError {
        WallpaperError::WatermarkRead {
            path: self.path.clone().into_std_path_buf(),
            message: err.to_string(),
        }
    }

    fn write(&mut self, watermark: Watermark) -> Result<(), WallpaperError> {
        let target = self.path.as_std_path();
        let content = serde_json::to_vec(&watermark.to_record())
            .map_err(|err| WallpaperError::write(target, err))?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| WallpaperError::write(target, err))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".bing-wallpaper-record")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| WallpaperError::write(target, err))?;
        temp.write_all(&content)
            .map_err(|err| WallpaperError::write(target, err))?;
        if let Some(permissions) = self.permissions.clone() {
            temp.as_file()
                .set_permissions(permissions)
                .map_err(|err| WallpaperError::write(target, err))?;
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                temp.as_file()
                    .set_permissions(fs::Permissions::from_mode(0o644))
                    .map_err(|err| WallpaperError::write(target, err))?;
            }
        }
        temp.persist(target)
            .map_err(|err| WallpaperError::write(target, err))?;
        self.state = Some(WatermarkState::Recorded(watermark));
        Ok(())
    }
}

// Consumed by `commit`, so each run commits at most once.
pub struct WatermarkSession<'a> {
    store: &'a mut WatermarkStore,
    baseline: Option<Watermark>,
}

impl WatermarkSession<'_> {
    pub fn baseline(&self) -> Option<Watermark> {
        self.baseline
    }

    pub fn commit(
        self,
        success: bool,
        most_recent: Option<PublishDate>,
    ) -> Result<CommitOutcome, WallpaperError> {
        if !success {
            warn!(
                path = %self.store.path,
                "run incomplete, watermark not updated"
            );
            return Ok(CommitOutcome::RolledBack {
                watermark: self.baseline,
            });
        }

        let candidate = match most_recent.map(Watermark::from) {
            Some(candidate) if self.baseline.is_none_or(|baseline| candidate > baseline) => {
                candidate
            }
            _ => {
                info!("watermark unchanged");
                return Ok(CommitOutcome::Unchanged {
                    watermark: self.baseline,
                });
            }
        };

        self.store.write(candidate)?;
        info!(path = %self.store.path, watermark = %candidate, "watermark advanced");
        Ok(CommitOutcome::Advanced {
            from: self.baseline,
            to: candidate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> WatermarkStore {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("record.db")).unwrap();
        WatermarkStore::new(path)
    }

    fn date(value: &str) -> PublishDate {
        value.parse().unwrap()
    }

    #[test]
    fn missing_file_is_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        assert_eq!(store.load().unwrap(), WatermarkState::Uninitialized);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        fs::write(store.path().as_std_path(), b"{\"year\": 2024}").unwrap();
        assert!(matches!(
            store.load(),
            Err(WallpaperError::WatermarkRead { .. })
        ));
    }

    #[test]
    fn first_successful_commit_creates_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let session = store.begin_run().unwrap();
        let outcome = session.commit(true, Some(date("20240113"))).unwrap();
        assert!(matches!(outcome, CommitOutcome::Advanced { from: None, .. }));

        let content = fs::read_to_string(store.path().as_std_path()).unwrap();
        let record: WatermarkRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(
            record,
            WatermarkRecord {
                year: 2024,
                month: 1,
                day: 13
            }
        );
    }

    #[test]
    fn never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        fs::write(
            store.path().as_std_path(),
            br#"{"year":2024,"month":1,"day":10}"#,
        )
        .unwrap();
        let session = store.begin_run().unwrap();
        let outcome = session.commit(true, Some(date("20240105"))).unwrap();
        assert!(matches!(outcome, CommitOutcome::Unchanged { .. }));
        let reloaded = store.load().unwrap().watermark().unwrap();
        assert_eq!(reloaded.as_publish_date(), date("20240110"));
    }

    #[test]
    fn failed_run_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        fs::write(
            store.path().as_std_path(),
            br#"{"year":2024,"month":1,"day":10}"#,
        )
        .unwrap();
        let session = store.begin_run().unwrap();
        let outcome = session.commit(false, Some(date("20240112"))).unwrap();
        assert!(matches!(outcome, CommitOutcome::RolledBack { .. }));
        let content = fs::read_to_string(store.path().as_std_path()).unwrap();
        assert_eq!(content, r#"{"year":2024,"month":1,"day":10}"#);
    }

    #[cfg(unix)]
    #[test]
    fn keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        fs::write(
            store.path().as_std_path(),
            br#"{"year":2024,"month":1,"day":10}"#,
        )
        .unwrap();
        fs::set_permissions(store.path().as_std_path(), fs::Permissions::from_mode(0o600))
            .unwrap();
        store
            .begin_run()
            .unwrap()
            .commit(true, Some(date("20240111")))
            .unwrap();
        let mode = fs::metadata(store.path().as_std_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn counts_days_since_watermark() {
        let watermark = Watermark::from(date("20240110"));
        let today = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
        assert_eq!(watermark.days_until(today), 3);
        assert_eq!(watermark.days_until(watermark.date()), 0);
    }
}
