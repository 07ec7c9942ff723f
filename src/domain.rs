use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};

use crate::error::WallpaperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublishDate(NaiveDate);

impl PublishDate {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn as_date(&self) -> NaiveDate {
        self.0
    }

    pub fn as_yyyymmdd(&self) -> u32 {
        self.0.year() as u32 * 10_000 + self.0.month() * 100 + self.0.day()
    }
}

impl fmt::Display for PublishDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for PublishDate {
    type Err = WallpaperError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed.len() == 8 && trimmed.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(WallpaperError::Parse(format!("invalid publish date: {value}")));
        }
        NaiveDate::parse_from_str(trimmed, "%Y%m%d")
            .map(Self)
            .map_err(|err| WallpaperError::Parse(format!("invalid publish date {value}: {err}")))
    }
}

impl Serialize for PublishDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub publish_date: PublishDate,
    pub image_url: String,
    pub headline: String,
    pub copyright: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePage {
    pub images: Vec<ImageDescriptor>,
}

impl ArchivePage {
    pub fn new(images: Vec<ImageDescriptor>) -> Self {
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    // The feed makes no ordering promise.
    pub fn sort_newest_first(&mut self) {
        self.images.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
    }

    pub fn extend(&mut self, other: ArchivePage) {
        self.images.extend(other.images);
    }
}

impl IntoIterator for ArchivePage {
    type Item = ImageDescriptor;
    type IntoIter = std::vec::IntoIter<ImageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}
