use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::archive::build_client;
use crate::domain::ImageDescriptor;
use crate::error::WallpaperError;

// The feed hands out URLs against a generic host; images are served from this one.
pub const IMAGE_HOST: &str = "https://cn.bing.com";

pub trait ImageSource: Send + Sync {
    fn fetch_image(&self, url: &Url) -> Result<Vec<u8>, WallpaperError>;
}

#[derive(Clone)]
pub struct ImageHttpClient {
    client: Client,
}

impl ImageHttpClient {
    pub fn new() -> Result<Self, WallpaperError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

impl ImageSource for ImageHttpClient {
    fn fetch_image(&self, url: &Url) -> Result<Vec<u8>, WallpaperError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| WallpaperError::network(url.as_str(), err))?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(WallpaperError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| WallpaperError::network(url.as_str(), err))?;
        Ok(bytes.to_vec())
    }
}

pub fn resolve_image_url(raw: &str) -> Result<Url, WallpaperError> {
    let host = Url::parse(IMAGE_HOST)
        .map_err(|err| WallpaperError::Parse(format!("image host: {err}")))?;
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => host
            .join(raw)
            .map_err(|err| WallpaperError::Parse(format!("image url {raw}: {err}")))?,
    };
    let mut resolved = host;
    resolved.set_path(parsed.path());
    resolved.set_query(parsed.query());
    Ok(resolved)
}

/// Stable local name for an image: the `id` query value cut back to `<name>.jpg`.
///
/// `OHR.SnowyOwl_ZH-CN1234567890_1920x1080.jpg` becomes
/// `SnowyOwl_ZH-CN1234567890_1920x1080.jpg`. Ids without a `jpg` segment are used whole, and
/// URLs without an id fall back to the last path segment.
pub fn derive_file_name(url: &Url) -> Result<String, WallpaperError> {
    let id = url
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned());

    let name = match id {
        Some(id) => {
            let segments: Vec<&str> = id.split('.').collect();
            match segments.iter().skip(1).position(|segment| *segment == "jpg") {
                Some(index) => format!("{}.jpg", segments[index]),
                None => id.clone(),
            }
        }
        None => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
    };

    let is_valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if !is_valid {
        return Err(WallpaperError::Parse(format!(
            "cannot derive a file name from {url}"
        )));
    }
    Ok(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Written { path: Utf8PathBuf, bytes: usize },
    AlreadyPresent { path: Utf8PathBuf },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Utf8Path {
        match self {
            DownloadOutcome::Written { path, .. } | DownloadOutcome::AlreadyPresent { path } => {
                path
            }
        }
    }
}

pub struct DownloadWorker<S: ImageSource> {
    source: S,
    output_dir: Utf8PathBuf,
    skip_existing: bool,
}

impl<S: ImageSource> DownloadWorker<S> {
    pub fn new(source: S, output_dir: Utf8PathBuf, skip_existing: bool) -> Self {
        Self {
            source,
            output_dir,
            skip_existing,
        }
    }

    pub fn ensure_output_dir(&self) -> Result<(), WallpaperError> {
        fs::create_dir_all(self.output_dir.as_std_path())
            .map_err(|err| WallpaperError::write(self.output_dir.as_std_path(), err))
    }

    pub fn download(&self, descriptor: &ImageDescriptor) -> Result<DownloadOutcome, WallpaperError> {
        let url = resolve_image_url(&descriptor.image_url)?;
        let path = self.output_dir.join(derive_file_name(&url)?);

        if self.skip_existing && path.as_std_path().exists() {
            debug!(date = %descriptor.publish_date, %path, "image already on disk");
            return Ok(DownloadOutcome::AlreadyPresent { path });
        }

        info!(
            date = %descriptor.publish_date,
            copyright = %descriptor.copyright,
            %url,
            "downloading image"
        );
        let bytes = self.source.fetch_image(&url)?;
        write_file_atomic(&path, &bytes)?;
        info!(%path, bytes = bytes.len(), "finished image");
        Ok(DownloadOutcome::Written {
            path,
            bytes: bytes.len(),
        })
    }
}

fn write_file_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), WallpaperError> {
    let parent = path
        .parent()
        .ok_or_else(|| WallpaperError::write(path.as_std_path(), "invalid destination path"))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".bing-wallpaper")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| WallpaperError::write(path.as_std_path(), err))?;
    temp.write_all(content)
        .map_err(|err| WallpaperError::write(path.as_std_path(), err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(|err| WallpaperError::write(path.as_std_path(), err))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| WallpaperError::write(path.as_std_path(), err))?;
    Ok(())
}
