use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::{ArchivePage, ImageDescriptor};
use crate::error::WallpaperError;

pub const ARCHIVE_URL: &str = "https://www.bing.com/HPImageArchive.aspx";
pub const DEFAULT_MARKET: &str = "zh-CN";
pub const DEFAULT_PAGE_CAP: usize = 8;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub count: usize,
}

pub fn plan_pages(offset: usize, count: usize, cap: usize) -> Vec<PageRequest> {
    let cap = cap.max(1);
    let mut requests = Vec::new();
    let mut planned = 0;
    while planned < count {
        let size = cap.min(count - planned);
        requests.push(PageRequest {
            offset: offset + planned,
            count: size,
        });
        planned += size;
    }
    requests
}

pub trait ArchiveClient: Send + Sync {
    fn fetch_page(&self, offset_days: usize, count: usize) -> Result<ArchivePage, WallpaperError>;
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    base_url: String,
    market: String,
    page_cap: usize,
}

impl ArchiveHttpClient {
    pub fn new(market: &str, page_cap: usize) -> Result<Self, WallpaperError> {
        Self::with_base_url(ARCHIVE_URL, market, page_cap)
    }

    pub fn with_base_url(
        base_url: &str,
        market: &str,
        page_cap: usize,
    ) -> Result<Self, WallpaperError> {
        if page_cap == 0 {
            return Err(WallpaperError::InvalidConfig(
                "page_cap must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            client: build_client()?,
            base_url: base_url.to_string(),
            market: market.to_string(),
            page_cap,
        })
    }

    pub fn page_url(&self, request: PageRequest) -> Result<Url, WallpaperError> {
        Url::parse_with_params(
            &self.base_url,
            &[
                ("format", "xml".to_string()),
                ("idx", request.offset.to_string()),
                ("n", request.count.to_string()),
                ("mkt", self.market.clone()),
            ],
        )
        .map_err(|err| WallpaperError::InvalidConfig(format!("archive url: {err}")))
    }

    fn fetch_single(&self, request: PageRequest) -> Result<ArchivePage, WallpaperError> {
        let url = self.page_url(request)?;
        debug!(%url, "requesting archive page");
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
        let body = response
            .text()
            .map_err(|err| WallpaperError::network(url.as_str(), err))?;
        parse_archive(&body)
    }
}

impl ArchiveClient for ArchiveHttpClient {
    fn fetch_page(&self, offset_days: usize, count: usize) -> Result<ArchivePage, WallpaperError> {
        fetch_in_pages(offset_days, count, self.page_cap, |request| {
            self.fetch_single(request)
        })
    }
}

// Stops at the first failed call; results are joined in request order.
pub(crate) fn fetch_in_pages<F>(
    offset: usize,
    count: usize,
    cap: usize,
    mut fetch: F,
) -> Result<ArchivePage, WallpaperError>
where
    F: FnMut(PageRequest) -> Result<ArchivePage, WallpaperError>,
{
    let mut page = ArchivePage::default();
    for request in plan_pages(offset, count, cap) {
        page.extend(fetch(request)?);
    }
    Ok(page)
}

pub(crate) fn build_client() -> Result<Client, WallpaperError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("bing-wallpaper/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| WallpaperError::InvalidConfig(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| WallpaperError::InvalidConfig(err.to_string()))
}

#[derive(Default)]
struct PartialImage {
    url: Option<String>,
    start_date: Option<String>,
    headline: String,
    copyright: String,
}

impl PartialImage {
    fn finish(self) -> Result<ImageDescriptor, WallpaperError> {
        let start_date = self
            .start_date
            .ok_or_else(|| WallpaperError::Parse("image entry without startdate".to_string()))?;
        let image_url = self
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| WallpaperError::Parse("image entry without url".to_string()))?;
        Ok(ImageDescriptor {
            publish_date: start_date.parse()?,
            image_url,
            headline: self.headline,
            copyright: self.copyright,
        })
    }
}

pub fn parse_archive(xml: &str) -> Result<ArchivePage, WallpaperError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut current: Option<PartialImage> = None;
    let mut field = String::new();
    let mut images = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|err| WallpaperError::Parse(err.to_string()))?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "images" => saw_root = true,
                    "image" if saw_root => current = Some(PartialImage::default()),
                    _ => field = name,
                }
            }
            Event::Text(ref e) => {
                if let Some(image) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| WallpaperError::Parse(err.to_string()))?;
                    match field.as_str() {
                        "url" => image.url.get_or_insert_with(String::new).push_str(&text),
                        "startdate" => image
                            .start_date
                            .get_or_insert_with(String::new)
                            .push_str(&text),
                        "headline" => image.headline.push_str(&text),
                        "copyright" => image.copyright.push_str(&text),
                        _ => {}
                    }
                }
            }
            Event::End(ref e) => {
                if e.name().as_ref() == b"image" {
                    if let Some(image) = current.take() {
                        images.push(image.finish()?);
                    }
                } else {
                    field.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(WallpaperError::Parse(
            "response has no <images> element".to_string(),
        ));
    }
    Ok(ArchivePage::new(images))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<images>
  <image>
    <startdate>20240111</startdate>
    <fullstartdate>202401111600</fullstartdate>
    <url>/th?id=OHR.SnowyOwl_ZH-CN1234567890_1920x1080.jpg&amp;rf=LaDigue_1920x1080.jpg&amp;pid=hp</url>
    <urlBase>/th?id=OHR.SnowyOwl_ZH-CN1234567890</urlBase>
    <copyright>Snowy owl (© Example/Getty Images)</copyright>
    <headline>Winter watch</headline>
    <hotspots><hotspot><desc>ignored</desc></hotspot></hotspots>
  </image>
  <image>
    <startdate>20240110</startdate>
    <url>https://www.bing.com/th?id=OHR.Harbor_ZH-CN0987654321_1920x1080.jpg</url>
    <copyright>Harbor</copyright>
    <headline>Calm water</headline>
  </image>
  <tooltips><loadMessage><message>Loading</message></loadMessage></tooltips>
</images>"#;

    #[test]
    fn plans_capped_pages() {
        let plan = plan_pages(0, 12, 5);
        let offsets: Vec<usize> = plan.iter().map(|request| request.offset).collect();
        let sizes: Vec<usize> = plan.iter().map(|request| request.count).collect();
        assert_eq!(offsets, vec![0, 5, 10]);
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[test]
    fn plans_nothing_for_zero_count() {
        assert!(plan_pages(3, 0, 8).is_empty());
        assert_eq!(plan_pages(3, 4, 8), vec![PageRequest { offset: 3, count: 4 }]);
    }

    fn stub_page(request: PageRequest) -> ArchivePage {
        let images = (request.offset..request.offset + request.count)
            .map(|day| ImageDescriptor {
                publish_date: format!("202401{:02}", 28 - day).parse().unwrap(),
                image_url: format!("/th?id=OHR.Day{day}.jpg"),
                headline: String::new(),
                copyright: String::new(),
            })
            .collect();
        ArchivePage::new(images)
    }

    #[test]
    fn oversized_request_is_split_and_joined_in_order() {
        let mut calls = Vec::new();
        let page = fetch_in_pages(0, 12, 5, |request| {
            calls.push(request);
            Ok(stub_page(request))
        })
        .unwrap();

        assert_eq!(
            calls,
            vec![
                PageRequest { offset: 0, count: 5 },
                PageRequest { offset: 5, count: 5 },
                PageRequest { offset: 10, count: 2 },
            ]
        );
        let urls: Vec<String> = page.images.iter().map(|image| image.image_url.clone()).collect();
        let expected: Vec<String> = (0..12).map(|day| format!("/th?id=OHR.Day{day}.jpg")).collect();
        assert_eq!(urls, expected);
    }

    #[test]
    fn split_request_stops_at_first_failure() {
        let mut calls = 0;
        let result = fetch_in_pages(0, 12, 5, |request| {
            calls += 1;
            if request.offset == 5 {
                return Err(WallpaperError::HttpStatus {
                    status: 503,
                    url: ARCHIVE_URL.to_string(),
                });
            }
            Ok(stub_page(request))
        });

        assert!(matches!(
            result,
            Err(WallpaperError::HttpStatus { status: 503, .. })
        ));
        assert_eq!(calls, 2);
    }

    #[test]
    fn parses_sample_feed() {
        let page = parse_archive(SAMPLE).unwrap();
        assert_eq!(page.len(), 2);
        let first = &page.images[0];
        assert_eq!(first.publish_date.as_yyyymmdd(), 20240111);
        assert_eq!(
            first.image_url,
            "/th?id=OHR.SnowyOwl_ZH-CN1234567890_1920x1080.jpg&rf=LaDigue_1920x1080.jpg&pid=hp"
        );
        assert_eq!(first.headline, "Winter watch");
        assert_eq!(first.copyright, "Snowy owl (© Example/Getty Images)");
        assert_eq!(page.images[1].publish_date.as_yyyymmdd(), 20240110);
    }

    #[test]
    fn rejects_unexpected_documents() {
        assert!(parse_archive("<html><body>maintenance</body></html>").is_err());
        assert!(parse_archive("not xml <<<").is_err());
    }

    #[test]
    fn rejects_entries_missing_dates() {
        let xml = "<images><image><url>/th?id=a.jpg</url></image></images>";
        assert!(matches!(
            parse_archive(xml),
            Err(WallpaperError::Parse(_))
        ));
    }

    #[test]
    fn builds_page_urls() {
        let client = ArchiveHttpClient::new(DEFAULT_MARKET, DEFAULT_PAGE_CAP).unwrap();
        let url = client
            .page_url(PageRequest {
                offset: 2,
                count: 5,
            })
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.bing.com/HPImageArchive.aspx?format=xml&idx=2&n=5&mkt=zh-CN"
        );
    }
}
