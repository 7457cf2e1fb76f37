use futures::future::{Future, TryFutureExt};
use futures::stream::{Stream, TryStreamExt};
use reqwest::Client;
use serde_json::Value;
use snafu::ResultExt;

use crate::meta::{Album, Track};
use crate::scrape::{self, TagCatalog};

const BASE_URL: &str = "https://bandcamp.com";

/// The search backend stops serving result pages after this one.
const MAX_SEARCH_PAGES: u32 = 10;

/// Forces the mobile page variant, which keeps the embedded data and the
/// listing markup in a stable shape.
const MOBILE_COOKIE: &str = "mvp=p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum Sort {
    /// Best-selling first.
    #[strum(serialize = "pop")]
    Pop,
    /// New arrivals first.
    #[strum(serialize = "date")]
    Date,
}

#[derive(Debug, snafu::Snafu)]
pub enum Error {
    #[snafu(display("http error, url: {}, err: {}", url, source))]
    HttpError { url: String, source: reqwest::Error },
    #[snafu(display("page error, url: {}, err: {}", url, source))]
    PageError { url: String, source: scrape::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bandcamp catalog provider.
pub struct Provider {
    client: Client,
}

impl Provider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn fetch_markup(&self, url: &str) -> Result<String> {
        self.client
            .get(url)
            .header(reqwest::header::COOKIE, MOBILE_COOKIE)
            .send()
            .and_then(|r| r.text())
            .await
            .context(HttpSnafu { url })
    }

    async fn raw_info(&self, url: &str) -> Result<Value> {
        let markup = self.fetch_markup(url).await?;
        scrape::extract_tralbum_data(&markup).context(PageSnafu { url })
    }

    pub async fn get_album(&self, url: &str) -> Result<Album> {
        let raw = self.raw_info(url).await?;
        scrape::to_album(&raw, url).context(PageSnafu { url })
    }

    /// Track of a single-track page, with an owned snapshot of its album.
    ///
    /// `Ok(None)` when the page exists but its track is gone or not
    /// individually streamable.
    pub async fn get_track(&self, url: &str) -> Result<Option<Track>> {
        let raw = self.raw_info(url).await?;
        let media = scrape::single_track_media(&raw).context(PageSnafu { url })?;
        let (media_url, duration) = match media {
            Some(media) => media,
            None => return Ok(None),
        };
        // Title and artist follow the same `current.title`/`artist` rule as
        // an album page.
        let header = scrape::to_album(&raw, url).context(PageSnafu { url })?;
        let album_url = scrape::track_album_url(&raw, url).context(PageSnafu { url })?;
        let album = self.get_album(&album_url).await?;
        Ok(Some(Track {
            title: header.title,
            artist: header.artist,
            album,
            url: media_url,
            duration,
        }))
    }

    pub async fn get_album_tracklist(&self, album: &Album) -> Result<Vec<Track>> {
        let raw = self.raw_info(&album.url).await?;
        scrape::tracks_for_album(&raw, album).context(PageSnafu { url: &album.url })
    }

    pub async fn get_album_tracklist_by_url(&self, url: &str) -> Result<Vec<Track>> {
        let album = self.get_album(url).await?;
        self.get_album_tracklist(&album).await
    }

    async fn results_page(&self, slug: &str, sort: Sort, page: u32) -> Result<Vec<Album>> {
        let url = format!(
            "{}/tag/{}?sort_field={}&page={}",
            BASE_URL, slug, sort, page
        );
        let markup = self.fetch_markup(&url).await?;
        scrape::listing_albums(&markup).context(PageSnafu { url })
    }

    /// Lazy tag search: albums are produced page by page, and a page is only
    /// fetched once the consumer pulls past the previous one. Production
    /// ends at the first empty page or after page [`MAX_SEARCH_PAGES`].
    pub fn search_albums_by_tag(
        &self,
        tag: &str,
        sort: Sort,
    ) -> impl Stream<Item = Result<Album>> + '_ {
        let slug = scrape::slugify(tag);
        paginate(move |page| {
            let slug = slug.clone();
            async move { self.results_page(&slug, sort, page).await }
        })
    }

    /// Eager tag search: the lazy producer pulled to completion.
    pub async fn search_albums_by_tag_eager(&self, tag: &str, sort: Sort) -> Result<Vec<Album>> {
        self.search_albums_by_tag(tag, sort).try_collect().await
    }

    pub async fn get_all_tags(&self) -> Result<TagCatalog> {
        let url = format!("{}/tags", BASE_URL);
        let markup = self.fetch_markup(&url).await?;
        scrape::tag_catalog(&markup).context(PageSnafu { url })
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

/// Pagination loop shared by the lazy and eager traversals. Stops at the
/// first empty page or after [`MAX_SEARCH_PAGES`]; pages are fetched in
/// increasing order, at most once. A failed page surfaces one `Err` and
/// ends the stream, keeping the albums already produced.
fn paginate<'a, F, Fut>(fetch_page: F) -> impl Stream<Item = Result<Album>> + 'a
where
    F: Fn(u32) -> Fut + 'a,
    Fut: Future<Output = Result<Vec<Album>>> + 'a,
{
    async_stream::try_stream! {
        for page in 1..=MAX_SEARCH_PAGES {
            let albums = fetch_page(page).await?;
            if albums.is_empty() {
                break;
            }
            for album in albums {
                yield album;
            }
        }
    }
}
