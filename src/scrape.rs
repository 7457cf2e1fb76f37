//! Markup-facing layer: locating the embedded `TralbumData` statement in a
//! page, normalizing it into [`Album`]/[`Track`] records, and parsing tag
//! search listings and the tag-cloud page.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use unhtml::FromHtml;

use crate::literal;
use crate::meta::{Album, Track};

#[derive(Debug, snafu::Snafu)]
pub enum Error {
    #[snafu(display("html error: {}", source))]
    HtmlError { source: unhtml::Error },
    #[snafu(display("no embedded TralbumData block found in page"))]
    CatalogDataMissing,
    #[snafu(display("embedded literal error: {}", source))]
    LiteralError { source: literal::Error },
    #[snafu(display("required field `{}` is missing from embedded data", field))]
    FieldMissing { field: &'static str },
    #[snafu(display("track url `{}` has no `{}` segment", url, TRACK_PATH_MARKER))]
    TrackUrlInvalid { url: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Path segment separating an artist page prefix from a single-track page.
pub const TRACK_PATH_MARKER: &str = "/track/";

static TRALBUM_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)var\s+TralbumData\s*=\s*\{").unwrap());

#[derive(FromHtml)]
struct ScriptsRaw {
    #[html(selector = "script", attr = "inner")]
    blocks: Vec<String>,
}

#[derive(FromHtml)]
struct ListingItemRaw {
    #[html(selector = "div.itemtext", attr = "inner")]
    title: String,
    #[html(selector = "div.itemsubtext", attr = "inner")]
    artist: String,
    #[html(selector = "a", attr = "href")]
    url: String,
}

#[derive(FromHtml)]
struct ListingRaw {
    #[html(selector = "li.item")]
    items: Vec<ListingItemRaw>,
}

#[derive(FromHtml)]
struct TagLabelRaw {
    #[html(attr = "inner")]
    label: String,
    // any child element means the entry wraps nested markup
    #[html(selector = "*", attr = "inner")]
    nested: Option<String>,
}

#[derive(FromHtml)]
struct TagCloudsRaw {
    #[html(selector = "div.tagcloud#tags_cloud a.tag")]
    tags: Vec<TagLabelRaw>,
    #[html(selector = "div.tagcloud#locations_cloud a.tag")]
    locations: Vec<TagLabelRaw>,
}

/// Finds the script block embedding the current page's catalog data and
/// parses it into a generic value.
///
/// Fails with [`Error::CatalogDataMissing`] on pages that are not album or
/// track pages (deleted releases, login walls, plain 404 bodies).
pub fn extract_tralbum_data(markup: &str) -> Result<Value> {
    let scripts = ScriptsRaw::from_html(markup).context(HtmlSnafu)?;
    let statement = scripts
        .blocks
        .iter()
        .find_map(|script| embedded_statement(script))
        .context(CatalogDataMissingSnafu)?;
    literal::parse_embedded_object(statement).context(LiteralSnafu)
}

/// Slice of `script` spanning `var TralbumData = { ... };`. The end is found
/// by balancing braces, not by stopping at the first `;`: the data routinely
/// contains semicolons inside string values. String and comment spans are
/// skipped since both may hold braces and stray quotes.
fn embedded_statement(script: &str) -> Option<&str> {
    let opener = TRALBUM_OPEN.find(script)?;
    let brace = opener.end() - 1;

    let bytes = script.as_bytes();
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;
    let mut at = brace;
    while at < bytes.len() {
        let b = bytes[at];
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = None;
            }
            at += 1;
            continue;
        }
        match b {
            b'"' | b'\'' => in_string = Some(b),
            b'/' if bytes.get(at + 1) == Some(&b'/') => {
                while at < bytes.len() && bytes[at] != b'\n' {
                    at += 1;
                }
            }
            b'/' if bytes.get(at + 1) == Some(&b'*') => {
                at += 2;
                while at < bytes.len() && !(bytes[at] == b'*' && bytes.get(at + 1) == Some(&b'/')) {
                    at += 1;
                }
                at += 1;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let after = at + 1;
                    let skipped = script[after..].find(|c: char| !c.is_whitespace())?;
                    let terminator = after + skipped;
                    if script[terminator..].starts_with(';') {
                        return Some(&script[opener.start()..=terminator]);
                    }
                    return None;
                }
            }
            _ => {}
        }
        at += 1;
    }
    None
}

/// Albums of one tag search results page, in listing order. An empty vec
/// means the page exists but carries no results, which ends pagination.
pub fn listing_albums(markup: &str) -> Result<Vec<Album>> {
    let listing = ListingRaw::from_html(markup).context(HtmlSnafu)?;
    Ok(listing
        .items
        .into_iter()
        .map(|item| Album {
            title: item.title.trim().to_owned(),
            artist: item.artist.trim().to_owned(),
            url: item.url,
        })
        .collect())
}

/// Album record of an album (or track) page. Keys must be present; null or
/// empty values are kept as empty text rather than treated as errors.
pub fn to_album(raw: &Value, url: &str) -> Result<Album> {
    let title = raw
        .get("current")
        .and_then(|current| current.get("title"))
        .context(FieldMissingSnafu { field: "current.title" })?;
    let artist = raw
        .get("artist")
        .context(FieldMissingSnafu { field: "artist" })?;
    Ok(Album {
        title: text_of(title),
        artist: text_of(artist),
        url: url.to_owned(),
    })
}

/// Media url and duration of `trackinfo[0]` on a single-track page.
///
/// `Ok(None)` when `trackinfo` is empty: the track was taken down or is not
/// individually streamable. That is a soft condition, not an error.
pub fn single_track_media(raw: &Value) -> Result<Option<(String, f64)>> {
    let entries = raw
        .get("trackinfo")
        .and_then(Value::as_array)
        .context(FieldMissingSnafu { field: "trackinfo" })?;
    let first = match entries.first() {
        Some(first) => first,
        None => return Ok(None),
    };
    let media = media_url(first).context(FieldMissingSnafu {
        field: "trackinfo[0].file",
    })?;
    let duration = first
        .get("duration")
        .and_then(Value::as_f64)
        .context(FieldMissingSnafu {
            field: "trackinfo[0].duration",
        })?;
    Ok(Some((media, duration)))
}

/// Canonical url of the album owning a single track page: the track url up
/// to [`TRACK_PATH_MARKER`], joined with the relative `album_url` field.
pub fn track_album_url(raw: &Value, track_url: &str) -> Result<String> {
    let relative = raw
        .get("album_url")
        .context(FieldMissingSnafu { field: "album_url" })?;
    let base = track_url
        .find(TRACK_PATH_MARKER)
        .map(|at| &track_url[..at])
        .context(TrackUrlInvalidSnafu { url: track_url })?;
    Ok(format!("{}{}", base, text_of(relative)))
}

/// Tracks of an album page, in `trackinfo` order. Entries without a media
/// url or duration are not streamable and are dropped silently.
pub fn tracks_for_album(raw: &Value, album: &Album) -> Result<Vec<Track>> {
    let entries = raw
        .get("trackinfo")
        .and_then(Value::as_array)
        .context(FieldMissingSnafu { field: "trackinfo" })?;
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let url = media_url(entry)?;
            let duration = entry.get("duration").and_then(Value::as_f64)?;
            let title = entry.get("title")?;
            Some(Track {
                title: text_of(title),
                artist: album.artist.clone(),
                album: album.clone(),
                url,
                duration,
            })
        })
        .collect())
}

fn media_url(entry: &Value) -> Option<String> {
    entry
        .get("file")
        .and_then(|file| file.get("mp3-128"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_owned)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct TagCatalog {
    pub tags: BTreeSet<String>,
    pub locations: BTreeSet<String>,
}

/// Both tag clouds of the fixed `/tags` page, as normalized slugs.
pub fn tag_catalog(markup: &str) -> Result<TagCatalog> {
    let clouds = TagCloudsRaw::from_html(markup).context(HtmlSnafu)?;
    Ok(TagCatalog {
        tags: normalized_labels(clouds.tags),
        locations: normalized_labels(clouds.locations),
    })
}

fn normalized_labels(labels: Vec<TagLabelRaw>) -> BTreeSet<String> {
    labels
        .into_iter()
        // cloud entries wrapping nested markup are not plain tag labels
        .filter(|entry| entry.nested.is_none())
        .map(|entry| slugify(entry.label.trim()))
        .collect()
}

/// Canonical tag slug: lowercase, spaces and slashes become hyphens.
pub fn slugify(tag: &str) -> String {
    tag.to_lowercase().replace([' ', '/'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALBUM_PAGE: &str = r#"<html><head>
        <script type="text/javascript">window.fastboot = true;</script>
        <script type="text/javascript">
        var TralbumData = {
            current: { title: "Reject" },
            artist: "Shirobon",
            album_url: "/album/reject",
            trackinfo: [
                { title: "Cloud Chaser", file: { "mp3-128": "https://t4.bcbits.com/stream/1" }, duration: 214.27 },
                { title: "Broken", file: { "mp3-128": "https://t4.bcbits.com/stream/2" }, duration: null }
            ]
        };
        </script>
        </head><body></body></html>"#;

    #[test]
    fn extracts_album_from_embedded_data() {
        let raw = extract_tralbum_data(ALBUM_PAGE).unwrap();
        let album = to_album(&raw, "https://shirobon.bandcamp.com/album/reject").unwrap();
        assert_eq!(album.title, "Reject");
        assert_eq!(album.artist, "Shirobon");
        assert_eq!(album.url, "https://shirobon.bandcamp.com/album/reject");
    }

    #[test]
    fn tracklist_keeps_only_streamable_entries() {
        let raw = extract_tralbum_data(ALBUM_PAGE).unwrap();
        let album = to_album(&raw, "https://shirobon.bandcamp.com/album/reject").unwrap();
        let tracks = tracks_for_album(&raw, &album).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Cloud Chaser");
        assert_eq!(tracks[0].artist, "Shirobon");
        assert_eq!(tracks[0].album, album);
        assert_eq!(tracks[0].url, "https://t4.bcbits.com/stream/1");
        assert_eq!(tracks[0].duration, 214.27);
    }

    #[test]
    fn tracklist_preserves_source_order() {
        let raw: Value = serde_json::json!({
            "trackinfo": [
                { "title": "one", "file": { "mp3-128": "https://s/1" }, "duration": 60.0 },
                { "title": "two", "file": null, "duration": 10.0 },
                { "title": "three", "file": { "mp3-128": "https://s/3" }, "duration": 30.0 },
                { "title": "four", "file": { "mp3-128": "https://s/4" } },
                { "title": "five", "file": { "mp3-128": "" }, "duration": 5.0 },
                { "title": "six", "file": { "mp3-128": "https://s/6" }, "duration": 15.0 }
            ]
        });
        let album = Album {
            title: "a".into(),
            artist: "b".into(),
            url: "https://b.bandcamp.com/album/a".into(),
        };
        let titles: Vec<_> = tracks_for_album(&raw, &album)
            .unwrap()
            .into_iter()
            .map(|track| track.title)
            .collect();
        assert_eq!(titles, ["one", "three", "six"]);
    }

    #[test]
    fn page_without_block_reports_catalog_data_missing() {
        let err = extract_tralbum_data("<html><body><p>login required</p></body></html>")
            .unwrap_err();
        assert!(matches!(err, Error::CatalogDataMissing), "{:?}", err);
    }

    #[test]
    fn statement_scan_skips_semicolons_inside_strings() {
        let script = r#"var TralbumData = { note: "a; b", nested: { x: "};" } };"#;
        let statement = embedded_statement(script).unwrap();
        assert_eq!(statement, script);
    }

    #[test]
    fn statement_scan_skips_quotes_inside_comments() {
        let script = concat!(
            "var TralbumData = {\n",
            "    // artist's note\n",
            "    a: 1,\n",
            "    /* a \"historic\" block } */\n",
            "    b: 2\n",
            "};"
        );
        let statement = embedded_statement(script).unwrap();
        assert_eq!(statement, script);
        assert_eq!(
            crate::literal::parse_embedded_object(statement).unwrap()["b"],
            2i64
        );
    }

    #[test]
    fn statement_scan_is_case_insensitive() {
        let script = "VAR tralbumdata = { a: 1 };";
        assert!(embedded_statement(script).is_some());
    }

    #[test]
    fn empty_trackinfo_is_a_soft_none() {
        let raw: Value = serde_json::json!({ "trackinfo": [] });
        assert_eq!(single_track_media(&raw).unwrap(), None);
    }

    #[test]
    fn unstreamable_single_track_is_field_missing() {
        let raw: Value = serde_json::json!({
            "trackinfo": [ { "title": "x", "file": null, "duration": 10.0 } ]
        });
        let err = single_track_media(&raw).unwrap_err();
        assert!(matches!(err, Error::FieldMissing { .. }), "{:?}", err);
    }

    #[test]
    fn album_url_is_joined_at_track_marker() {
        let raw: Value = serde_json::json!({ "album_url": "/album/reject" });
        let url = track_album_url(&raw, "https://shirobon.bandcamp.com/track/cloud-chaser")
            .unwrap();
        assert_eq!(url, "https://shirobon.bandcamp.com/album/reject");
    }

    #[test]
    fn absent_field_fails_even_when_others_are_null() {
        let raw: Value = serde_json::json!({ "current": { "title": null } });
        let err = to_album(&raw, "https://x.bandcamp.com/album/y").unwrap_err();
        assert!(matches!(err, Error::FieldMissing { field: "artist" }), "{:?}", err);

        let raw: Value = serde_json::json!({ "current": { "title": null }, "artist": null });
        let album = to_album(&raw, "https://x.bandcamp.com/album/y").unwrap();
        assert_eq!(album.title, "");
        assert_eq!(album.artist, "");
    }

    #[test]
    fn listing_page_yields_albums_in_order() {
        let markup = r#"<html><body><ul>
            <li class="item">
                <a href="https://one.bandcamp.com/album/first"></a>
                <div class="itemtext">First</div>
                <div class="itemsubtext">by One</div>
            </li>
            <li class="item end">
                <a href="https://two.bandcamp.com/album/second"></a>
                <div class="itemtext">Second</div>
                <div class="itemsubtext">by Two</div>
            </li>
        </ul></body></html>"#;
        let albums = listing_albums(markup).unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].title, "First");
        assert_eq!(albums[0].artist, "by One");
        assert_eq!(albums[0].url, "https://one.bandcamp.com/album/first");
        assert_eq!(albums[1].title, "Second");
    }

    #[test]
    fn exhausted_listing_page_is_empty() {
        let markup = "<html><body><ul></ul></body></html>";
        assert!(listing_albums(markup).unwrap().is_empty());
    }

    #[test]
    fn tag_clouds_are_normalized_and_filtered() {
        let markup = r#"<html><body>
            <div class="tagcloud" id="tags_cloud">
                <a class="tag">Chill Hop</a>
                <a class="tag">chiptune</a>
                <a class="tag"><span>nested</span></a>
            </div>
            <div class="tagcloud" id="locations_cloud">
                <a class="tag">New York</a>
            </div>
        </body></html>"#;
        let catalog = tag_catalog(markup).unwrap();
        assert_eq!(
            catalog.tags.into_iter().collect::<Vec<_>>(),
            ["chill-hop", "chiptune"]
        );
        assert_eq!(
            catalog.locations.into_iter().collect::<Vec<_>>(),
            ["new-york"]
        );
    }

    #[test]
    fn slugs_are_lowercase_hyphenated() {
        assert_eq!(slugify("Chill Hop"), "chill-hop");
        assert_eq!(slugify("chill/hop"), "chill-hop");
        assert_eq!(slugify("CHILL-HOP"), "chill-hop");
    }
}
