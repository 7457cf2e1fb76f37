#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub title: String,
    pub artist: String,
    /// Canonical absolute page url, exactly as supplied by the caller or
    /// computed from a track page. Never relative.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub artist: String,
    /// Owned snapshot of the album the track belongs to.
    pub album: Album,
    /// Direct media url (the `mp3-128` stream).
    pub url: String,
    /// Duration in seconds.
    pub duration: f64,
}
