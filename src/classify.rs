use url::Url;

/// What an origin URL points at, as far as the proxy is concerned.
///
/// Playlist, subtitle, and manifest bodies are rewritten as text; everything
/// else is streamed through byte-for-byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    PlaylistM3u8,
    SubtitleVtt,
    ManifestMpd,
    MediaSegment,
    Image,
    Opaque,
}

impl ResourceKind {
    pub fn is_text_rewritable(&self) -> bool {
        matches!(
            self,
            ResourceKind::PlaylistM3u8 | ResourceKind::SubtitleVtt | ResourceKind::ManifestMpd
        )
    }

    /// Content-Type used when the origin does not provide a usable one.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            ResourceKind::PlaylistM3u8 => "application/vnd.apple.mpegurl",
            ResourceKind::SubtitleVtt => "text/vtt",
            ResourceKind::ManifestMpd => "application/dash+xml",
            ResourceKind::MediaSegment => "video/MP2T",
            ResourceKind::Image => "application/octet-stream",
            ResourceKind::Opaque => "application/octet-stream",
        }
    }

    /// Short label for metrics and signed-handle kinds.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::PlaylistM3u8 => "m3u8",
            ResourceKind::SubtitleVtt => "vtt",
            ResourceKind::ManifestMpd => "mpd",
            ResourceKind::MediaSegment => "seg",
            ResourceKind::Image => "img",
            ResourceKind::Opaque => "opaque",
        }
    }
}

/// Classify an origin URL, optionally refined by the response Content-Type.
///
/// Path-suffix lookup wins: several streaming hosts label playlists as
/// `application/octet-stream`, so the suffix is the more trustworthy signal.
/// Content-Type prefix matching only applies when the suffix says nothing.
/// Unknown inputs classify as [`ResourceKind::Opaque`]; this function never
/// fails.
pub fn classify(url: &Url, content_type: Option<&str>) -> ResourceKind {
    if let Some(kind) = classify_by_suffix(url.path()) {
        return kind;
    }
    if let Some(ct) = content_type
        && let Some(kind) = classify_by_content_type(ct)
    {
        return kind;
    }
    ResourceKind::Opaque
}

fn classify_by_suffix(path: &str) -> Option<ResourceKind> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    match ext.as_str() {
        "m3u8" | "m3u" => Some(ResourceKind::PlaylistM3u8),
        "vtt" | "srt" => Some(ResourceKind::SubtitleVtt),
        "mpd" => Some(ResourceKind::ManifestMpd),
        "ts" | "m4s" | "mp4" | "m4a" | "m4v" | "aac" | "mp3" => Some(ResourceKind::MediaSegment),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "ico" | "avif" => Some(ResourceKind::Image),
        _ => None,
    }
}

fn classify_by_content_type(content_type: &str) -> Option<ResourceKind> {
    // Strip parameters like "; charset=utf-8"
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    match ct.as_str() {
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl"
        | "audio/x-mpegurl" => return Some(ResourceKind::PlaylistM3u8),
        "text/vtt" => return Some(ResourceKind::SubtitleVtt),
        "application/dash+xml" | "application/xml" | "text/xml" => {
            return Some(ResourceKind::ManifestMpd);
        }
        _ => {}
    }
    if ct.starts_with("image/") {
        return Some(ResourceKind::Image);
    }
    if ct.starts_with("video/") || ct.starts_with("audio/") {
        return Some(ResourceKind::MediaSegment);
    }
    // Hosts that mislabel playlists usually still send some text/* type
    if ct.starts_with("text/") {
        return Some(ResourceKind::PlaylistM3u8);
    }
    None
}
