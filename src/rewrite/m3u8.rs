use super::{ProxyLink, resolve_reference};
use tracing::warn;
use url::Url;

/// Rewrite every reference in an M3U8 playlist to route through the proxy.
///
/// The playlist is processed line by line so that directives, blank lines,
/// and line endings are preserved byte-for-byte; only URI lines and quoted
/// `URI="…"` attribute values inside directives change. Output line count
/// always equals input line count.
pub fn rewrite_playlist(body: &str, playlist_url: &Url, link: &ProxyLink<'_>) -> String {
    let mut out = String::with_capacity(body.len() * 2);
    let mut first = true;

    for raw in body.split('\n') {
        if !first {
            out.push('\n');
        }
        first = false;

        let (line, had_cr) = match raw.strip_suffix('\r') {
            Some(stripped) => (stripped, true),
            None => (raw, false),
        };
        out.push_str(&rewrite_line(line, playlist_url, link));
        if had_cr {
            out.push('\r');
        }
    }
    out
}

fn rewrite_line(line: &str, playlist_url: &Url, link: &ProxyLink<'_>) -> String {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return line.to_string();
    }

    if trimmed.starts_with('#') {
        // Directives pass through verbatim unless they carry a quoted URI
        // (EXT-X-KEY, EXT-X-MAP, EXT-X-MEDIA, ...).
        return rewrite_uri_attribute(line, playlist_url, link)
            .unwrap_or_else(|| line.to_string());
    }

    // A URI reference line. Keep surrounding whitespace intact.
    let lead = line.len() - line.trim_start().len();
    let tail = line.trim_end().len();
    match resolve_reference(playlist_url, trimmed) {
        Some(absolute) => format!(
            "{}{}{}",
            &line[..lead],
            link.mint(&absolute),
            &line[tail..]
        ),
        None => {
            warn!("Could not resolve playlist reference: {}", trimmed);
            line.to_string()
        }
    }
}

/// Rewrite the quoted value of a `URI="…"` attribute in place, preserving
/// every other byte of the directive.
fn rewrite_uri_attribute(line: &str, playlist_url: &Url, link: &ProxyLink<'_>) -> Option<String> {
    let attr_start = line.find("URI=\"")?;
    let value_start = attr_start + "URI=\"".len();
    let value_len = line[value_start..].find('"')?;
    let href = &line[value_start..value_start + value_len];

    let absolute = resolve_reference(playlist_url, href)?;
    Some(format!(
        "{}{}{}",
        &line[..value_start],
        link.mint(&absolute),
        &line[value_start + value_len..]
    ))
}
