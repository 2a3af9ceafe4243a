use super::{ProxyLink, resolve_reference};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

// Bare absolute URLs plus ./ and ../ relative references. Quotes, angle
// brackets, and whitespace terminate a reference.
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:https?://|\.\./|\./)[^\s"'<>]+"#).expect("VTT URL pattern compiles")
});

/// Rewrite bare URL references inside a WebVTT file.
///
/// Timing cues, styling blocks, and all surrounding whitespace pass through
/// untouched; replacements never contain newlines, so the line count is
/// preserved.
pub fn rewrite_vtt(body: &str, vtt_url: &Url, link: &ProxyLink<'_>) -> String {
    URL_RE
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let href = &caps[0];
            match resolve_reference(vtt_url, href) {
                Some(absolute) => link.mint(&absolute),
                None => href.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example/subs/en.vtt").unwrap()
    }

    fn link() -> ProxyLink<'static> {
        ProxyLink::PassThrough {
            referer: Some("https://site.example/"),
        }
    }

    #[test]
    fn absolute_url_in_note_is_rewritten() {
        let body = "WEBVTT\n\nNOTE see https://cdn.example/subs/style.css for styling\n";
        let out = rewrite_vtt(body, &base(), &link());
        assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fsubs%2Fstyle.css"));
        assert!(!out.contains("see https://cdn.example"));
    }

    #[test]
    fn relative_references_are_resolved() {
        let body = "WEBVTT\n\n00:00.000 --> 00:04.000\n<img src=\"./thumbs/0.jpg\">\n";
        let out = rewrite_vtt(body, &base(), &link());
        assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fsubs%2Fthumbs%2F0.jpg"));
    }

    #[test]
    fn timing_cues_and_line_count_preserved() {
        let body = "WEBVTT\n\n00:00.000 --> 00:04.000\nHello there\n\n00:04.000 --> 00:08.000\nGeneral Kenobi\n";
        let out = rewrite_vtt(body, &base(), &link());
        assert_eq!(out, body);
        assert_eq!(
            out.split('\n').count(),
            body.split('\n').count()
        );
    }

    #[test]
    fn parent_relative_reference() {
        let body = "WEBVTT\n\nNOTE ../shared/logo.png\n";
        let out = rewrite_vtt(body, &base(), &link());
        assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fshared%2Flogo.png"));
    }
}
