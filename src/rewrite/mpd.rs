use super::{ProxyLink, resolve_reference};
use crate::error::{ProxyError, Result};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use url::Url;

// Attributes that carry URLs in an MPD, by local name.
const URL_ATTRS: &[&[u8]] = &[b"sourceURL", b"media", b"initialization", b"href"];
// Elements whose text node is a URL.
const URL_ELEMENTS: &[&[u8]] = &[b"BaseURL", b"Location"];

/// Rewrite URL-bearing nodes of a DASH MPD to route through the proxy.
///
/// This is an event-level pass with `quick-xml` rather than a text
/// substitution: `<BaseURL>` / `<Location>` text nodes and URL attributes
/// (`Initialization@sourceURL`, `SegmentURL@media`,
/// `SegmentTemplate@initialization/@media`, ...) are rewritten element-aware,
/// and `$Number$` / `$Time$` templates survive unchanged. Everything else is
/// emitted exactly as read.
pub fn rewrite_mpd(body: &str, mpd_url: &Url, link: &ProxyLink<'_>) -> Result<String> {
    let mut reader = Reader::from_str(body);
    let mut writer = Writer::new(Vec::with_capacity(body.len() * 2));
    let mut in_url_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                in_url_element = URL_ELEMENTS.contains(&e.local_name().as_ref());
                let rewritten = rewrite_attributes(&e, mpd_url, link)?;
                writer
                    .write_event(Event::Start(rewritten))
                    .map_err(write_err)?;
            }
            Ok(Event::Empty(e)) => {
                let rewritten = rewrite_attributes(&e, mpd_url, link)?;
                writer
                    .write_event(Event::Empty(rewritten))
                    .map_err(write_err)?;
            }
            Ok(Event::Text(t)) if in_url_element => {
                let text = t
                    .unescape()
                    .map_err(|e| ProxyError::Internal(format!("Failed to parse MPD: {e}")))?;
                let href = text.trim();
                let replacement = resolve_reference(mpd_url, href)
                    .map(|absolute| link.mint_template(&absolute))
                    .unwrap_or_else(|| href.to_string());
                writer
                    .write_event(Event::Text(BytesText::new(&replacement)))
                    .map_err(write_err)?;
            }
            Ok(Event::End(e)) => {
                in_url_element = false;
                writer.write_event(Event::End(e)).map_err(write_err)?;
            }
            Ok(Event::Eof) => break,
            Ok(other) => writer.write_event(other).map_err(write_err)?,
            Err(e) => {
                return Err(ProxyError::Internal(format!("Failed to parse MPD: {e}")));
            }
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| ProxyError::Internal(format!("MPD output was not UTF-8: {e}")))
}

fn rewrite_attributes<'a>(
    element: &BytesStart<'a>,
    mpd_url: &Url,
    link: &ProxyLink<'_>,
) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);

    for attr in element.attributes() {
        let attr = attr.map_err(|e| ProxyError::Internal(format!("Failed to parse MPD: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ProxyError::Internal(format!("Failed to parse MPD: {e}")))?
            .into_owned();

        if URL_ATTRS.contains(&attr.key.local_name().as_ref())
            && let Some(absolute) = resolve_reference(mpd_url, &value)
        {
            out.push_attribute((key.as_str(), link.mint_template(&absolute).as_str()));
        } else {
            out.push_attribute((key.as_str(), value.as_str()));
        }
    }
    Ok(out)
}

fn write_err(e: impl std::fmt::Display) -> ProxyError {
    ProxyError::Internal(format!("Failed to write MPD: {e}"))
}
