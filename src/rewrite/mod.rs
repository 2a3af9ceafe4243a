pub mod m3u8;
pub mod mpd;
pub mod vtt;

use crate::classify::{self, ResourceKind};
use crate::error::{ProxyError, Result};
use crate::sign::HandleTable;
use url::Url;

/// How rewritten references are minted.
///
/// `PassThrough` embeds the origin URL in the query string; `Signed` hides it
/// behind an opaque handle from the [`HandleTable`]. Both strategies co-exist
/// and a deployment picks one via config.
pub enum ProxyLink<'a> {
    PassThrough { referer: Option<&'a str> },
    Signed {
        table: &'a HandleTable,
        referer: Option<&'a str>,
    },
}

impl ProxyLink<'_> {
    /// Mint the proxy reference for an absolute origin URL.
    pub fn mint(&self, absolute: &str) -> String {
        match self {
            ProxyLink::PassThrough { referer } => pass_through(absolute, *referer),
            ProxyLink::Signed { table, referer } => {
                let kind = Url::parse(absolute)
                    .map(|u| classify::classify(&u, None))
                    .unwrap_or(ResourceKind::Opaque);
                let token = table.issue(absolute, *referer, kind.label());
                format!("/m3u8?h={}", urlencoding::encode(&token))
            }
        }
    }

    /// Mint a reference whose URL carries `$Number$`/`$Time$` placeholders.
    ///
    /// The player substitutes the placeholders before requesting, so they
    /// must survive percent-encoding literally, and an opaque handle cannot
    /// represent them — template URLs always use pass-through.
    pub fn mint_template(&self, absolute: &str) -> String {
        let referer = match self {
            ProxyLink::PassThrough { referer } => *referer,
            ProxyLink::Signed { referer, .. } => *referer,
        };
        pass_through(absolute, referer).replace("%24", "$")
    }
}

fn pass_through(absolute: &str, referer: Option<&str>) -> String {
    match referer {
        Some(r) => format!(
            "/m3u8?url={}&ref={}",
            urlencoding::encode(absolute),
            urlencoding::encode(r)
        ),
        None => format!("/m3u8?url={}", urlencoding::encode(absolute)),
    }
}

/// Rewrite a text-rewritable body fetched from `base`.
///
/// # Errors
/// [`ProxyError::EmptyUpstream`] when the body is blank; dialect-specific
/// errors otherwise.
pub fn rewrite_body(
    kind: ResourceKind,
    body: &str,
    base: &Url,
    link: &ProxyLink<'_>,
) -> Result<String> {
    if body.trim().is_empty() {
        return Err(ProxyError::EmptyUpstream);
    }
    match kind {
        ResourceKind::PlaylistM3u8 => Ok(m3u8::rewrite_playlist(body, base, link)),
        ResourceKind::SubtitleVtt => Ok(vtt::rewrite_vtt(body, base, link)),
        ResourceKind::ManifestMpd => mpd::rewrite_mpd(body, base, link),
        other => Err(ProxyError::Internal(format!(
            "Kind {} is not text-rewritable",
            other.label()
        ))),
    }
}

/// Resolve an M3U8/VTT/MPD reference against the URL it was fetched from.
///
/// Precedence: absolute kept as-is; protocol-relative gets the base scheme;
/// root-relative gets the base scheme+authority; anything else joins with the
/// base URL. Returns `None` only for references the `url` crate cannot join.
pub fn resolve_reference(base: &Url, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("{}://{}", base.scheme(), rest));
    }
    if href.starts_with('/') {
        return Some(format!("{}{}", &base[..url::Position::BeforePath], href));
    }
    base.join(href).ok().map(|u| u.to_string())
}
