use crate::error::{ProxyError, Result};
use crate::guard;
use reqwest::{Client, Response, header, redirect};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Deadline for text resources (playlists, subtitles, manifests).
pub const TEXT_DEADLINE: Duration = Duration::from_secs(8);
/// Deadline for binary resources (segments, images, opaque bodies).
pub const BINARY_DEADLINE: Duration = Duration::from_secs(12);
/// Absolute per-request ceiling enforced at the client level.
const ABSOLUTE_CEILING: Duration = Duration::from_secs(30);

const MAX_REDIRECTS: usize = 10;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Outbound HTTP to origin hosts.
///
/// Wraps a shared connection-pooled [`Client`] whose redirect policy
/// re-validates every hop against the SSRF guard. Requests carry synthesized
/// desktop-browser headers; `Accept-Encoding: identity` keeps origin byte
/// ranges meaningful.
#[derive(Clone)]
pub struct OriginFetcher {
    client: Client,
}

impl OriginFetcher {
    pub fn new(allow_private_origins: bool) -> Self {
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if !guard::is_safe_hop(attempt.url(), allow_private_origins) {
                return attempt.error("redirect to forbidden host");
            }
            attempt.follow()
        });

        let client = Client::builder()
            .redirect(policy)
            .timeout(ABSOLUTE_CEILING)
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Fetch `url` with the given deadline, forwarding `referer` (as both
    /// `Referer` and `Origin`) and `range` when present.
    ///
    /// Redirects are followed transparently; the returned response carries
    /// the final URL. Non-2xx statuses map to [`ProxyError::Upstream`] (206
    /// counts as success), deadline overruns to [`ProxyError::Timeout`].
    pub async fn fetch(
        &self,
        url: &Url,
        referer: Option<&str>,
        range: Option<&str>,
        deadline: Duration,
    ) -> Result<Response> {
        let mut request = self
            .client
            .get(url.clone())
            .timeout(deadline)
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::ACCEPT_ENCODING, "identity");

        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
            if let Some(origin) = referer_origin(referer) {
                request = request.header(header::ORIGIN, origin);
            }
        }
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }

        let response = request.send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Upstream(status.as_u16()));
        }
        Ok(response)
    }

    /// Fetch a playlist with up to 2 retries on timeout, 200 ms exponential
    /// backoff. Segments never retry; live players re-request them anyway.
    pub async fn fetch_playlist(&self, url: &Url, referer: Option<&str>) -> Result<Response> {
        let mut backoff = Duration::from_millis(200);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch(url, referer, None, TEXT_DEADLINE).await {
                Err(ProxyError::Timeout) if attempt <= 2 => {
                    warn!(
                        "Playlist fetch timed out (attempt {}/3), retrying in {:?}",
                        attempt, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }
}

/// `Origin` header value for a referer: its scheme + host (+ non-default port).
fn referer_origin(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    match url.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

fn map_send_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        return ProxyError::Timeout;
    }
    if e.is_redirect() {
        // Redirect policy failures: either the guard refused a hop or the
        // hop budget ran out.
        let mut cause: &dyn std::error::Error = &e;
        while let Some(source) = cause.source() {
            if source.to_string().contains("forbidden host") {
                return ProxyError::Forbidden;
            }
            cause = source;
        }
    }
    ProxyError::Origin(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_is_scheme_plus_host() {
        assert_eq!(
            referer_origin("https://site.example/watch?ep=1").as_deref(),
            Some("https://site.example")
        );
        assert_eq!(
            referer_origin("http://site.example:8080/x").as_deref(),
            Some("http://site.example:8080")
        );
        assert_eq!(referer_origin("not a url"), None);
    }

    #[test]
    fn deadlines_respect_the_ceiling() {
        assert!(TEXT_DEADLINE < ABSOLUTE_CEILING);
        assert!(BINARY_DEADLINE < ABSOLUTE_CEILING);
    }
}
