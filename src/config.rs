use std::env;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Remote cache backend URL (credentials embedded), e.g. `redis://:token@host:6379`
    pub cache_url: Option<String>,
    /// Comma-separated list of allowed CORS origins; `*` means any
    pub cors_origins: String,
    /// Rewrite playlists with opaque signed handles instead of `?url=` pass-through
    pub signed_urls: bool,
    /// HMAC secret for handle signing (required when signed_urls is on)
    pub hmac_secret: Option<String>,
    /// Referer applied when the client does not supply one
    pub default_referer: Option<String>,
    /// Base URL of the upstream scraper API; scraper endpoints 503 without it
    pub scraper_api_url: Option<String>,
    /// Relax private-range blocking in the SSRF guard (dev/test only)
    pub allow_private_origins: bool,
    /// In-process cache byte budget
    pub memory_cache_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Check if running in dev mode
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let cache_url = env::var("CACHE_URL").ok();

        let cors_origins = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());

        let signed_urls = env::var("SIGNED_URLS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let hmac_secret = env::var("HMAC_SECRET").ok();
        if signed_urls && hmac_secret.is_none() {
            return Err("HMAC_SECRET is required when SIGNED_URLS=true".into());
        }

        let default_referer = env::var("DEFAULT_REFERER").ok();

        let scraper_api_url = env::var("SCRAPER_API_URL")
            .ok()
            .map(|u| u.trim_end_matches('/').to_string());

        // Relaxing the guard only makes sense for local development against
        // loopback origins; scheme checks still apply.
        let allow_private_origins = env::var("ALLOW_PRIVATE_ORIGINS")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let memory_cache_bytes = env::var("MEMORY_CACHE_BYTES")
            .unwrap_or_else(|_| (256 * 1024 * 1024).to_string())
            .parse()
            .unwrap_or(256 * 1024 * 1024);

        Ok(Config {
            port,
            is_dev,
            cache_url,
            cors_origins,
            signed_urls,
            hmac_secret,
            default_referer,
            scraper_api_url,
            allow_private_origins,
            memory_cache_bytes,
        })
    }
}

impl Default for Config {
    /// Dev-flavored defaults, used by tests. Production always goes through
    /// [`Config::from_env`].
    fn default() -> Self {
        Config {
            port: 0,
            is_dev: true,
            cache_url: None,
            cors_origins: "*".to_string(),
            signed_urls: false,
            hmac_secret: None,
            default_referer: None,
            scraper_api_url: None,
            allow_private_origins: false,
            memory_cache_bytes: 16 * 1024 * 1024,
        }
    }
}
