//! Account configuration.
//!
//! A [`Config`] is an explicit value: callers build one (by hand, from a
//! `cloudinary://` URL, or from the environment) and hand it to the client.
//! Per-call options always take precedence over the values stored here.

use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::ConfigurationError;
use crate::signature::SignatureAlgorithm;

/// Default API host used for uploads and admin calls.
pub const DEFAULT_UPLOAD_PREFIX: &str = "https://api.cloudinary.com";

/// Default per-request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default chunk size for chunked uploads: 20 MB.
pub const DEFAULT_CHUNK_SIZE: usize = 20_000_000;

const URL_SCHEME: &str = "cloudinary://";

/// Account-wide settings read by URL generation and uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Bearer token; when set, requests are not signed with key/secret.
    pub oauth_token: Option<String>,
    pub signature_algorithm: SignatureAlgorithm,
    pub upload_prefix: String,
    pub api_proxy: Option<String>,
    pub secure: bool,
    pub private_cdn: bool,
    pub secure_distribution: Option<String>,
    pub cname: Option<String>,
    pub cdn_subdomain: bool,
    pub secure_cdn_subdomain: Option<bool>,
    pub shorten: bool,
    pub sign_url: bool,
    pub force_version: bool,
    pub long_url_signature: bool,
    pub use_root_path: bool,
    /// Request timeout in milliseconds.
    pub timeout: u64,
    pub chunk_size: usize,
    /// Prepended to the `User-Agent` header, e.g. `MyApp/1.0`.
    pub user_platform: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            oauth_token: None,
            signature_algorithm: SignatureAlgorithm::default(),
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
            api_proxy: None,
            secure: true,
            private_cdn: false,
            secure_distribution: None,
            cname: None,
            cdn_subdomain: false,
            secure_cdn_subdomain: None,
            shorten: false,
            sign_url: false,
            force_version: true,
            long_url_signature: false,
            use_root_path: false,
            timeout: DEFAULT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_platform: None,
        }
    }
}

impl Config {
    /// Creates a config for `cloud_name` with key/secret credentials.
    pub fn new(cloud_name: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            cloud_name: Some(cloud_name.to_string()),
            api_key: Some(api_key.to_string()),
            api_secret: Some(api_secret.to_string()),
            ..Default::default()
        }
    }

    /// Parses `cloudinary://{api_key}:{api_secret}@{cloud_name}?key=value&...`.
    ///
    /// The scheme is matched case-insensitively. Recognised query keys
    /// override the corresponding fields; unknown keys are ignored.
    pub fn from_url(url: &str) -> Result<Self, ConfigurationError> {
        let has_scheme = url
            .get(..URL_SCHEME.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(URL_SCHEME));
        if !has_scheme {
            return Err(ConfigurationError::new(
                "Invalid CLOUDINARY_URL protocol. URL should begin with 'cloudinary://'",
            ));
        }

        let rest = &url[URL_SCHEME.len()..];
        let (authority, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };

        let mut config = Config::default();
        let host = match authority.rsplit_once('@') {
            Some((userinfo, host)) => {
                let (key, secret) = match userinfo.split_once(':') {
                    Some((k, s)) => (k, Some(s)),
                    None => (userinfo, None),
                };
                config.api_key = non_empty(decode(key));
                config.api_secret = secret.map(decode).and_then(non_empty);
                host
            }
            None => authority,
        };
        config.cloud_name = non_empty(decode(host.trim_end_matches('/')));

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                config.set(&decode(key), &decode(value));
            }
        }

        Ok(config)
    }

    /// Loads the config from `CLOUDINARY_URL` and `CLOUDINARY_API_PROXY`.
    ///
    /// Both variables are optional; a missing URL yields the default config.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = match std::env::var("CLOUDINARY_URL") {
            Ok(url) if !url.is_empty() => Self::from_url(&url)?,
            _ => Self::default(),
        };
        if let Ok(proxy) = std::env::var("CLOUDINARY_API_PROXY") {
            if !proxy.is_empty() {
                config.api_proxy = Some(proxy);
            }
        }
        Ok(config)
    }

    /// Applies a single textual setting, as found in a config URL query.
    pub fn set(&mut self, key: &str, value: &str) {
        let flag = matches!(value, "true" | "1");
        match key {
            "cloud_name" => self.cloud_name = non_empty(value.to_string()),
            "api_key" => self.api_key = non_empty(value.to_string()),
            "api_secret" => self.api_secret = non_empty(value.to_string()),
            "oauth_token" => self.oauth_token = non_empty(value.to_string()),
            "signature_algorithm" => {
                if let Some(alg) = SignatureAlgorithm::parse(value) {
                    self.signature_algorithm = alg;
                }
            }
            "upload_prefix" => self.upload_prefix = value.to_string(),
            "api_proxy" => self.api_proxy = non_empty(value.to_string()),
            "secure" => self.secure = flag,
            "private_cdn" => self.private_cdn = flag,
            "secure_distribution" => self.secure_distribution = non_empty(value.to_string()),
            "cname" => self.cname = non_empty(value.to_string()),
            "cdn_subdomain" => self.cdn_subdomain = flag,
            "secure_cdn_subdomain" => self.secure_cdn_subdomain = Some(flag),
            "shorten" => self.shorten = flag,
            "sign_url" => self.sign_url = flag,
            "force_version" => self.force_version = flag,
            "long_url_signature" => self.long_url_signature = flag,
            "use_root_path" => self.use_root_path = flag,
            "timeout" => {
                if let Ok(ms) = value.parse() {
                    self.timeout = ms;
                }
            }
            "chunk_size" => {
                if let Ok(size) = value.parse() {
                    self.chunk_size = size;
                }
            }
            "user_platform" => self.user_platform = non_empty(value.to_string()),
            _ => tracing::debug!(key, "ignoring unknown config key"),
        }
    }

    /// The configured cloud name, or an error if none was set.
    pub fn require_cloud_name(&self) -> Result<&str, ConfigurationError> {
        self.cloud_name
            .as_deref()
            .ok_or_else(|| ConfigurationError::new("Must supply cloud_name"))
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
