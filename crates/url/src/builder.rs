//! Delivery URL builder.
//!
//! Layout: `{prefix}/{resource_type}/{type}/{signature}/{transformation}/{version}/{public_id}`
//! with empty parts dropped. Options given per call override the
//! corresponding [`Config`] fields; everything the builder understands is
//! consumed from the option bag.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloudinary_core::{
    Config, ConfigurationError, Options, SignatureAlgorithm, compute_hash, consume, is_truthy,
    param_string, present,
};
use percent_encoding::percent_decode_str;

use crate::escape::{collapse_double_slashes, escape_public_id, smart_escape};
use crate::transformation::generate_transformation_string;

const SHARED_CDN: &str = "res.cloudinary.com";
const OLD_AKAMAI_SHARED_CDN: &str = "cloudinary-a.akamaihd.net";

/// Builds the delivery URL for `public_id`.
///
/// Transformation keys and URL options are removed from `options`; the
/// remainder is left for the caller (HTML attributes and the like).
pub fn url(
    public_id: &str,
    options: &mut Options,
    config: &Config,
) -> Result<String, ConfigurationError> {
    let mut kind = take_string(options, "type");
    if kind.as_deref() == Some("fetch") && !options.get("fetch_format").is_some_and(present) {
        if let Some(format) = consume(options, "format") {
            options.insert("fetch_format".into(), format);
        }
    }

    let transformation = generate_transformation_string(options)?;
    let mut resource_type = take_string(options, "resource_type").unwrap_or_else(|| "image".into());
    let mut version = take_string(options, "version");
    let force_version = flag(options, "force_version", config.force_version);
    let format = take_string(options, "format");
    let cloud_name = take_string(options, "cloud_name")
        .or_else(|| config.cloud_name.clone())
        .ok_or_else(|| ConfigurationError::new("Must supply cloud_name"))?;
    let host = Host {
        cloud_name: &cloud_name,
        private_cdn: flag(options, "private_cdn", config.private_cdn),
        secure_distribution: take_string(options, "secure_distribution")
            .or_else(|| config.secure_distribution.clone()),
        secure: flag(options, "secure", config.secure),
        cdn_subdomain: flag(options, "cdn_subdomain", config.cdn_subdomain),
        secure_cdn_subdomain: consume(options, "secure_cdn_subdomain")
            .map(|v| is_truthy(&v))
            .or(config.secure_cdn_subdomain),
        cname: take_string(options, "cname").or_else(|| config.cname.clone()),
    };
    let shorten = flag(options, "shorten", config.shorten);
    let sign_url = flag(options, "sign_url", config.sign_url);
    let sign_version = flag(options, "sign_version", false);
    let api_secret = take_string(options, "api_secret").or_else(|| config.api_secret.clone());
    let url_suffix = take_string(options, "url_suffix");
    let use_root_path = flag(options, "use_root_path", config.use_root_path);
    let long_url_signature = flag(options, "long_url_signature", config.long_url_signature);
    let algorithm = take_string(options, "signature_algorithm")
        .and_then(|s| SignatureAlgorithm::parse(&s))
        .unwrap_or(config.signature_algorithm);

    let mut public_id = public_id.to_string();
    if let Some(preloaded) = Preloaded::parse(&public_id) {
        resource_type = preloaded.resource_type;
        kind = Some(preloaded.kind);
        version = Some(preloaded.version);
        public_id = preloaded.public_id;
    }
    if kind.is_none() && is_absolute(&public_id) {
        return Ok(public_id);
    }

    let (resource_type, kind) = finalize_resource_type(
        &resource_type,
        kind.as_deref(),
        url_suffix.as_deref(),
        use_root_path,
        shorten,
    )?;
    let (source, source_to_sign) =
        finalize_source(&public_id, format.as_deref(), url_suffix.as_deref())?;

    if version.is_none()
        && force_version
        && source_to_sign.contains('/')
        && !starts_with_version(&source_to_sign)
        && !is_absolute(&source_to_sign)
    {
        version = Some("1".into());
    }
    let version = version.map(|v| format!("v{v}"));
    let transformation = collapse_double_slashes(&transformation);

    let signature = if sign_url {
        let secret =
            api_secret.ok_or_else(|| ConfigurationError::new("Must supply api_secret"))?;
        let signed_version = if sign_version { version.clone() } else { None };
        let to_sign = join_present([
            Some(transformation.clone()),
            signed_version,
            Some(source_to_sign),
        ]);
        Some(url_signature(&to_sign, &secret, algorithm, long_url_signature))
    } else {
        None
    };

    let prefix = host.prefix(&source);
    let url = join_present([
        Some(prefix),
        resource_type,
        kind,
        signature,
        Some(transformation),
        version,
        Some(source),
    ]);
    Ok(url.replace(' ', "%20"))
}

/// `{upload_prefix}/v1_1/{cloud_name}/{resource_type}/{action}` for API calls.
pub fn api_url(
    action: &str,
    options: &Options,
    config: &Config,
) -> Result<String, ConfigurationError> {
    let prefix = options
        .get("upload_prefix")
        .filter(|v| present(v))
        .map(param_string)
        .unwrap_or_else(|| config.upload_prefix.clone());
    let cloud_name = match options.get("cloud_name").filter(|v| present(v)) {
        Some(name) => param_string(name),
        None => config.require_cloud_name()?.to_string(),
    };
    let resource_type = options
        .get("resource_type")
        .filter(|v| present(v))
        .map(param_string)
        .unwrap_or_else(|| "image".into());
    Ok(format!("{prefix}/v1_1/{cloud_name}/{resource_type}/{action}"))
}

/// `s--{sig}--`: url-safe base64 of the hash, truncated to 8 characters
/// (32 and always sha256 for long signatures).
fn url_signature(
    to_sign: &str,
    secret: &str,
    algorithm: SignatureAlgorithm,
    long_url_signature: bool,
) -> String {
    let to_sign = fully_decoded(to_sign);
    let (algorithm, length) = if long_url_signature {
        (SignatureAlgorithm::Sha256, 32)
    } else {
        (algorithm, 8)
    };
    let digest = STANDARD.encode(compute_hash(&format!("{to_sign}{secret}"), algorithm));
    let signature: String = digest
        .chars()
        .take(length)
        .map(|c| match c {
            '/' => '_',
            '+' => '-',
            c => c,
        })
        .collect();
    format!("s--{signature}--")
}

/// Percent-decodes repeatedly (at most ten times) until the string is stable.
fn fully_decoded(s: &str) -> String {
    let mut current = s.to_string();
    for _ in 0..10 {
        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

/// Applies `url_suffix`, `use_root_path` and `shorten` to the
/// resource type / delivery type pair.
pub fn finalize_resource_type(
    resource_type: &str,
    kind: Option<&str>,
    url_suffix: Option<&str>,
    use_root_path: bool,
    shorten: bool,
) -> Result<(Option<String>, Option<String>), ConfigurationError> {
    let kind = kind.unwrap_or("upload");
    let mut resource_type = Some(resource_type.to_string());
    let mut kind = Some(kind.to_string());

    if url_suffix.is_some() {
        let renamed = match (resource_type.as_deref(), kind.as_deref()) {
            (Some("image"), Some("upload")) => "images",
            (Some("image"), Some("private")) => "private_images",
            (Some("image"), Some("authenticated")) => "authenticated_images",
            (Some("raw"), Some("upload")) => "files",
            (Some("video"), Some("upload")) => "videos",
            _ => {
                return Err(ConfigurationError::new(
                    "URL Suffix only supported for image/upload, image/private, \
                     image/authenticated, video/upload and raw/upload",
                ));
            }
        };
        resource_type = Some(renamed.into());
        kind = None;
    }

    if use_root_path {
        match (resource_type.as_deref(), kind.as_deref()) {
            (Some("image"), Some("upload")) | (Some("images"), None) => {
                resource_type = None;
                kind = None;
            }
            _ => {
                return Err(ConfigurationError::new(
                    "Root path only supported for image/upload",
                ));
            }
        }
    }

    if shorten && resource_type.as_deref() == Some("image") && kind.as_deref() == Some("upload") {
        resource_type = Some("iu".into());
        kind = None;
    }

    Ok((resource_type, kind))
}

/// Escapes the public id and appends suffix and format.
///
/// Returns the URL form and the form that is signed (which carries the
/// format but not the suffix).
pub fn finalize_source(
    public_id: &str,
    format: Option<&str>,
    url_suffix: Option<&str>,
) -> Result<(String, String), ConfigurationError> {
    let source = collapse_double_slashes(public_id);
    if is_absolute(&source) {
        let escaped = smart_escape(&source);
        return Ok((escaped.clone(), escaped));
    }

    let mut source = escape_public_id(&source);
    let mut source_to_sign = source.clone();
    if let Some(suffix) = url_suffix {
        if suffix.contains(['.', '/']) {
            return Err(ConfigurationError::new("url_suffix should not include . or /"));
        }
        source = format!("{source}/{suffix}");
    }
    if let Some(format) = format {
        source = format!("{source}.{format}");
        source_to_sign = format!("{source_to_sign}.{format}");
    }
    Ok((source, source_to_sign))
}

/// Host part selection.
struct Host<'a> {
    cloud_name: &'a str,
    private_cdn: bool,
    secure_distribution: Option<String>,
    secure: bool,
    cdn_subdomain: bool,
    secure_cdn_subdomain: Option<bool>,
    cname: Option<String>,
}

impl Host<'_> {
    fn prefix(&self, source: &str) -> String {
        if self.cloud_name.starts_with('/') {
            return format!("/res{}", self.cloud_name);
        }
        let shared_domain = !self.private_cdn;

        let mut prefix = if self.secure {
            let mut distribution = match self.secure_distribution.as_deref() {
                None | Some(OLD_AKAMAI_SHARED_CDN) if self.private_cdn => {
                    format!("{}-res.cloudinary.com", self.cloud_name)
                }
                None | Some(OLD_AKAMAI_SHARED_CDN) => SHARED_CDN.to_string(),
                Some(other) => other.to_string(),
            };
            let subdomain = match self.secure_cdn_subdomain {
                Some(explicit) => explicit,
                None => shared_domain && self.cdn_subdomain,
            };
            if subdomain {
                distribution = distribution.replace(
                    "res.cloudinary.com",
                    &format!("res-{}.cloudinary.com", cdn_shard(source)),
                );
            }
            format!("https://{distribution}")
        } else if let Some(cname) = &self.cname {
            let subdomain = if self.cdn_subdomain {
                format!("a{}.", cdn_shard(source))
            } else {
                String::new()
            };
            format!("http://{subdomain}{cname}")
        } else {
            let cdn_part = if self.private_cdn {
                format!("{}-", self.cloud_name)
            } else {
                String::new()
            };
            let subdomain = if self.cdn_subdomain {
                format!("-{}", cdn_shard(source))
            } else {
                String::new()
            };
            format!("http://{cdn_part}res{subdomain}.cloudinary.com")
        };

        if shared_domain {
            prefix.push('/');
            prefix.push_str(self.cloud_name);
        }
        prefix
    }
}

/// CDN shard number 1..=5 for a public id.
fn cdn_shard(source: &str) -> u32 {
    crc32fast::hash(source.as_bytes()) % 5 + 1
}

/// `image/upload/v123/sample.jpg` style ids returned by uploads.
struct Preloaded {
    resource_type: String,
    kind: String,
    version: String,
    public_id: String,
}

impl Preloaded {
    fn parse(id: &str) -> Option<Self> {
        let mut parts = id.splitn(4, '/');
        let resource_type = parts.next().filter(|r| *r == "image" || *r == "raw")?;
        let kind = parts.next().filter(|k| {
            !k.is_empty()
                && k.bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        })?;
        let version = parts
            .next()
            .and_then(|v| v.strip_prefix('v'))
            .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))?;
        let public_id = parts.next().filter(|p| !p.is_empty() && !p.contains('#'))?;
        Some(Self {
            resource_type: resource_type.into(),
            kind: kind.into(),
            version: version.into(),
            public_id: public_id.into(),
        })
    }
}

fn take_string(options: &mut Options, key: &str) -> Option<String> {
    consume(options, key).filter(present).map(|v| param_string(&v))
}

fn flag(options: &mut Options, key: &str, default: bool) -> bool {
    consume(options, key).map_or(default, |v| is_truthy(&v))
}

fn is_absolute(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http:/") || lower.starts_with("https:/")
}

fn starts_with_version(s: &str) -> bool {
    s.strip_prefix('v')
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn join_present<const N: usize>(parts: [Option<String>; N]) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const ROOT: &str = "https://res.cloudinary.com/test123";

    fn config() -> Config {
        Config::new("test123", "a", "b")
    }

    fn opts(value: Value) -> Options {
        value.as_object().cloned().unwrap()
    }

    fn build(public_id: &str, value: Value) -> (String, Options) {
        let mut options = opts(value);
        let url = url(public_id, &mut options, &config()).unwrap();
        (url, options)
    }

    fn build_err(public_id: &str, value: Value) -> String {
        let mut options = opts(value);
        url(public_id, &mut options, &config())
            .unwrap_err()
            .message()
            .to_string()
    }

    #[test]
    fn plain_public_id() {
        let (url, options) = build("test", json!({}));
        assert_eq!(url, format!("{ROOT}/image/upload/test"));
        assert!(options.is_empty());
    }

    #[test]
    fn transformation_and_leftover() {
        let (url, options) = build("test", json!({"width": 100, "height": 100, "crop": "crop"}));
        assert_eq!(url, format!("{ROOT}/image/upload/c_crop,h_100,w_100/test"));
        assert!(options.is_empty());

        let (url, options) = build("test", json!({"width": 100, "alt": "x"}));
        assert_eq!(url, format!("{ROOT}/image/upload/w_100/test"));
        assert_eq!(options, opts(json!({"width": 100, "alt": "x"})));
    }

    #[test]
    fn options_override_config() {
        let (url, _) = build("test", json!({"cloud_name": "other", "secure": false}));
        assert_eq!(url, "http://res.cloudinary.com/other/image/upload/test");
    }

    #[test]
    fn missing_cloud_name() {
        let mut options = Options::new();
        let err = url("test", &mut options, &Config::default()).unwrap_err();
        assert_eq!(err.message(), "Must supply cloud_name");
    }

    #[test]
    fn format_resource_type_and_type() {
        assert_eq!(
            build("test", json!({"format": "jpg"})).0,
            format!("{ROOT}/image/upload/test.jpg")
        );
        assert_eq!(
            build("test", json!({"resource_type": "raw", "type": "private"})).0,
            format!("{ROOT}/raw/private/test")
        );
    }

    #[test]
    fn version_injection() {
        assert_eq!(
            build("folder/test", json!({})).0,
            format!("{ROOT}/image/upload/v1/folder/test")
        );
        assert_eq!(
            build("folder/test", json!({"force_version": false})).0,
            format!("{ROOT}/image/upload/folder/test")
        );
        assert_eq!(
            build("v1234/test", json!({})).0,
            format!("{ROOT}/image/upload/v1234/test")
        );
        assert_eq!(
            build("folder/test", json!({"version": 123})).0,
            format!("{ROOT}/image/upload/v123/folder/test")
        );
        assert_eq!(
            build("test", json!({"version": 123})).0,
            format!("{ROOT}/image/upload/v123/test")
        );

        let mut options = Options::new();
        let mut config = config();
        config.force_version = false;
        assert_eq!(
            url("folder/test", &mut options, &config).unwrap(),
            format!("{ROOT}/image/upload/folder/test")
        );
    }

    #[test]
    fn preloaded_ids_are_split() {
        assert_eq!(
            build("raw/private/v123456/document.docx", json!({})).0,
            format!("{ROOT}/raw/private/v123456/document.docx")
        );
        assert_eq!(
            build("image/upload/v123456/img.jpg", json!({"crop": "scale", "width": "1.0"})).0,
            format!("{ROOT}/image/upload/c_scale,w_1.0/v123456/img.jpg")
        );
    }

    #[test]
    fn absolute_urls_without_type_are_untouched() {
        let (url, _) = build("http://example.com/hello.png", json!({"width": 100}));
        assert_eq!(url, "http://example.com/hello.png");
    }

    #[test]
    fn fetch_urls_are_escaped() {
        assert_eq!(
            build("http://blah.com/hello?a=b", json!({"type": "fetch"})).0,
            format!("{ROOT}/image/fetch/http://blah.com/hello%3Fa%3Db")
        );
        assert_eq!(
            build(
                "http://cloudinary.com/image/upload/sample.jpg",
                json!({"type": "fetch", "format": "png"})
            )
            .0,
            format!("{ROOT}/image/fetch/f_png/http://cloudinary.com/image/upload/sample.jpg")
        );
    }

    #[test]
    fn public_ids_are_escaped() {
        assert_eq!(
            build("a b+c", json!({})).0,
            format!("{ROOT}/image/upload/a%20b%2Bc")
        );
        assert_eq!(
            build("already%20escaped", json!({})).0,
            format!("{ROOT}/image/upload/already%20escaped")
        );
    }

    #[test]
    fn url_suffix() {
        assert_eq!(
            build("test", json!({"url_suffix": "hello"})).0,
            format!("{ROOT}/images/test/hello")
        );
        assert_eq!(
            build("test", json!({"url_suffix": "hello", "format": "jpg"})).0,
            format!("{ROOT}/images/test/hello.jpg")
        );
        assert_eq!(
            build("test", json!({"url_suffix": "hello", "type": "private"})).0,
            format!("{ROOT}/private_images/test/hello")
        );
        assert_eq!(
            build("test", json!({"url_suffix": "hello", "type": "authenticated"})).0,
            format!("{ROOT}/authenticated_images/test/hello")
        );
        assert_eq!(
            build("test", json!({"url_suffix": "hello", "resource_type": "raw"})).0,
            format!("{ROOT}/files/test/hello")
        );
        assert_eq!(
            build("test", json!({"url_suffix": "hello", "resource_type": "video"})).0,
            format!("{ROOT}/videos/test/hello")
        );
    }

    #[test]
    fn url_suffix_errors() {
        assert_eq!(
            build_err("test", json!({"url_suffix": "hello", "type": "facebook"})),
            "URL Suffix only supported for image/upload, image/private, \
             image/authenticated, video/upload and raw/upload"
        );
        assert_eq!(
            build_err("test", json!({"url_suffix": "hello.world"})),
            "url_suffix should not include . or /"
        );
        assert_eq!(
            build_err("test", json!({"url_suffix": "hello/world"})),
            "url_suffix should not include . or /"
        );
    }

    #[test]
    fn signed_url_suffix_signs_without_suffix() {
        let (plain, _) = build("test", json!({"format": "jpg", "sign_url": true}));
        let (suffixed, _) =
            build("test", json!({"format": "jpg", "sign_url": true, "url_suffix": "hello"}));
        let signature = |u: &str| u.split('/').find(|p| p.starts_with("s--")).map(String::from);
        assert_eq!(signature(&plain), signature(&suffixed));
    }

    #[test]
    fn root_path_and_shorten() {
        assert_eq!(build("test", json!({"use_root_path": true})).0, format!("{ROOT}/test"));
        assert_eq!(
            build("test", json!({"use_root_path": true, "url_suffix": "hello"})).0,
            format!("{ROOT}/test/hello")
        );
        assert_eq!(
            build_err("test", json!({"use_root_path": true, "type": "private"})),
            "Root path only supported for image/upload"
        );
        assert_eq!(build("test", json!({"shorten": true})).0, format!("{ROOT}/iu/test"));
    }

    #[test]
    fn host_selection() {
        assert_eq!(
            build("test", json!({"secure": false})).0,
            "http://res.cloudinary.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"private_cdn": true})).0,
            "https://test123-res.cloudinary.com/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"secure_distribution": "something.else.com"})).0,
            "https://something.else.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"secure": false, "private_cdn": true})).0,
            "http://test123-res.cloudinary.com/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"secure": false, "cname": "hello.com"})).0,
            "http://hello.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"secure": false, "cdn_subdomain": true})).0,
            "http://res-2.cloudinary.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"secure": false, "cname": "hello.com", "cdn_subdomain": true})).0,
            "http://a2.hello.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"cdn_subdomain": true})).0,
            "https://res-2.cloudinary.com/test123/image/upload/test"
        );
        assert_eq!(
            build("test", json!({"cdn_subdomain": true, "secure_cdn_subdomain": false})).0,
            format!("{ROOT}/image/upload/test")
        );
        assert_eq!(
            build("test", json!({"cloud_name": "/local"})).0,
            "/res/local/image/upload/test"
        );
    }

    #[test]
    fn signed_urls() {
        assert_eq!(
            build(
                "image.jpg",
                json!({
                    "version": 1234,
                    "transformation": {"crop": "crop", "width": 10, "height": 20},
                    "sign_url": true
                })
            )
            .0,
            format!("{ROOT}/image/upload/s--Ai4Znfl3--/c_crop,h_20,w_10/v1234/image.jpg")
        );
        assert_eq!(
            build("image.jpg", json!({"version": 1234, "sign_url": true})).0,
            format!("{ROOT}/image/upload/s----SjmNDA--/v1234/image.jpg")
        );
        assert_eq!(
            build("image.jpg", json!({"sign_url": true})).0,
            format!("{ROOT}/image/upload/s----SjmNDA--/image.jpg")
        );
        assert_eq!(
            build(
                "http://google.com/path/to/image.png",
                json!({"type": "fetch", "version": 1234, "sign_url": true})
            )
            .0,
            format!("{ROOT}/image/fetch/s--hH_YcbiS--/v1234/http://google.com/path/to/image.png")
        );
    }

    #[test]
    fn signed_urls_can_cover_the_version() {
        assert_eq!(
            build(
                "image.jpg",
                json!({
                    "version": 1234,
                    "transformation": {"crop": "crop", "width": 10, "height": 20},
                    "sign_url": true,
                    "sign_version": true
                })
            )
            .0,
            format!("{ROOT}/image/upload/s--MaRXzoEC--/c_crop,h_20,w_10/v1234/image.jpg")
        );
    }

    #[test]
    fn long_url_signature() {
        assert_eq!(
            build(
                "image.jpg",
                json!({
                    "transformation": {"crop": "crop", "width": 10, "height": 20},
                    "sign_url": true,
                    "long_url_signature": true
                })
            )
            .0,
            format!("{ROOT}/image/upload/s--w7DXgwn5wCnfEUqu7i0gnCTHxMzvnVmI--/c_crop,h_20,w_10/image.jpg")
        );
    }

    #[test]
    fn signing_requires_secret() {
        let mut options = opts(json!({"sign_url": true}));
        let err = url("test", &mut options, &Config {
            cloud_name: Some("test123".into()),
            ..Config::default()
        })
        .unwrap_err();
        assert_eq!(err.message(), "Must supply api_secret");
    }

    #[test]
    fn api_urls() {
        let config = config();
        assert_eq!(
            api_url("upload", &Options::new(), &config).unwrap(),
            "https://api.cloudinary.com/v1_1/test123/image/upload"
        );
        assert_eq!(
            api_url("destroy", &opts(json!({"resource_type": "raw"})), &config).unwrap(),
            "https://api.cloudinary.com/v1_1/test123/raw/destroy"
        );
        assert_eq!(
            api_url(
                "upload",
                &opts(json!({"upload_prefix": "http://127.0.0.1:9"})),
                &config
            )
            .unwrap(),
            "http://127.0.0.1:9/v1_1/test123/image/upload"
        );
        assert!(api_url("upload", &Options::new(), &Config::default()).is_err());
    }
}
