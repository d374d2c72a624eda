//! Shared building blocks for the Cloudinary client crates.
//!
//! Holds the explicit [`Config`] value every operation reads its account
//! settings from, the dynamic [`Options`] bag callers pass per call, and the
//! deterministic request signer.

pub mod config;
pub mod options;
pub mod signature;

pub use config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT_MS, DEFAULT_UPLOAD_PREFIX};
pub use options::{Options, as_f64, consume, is_truthy, param_string, present, to_list};
pub use signature::{
    SignatureAlgorithm, api_sign_request, compute_hash, process_request_params, sign_request,
    signed_preloaded_image, verify_notification_signature, webhook_signature,
};

/// Invalid caller input detected before any network call.
///
/// Never retried; surfaced immediately to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConfigurationError {
    message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The human readable reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}
