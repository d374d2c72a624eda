//! Upload API client.
//!
//! Async HTTP client using `reqwest`. Every action is a signed
//! `multipart/form-data` POST to
//! `{upload_prefix}/v1_1/{cloud}/{resource_type}/{action}`; large sources are
//! split by [`ChunkSplitter`] and sent one chunk at a time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use cloudinary_core::{
    Config, ConfigurationError, Options, as_f64, is_truthy, param_string, present,
    process_request_params,
};
use cloudinary_url::api_url;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, USER_AGENT};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::UploadError;
use crate::chunked::{Chunk, ChunkAction, ChunkSplitter};
use crate::multipart::{FilePart, Multipart};
use crate::params::{
    as_safe_bool, build_archive_params, build_explicit_params, build_upload_params,
    encode_context, hash_to_parameters, timestamp,
};
use crate::response::{UploadResponse, parse_response};

const UPLOAD_ID_HEADER: &str = "X-Unique-Upload-Id";
const READ_BLOCK_SIZE: usize = 64 * 1024;

/// What to send as the `file` of an upload.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A local file, streamed.
    Path(PathBuf),
    /// In-memory data.
    Bytes { filename: String, data: Bytes },
    /// A URL (or data URI) the service fetches itself.
    RemoteUrl(String),
}

impl UploadSource {
    /// Remote URLs become [`UploadSource::RemoteUrl`], anything else a path.
    pub fn from_arg(arg: &str) -> Self {
        if is_remote_url(arg) {
            Self::RemoteUrl(arg.to_string())
        } else {
            Self::Path(PathBuf::from(arg))
        }
    }
}

/// `ftp:`, `http(s):`, `gs:`, `s3:` and `data:` sources are fetched by the service.
pub fn is_remote_url(source: &str) -> bool {
    ["ftp:", "http:", "https:", "gs:", "s3:", "data:"]
        .iter()
        .any(|scheme| source.starts_with(scheme))
}

/// Headers that tie one chunk to its upload.
struct ChunkHeaders<'a> {
    content_range: String,
    upload_id: &'a str,
}

/// Upload API client bound to one account configuration.
pub struct Uploader {
    http: reqwest::Client,
    config: Config,
}

impl Uploader {
    /// Creates a client; `api_proxy` routes every request through a proxy.
    pub fn new(config: Config) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = config.api_proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn timeout(&self, options: &Options) -> Duration {
        options
            .get("timeout")
            .and_then(as_f64)
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or_else(|| self.config.timeout())
    }

    fn user_agent(&self, options: &Options) -> String {
        let agent = concat!("CloudinaryRust/", env!("CARGO_PKG_VERSION"));
        let platform = options
            .get("user_platform")
            .filter(|v| present(v))
            .map(param_string)
            .or_else(|| self.config.user_platform.clone());
        match platform {
            Some(platform) if !platform.is_empty() => format!("{platform} {agent}"),
            _ => agent.to_string(),
        }
    }

    fn oauth_token(&self, options: &Options) -> Option<String> {
        options
            .get("oauth_token")
            .filter(|v| present(v))
            .map(param_string)
            .or_else(|| self.config.oauth_token.clone())
    }

    /// Signs `params` and POSTs them, with an optional file part.
    ///
    /// Bodies of unknown length go out with chunked transfer encoding.
    async fn call_api(
        &self,
        action: &str,
        params: Options,
        options: &Options,
        file: Option<FilePart>,
        chunk: Option<ChunkHeaders<'_>>,
    ) -> Result<UploadResponse, UploadError> {
        let params = process_request_params(params, options, &self.config)?;
        let url = api_url(action, options, &self.config)?;
        if options.get("api_proxy").is_some_and(present) {
            warn!(action, "per-call api_proxy is ignored; configure it on the client");
        }

        let form = Multipart::new(hash_to_parameters(&params));
        let content_type = form.content_type();
        let (body, len) = form.into_body(file).await?;

        let mut request = self
            .http
            .post(&url)
            .timeout(self.timeout(options))
            .header(CONTENT_TYPE, content_type)
            .header(USER_AGENT, self.user_agent(options));
        if let Some(len) = len {
            request = request.header(CONTENT_LENGTH, len);
        }
        if let Some(chunk) = &chunk {
            request = request
                .header(CONTENT_RANGE, chunk.content_range.as_str())
                .header(UPLOAD_ID_HEADER, chunk.upload_id);
        }
        if let Some(token) = self.oauth_token(options) {
            request = request.bearer_auth(token);
        }

        debug!(action, url = %url, bytes = ?len, "sending request");
        let response = request.body(body).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(action, status, "received response");
        parse_response(status, &body)
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Uploads a whole source in one request.
    pub async fn upload(
        &self,
        source: UploadSource,
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = build_upload_params(&options)?;
        let file = match source {
            UploadSource::RemoteUrl(url) => {
                params.insert("file".into(), Value::String(url));
                None
            }
            UploadSource::Path(path) => Some(FilePart::from_path(&path)),
            UploadSource::Bytes { filename, data } => Some(FilePart::Bytes { filename, data }),
        };
        let response = self.call_api("upload", params, &options, file, None).await?;
        info!(public_id = ?response.public_id, bytes = ?response.bytes, "upload finished");
        Ok(response)
    }

    /// Uploads everything `reader` yields in one streamed request.
    ///
    /// The file part is named after the `filename` option, `file` otherwise.
    pub async fn upload_stream<R>(
        &self,
        reader: R,
        options: Options,
    ) -> Result<UploadResponse, UploadError>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let params = build_upload_params(&options)?;
        let file = FilePart::Reader {
            filename: filename_option(&options),
            reader: Box::new(reader),
        };
        let response = self
            .call_api("upload", params, &options, Some(file), None)
            .await?;
        info!(public_id = ?response.public_id, bytes = ?response.bytes, "stream upload finished");
        Ok(response)
    }

    /// Uploads a local file in chunks.
    ///
    /// Remote URLs are handed to [`upload`](Self::upload). `resource_type`
    /// defaults to `raw` and `filename` to the file stem.
    pub async fn upload_large(
        &self,
        path: impl AsRef<Path>,
        mut options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let path = path.as_ref();
        if let Some(url) = path.to_str().filter(|s| is_remote_url(s)) {
            return self
                .upload(UploadSource::RemoteUrl(url.to_string()), options)
                .await;
        }

        default_resource_type(&mut options, "raw");
        if !options.get("filename").is_some_and(present) {
            if let Some(stem) = path.file_stem() {
                options.insert("filename".into(), json!(stem.to_string_lossy()));
            }
        }

        let file = tokio::fs::File::open(path).await?;
        self.upload_chunked_stream(file, options).await
    }

    /// Chunked upload of a reader; `resource_type` defaults to `raw`.
    pub async fn upload_large_stream<R>(
        &self,
        reader: R,
        mut options: Options,
    ) -> Result<UploadResponse, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        default_resource_type(&mut options, "raw");
        self.upload_chunked_stream(reader, options).await
    }

    /// Reads `reader` to the end, uploading one chunk per `chunk_size` bytes.
    ///
    /// Reading stops at the first failed chunk and that error is returned.
    pub async fn upload_chunked_stream<R>(
        &self,
        mut reader: R,
        options: Options,
    ) -> Result<UploadResponse, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut sink = self.chunked_uploader(options);
        let mut block = vec![0u8; READ_BLOCK_SIZE];
        loop {
            let n = reader.read(&mut block).await?;
            if n == 0 {
                break;
            }
            sink.write(&block[..n]).await;
            if !sink.is_active() {
                break;
            }
        }
        sink.finish().await
    }

    /// A writable sink for a chunked upload.
    pub fn chunked_uploader(&self, options: Options) -> ChunkedUploader<'_> {
        let chunk_size = ["chunk_size", "part_size"]
            .iter()
            .find_map(|key| options.get(*key).and_then(as_f64))
            .filter(|size| *size >= 1.0)
            .map(|size| size as usize)
            .unwrap_or(self.config.chunk_size);
        let filename = filename_option(&options);

        ChunkedUploader {
            uploader: self,
            splitter: ChunkSplitter::new(chunk_size),
            options,
            filename,
            upload_id: uuid::Uuid::new_v4().simple().to_string(),
            last: None,
            error: None,
        }
    }

    /// Applies actions to an already uploaded resource.
    pub async fn explicit(
        &self,
        public_id: &str,
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let params = build_explicit_params(public_id, &options)?;
        self.call_api("explicit", params, &options, None, None).await
    }

    /// Deletes a resource.
    pub async fn destroy(
        &self,
        public_id: &str,
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = base_params(&options);
        params.insert("public_id".into(), json!(public_id));
        copy_present(&mut params, &options, &["type"]);
        copy_flags(&mut params, &options, &["invalidate"]);
        self.call_api("destroy", params, &options, None, None).await
    }

    /// Renames a resource; `to_type` also moves it between delivery types.
    pub async fn rename(
        &self,
        from_public_id: &str,
        to_public_id: &str,
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = base_params(&options);
        params.insert("from_public_id".into(), json!(from_public_id));
        params.insert("to_public_id".into(), json!(to_public_id));
        copy_present(&mut params, &options, &["type", "to_type"]);
        copy_flags(&mut params, &options, &["overwrite", "invalidate"]);
        self.call_api("rename", params, &options, None, None).await
    }

    // -----------------------------------------------------------------------
    // Archives and metadata
    // -----------------------------------------------------------------------

    /// Asks the service to build an archive of the selected resources.
    ///
    /// A `target_format` argument wins over the option of the same name.
    pub async fn create_archive(
        &self,
        options: Options,
        target_format: Option<&str>,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = build_archive_params(&options)?;
        if let Some(format) = target_format {
            params.insert("target_format".into(), json!(format));
        }
        self.call_api("generate_archive", params, &options, None, None).await
    }

    pub async fn create_zip(&self, options: Options) -> Result<UploadResponse, UploadError> {
        self.create_archive(options, Some("zip")).await
    }

    /// Sets structured metadata values (`{external_id: value}`) on resources.
    pub async fn update_metadata(
        &self,
        metadata: &Value,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = base_params(&options);
        params.insert("metadata".into(), Value::String(encode_context(metadata)));
        params.insert("public_ids".into(), json!(public_ids));
        copy_present(&mut params, &options, &["type"]);
        copy_flags(&mut params, &options, &["clear_invalid"]);
        self.call_api("metadata", params, &options, None, None).await
    }

    // -----------------------------------------------------------------------
    // Tags and context
    // -----------------------------------------------------------------------

    /// Adds `tag`; with `exclusive` the tag is removed from every other resource.
    pub async fn add_tag(
        &self,
        tag: &str,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let command = if options.get("exclusive").is_some_and(is_truthy) {
            "set_exclusive"
        } else {
            "add"
        };
        self.call_tags_api(Some(tag), command, public_ids, options).await
    }

    pub async fn remove_tag(
        &self,
        tag: &str,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        self.call_tags_api(Some(tag), "remove", public_ids, options).await
    }

    /// Replaces every tag of the resources with `tag`.
    pub async fn replace_tag(
        &self,
        tag: &str,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        self.call_tags_api(Some(tag), "replace", public_ids, options).await
    }

    pub async fn remove_all_tags(
        &self,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        self.call_tags_api(None, "remove_all", public_ids, options).await
    }

    async fn call_tags_api(
        &self,
        tag: Option<&str>,
        command: &str,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = base_params(&options);
        if let Some(tag) = tag {
            params.insert("tag".into(), json!(tag));
        }
        params.insert("public_ids".into(), json!(public_ids));
        params.insert("command".into(), json!(command));
        copy_present(&mut params, &options, &["type"]);
        self.call_api("tags", params, &options, None, None).await
    }

    /// Merges `context` (`{key: value}` or `k=v|k2=v2`) into the resources.
    pub async fn add_context(
        &self,
        context: &Value,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        self.call_context_api(Some(context), "add", public_ids, options).await
    }

    pub async fn remove_all_context(
        &self,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        self.call_context_api(None, "remove_all", public_ids, options).await
    }

    async fn call_context_api(
        &self,
        context: Option<&Value>,
        command: &str,
        public_ids: &[&str],
        options: Options,
    ) -> Result<UploadResponse, UploadError> {
        let mut params = base_params(&options);
        if let Some(context) = context {
            params.insert("context".into(), Value::String(encode_context(context)));
        }
        params.insert("public_ids".into(), json!(public_ids));
        params.insert("command".into(), json!(command));
        copy_present(&mut params, &options, &["type"]);
        self.call_api("context", params, &options, None, None).await
    }

    // -----------------------------------------------------------------------
    // Browser upload helpers
    // -----------------------------------------------------------------------

    /// Endpoint for direct uploads; `resource_type` defaults to `auto`.
    pub fn upload_url(&self, options: &Options) -> Result<String, ConfigurationError> {
        let mut options = options.clone();
        default_resource_type(&mut options, "auto");
        api_url("upload", &options, &self.config)
    }

    /// Signed upload parameters as a JSON object string, for embedding in a
    /// browser upload form.
    pub fn upload_tag_params(&self, options: &Options) -> Result<String, UploadError> {
        let params = build_upload_params(options)?;
        let params = process_request_params(params, options, &self.config)?;
        Ok(serde_json::to_string(&params)?)
    }
}

fn base_params(options: &Options) -> Options {
    let mut params = Options::new();
    let ts = options
        .get("timestamp")
        .filter(|v| present(v))
        .cloned()
        .unwrap_or_else(|| json!(timestamp()));
    params.insert("timestamp".into(), ts);
    params
}

fn copy_present(params: &mut Options, options: &Options, keys: &[&str]) {
    for &key in keys {
        if let Some(value) = options.get(key).filter(|v| present(v)) {
            params.insert(key.into(), value.clone());
        }
    }
}

fn copy_flags(params: &mut Options, options: &Options, keys: &[&str]) {
    for &key in keys {
        if let Some(value) = options.get(key).and_then(as_safe_bool) {
            params.insert(key.into(), value);
        }
    }
}

fn default_resource_type(options: &mut Options, resource_type: &str) {
    if !options.get("resource_type").is_some_and(present) {
        options.insert("resource_type".into(), json!(resource_type));
    }
}

fn filename_option(options: &Options) -> String {
    options
        .get("filename")
        .filter(|v| present(v))
        .map(param_string)
        .unwrap_or_else(|| "file".into())
}

// ---------------------------------------------------------------------------
// Chunked upload sink
// ---------------------------------------------------------------------------

/// Writable sink that uploads its input in sequential chunks.
///
/// Every chunk is sent with the same `X-Unique-Upload-Id`. After a chunk
/// fails, further writes are dropped and [`finish`](Self::finish) reports
/// that error.
pub struct ChunkedUploader<'a> {
    uploader: &'a Uploader,
    splitter: ChunkSplitter,
    options: Options,
    filename: String,
    upload_id: String,
    last: Option<UploadResponse>,
    error: Option<UploadError>,
}

impl ChunkedUploader<'_> {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// False once a chunk has failed.
    pub fn is_active(&self) -> bool {
        self.splitter.is_active()
    }

    /// Buffers `data`, uploading every chunk it completes.
    pub async fn write(&mut self, data: &[u8]) {
        let mut action = self.splitter.feed(data);
        if matches!(action, ChunkAction::Discarded) {
            warn!(
                bytes = data.len(),
                upload_id = %self.upload_id,
                "discarding input after failed chunk"
            );
            return;
        }
        while let ChunkAction::Emit(chunk) = action {
            action = self.send(chunk).await;
        }
    }

    /// Uploads the remaining bytes as the last chunk and returns the
    /// response of that chunk, or the first error.
    pub async fn finish(mut self) -> Result<UploadResponse, UploadError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        match self.splitter.close() {
            Some(chunk) => {
                self.send(chunk).await;
            }
            None if self.splitter.bytes_sent() == 0 => return Err(UploadError::EmptySource),
            None => {}
        }
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let response = self.last.ok_or(UploadError::EmptySource)?;
        info!(
            public_id = ?response.public_id,
            bytes = self.splitter.bytes_sent(),
            upload_id = %self.upload_id,
            "chunked upload finished"
        );
        Ok(response)
    }

    async fn send(&mut self, chunk: Chunk) -> ChunkAction {
        let outcome = self.upload_chunk(chunk).await;
        match outcome {
            Ok(response) => {
                self.last = Some(response);
                self.splitter.complete(true)
            }
            Err(err) => {
                warn!(upload_id = %self.upload_id, error = %err, "chunk upload failed");
                self.error = Some(err);
                self.splitter.complete(false)
            }
        }
    }

    async fn upload_chunk(&self, chunk: Chunk) -> Result<UploadResponse, UploadError> {
        let params = build_upload_params(&self.options)?;
        let content_range = chunk.content_range();
        debug!(range = %content_range, upload_id = %self.upload_id, "uploading chunk");
        let file = FilePart::Bytes {
            filename: self.filename.clone(),
            data: chunk.data,
        };
        let headers = ChunkHeaders {
            content_range,
            upload_id: &self.upload_id,
        };
        self.uploader
            .call_api("upload", params, &self.options, Some(file), Some(headers))
            .await
    }
}
