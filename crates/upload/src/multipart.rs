//! `multipart/form-data` request bodies.
//!
//! Field parts are rendered up front; a file part is either appended from
//! memory or streamed from disk without buffering the whole file.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::UploadError;

/// Byte source of a [`FilePart::Reader`].
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// The file part of a request.
pub enum FilePart {
    /// In-memory data (one chunk of a chunked upload, or caller bytes).
    Bytes { filename: String, data: Bytes },
    /// A local file streamed as the request body is sent.
    Path { filename: String, path: PathBuf },
    /// A reader of unknown length, sent with chunked transfer encoding.
    Reader { filename: String, reader: BoxedReader },
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes { filename, data } => f
                .debug_struct("Bytes")
                .field("filename", filename)
                .field("len", &data.len())
                .finish(),
            Self::Path { filename, path } => f
                .debug_struct("Path")
                .field("filename", filename)
                .field("path", path)
                .finish(),
            Self::Reader { filename, .. } => f
                .debug_struct("Reader")
                .field("filename", filename)
                .finish_non_exhaustive(),
        }
    }
}

impl FilePart {
    /// Streams `path`, named after its final component.
    pub fn from_path(path: &Path) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());
        Self::Path {
            filename,
            path: path.to_path_buf(),
        }
    }
}

/// A form body with a random boundary.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    fields: Vec<(String, String)>,
}

impl Multipart {
    /// Creates a body for `fields` with a fresh boundary.
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self::with_boundary(uuid::Uuid::new_v4().simple().to_string(), fields)
    }

    pub fn with_boundary(boundary: String, fields: Vec<(String, String)>) -> Self {
        Self { boundary, fields }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn fields_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            out.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                    self.boundary
                )
                .as_bytes(),
            );
        }
        out
    }

    fn file_header(&self, filename: &str) -> Vec<u8> {
        format!(
            "--{}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            self.boundary
        )
        .into_bytes()
    }

    /// Field parts and file header, then the file bytes, then the terminator.
    fn streamed_parts(&self, filename: &str) -> (Vec<u8>, Vec<u8>) {
        let mut prelude = self.fields_bytes();
        prelude.extend_from_slice(&self.file_header(filename));
        let mut epilogue = b"\r\n".to_vec();
        epilogue.extend_from_slice(&self.terminator());
        (prelude, epilogue)
    }

    fn terminator(&self) -> Vec<u8> {
        format!("--{}--", self.boundary).into_bytes()
    }

    /// Renders the whole body in memory, with `file` as an optional
    /// `(filename, data)` part.
    pub fn encode(&self, file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut out = self.fields_bytes();
        if let Some((filename, data)) = file {
            out.extend_from_slice(&self.file_header(filename));
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(&self.terminator());
        out
    }

    /// Builds the request body and its exact length, when known.
    ///
    /// Reader parts have no length up front; their body is sent chunked.
    pub async fn into_body(
        self,
        file: Option<FilePart>,
    ) -> Result<(reqwest::Body, Option<u64>), UploadError> {
        match file {
            None => {
                let body = self.encode(None);
                let len = body.len() as u64;
                Ok((body.into(), Some(len)))
            }
            Some(FilePart::Bytes { filename, data }) => {
                let body = self.encode(Some((&filename, &data)));
                let len = body.len() as u64;
                Ok((body.into(), Some(len)))
            }
            Some(FilePart::Path { filename, path }) => {
                let file = tokio::fs::File::open(&path).await?;
                let file_len = file.metadata().await?.len();
                let (prelude, epilogue) = self.streamed_parts(&filename);
                let len = prelude.len() as u64 + file_len + epilogue.len() as u64;
                Ok((streamed_body(prelude, file, epilogue), Some(len)))
            }
            Some(FilePart::Reader { filename, reader }) => {
                let (prelude, epilogue) = self.streamed_parts(&filename);
                Ok((streamed_body(prelude, reader, epilogue), None))
            }
        }
    }
}

fn streamed_body<R>(prelude: Vec<u8>, reader: R, epilogue: Vec<u8>) -> reqwest::Body
where
    R: AsyncRead + Send + Sync + Unpin + 'static,
{
    let body = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(prelude)) })
        .chain(ReaderStream::new(reader))
        .chain(stream::once(async move { Ok(Bytes::from(epilogue)) }));
    reqwest::Body::wrap_stream(body)
}
