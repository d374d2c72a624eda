//! Upload API client.
//!
//! Builds and signs upload parameters, encodes them as `multipart/form-data`
//! and sends them with `reqwest`. Large sources go through [`ChunkSplitter`],
//! one sequential request per chunk.

pub mod chunked;
pub mod client;
mod error;
pub mod multipart;
pub mod params;
pub mod response;

pub use chunked::{Chunk, ChunkAction, ChunkSplitter, ChunkState};
pub use client::{ChunkedUploader, UploadSource, Uploader, is_remote_url};
pub use error::{TIMEOUT_HTTP_CODE, UploadError};
pub use multipart::{BoxedReader, FilePart, Multipart};
pub use params::{
    build_archive_params, build_explicit_params, build_upload_params, encode_context,
    hash_to_parameters,
};
pub use response::{UploadResponse, parse_response};
