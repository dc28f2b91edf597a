//! `multipart/form-data` envelopes for file uploads.

use std::path::Path;

use new_mime_guess::MimeGuess;
use uuid::Uuid;

use crate::error::ApiError;

const BOUNDARY_PREFIX: &str = "----------------------------";
const OCTET_STREAM: &str = "application/octet-stream";

/// An encoded file body and the `Content-Type` header value announcing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FileBody {
    /// The boundary token embedded in `content_type`.
    pub fn boundary(&self) -> &str {
        self.content_type
            .split_once("boundary=")
            .map(|(_, b)| b)
            .unwrap_or_default()
    }
}

/// Wrap `contents` as a single `file` form field named `name`.
///
/// Each call draws a fresh boundary: the prefix plus 12 hex characters of a
/// v4 UUID.
pub fn encode_file(name: &str, mime: &str, contents: &[u8]) -> FileBody {
    let token = Uuid::new_v4().simple().to_string();
    let boundary = format!("{BOUNDARY_PREFIX}{}", &token[..12]);

    let mut body = Vec::with_capacity(contents.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());

    FileBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body,
    }
}

/// Read `path` and encode it. The mime type is guessed from the extension;
/// `file_name` overrides the name taken from the path.
pub fn encode_file_from_path(path: impl AsRef<Path>, file_name: Option<&str>) -> Result<FileBody, ApiError> {
    let path = path.as_ref();
    let contents = std::fs::read(path)?;
    let name = match file_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let mime = MimeGuess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string());
    Ok(encode_file(&name, &mime, &contents))
}
