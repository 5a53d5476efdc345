//! Incremental decoding of a health report response body.
//!
//! The server writes a sequence of concatenated JSON documents, each a full
//! [`HealthInfo`] snapshot that is more complete than the one before. The
//! version envelope is read from the first document, which is then kept so
//! the caller still receives it from [`HealthInfoStream::next`].
//!
//! Document boundaries are found by [`DocumentScanner`], which looks at every
//! received byte once; serde only runs on complete documents.
//!
//! [`HealthInfo`]: crate::health::HealthInfo

use crate::client::HealthInfoError;
use crate::health::HealthInfoVersion;
use crate::transport::ResponseBody;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

pub struct HealthInfoStream<B> {
    body: B,
    buf: Vec<u8>,
    scanner: DocumentScanner,
    eof: bool,
    version: String,
    first: Option<Box<RawValue>>,
}

impl<B: ResponseBody> HealthInfoStream<B> {
    /// Reads the first document and returns its envelope with the stream.
    ///
    /// A `null` first document carries no envelope and counts as version `""`.
    pub(crate) async fn open(body: B) -> Result<(HealthInfoVersion, Self), HealthInfoError> {
        let mut stream = Self {
            body,
            buf: Vec::new(),
            scanner: DocumentScanner::default(),
            eof: false,
            version: String::new(),
            first: None,
        };
        let first = stream
            .next_document()
            .await?
            .ok_or(HealthInfoError::EmptyResponse)?;
        let envelope = serde_json::from_str::<Option<HealthInfoVersion>>(first.get())?
            .unwrap_or_default();
        stream.version = envelope.version.clone();
        stream.first = Some(first);
        Ok((envelope, stream))
    }

    /// Negotiated health info version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Decodes the next document. `Box<RawValue>` keeps it exactly as sent.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, HealthInfoError> {
        let raw = match self.first.take() {
            Some(first) => first,
            None => match self.next_document().await? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };
        Ok(Some(serde_json::from_str(raw.get())?))
    }

    /// Drains the stream and returns the final snapshot untouched.
    pub async fn latest_raw(mut self) -> Result<Option<Box<RawValue>>, HealthInfoError> {
        let mut latest = None;
        while let Some(raw) = self.next::<Box<RawValue>>().await? {
            latest = Some(raw);
        }
        Ok(latest)
    }

    async fn next_document(&mut self) -> Result<Option<Box<RawValue>>, HealthInfoError> {
        loop {
            let end = match self.scanner.scan(&self.buf) {
                Some(end) => end,
                None if self.eof => {
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        self.buf.clear();
                        return Ok(None);
                    }
                    // Unterminated document; serde reports where it broke off.
                    self.buf.len()
                }
                None => {
                    match self.body.chunk().await? {
                        Some(chunk) => self.buf.extend_from_slice(&chunk),
                        None => self.eof = true,
                    }
                    continue;
                }
            };
            let doc = serde_json::from_slice(&self.buf[..end]);
            self.buf.drain(..end);
            self.scanner = DocumentScanner::default();
            return Ok(Some(doc?));
        }
    }
}

/// Finds the end of the first top-level JSON value in a growing buffer.
///
/// State carries over between calls, so each byte is inspected once no
/// matter how many chunks a document arrives in.
#[derive(Debug, Default)]
struct DocumentScanner {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    in_literal: bool,
}

impl DocumentScanner {
    /// Returns the end offset of the document once it is complete.
    fn scan(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let b = buf[self.pos];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                continue;
            }

            if self.in_literal {
                if b.is_ascii_whitespace() || matches!(b, b'{' | b'[' | b'"' | b'}' | b']' | b',') {
                    self.pos -= 1;
                    return Some(self.pos);
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    // A stray closer at top level is left for serde to reject.
                    if self.depth <= 1 {
                        return Some(self.pos);
                    }
                    self.depth -= 1;
                }
                _ if b.is_ascii_whitespace() => {}
                _ if self.depth == 0 => self.in_literal = true,
                _ => {}
            }
        }
        None
    }
}
