//! Minimal HTTP/1.x request grammar for the provisioning portal.
//!
//! request   = request-line *( header CRLF ) CRLF [ body ]
//! request-line = method SP target SP "HTTP/1." DIGIT CRLF
//!
//! Anything that does not match is rejected; there is no best-effort recovery.

use std::io::{ErrorKind, Read, Write};

use crate::error::RequestError;

pub const MAX_HEADER_BYTES: usize = 4096;
pub const MAX_BODY_BYTES: usize = 4096;

const READ_CHUNK: usize = 512;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is(&self, method: &str, path: &str) -> bool {
        self.method == method && self.target.split('?').next() == Some(path)
    }

    pub fn body_str(&self) -> Result<&str, RequestError> {
        std::str::from_utf8(&self.body).map_err(|_| RequestError::Encoding)
    }

    /// Parse a buffer holding one complete request.
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        let split = find_terminator(raw).ok_or(RequestError::Truncated)?;
        let mut request = parse_head(&raw[..split])?;
        let body = &raw[split + HEADER_TERMINATOR.len()..];

        match request.content_length()? {
            Some(len) if body.len() < len => return Err(RequestError::Truncated),
            Some(len) => request.body = body[..len].to_vec(),
            None => request.body = body.to_vec(),
        }
        Ok(request)
    }

    /// Read exactly one request from `reader`.
    ///
    /// Without `Content-Length` the body is whatever arrived with the header block.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, RequestError> {
        let mut buffer = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0_u8; READ_CHUNK];

        let split = loop {
            if let Some(split) = find_terminator(&buffer) {
                break split;
            }
            if buffer.len() > MAX_HEADER_BYTES {
                return Err(RequestError::HeadersTooLarge(MAX_HEADER_BYTES));
            }
            let read = read_chunk(reader, &mut chunk)?;
            if read == 0 {
                return Err(RequestError::Truncated);
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        if split > MAX_HEADER_BYTES {
            return Err(RequestError::HeadersTooLarge(MAX_HEADER_BYTES));
        }

        let mut request = parse_head(&buffer[..split])?;
        let mut body = buffer.split_off(split + HEADER_TERMINATOR.len());

        if let Some(len) = request.content_length()? {
            while body.len() < len {
                let read = read_chunk(reader, &mut chunk)?;
                if read == 0 {
                    return Err(RequestError::Truncated);
                }
                body.extend_from_slice(&chunk[..read]);
            }
            body.truncate(len);
        } else if body.len() > MAX_BODY_BYTES {
            return Err(RequestError::BodyTooLarge(MAX_BODY_BYTES));
        }

        request.body = body;
        Ok(request)
    }

    fn content_length(&self) -> Result<Option<usize>, RequestError> {
        let Some(value) = self.header("Content-Length") else {
            return Ok(None);
        };
        let len = value
            .parse::<usize>()
            .map_err(|_| RequestError::ContentLength)?;
        if len > MAX_BODY_BYTES {
            return Err(RequestError::BodyTooLarge(MAX_BODY_BYTES));
        }
        Ok(Some(len))
    }
}

fn read_chunk<R: Read>(reader: &mut R, chunk: &mut [u8]) -> Result<usize, RequestError> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(RequestError::Io(err.to_string())),
        }
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_head(head: &[u8]) -> Result<HttpRequest, RequestError> {
    let head = std::str::from_utf8(head).map_err(|_| RequestError::Encoding)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(RequestError::RequestLine)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::RequestLine);
    };

    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(RequestError::RequestLine);
    }
    if !(target.starts_with('/') || target == "*") {
        return Err(RequestError::RequestLine);
    }
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(RequestError::RequestLine);
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(RequestError::Header)?;
        if name.is_empty()
            || name
                .bytes()
                .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
        {
            return Err(RequestError::Header);
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body: Vec::new(),
    })
}

/// Split an `application/x-www-form-urlencoded` body into raw (undecoded) pairs.
pub fn parse_form(body: &str) -> Result<Vec<(&str, &str)>, RequestError> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .filter(|(key, value)| !key.is_empty() && !value.contains('='))
                .ok_or_else(|| RequestError::FormPair(pair.to_string()))
        })
        .collect()
}

pub fn percent_decode(value: &str) -> Result<String, RequestError> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => {
                let byte = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| RequestError::Escape(value.to_string()))?;
                decoded.push(byte);
                i += 3;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| RequestError::Encoding)
}

pub fn write_response<W: Write>(
    writer: &mut W,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    writer.write_all(body.as_bytes())?;
    writer.flush()
}
