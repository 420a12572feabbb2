/*
 * Copyright (C) 2025 the transom authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::http1::error::Error;
use crate::http1::headers::HeaderMap;
use crate::http1::uri::{parse_query, percent_decode, split_target, Query};
use std::io::Write;
use std::str;
use time::macros::format_description;
use time::OffsetDateTime;

// some reasonable number
pub const HEADERS_MAX: usize = 64;

// HTTP token characters, for the request method
fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"-!#$%^&*+._'`|~".contains(&c)
}

/// How the request body is framed on the wire.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

/// Parsed request metadata, produced before any body byte is consumed.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub version: String,
    pub resource: String,
    pub path: String,
    pub fragment: String,
    pub query: Query,
    pub headers: HeaderMap,
    pub framing: BodyFraming,
}

impl RequestHead {
    /// Parses a complete head (request line through the blank line) from
    /// the front of buf, returning the head and the number of bytes
    /// consumed. The caller must have accumulated the full head
    /// (through `"\r\n\r\n"`) first.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), Error> {
        let line_end = find(buf, b"\r\n").ok_or(Error::InvalidRequestLine)?;

        let (method, resource, version) = parse_request_line(&buf[..line_end])?;

        let mut headers = HeaderMap::new();
        let headers_len = parse_header_block(&buf[(line_end + 2)..], &mut headers)?;

        let framing = body_framing(&headers)?;

        let (path, query, fragment) = split_target(&resource);

        let head = Self {
            method,
            version,
            path: percent_decode(path),
            fragment: percent_decode(fragment),
            query: parse_query(query),
            resource,
            headers,
            framing,
        };

        Ok((head, line_end + 2 + headers_len))
    }
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

// parse `METHOD SP REQUEST-TARGET SP HTTP-VERSION`
fn parse_request_line(line: &[u8]) -> Result<(String, String, String), Error> {
    let line = str::from_utf8(line).map_err(|_| Error::InvalidRequestLine)?;

    let mut parts = line.split(' ');

    let method = parts.next().ok_or(Error::InvalidRequestLine)?;
    let resource = parts.next().ok_or(Error::InvalidRequestLine)?;
    let version = parts.next().ok_or(Error::InvalidRequestLine)?;

    if parts.next().is_some() {
        return Err(Error::InvalidRequestLine);
    }

    if method.is_empty() || !method.bytes().all(is_token_char) {
        return Err(Error::InvalidRequestLine);
    }

    if resource.is_empty() {
        return Err(Error::InvalidRequestLine);
    }

    let v = version.as_bytes();

    if v.len() != 8
        || &v[..5] != b"HTTP/"
        || !v[5].is_ascii_digit()
        || v[6] != b'.'
        || !v[7].is_ascii_digit()
    {
        return Err(Error::InvalidRequestLine);
    }

    if version != "HTTP/1.1" {
        return Err(Error::UnsupportedHttpVersion);
    }

    Ok((
        method.to_string(),
        resource.to_string(),
        version.to_string(),
    ))
}

// parse a header block (through its terminating blank line) into the
// map, coalescing repeated names. returns the number of bytes consumed
fn parse_header_block(buf: &[u8], map: &mut HeaderMap) -> Result<usize, Error> {
    let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];

    match httparse::parse_headers(buf, &mut headers) {
        Ok(httparse::Status::Complete((pos, parsed))) => {
            for h in parsed {
                let value = str::from_utf8(h.value).map_err(|_| Error::InvalidRequestHeader)?;

                map.add(h.name, value.trim_start());
            }

            Ok(pos)
        }
        Ok(httparse::Status::Partial) => Err(Error::InvalidRequestHeader),
        Err(_) => Err(Error::InvalidRequestHeader),
    }
}

// the body framing decision: Transfer-Encoding other than "identity"
// means chunked and takes precedence over Content-Length
fn body_framing(headers: &HeaderMap) -> Result<BodyFraming, Error> {
    let mut framing = BodyFraming::None;

    if let Some(value) = headers.get("Content-Length") {
        framing = BodyFraming::Length(parse_content_length(value)?);
    }

    if let Some(value) = headers.get("Transfer-Encoding") {
        if value != "identity" {
            framing = BodyFraming::Chunked;
        }
    }

    Ok(framing)
}

/// Whether a comma-separated header value contains the given parameter
/// (e.g. `Connection: keep-alive, Upgrade`).
pub fn header_contains_param(value: &str, param: &str, ignore_case: bool) -> bool {
    for part in value.split(',') {
        let part = part.trim();

        if ignore_case {
            if part.eq_ignore_ascii_case(param) {
                return true;
            }
        } else if part == param {
            return true;
        }
    }

    false
}

// digits only, no sign, no leading whitespace
fn parse_content_length(value: &str) -> Result<usize, Error> {
    if value.is_empty() || !value.bytes().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidContentLength);
    }

    value.parse().map_err(|_| Error::InvalidContentLength)
}

/// Parses a chunk-size line (hex length, extensions after `;` ignored)
/// from the front of buf. Returns the bytes consumed (through the CRLF)
/// and the chunk size, or None if the line is not complete yet.
pub fn parse_chunk_header(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    match httparse::parse_chunk_size(buf) {
        Ok(httparse::Status::Complete((pos, size))) => {
            let size = usize::try_from(size).map_err(|_| Error::InvalidChunkLength)?;

            Ok(Some((pos, size)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(Error::InvalidChunkLength),
    }
}

/// Parses a trailer block (possibly empty, through its terminating
/// CRLF) from the front of buf. Returns the bytes consumed and the
/// trailers, or None if the block is not complete yet.
pub fn parse_trailer_block(buf: &[u8]) -> Result<Option<(usize, HeaderMap)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; HEADERS_MAX];

    match httparse::parse_headers(buf, &mut headers) {
        Ok(httparse::Status::Complete((pos, parsed))) => {
            let mut map = HeaderMap::new();

            for h in parsed {
                let value = str::from_utf8(h.value).map_err(|_| Error::InvalidRequestHeader)?;

                map.add(h.name, value.trim_start());
            }

            Ok(Some((pos, map)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(Error::InvalidRequestHeader),
    }
}

/// The fixed reason-phrase table. Unknown codes get an empty reason,
/// which is still valid status-line syntax.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

// RFC 1123 date, always UTC
pub fn http_date(t: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );

    t.format(&format).expect("formatting Date header")
}

/// Response-side encoder state for one exchange. The chunked-vs-fixed
/// decision is made when the prologue is emitted and locked from then
/// on.
pub struct ResponseState {
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub bytes_written: usize,
    pub prologue_sent: bool,
    pub chunked: bool,
    pub body_allowed: bool,
    pub ended: bool,
}

#[allow(clippy::new_without_default)]
impl ResponseState {
    pub fn new() -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            bytes_written: 0,
            prologue_sent: false,
            chunked: false,
            body_allowed: false,
            ended: false,
        }
    }

    /// Assembles the wire prefix and suffix surrounding a body write of
    /// `size` bytes: the prologue if this is the first write, plus
    /// chunk framing when chunked. A zero-size write is the terminal
    /// write; when chunked it produces the empty chunk and the trailer
    /// block. The returned flag says whether the body bytes themselves
    /// belong on the wire (they don't for HEAD and no-body statuses).
    pub fn prepare_write(
        &mut self,
        size: usize,
        head_request: bool,
        now: OffsetDateTime,
    ) -> (Vec<u8>, Vec<u8>) {
        assert!(!self.ended, "write after response completed");

        let status = self.status.expect("response status must be set");

        let mut prefix = Vec::new();
        let mut suffix = Vec::new();

        if !self.prologue_sent {
            if !self.headers.contains("Date") {
                self.headers.set("Date", &http_date(now));
            }

            self.body_allowed =
                status >= 200 && status != 204 && status != 304 && !head_request;

            if self.body_allowed {
                let explicit_chunked = match self.headers.get("Transfer-Encoding") {
                    Some(value) => value != "identity",
                    None => false,
                };

                if explicit_chunked {
                    self.chunked = true;
                    self.headers.remove("Content-Length");
                } else if !self.headers.contains("Content-Length") {
                    self.chunked = true;
                    self.headers.set("Transfer-Encoding", "chunked");
                }
            }

            write!(prefix, "HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).unwrap();

            for (name, value) in self.headers.iter() {
                write!(prefix, "{}: {}\r\n", name, value).unwrap();
            }

            prefix.extend_from_slice(b"\r\n");

            self.prologue_sent = true;
        }

        if self.chunked {
            if size > 0 {
                write!(prefix, "{:x}\r\n", size).unwrap();
                suffix.extend_from_slice(b"\r\n");
            } else {
                // terminal chunk, then the trailer block
                prefix.extend_from_slice(b"0\r\n");

                for (name, value) in self.trailers.iter() {
                    write!(suffix, "{}: {}\r\n", name, value).unwrap();
                }

                suffix.extend_from_slice(b"\r\n");

                self.ended = true;
            }
        } else if size == 0 {
            self.ended = true;
        }

        (prefix, suffix)
    }

    /// The flush for an informational (1xx) response: status line and
    /// current headers only. No Date insertion, no framing decision —
    /// a final status and a second finish() are still expected.
    pub fn informational_prologue(&self) -> Vec<u8> {
        let status = self.status.expect("response status must be set");

        let mut out = Vec::new();

        write!(out, "HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).unwrap();

        for (name, value) in self.headers.iter() {
            write!(out, "{}: {}\r\n", name, value).unwrap();
        }

        out.extend_from_slice(b"\r\n");

        out
    }
}
