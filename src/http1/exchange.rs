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

#![allow(clippy::await_holding_refcell_ref)]

use crate::buffer::{LineBuffer, VECTORED_MAX};
use crate::http1::error::Error;
use crate::http1::headers::HeaderMap;
use crate::http1::protocol::{self, BodyFraming, RequestHead, ResponseState};
use crate::http1::uri::Query;
use crate::io::{AsyncRead, AsyncWrite};
use crate::stream::Stream;
use arrayvec::ArrayVec;
use log::{debug, warn};
use std::cell::{Cell, Ref, RefCell};
use std::cmp;
use std::io;
use std::rc::Rc;
use time::OffsetDateTime;

struct RequestState {
    head: RequestHead,
    bytes_remaining: usize,
    chunks_pending: bool,
    trailers: HeaderMap,
}

/// One request/response pair on a connection.
///
/// Handlers read the request body and write the response body through
/// this object with ordinary byte-stream operations; request parsing,
/// response framing and the keep-alive bookkeeping happen underneath.
/// The object is shared by `Rc` and interior-mutable, so a handler can
/// hold it across suspension points.
///
/// A new exchange may be constructed on the same stream once the
/// previous one has completed `finish()` — at that point any body
/// remainder has been drained and over-read bytes returned to the
/// stream, so the next request parses from a clean position.
pub struct Exchange<S: AsyncRead + AsyncWrite> {
    stream: Rc<Stream<S>>,
    line_buf: RefCell<LineBuffer>,
    request: RefCell<Option<RequestState>>,
    response: RefCell<ResponseState>,
    finished: Cell<bool>,
}

impl<S: AsyncRead + AsyncWrite> Exchange<S> {
    pub fn new(stream: Rc<Stream<S>>) -> Rc<Self> {
        Rc::new(Self {
            stream,
            line_buf: RefCell::new(LineBuffer::new()),
            request: RefCell::new(None),
            response: RefCell::new(ResponseState::new()),
            finished: Cell::new(false),
        })
    }

    /// Runs the request decoder up to the point where body bytes (if
    /// any) are about to be read. Idempotent; the first read (even a
    /// zero-length probe) triggers it implicitly. Hosts typically call
    /// it once and dispatch to a handler with the metadata available.
    pub async fn create(&self) -> Result<(), Error> {
        if self.request.borrow().is_some() {
            return Ok(());
        }

        // the whole head usually arrives in one read, so load through
        // the end of the header block in a single pass
        {
            let buf = &mut *self.line_buf.borrow_mut();
            self.stream.read_until(buf, b"\r\n\r\n").await?;
        }

        let (head, consumed) = {
            let buf = self.line_buf.borrow();

            match RequestHead::parse(buf.data()) {
                Ok(ret) => ret,
                Err(e) => {
                    warn!("request decode failed: {}", e);
                    return Err(e);
                }
            }
        };

        self.line_buf.borrow_mut().consume(consumed);

        debug!("request: {} {}", head.method, head.resource);

        let (bytes_remaining, chunks_pending) = match head.framing {
            BodyFraming::None => (0, false),
            BodyFraming::Length(size) => (size, false),
            BodyFraming::Chunked => (0, true),
        };

        *self.request.borrow_mut() = Some(RequestState {
            head,
            bytes_remaining,
            chunks_pending,
            trailers: HeaderMap::new(),
        });

        if chunks_pending {
            self.read_chunk_header().await?;
        }

        Ok(())
    }

    fn request_state(&self) -> Ref<'_, RequestState> {
        Ref::map(self.request.borrow(), |r| {
            r.as_ref().expect("request not decoded; call create() first")
        })
    }

    pub fn method(&self) -> Ref<'_, str> {
        Ref::map(self.request_state(), |r| r.head.method.as_str())
    }

    pub fn version(&self) -> Ref<'_, str> {
        Ref::map(self.request_state(), |r| r.head.version.as_str())
    }

    pub fn resource(&self) -> Ref<'_, str> {
        Ref::map(self.request_state(), |r| r.head.resource.as_str())
    }

    pub fn path(&self) -> Ref<'_, str> {
        Ref::map(self.request_state(), |r| r.head.path.as_str())
    }

    pub fn fragment(&self) -> Ref<'_, str> {
        Ref::map(self.request_state(), |r| r.head.fragment.as_str())
    }

    pub fn query(&self) -> Ref<'_, Query> {
        Ref::map(self.request_state(), |r| &r.head.query)
    }

    pub fn headers(&self) -> Ref<'_, HeaderMap> {
        Ref::map(self.request_state(), |r| &r.head.headers)
    }

    /// Convenience lookup of one request header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.request_state().head.headers.get(name).map(str::to_string)
    }

    /// Request trailers. Populated once the chunked body has been read
    /// to the end (or drained by `finish()`).
    pub fn trailers(&self) -> Ref<'_, HeaderMap> {
        Ref::map(self.request_state(), |r| &r.trailers)
    }

    /// Whether the client asked for a `100 Continue` before sending the
    /// body. The handler performs the dance itself: set status 100,
    /// `finish()`, then set the final status and finish again.
    pub fn expects_continue(&self) -> bool {
        let req = self.request_state();

        if req.head.framing == BodyFraming::None {
            return false;
        }

        match req.head.headers.get("Expect") {
            Some(value) => protocol::header_contains_param(value, "100-continue", false),
            None => false,
        }
    }

    /// Whether the client permits reusing the connection for another
    /// exchange after this one.
    pub fn is_persistent(&self) -> bool {
        match self.request_state().head.headers.get("Connection") {
            Some(value) => !protocol::header_contains_param(value, "close", false),
            None => true,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response.borrow().status
    }

    pub fn set_status(&self, code: u16) {
        let resp = &mut *self.response.borrow_mut();

        assert!(!resp.prologue_sent, "status locked once the prologue is sent");

        resp.status = Some(code);
    }

    pub fn set_header(&self, name: &str, value: &str) {
        let resp = &mut *self.response.borrow_mut();

        assert!(
            !resp.prologue_sent,
            "headers locked once the prologue is sent"
        );

        resp.headers.set(name, value);
    }

    pub fn add_header(&self, name: &str, value: &str) {
        let resp = &mut *self.response.borrow_mut();

        assert!(
            !resp.prologue_sent,
            "headers locked once the prologue is sent"
        );

        resp.headers.add(name, value);
    }

    /// Sets a response trailer. Trailers ride the terminal chunk, so
    /// they are only meaningful for chunked responses and may be set
    /// until the terminal write.
    pub fn set_trailer(&self, name: &str, value: &str) {
        let resp = &mut *self.response.borrow_mut();

        assert!(!resp.ended, "trailers locked once the response completed");

        resp.trailers.set(name, value);
    }

    /// Reads some request body bytes. Returns `EndOfStream` once the
    /// body is exhausted and at least one byte was requested.
    pub async fn read_some(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.create().await?;

        if buf.is_empty() {
            return Ok(0);
        }

        let want = {
            let req = self.request_state();

            if req.bytes_remaining == 0 {
                debug_assert!(!req.chunks_pending);
                return Err(Error::EndOfStream);
            }

            cmp::min(buf.len(), req.bytes_remaining)
        };

        // body bytes over-read during header parsing come first
        let size = {
            let lb = &mut *self.line_buf.borrow_mut();

            if !lb.is_empty() {
                let size = cmp::min(want, lb.len());

                buf[..size].copy_from_slice(&lb.data()[..size]);
                lb.consume(size);

                size
            } else {
                0
            }
        };

        let size = if size > 0 {
            size
        } else {
            let size = self.stream.read_some(&mut buf[..want]).await?;

            if size == 0 {
                return Err(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }

            size
        };

        let chunk_exhausted = {
            let mut req = self.request.borrow_mut();
            let req = req.as_mut().unwrap();

            req.bytes_remaining -= size;
            req.bytes_remaining == 0 && req.chunks_pending
        };

        if chunk_exhausted {
            // position the decoder on the next chunk (or the trailers)
            // before handing the bytes to the caller
            self.read_chunk_delimiter().await?;
            self.read_chunk_header().await?;
        }

        Ok(size)
    }

    /// Writes some response body bytes as one wire chunk (or verbatim
    /// for fixed-length responses). The first write emits the prologue;
    /// a zero-length write is the terminal write.
    ///
    /// Writing never triggers request decoding, so a handler can still
    /// respond (say, with a 400) when decoding failed.
    pub async fn write_some(&self, buf: &[u8]) -> Result<usize, Error> {
        self.write_body(buf).await
    }

    /// Completes the response. For a final (non-1xx) status this drains
    /// whatever is left of the request body, returns over-read bytes to
    /// the stream for the next exchange, emits the prologue if nothing
    /// was written (with a forced `Content-Length: 0`), and issues the
    /// terminal write. For a 1xx status it only flushes the status line
    /// and headers; the handler then sets a final status and calls
    /// `finish()` again.
    pub async fn finish(&self) -> Result<(), Error> {
        assert!(!self.finished.get(), "finish() after exchange completed");

        let status = {
            self.response
                .borrow()
                .status
                .expect("response status must be set before finish()")
        };

        if status < 200 {
            let prologue = self.response.borrow().informational_prologue();

            self.stream.write_all(&[&prologue]).await.map_err(Error::Io)?;

            debug!("sent informational {}", status);

            return Ok(());
        }

        // position the connection for the next exchange. when decoding
        // never succeeded there is no framing to honor and the
        // connection is not reusable, so skip the drain
        if self.request.borrow().is_some() {
            if let Err(e) = self.drain_request().await {
                // an undrained connection can't be reused
                warn!("request drain failed: {}", e);
                return Err(e);
            }

            let remaining = self.line_buf.borrow_mut().take_remaining();

            if !remaining.is_empty() {
                self.stream.put_back(&remaining);
            }
        }

        {
            let resp = &mut *self.response.borrow_mut();

            // no body bytes were produced and the prologue hasn't gone
            // out: force an explicit empty length. an explicit
            // Transfer-Encoding still overrides this when the framing
            // decision runs
            if resp.bytes_written == 0 && !resp.prologue_sent {
                resp.headers.set("Content-Length", "0");
            }
        }

        let ended = self.response.borrow().ended;

        if !ended {
            self.write_body(b"").await?;
        }

        self.finished.set(true);

        debug!("response {} finished", status);

        Ok(())
    }

    /// The shared byte stream, for handing the connection off (for
    /// example to the WebSocket codec after a 101 response). Bytes
    /// over-read by this exchange are returned to the stream first.
    pub fn stream(&self) -> Rc<Stream<S>> {
        let remaining = self.line_buf.borrow_mut().take_remaining();

        if !remaining.is_empty() {
            self.stream.put_back(&remaining);
        }

        self.stream.clone()
    }

    async fn write_body(&self, buf: &[u8]) -> Result<usize, Error> {
        let head_request = {
            let req = self.request.borrow();

            match req.as_ref() {
                Some(req) => req.head.method == "HEAD",
                None => false,
            }
        };

        let (prefix, suffix, send_body) = {
            let resp = &mut *self.response.borrow_mut();

            let (prefix, suffix) =
                resp.prepare_write(buf.len(), head_request, OffsetDateTime::now_utc());

            (prefix, suffix, resp.body_allowed)
        };

        let mut out: ArrayVec<&[u8], VECTORED_MAX> = ArrayVec::new();

        if !prefix.is_empty() {
            out.push(&prefix);
        }

        if send_body && !buf.is_empty() {
            out.push(buf);
        }

        if !suffix.is_empty() {
            out.push(&suffix);
        }

        if !out.is_empty() {
            // a single serialized submission keeps the framing intact
            self.stream.write_all(out.as_slice()).await.map_err(Error::Io)?;
        }

        self.response.borrow_mut().bytes_written += buf.len();

        Ok(buf.len())
    }

    async fn drain_request(&self) -> Result<(), Error> {
        let mut scratch = [0; 8192];

        loop {
            match self.read_some(&mut scratch).await {
                Ok(_) => {}
                Err(Error::EndOfStream) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_chunk_delimiter(&self) -> Result<(), Error> {
        let line = {
            let buf = &mut *self.line_buf.borrow_mut();

            self.stream.read_until(buf, b"\r\n").await?;

            buf.get_line()
        };

        if !line.is_empty() {
            return Err(Error::InvalidChunkDelimiter);
        }

        Ok(())
    }

    async fn read_chunk_header(&self) -> Result<(), Error> {
        loop {
            {
                let buf = &mut *self.line_buf.borrow_mut();
                self.stream.read_until(buf, b"\r\n").await?;
            }

            let parsed = protocol::parse_chunk_header(self.line_buf.borrow().data())?;

            let size = match parsed {
                Some((consumed, size)) => {
                    self.line_buf.borrow_mut().consume(consumed);
                    size
                }
                None => {
                    // a quoted chunk extension can swallow the CRLF we
                    // loaded; keep reading until the line completes
                    let buf = &mut *self.line_buf.borrow_mut();
                    self.stream.read_more(buf).await?;
                    continue;
                }
            };

            if size == 0 {
                let trailers = self.read_trailers().await?;

                let mut req = self.request.borrow_mut();
                let req = req.as_mut().unwrap();

                req.trailers = trailers;
                req.chunks_pending = false;
                req.bytes_remaining = 0;
            } else {
                let mut req = self.request.borrow_mut();
                let req = req.as_mut().unwrap();

                req.bytes_remaining = size;
            }

            return Ok(());
        }
    }

    async fn read_trailers(&self) -> Result<HeaderMap, Error> {
        loop {
            let parsed = protocol::parse_trailer_block(self.line_buf.borrow().data())?;

            if let Some((consumed, map)) = parsed {
                self.line_buf.borrow_mut().consume(consumed);
                return Ok(map);
            }

            let buf = &mut *self.line_buf.borrow_mut();
            self.stream.read_more(buf).await?;
        }
    }
}
