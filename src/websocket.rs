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

use crate::buffer::VECTORED_MAX;
use crate::io::{AsyncRead, AsyncWrite};
use crate::stream::Stream;
use arrayvec::{ArrayString, ArrayVec};
use log::debug;
use sha1::{Digest, Sha1};
use std::io;
use std::rc::Rc;
use std::str;

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// 1 byte flags + 9 bytes payload size + 4 bytes mask
pub const HEADER_SIZE_MAX: usize = 14;

// base64 of a sha-1 digest
pub const ACCEPT_SIZE_MAX: usize = 28;

const EXT16_MARKER: u8 = 126;
const EXT64_MARKER: u8 = 127;
const EXT16_MIN: usize = 126;
const EXT64_MIN: usize = 65536;

pub const OPCODE_CONTINUATION: u8 = 0;
pub const OPCODE_TEXT: u8 = 1;
pub const OPCODE_BINARY: u8 = 2;
pub const OPCODE_CLOSE: u8 = 8;
pub const OPCODE_PING: u8 = 9;
pub const OPCODE_PONG: u8 = 10;

pub const CONTROL_FRAME_PAYLOAD_MAX: usize = 125;

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct FrameInfo {
    pub fin: bool,
    pub opcode: u8,
    pub mask: Option<[u8; 4]>,
    pub payload_offset: usize,
    pub payload_size: usize,
}

fn header_size(payload_size: usize, masked: bool) -> usize {
    let size = if payload_size < EXT16_MIN {
        2
    } else if payload_size < EXT64_MIN {
        2 + 2
    } else {
        2 + 8
    };

    if masked {
        size + 4
    } else {
        size
    }
}

pub fn read_header(buf: &[u8]) -> Result<FrameInfo, io::Error> {
    if buf.len() < 2 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }

    let len7 = buf[1] & 0x7f;

    let (mut hsize, psize) = if len7 < EXT16_MARKER {
        (2, len7 as usize)
    } else if len7 == EXT16_MARKER {
        if buf.len() < 2 + 2 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        let mut arr = [0; 2];
        arr.copy_from_slice(&buf[2..4]);
        (4, u16::from_be_bytes(arr) as usize)
    } else {
        if buf.len() < 2 + 8 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        let mut arr = [0; 8];
        arr.copy_from_slice(&buf[2..10]);
        (10, u64::from_be_bytes(arr) as usize)
    };

    let mask = if buf[1] & 0x80 != 0 {
        if buf.len() < hsize + 4 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        let mut mask = [0; 4];
        mask.copy_from_slice(&buf[hsize..(hsize + 4)]);
        hsize += 4;

        Some(mask)
    } else {
        None
    };

    Ok(FrameInfo {
        fin: buf[0] & 0x80 != 0,
        opcode: buf[0] & 0x0f,
        mask,
        payload_offset: hsize,
        payload_size: psize,
    })
}

// build a frame header using the smallest length encoding. returns the
// payload offset
pub fn write_header(
    fin: bool,
    opcode: u8,
    payload_size: usize,
    mask: Option<[u8; 4]>,
    buf: &mut [u8],
) -> Result<usize, io::Error> {
    if buf.len() < header_size(payload_size, mask.is_some()) {
        return Err(io::Error::from(io::ErrorKind::WriteZero));
    }

    let mut b0 = opcode & 0x0f;
    if fin {
        b0 |= 0x80;
    }

    buf[0] = b0;

    let hsize = if payload_size < EXT16_MIN {
        buf[1] = payload_size as u8;
        2
    } else if payload_size < EXT64_MIN {
        buf[1] = EXT16_MARKER;
        buf[2..4].copy_from_slice(&(payload_size as u16).to_be_bytes());
        4
    } else {
        buf[1] = EXT64_MARKER;
        buf[2..10].copy_from_slice(&(payload_size as u64).to_be_bytes());
        10
    };

    if let Some(mask) = mask {
        buf[1] |= 0x80;
        buf[hsize..(hsize + 4)].copy_from_slice(&mask);
        Ok(hsize + 4)
    } else {
        Ok(hsize)
    }
}

fn apply_mask(buf: &mut [u8], mask: [u8; 4], offset: usize) {
    for (i, c) in buf.iter_mut().enumerate() {
        *c ^= mask[(offset + i) % 4];
    }
}

/// Computes the `Sec-WebSocket-Accept` token for a client's
/// `Sec-WebSocket-Key` value.
pub fn accept_key(key: &[u8]) -> ArrayString<ACCEPT_SIZE_MAX> {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();

    let mut output = [0; ACCEPT_SIZE_MAX];

    let size = base64::encode_config_slice(&digest, base64::STANDARD, &mut output);

    let output = str::from_utf8(&output[..size]).unwrap();

    ArrayString::from(output).unwrap()
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    // control frames (close, ping, pong) must carry a small payload and
    // must not be fragmented
    #[error("control frame too large or fragmented")]
    InvalidControlFrame,
}

#[derive(Debug, PartialEq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Frames and unframes RFC 6455 traffic on a stream, after the HTTP
/// upgrade response has been sent and the connection handed off.
pub struct FrameCodec<S> {
    stream: Rc<Stream<S>>,
}

impl<S: AsyncRead + AsyncWrite> FrameCodec<S> {
    pub fn new(stream: Rc<Stream<S>>) -> Self {
        Self { stream }
    }

    /// Sends one frame, header and payload in a single scatter-gather
    /// submission. Server-originated frames are unmasked.
    pub async fn send_frame(
        &self,
        opcode: u8,
        payload: &[&[u8]],
        fin: bool,
    ) -> Result<usize, Error> {
        assert!(payload.len() < VECTORED_MAX);

        let mut payload_size = 0;
        for buf in payload {
            payload_size += buf.len();
        }

        if opcode & 0x08 != 0 && (payload_size > CONTROL_FRAME_PAYLOAD_MAX || !fin) {
            return Err(Error::InvalidControlFrame);
        }

        let mut header = [0; HEADER_SIZE_MAX];
        let header_len = write_header(fin, opcode, payload_size, None, &mut header)?;

        let mut out: ArrayVec<&[u8], VECTORED_MAX> = ArrayVec::new();

        out.push(&header[..header_len]);

        for buf in payload {
            out.push(buf);
        }

        self.stream.write_all(out.as_slice()).await?;

        Ok(payload_size)
    }

    /// Receives one frame: the two-byte prefix, then the extended
    /// length and masking key, then the payload, unmasked if needed.
    pub async fn recv_frame(&self) -> Result<Frame, Error> {
        let mut header = [0; HEADER_SIZE_MAX];

        self.stream.read_exact(&mut header[..2]).await?;

        let len7 = header[1] & 0x7f;

        let ext_len = if len7 == EXT16_MARKER {
            2
        } else if len7 == EXT64_MARKER {
            8
        } else {
            0
        };

        let mask_len = if header[1] & 0x80 != 0 { 4 } else { 0 };

        let rest = ext_len + mask_len;

        if rest > 0 {
            self.stream.read_exact(&mut header[2..(2 + rest)]).await?;
        }

        let fi = read_header(&header[..(2 + rest)])?;

        let mut payload = vec![0; fi.payload_size];

        self.stream.read_exact(&mut payload).await?;

        if let Some(mask) = fi.mask {
            apply_mask(&mut payload, mask, 0);
        }

        Ok(Frame {
            fin: fi.fin,
            opcode: fi.opcode,
            payload,
        })
    }

    /// Receives frames continuously, invoking the handler once per
    /// frame, until a close frame is observed or the stream fails. A
    /// read error is surfaced to the handler exactly once and ends the
    /// loop. No reciprocating close is sent automatically; the handler
    /// is free to send one before returning.
    pub async fn receive_frames<F>(&self, mut handler: F)
    where
        F: FnMut(Result<Frame, Error>),
    {
        loop {
            match self.recv_frame().await {
                Ok(frame) => {
                    let close = frame.opcode == OPCODE_CLOSE;

                    handler(Ok(frame));

                    if close {
                        debug!("close frame received");
                        break;
                    }
                }
                Err(e) => {
                    handler(Err(e));
                    break;
                }
            }
        }
    }
}
