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

//! Embeddable asynchronous HTTP/1.1 server library with a companion
//! WebSocket framing layer.
//!
//! The host application owns the listener and the event loop; this
//! crate takes a connected duplex byte stream (wrapped in
//! [`Stream`]), decodes requests and frames responses on it, and hands
//! each request/response pair to a handler as an
//! [`Exchange`](http1::Exchange) — a read/write byte stream with the
//! protocol framing handled underneath. After a successful upgrade
//! response, the same stream can be handed to
//! [`FrameCodec`](websocket::FrameCodec) for WebSocket traffic.

pub mod buffer;
pub mod http1;
pub mod io;
pub mod stream;
pub mod websocket;

pub use buffer::LineBuffer;
pub use io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Cancel};
pub use stream::Stream;
