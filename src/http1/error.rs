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

use std::io;

/// The closed set of ways an exchange can fail. Parse errors surface on
/// the first operation that triggers decoding; I/O errors from the
/// wrapped stream pass through verbatim and are never reclassified.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("invalid request header")]
    InvalidRequestHeader,

    #[error("unsupported http version")]
    UnsupportedHttpVersion,

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("invalid chunk length")]
    InvalidChunkLength,

    #[error("invalid chunk delimiter")]
    InvalidChunkDelimiter,

    /// A body read requested at least one byte but the request body is
    /// exhausted.
    #[error("end of stream")]
    EndOfStream,

    #[error(transparent)]
    Io(#[from] io::Error),
}
