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

mod error;
mod exchange;
mod headers;
mod protocol;
mod uri;

pub use error::Error;
pub use exchange::Exchange;
pub use headers::HeaderMap;
pub use protocol::{header_contains_param, reason_phrase, BodyFraming, RequestHead};
pub use uri::{encode_query, parse_query, percent_decode, percent_encode, Query};
