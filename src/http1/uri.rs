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

use std::collections::BTreeMap;

/// Decoded query parameters. Keys are unique; when a parameter repeats,
/// the later value wins.
pub type Query = BTreeMap<String, String>;

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decodes percent-encoding: `+` maps to space and `%HH` to the byte
/// with hex value HH. Invalid escapes are left verbatim.
pub fn percent_decode(s: &str) -> String {
    let src = s.as_bytes();
    let mut out = Vec::with_capacity(src.len());

    let mut pos = 0;
    while pos < src.len() {
        match src[pos] {
            b'+' => {
                out.push(b' ');
                pos += 1;
            }
            b'%' => {
                match (
                    src.get(pos + 1).copied().and_then(hex_value),
                    src.get(pos + 2).copied().and_then(hex_value),
                ) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        pos += 3;
                    }
                    _ => {
                        out.push(b'%');
                        pos += 1;
                    }
                }
            }
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encodes a string so that `percent_decode` recovers it:
/// space becomes `+`; unreserved characters pass through; everything
/// else becomes `%HH`.
pub fn percent_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(s.len());

    for &c in s.as_bytes() {
        match c {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(c as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(HEX[(c >> 4) as usize] as char);
                out.push(HEX[(c & 0x0f) as usize] as char);
            }
        }
    }

    out
}

/// Parses a query string into a mapping of decoded names to decoded
/// values. A parameter without `=` is ignored; `"foo="` yields an
/// empty-string value; a repeated name keeps the last value.
pub fn parse_query(s: &str) -> Query {
    let mut query = Query::new();

    for param in s.split('&') {
        if let Some(pos) = param.find('=') {
            query.insert(
                percent_decode(&param[..pos]),
                percent_decode(&param[(pos + 1)..]),
            );
        }
    }

    query
}

/// Encodes a mapping back into a query string, the inverse of
/// `parse_query` for NUL-free UTF-8 keys and values.
pub fn encode_query(query: &Query) -> String {
    let mut out = String::new();

    for (name, value) in query {
        if !out.is_empty() {
            out.push('&');
        }

        out.push_str(&percent_encode(name));
        out.push('=');
        out.push_str(&percent_encode(value));
    }

    out
}

// split a request-target into (path, query, fragment) per the grammar
// path [ "?" query ] [ "#" fragment ], where the query never contains
// "#". query and fragment are returned still encoded
pub fn split_target(target: &str) -> (&str, &str, &str) {
    let (rest, fragment) = match target.find('#') {
        Some(pos) => (&target[..pos], &target[(pos + 1)..]),
        None => (target, ""),
    };

    let (path, query) = match rest.find('?') {
        Some(pos) => (&rest[..pos], &rest[(pos + 1)..]),
        None => (rest, ""),
    };

    (path, query, fragment)
}
