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

use std::cmp::Ordering;

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    let a = a.bytes().map(|c| c.to_ascii_lowercase());
    let b = b.bytes().map(|c| c.to_ascii_lowercase());

    a.cmp(b)
}

/// Header container with case-insensitive names.
///
/// Semantically a multimap: inserting a name that is already present
/// coalesces the values with `", "` in receipt order. The name's case
/// is preserved as first inserted; iteration (and thus wire emission)
/// is in case-insensitive lexicographic order, not insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    // sorted by case-insensitive name
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, _)| cmp_ignore_case(k, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.position(name) {
            Ok(pos) => Some(self.entries[pos].1.as_str()),
            Err(_) => None,
        }
    }

    /// Inserts a header, coalescing with any existing value under the
    /// same case-insensitive name.
    pub fn add(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Ok(pos) => {
                let existing = &mut self.entries[pos].1;
                existing.push_str(", ");
                existing.push_str(value);
            }
            Err(pos) => {
                self.entries
                    .insert(pos, (name.to_string(), value.to_string()));
            }
        }
    }

    /// Inserts a header, replacing any existing value.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Ok(pos) => self.entries[pos].1 = value.to_string(),
            Err(pos) => {
                self.entries
                    .insert(pos, (name.to_string(), value.to_string()));
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        match self.position(name) {
            Ok(pos) => Some(self.entries.remove(pos).1),
            Err(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
