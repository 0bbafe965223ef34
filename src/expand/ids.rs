// src/expand/ids.rs

use std::collections::HashSet;

/// Lowercase `key` and replace everything outside `[a-z0-9_]` by `_`.
pub fn sanitize_id(key: &str) -> String {
    let id: String = key
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() { "item".to_string() } else { id }
}

/// Hands out unique ids: the sanitized key, then `_2`, `_3`, ... on collision.
#[derive(Debug, Default)]
pub struct IdAllocator {
    taken: HashSet<String>,
}

impl IdAllocator {
    /// `reserved` ids are never handed out.
    pub fn new<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: reserved.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allocate(&mut self, key: &str) -> String {
        let base = sanitize_id(key);
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
