//! Session Store
//!
//! Handshake state lives in the caller's per-user session between the
//! redirect and the callback. One in-flight handshake per session and
//! provider is assumed.

use std::collections::HashMap;

pub trait SessionStore: Send {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String);

    /// Remove and return a value.
    fn take(&mut self, key: &str) -> Option<String>;
}

/// In-memory session, for tests and single-user tools such as the CLI.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: HashMap<String, String>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}
