//! Throttle keys.

use std::fmt;

/// The logical identity of an event: its type and subject, `event:subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey(String);

impl ThrottleKey {
    /// Builds a key from an event type and a subject identifier.
    pub fn new(event: &str, subject: impl fmt::Display) -> Self {
        Self(format!("{event}:{subject}"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ThrottleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
