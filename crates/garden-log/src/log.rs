//! The replicated log: a grow-only set of messages.
//!
//! Membership is the source of truth; the add order is kept only so the
//! persisted blob replays in a natural order. Nothing downstream may depend
//! on it for correctness.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::codec::{decode, Message, MessageId};
use crate::error::{HydrationError, Result};

/// Outcome of loading a persisted blob.
#[derive(Debug, Default)]
pub struct HydrateReport {
    /// Lines that added a new message.
    pub loaded: usize,
    /// Lines that decoded to a message already in the log.
    pub duplicates: usize,
    /// Lines that could not be decoded.
    pub errors: Vec<HydrationError>,
}

impl HydrateReport {
    /// Whether every non-blank line loaded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Grow-only set of messages (G-Set CRDT). Merge is union.
#[derive(Debug, Clone, Default)]
pub struct ReplicatedLog {
    /// Members in add order.
    entries: Vec<Message>,
    /// Ids of every member, for dedup.
    seen: HashSet<MessageId>,
}

impl ReplicatedLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message unless it is already present.
    ///
    /// Returns `true` if the log changed.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id()) {
            trace!(id = %message.id().short(), "Duplicate message ignored");
            return false;
        }
        trace!(id = %message.id().short(), kind = %message.kind(), "Appended message");
        self.entries.push(message);
        true
    }

    /// Decode and append one encoded message.
    pub fn append_line(&mut self, line: &str) -> Result<bool> {
        Ok(self.append(decode(line)?))
    }

    /// Whether a message with this id is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Look up a member by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        if !self.contains(id) {
            return None;
        }
        self.entries.iter().find(|m| m.id() == *id)
    }

    /// Current members in add order.
    pub fn snapshot(&self) -> &[Message] {
        &self.entries
    }

    /// Iterate over members in add order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded members in add order.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|m| m.encoded().to_string()).collect()
    }

    /// Newline-delimited encoding of the log, for persistence.
    pub fn to_blob(&self) -> String {
        let mut blob = String::new();
        for message in &self.entries {
            blob.push_str(message.encoded());
            blob.push('\n');
        }
        blob
    }

    /// Load a persisted blob, appending every line that decodes.
    ///
    /// Accepts `\n` and `\r\n` separators and skips blank lines. A bad line
    /// is reported and skipped; the rest of the blob still loads.
    pub fn hydrate(&mut self, blob: &str) -> HydrateReport {
        let mut report = HydrateReport::default();

        for (index, line) in blob.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match decode(line) {
                Ok(message) => {
                    if self.append(message) {
                        report.loaded += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(source) => {
                    let error = HydrationError {
                        line: index + 1,
                        source,
                    };
                    warn!("Skipping persisted entry: {}", error);
                    report.errors.push(error);
                }
            }
        }

        debug!(
            loaded = report.loaded,
            duplicates = report.duplicates,
            errors = report.errors.len(),
            "Hydrated log"
        );
        report
    }

    /// Union another log into this one. Returns the number of new members.
    pub fn merge(&mut self, other: &ReplicatedLog) -> usize {
        other
            .iter()
            .filter(|m| self.append((*m).clone()))
            .count()
    }
}

impl Extend<Message> for ReplicatedLog {
    fn extend<I: IntoIterator<Item = Message>>(&mut self, iter: I) {
        for message in iter {
            self.append(message);
        }
    }
}

impl FromIterator<Message> for ReplicatedLog {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut log = Self::new();
        log.extend(iter);
        log
    }
}
