//! Fire-and-forget operator notifications.
//!
//! The engine pushes [`Notification`]s into an unbounded channel; the front
//! end drains it. Sending never blocks and never fails the caller: if the
//! receiving side is gone the message is logged and dropped.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{Item, VenueId};

/// Maximum characters per outgoing message chunk.
pub const MAX_MESSAGE_CHARS: usize = 3500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Started,
    Found,
    PurchaseAttempted,
    PurchaseFailed,
    AuthRefreshed,
    /// `will_retry` distinguishes recoverable errors from give-ups.
    Error { will_retry: bool },
    Stopped,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub venue: Option<VenueId>,
    pub kind: NotificationKind,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.venue {
            // Pad to the widest tag so columns line up
            Some(venue) => write!(f, "{:<9} {}", format!("[{}]", venue), self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Cloneable handle for emitting notifications, optionally venue-tagged.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
    venue: Option<VenueId>,
}

pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Create a notifier and the receiver the front end drains.
pub fn channel() -> (Notifier, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx, venue: None }, rx)
}

impl Notifier {
    /// Same channel, tagged with `venue`.
    pub fn for_venue(&self, venue: VenueId) -> Self {
        Self {
            tx: self.tx.clone(),
            venue: Some(venue),
        }
    }

    pub fn send(&self, kind: NotificationKind, text: impl Into<String>) {
        let notification = Notification {
            venue: self.venue.clone(),
            kind,
            text: text.into(),
            at: Utc::now(),
        };
        if let Err(e) = self.tx.send(notification) {
            debug!("notification dropped, sink closed: {}", e.0);
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.send(NotificationKind::Info, text);
    }

    pub fn found(&self, item: &Item) {
        self.send(
            NotificationKind::Found,
            format!("🎯 Found: {}", item.display_line(None)),
        );
    }

    pub fn error(&self, text: impl Into<String>, will_retry: bool) {
        let text = text.into();
        let suffix = if will_retry { "will retry" } else { "gave up" };
        self.send(
            NotificationKind::Error { will_retry },
            format!("⚠️ {} ({})", text, suffix),
        );
    }
}

/// Join lines into messages of at most `max_chars` characters, splitting
/// only on line boundaries. A single over-long line becomes its own chunk.
pub fn chunk_lines<S: AsRef<str>>(lines: &[S], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        let line = line.as_ref();
        let needed = if current.is_empty() {
            line.chars().count()
        } else {
            current.chars().count() + 1 + line.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_tag_rendering() {
        let (notifier, mut rx) = channel();
        notifier.for_venue(VenueId::new("tonnel")).info("hello");
        notifier.info("plain");

        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.to_string(), "[TONNEL]  hello");
        assert_eq!(rx.try_recv().unwrap().to_string(), "plain");
    }

    #[test]
    fn test_error_marks_outcome() {
        let (notifier, mut rx) = channel();
        notifier.error("search failed", true);
        notifier.error("buy failed", false);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NotificationKind::Error { will_retry: true });
        assert!(first.text.contains("will retry"));
        assert!(rx.try_recv().unwrap().text.contains("gave up"));
    }

    #[test]
    fn test_send_after_receiver_dropped_does_not_panic() {
        let (notifier, rx) = channel();
        drop(rx);
        notifier.info("nobody listening");
    }

    #[test]
    fn test_chunk_lines_respects_limit() {
        let lines = vec!["aaaa", "bbbb", "cccc"];
        assert_eq!(chunk_lines(&lines, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(chunk_lines(&lines, 100), vec!["aaaa\nbbbb\ncccc"]);
        assert_eq!(chunk_lines(&["toolongline"], 4), vec!["toolongline"]);
        assert!(chunk_lines::<&str>(&[], 10).is_empty());
    }
}
