//! Session diagnostics
//!
//! Parse and rewrite problems are mostly non-fatal: the engine records them
//! as notifications and keeps going with a best-effort result. A session
//! collects notifications in a [`NotificationLog`]; callers inspect the log
//! (or just its worst severity) after an operation.

/// Severity of a notification. The variants form a total order with
/// `Critical` ranking highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    None,
    Information,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// A structured diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// Where the problem occurred, e.g. "parsing atom at 0x1234".
    pub context: String,
}

/// Ordered collection of notifications for one session.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Vec<Notification>,
    worst: Severity,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>, context: impl Into<String>) {
        let message = message.into();
        let context = context.into();
        match severity {
            Severity::Warning => tracing::warn!(context = %context, "{}", message),
            Severity::Critical => tracing::error!(context = %context, "{}", message),
            _ => tracing::debug!(context = %context, "{}", message),
        }
        self.worst = self.worst.max(severity);
        self.entries.push(Notification {
            severity,
            message,
            context,
        });
    }

    pub fn information(&mut self, message: impl Into<String>, context: impl Into<String>) {
        self.push(Severity::Information, message, context);
    }

    pub fn warning(&mut self, message: impl Into<String>, context: impl Into<String>) {
        self.push(Severity::Warning, message, context);
    }

    pub fn critical(&mut self, message: impl Into<String>, context: impl Into<String>) {
        self.push(Severity::Critical, message, context);
    }

    /// The highest severity recorded so far.
    pub fn worst(&self) -> Severity {
        self.worst
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Move all entries from `other` into this log.
    pub fn absorb(&mut self, other: NotificationLog) {
        self.worst = self.worst.max(other.worst);
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::None < Severity::Information);
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_worst_tracking() {
        let mut log = NotificationLog::new();
        assert_eq!(log.worst(), Severity::None);
        log.information("attachments not parsed", "parsing file");
        assert_eq!(log.worst(), Severity::Information);
        log.critical("invalid atom size", "parsing atom at 0x10");
        log.warning("tag position coerced", "planning rewrite");
        assert_eq!(log.worst(), Severity::Critical);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_absorb() {
        let mut a = NotificationLog::new();
        a.information("x", "y");
        let mut b = NotificationLog::new();
        b.warning("z", "w");
        a.absorb(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.worst(), Severity::Warning);
    }
}
