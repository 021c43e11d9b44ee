//! Parse diagnostics.
//!
//! Parsing tries many alternatives, and most of them fail. Failed attempts
//! must not spam the user, so every attempt runs inside a [`ParseLog`] frame
//! that buffers what it logs. The caller then decides whether to print the
//! buffered warnings, print the single best error, or drop everything.
//!
//! Only the outermost frame writes to the [`Diagnostics`] sink, which also
//! forwards each entry to `tracing`.

use std::cell::RefCell;
use std::fmt;

use tracing::{error, warn};

/// How specific an error message is. Higher wins when several failed
/// alternatives each produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorQuality {
    None,
    NotAnExpression,
    SemanticError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
}

/// Script and line a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub script: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub quality: ErrorQuality,
    pub message: String,
    pub location: Option<Location>,
}

impl LogEntry {
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} ({}, line {})", self.message, loc.script, loc.line),
            None => f.write_str(&self.message),
        }
    }
}

/// Entries that reached the root of the handler stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<LogEntry>,
}

impl Diagnostics {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| !e.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(LogEntry::is_error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per entry, prefixed with its severity. Used for snapshots.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let level = match entry.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            out.push_str(level);
            out.push_str(": ");
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}

impl IntoIterator for Diagnostics {
    type Item = LogEntry;
    type IntoIter = std::vec::IntoIter<LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Parse,
    Blocking,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    error: Option<LogEntry>,
    retained: Vec<LogEntry>,
}

/// The handler stack. One per parse session; not shared across threads.
#[derive(Debug, Default)]
pub struct ParseLogger {
    frames: RefCell<Vec<Frame>>,
    sink: RefCell<Diagnostics>,
    location: RefCell<Option<Location>>,
}

impl ParseLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame that keeps the best error and retains everything else.
    pub fn start(&self) -> ParseLog<'_> {
        self.push(FrameKind::Parse)
    }

    /// Push a frame that silently discards whatever is printed into it.
    pub fn start_blocking(&self) -> ParseLog<'_> {
        self.push(FrameKind::Blocking)
    }

    fn push(&self, kind: FrameKind) -> ParseLog<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(Frame {
            kind,
            error: None,
            retained: Vec::new(),
        });
        ParseLog {
            logger: self,
            index: frames.len() - 1,
            stopped: false,
        }
    }

    /// Log an error with [`ErrorQuality::SemanticError`].
    pub fn error(&self, message: impl Into<String>) {
        self.error_with(message, ErrorQuality::SemanticError);
    }

    pub fn error_with(&self, message: impl Into<String>, quality: ErrorQuality) {
        self.log(self.entry(Severity::Error, quality, message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(self.entry(Severity::Warning, ErrorQuality::None, message.into()));
    }

    fn entry(&self, severity: Severity, quality: ErrorQuality, message: String) -> LogEntry {
        LogEntry {
            severity,
            quality,
            message,
            location: self.location.borrow().clone(),
        }
    }

    /// Route an entry to the innermost frame, or to the sink if there is none.
    pub fn log(&self, entry: LogEntry) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            drop(frames);
            self.emit(entry);
            return;
        };
        match frame.kind {
            FrameKind::Blocking => {}
            FrameKind::Parse if entry.is_error() => {
                let better = frame
                    .error
                    .as_ref()
                    .is_none_or(|current| entry.quality > current.quality);
                if better {
                    frame.error = Some(entry);
                }
            }
            FrameKind::Parse => frame.retained.push(entry),
        }
    }

    fn emit(&self, entry: LogEntry) {
        let (script, line) = entry
            .location
            .as_ref()
            .map_or(("", 0), |l| (l.script.as_str(), l.line));
        match entry.severity {
            Severity::Warning => warn!(script, line, "{}", entry.message),
            Severity::Error => error!(script, line, "{}", entry.message),
        }
        self.sink.borrow_mut().push(entry);
    }

    pub fn set_location(&self, location: Option<Location>) {
        *self.location.borrow_mut() = location;
    }

    pub fn location(&self) -> Option<Location> {
        self.location.borrow().clone()
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Take everything that reached the sink so far.
    pub fn take_diagnostics(&self) -> Diagnostics {
        std::mem::take(&mut *self.sink.borrow_mut())
    }
}

/// RAII handle to one frame of the handler stack.
///
/// Dropping the handle without printing discards the frame's contents.
#[must_use = "a parse log discards its entries unless printed"]
pub struct ParseLog<'a> {
    logger: &'a ParseLogger,
    index: usize,
    stopped: bool,
}

impl ParseLog<'_> {
    fn stop(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        let mut frames = self.logger.frames.borrow_mut();
        // Frames opened after this one and leaked are discarded with it.
        frames.truncate(self.index + 1);
        frames.pop()
    }

    /// Drop retained warnings, keeping the best error.
    pub fn clear(&self) {
        if let Some(frame) = self.logger.frames.borrow_mut().get_mut(self.index) {
            frame.retained.clear();
        }
    }

    pub fn has_error(&self) -> bool {
        self.logger
            .frames
            .borrow()
            .get(self.index)
            .is_some_and(|f| f.error.is_some())
    }

    pub fn error(&self) -> Option<LogEntry> {
        self.logger
            .frames
            .borrow()
            .get(self.index)
            .and_then(|f| f.error.clone())
    }

    /// Print the retained entries, but not the error.
    pub fn print_log(mut self) {
        if let Some(frame) = self.stop() {
            for entry in frame.retained {
                self.logger.log(entry);
            }
        }
    }

    /// Print the best error, or `default` if nothing was logged.
    pub fn print_error(mut self, default: Option<&str>) {
        if let Some(frame) = self.stop() {
            if let Some(error) = frame.error {
                self.logger.log(error);
            } else if let Some(message) = default {
                self.logger.error(message);
            }
        }
    }

    /// Print the best error if it is at least `quality`, else `default`.
    pub fn print_error_with(mut self, default: &str, quality: ErrorQuality) {
        if let Some(frame) = self.stop() {
            match frame.error {
                Some(error) if error.quality >= quality => self.logger.log(error),
                _ => self.logger.error_with(default, quality),
            }
        }
    }
}

impl Drop for ParseLog<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_error_wins() {
        let logger = ParseLogger::new();
        let log = logger.start();
        logger.error_with("vague", ErrorQuality::NotAnExpression);
        logger.error_with("specific", ErrorQuality::SemanticError);
        logger.error_with("also specific", ErrorQuality::SemanticError);
        log.print_error(None);

        let diags = logger.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.errors().next().map(|e| e.message.as_str()), Some("specific"));
    }

    #[test]
    fn test_dropped_frame_discards() {
        let logger = ParseLogger::new();
        {
            let _log = logger.start();
            logger.error("lost");
            logger.warning("lost too");
        }
        assert!(logger.take_diagnostics().is_empty());
        assert_eq!(logger.depth(), 0);
    }

    #[test]
    fn test_print_log_keeps_warnings_only() {
        let logger = ParseLogger::new();
        let log = logger.start();
        logger.warning("careful");
        logger.error("ignored");
        log.print_log();

        let diags = logger.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_nested_frames_promote() {
        let logger = ParseLogger::new();
        let outer = logger.start();
        {
            let inner = logger.start();
            logger.error_with("inner", ErrorQuality::NotAnExpression);
            inner.print_error(None);
        }
        assert!(outer.has_error());
        outer.print_error_with("fallback", ErrorQuality::SemanticError);

        let diags = logger.take_diagnostics();
        assert_eq!(diags.errors().next().map(|e| e.message.as_str()), Some("fallback"));
    }

    #[test]
    fn test_blocking_frame() {
        let logger = ParseLogger::new();
        let blocking = logger.start_blocking();
        let inner = logger.start();
        logger.error("nope");
        inner.print_error(None);
        blocking.print_log();
        assert!(logger.take_diagnostics().is_empty());
    }

    #[test]
    fn test_clear_keeps_error() {
        let logger = ParseLogger::new();
        let log = logger.start();
        logger.warning("w");
        logger.error("e");
        log.clear();
        assert!(log.has_error());
        log.print_error(Some("default"));
        assert_eq!(logger.take_diagnostics().render(), "error: e\n");
    }

    #[test]
    fn test_location_attached() {
        let logger = ParseLogger::new();
        logger.set_location(Some(Location {
            script: "test.sk".to_string(),
            line: 3,
        }));
        logger.warning("hello");
        assert_eq!(logger.take_diagnostics().render(), "warning: hello (test.sk, line 3)\n");
    }
}
