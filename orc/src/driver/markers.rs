//! Terminal marker scanning
//!
//! Streamed assistant text is folded into a closed sum instead of being
//! re-inspected as raw strings: the scanner accumulates deltas and yields
//! the first terminal marker it sees. Later markers are ignored; a phase
//! terminates exactly once.

/// A terminal marker extracted from assistant output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMarker {
    /// `<phase_complete>true</phase_complete>`
    Complete,
    /// `<phase_blocked>reason: ...</phase_blocked>`
    Blocked { reason: String },
}

const COMPLETE_TAG: &str = "<phase_complete>true</phase_complete>";
const BLOCKED_OPEN: &str = "<phase_blocked>";
const BLOCKED_CLOSE: &str = "</phase_blocked>";

/// Incremental scanner over streamed text
#[derive(Debug, Default)]
pub struct MarkerScanner {
    buffer: String,
    found: Option<TerminalMarker>,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed delta; returns the marker as soon as it is
    /// complete in the accumulated text.
    pub fn feed(&mut self, delta: &str) -> Option<&TerminalMarker> {
        if self.found.is_some() {
            return self.found.as_ref();
        }
        self.buffer.push_str(delta);
        self.found = scan(&self.buffer);
        self.found.as_ref()
    }

    /// Marker found so far, if any
    pub fn marker(&self) -> Option<&TerminalMarker> {
        self.found.as_ref()
    }

    /// Everything streamed so far
    pub fn text(&self) -> &str {
        &self.buffer
    }
}

/// Scan a complete text for the first terminal marker
pub fn scan(text: &str) -> Option<TerminalMarker> {
    let complete_at = text.find(COMPLETE_TAG);
    let blocked_at = text.find(BLOCKED_OPEN);

    match (complete_at, blocked_at) {
        (Some(c), Some(b)) if c < b => Some(TerminalMarker::Complete),
        (Some(_), None) => Some(TerminalMarker::Complete),
        (_, Some(b)) => {
            let after_open = &text[b + BLOCKED_OPEN.len()..];
            match after_open.find(BLOCKED_CLOSE) {
                Some(close) => {
                    let inner = after_open[..close].trim();
                    let reason = inner.strip_prefix("reason:").unwrap_or(inner).trim().to_string();
                    Some(TerminalMarker::Blocked { reason })
                }
                // An open tag that never closes cannot shadow a complete
                // marker elsewhere in the text
                None => complete_at.map(|_| TerminalMarker::Complete),
            }
        }
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_complete() {
        let text = "All done.\n<phase_complete>true</phase_complete>\n";
        assert_eq!(scan(text), Some(TerminalMarker::Complete));
    }

    #[test]
    fn test_scan_blocked_with_reason() {
        let text = "I can't continue.\n<phase_blocked>reason: missing credentials</phase_blocked>";
        assert_eq!(
            scan(text),
            Some(TerminalMarker::Blocked {
                reason: "missing credentials".to_string()
            })
        );
    }

    #[test]
    fn test_scan_nothing() {
        assert_eq!(scan("still working on it"), None);
        // Incomplete blocked tag: wait for the close
        assert_eq!(scan("<phase_blocked>reason: partial"), None);
    }

    #[test]
    fn test_unclosed_blocked_tag_does_not_shadow_complete() {
        // Quoting the open tag without closing it must not hide a
        // legitimate completion marker later in the same response
        let text = "the <phase_blocked> tag is for failures\n<phase_complete>true</phase_complete>";
        assert_eq!(scan(text), Some(TerminalMarker::Complete));
    }

    #[test]
    fn test_first_marker_wins() {
        let text = "<phase_complete>true</phase_complete><phase_blocked>reason: later</phase_blocked>";
        assert_eq!(scan(text), Some(TerminalMarker::Complete));

        let text = "<phase_blocked>reason: first</phase_blocked><phase_complete>true</phase_complete>";
        assert_eq!(
            scan(text),
            Some(TerminalMarker::Blocked {
                reason: "first".to_string()
            })
        );
    }

    #[test]
    fn test_scanner_across_deltas() {
        let mut scanner = MarkerScanner::new();
        assert!(scanner.feed("working... <phase_com").is_none());
        assert!(scanner.feed("plete>tr").is_none());
        let marker = scanner.feed("ue</phase_complete>").cloned();
        assert_eq!(marker, Some(TerminalMarker::Complete));

        // Further input does not change the verdict
        scanner.feed("<phase_blocked>reason: nope</phase_blocked>");
        assert_eq!(scanner.marker(), Some(&TerminalMarker::Complete));
    }

    #[test]
    fn test_scanner_keeps_full_text() {
        let mut scanner = MarkerScanner::new();
        scanner.feed("part one ");
        scanner.feed("part two");
        assert_eq!(scanner.text(), "part one part two");
    }
}
