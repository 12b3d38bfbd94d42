//! Bootstrap progress extraction from daemon log lines
//!
//! The daemon prints lines such as
//! `Jan 01 00:00:00.000 [notice] Bootstrapped 50% (loading_descriptors): Loading relay descriptors`.

/// Token that precedes the percentage
pub const BOOTSTRAP_MARKER: &str = "Bootstrapped ";

/// Percentage following [`BOOTSTRAP_MARKER`] in `line`, clamped to 100
pub fn parse_progress(line: &str) -> Option<u8> {
    let (_, rest) = line.split_once(BOOTSTRAP_MARKER)?;
    let digits: &str = {
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    // absurdly long digit runs still mean "done"
    let value = digits.parse::<u32>().unwrap_or(u32::MAX);
    Some(value.min(100) as u8)
}

/// Monotonic progress for one bootstrap cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    current: u8,
}

impl ProgressTracker {
    /// Tracker at 0%
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Whether 100% was reached
    pub fn is_complete(&self) -> bool {
        self.current >= 100
    }

    /// Feed one log line; returns the new progress if it advanced
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        let value = parse_progress(line)?;
        if value > self.current {
            self.current = value;
            Some(value)
        } else {
            None
        }
    }

    /// Back to 0% for a new cycle
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_progress("Jan 01 [notice] Bootstrapped 50% (loading_descriptors): Loading"),
            Some(50)
        );
        assert_eq!(parse_progress("[notice] Bootstrapped 100% (done): Done"), Some(100));
        assert_eq!(parse_progress("Bootstrapped 0%"), Some(0));
        assert_eq!(parse_progress("Bootstrapped 250%"), Some(100));
        assert_eq!(parse_progress("Bootstrapped 99999999999999%"), Some(100));
        assert_eq!(parse_progress("Bootstrapped %"), None);
        assert_eq!(parse_progress("[notice] Opening Socks listener"), None);
        assert_eq!(parse_progress("Bootstrapped"), None);
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.observe("Bootstrapped 10%"), Some(10));
        assert_eq!(t.observe("Bootstrapped 50%"), Some(50));
        assert_eq!(t.observe("Bootstrapped 30%"), None);
        assert_eq!(t.current(), 50);
        assert_eq!(t.observe("unrelated"), None);
        assert_eq!(t.observe("Bootstrapped 100%"), Some(100));
        assert!(t.is_complete());

        t.reset();
        assert_eq!(t.current(), 0);
    }
}
