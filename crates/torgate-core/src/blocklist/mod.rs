//! Host blocklist
//!
//! An ordered list of host patterns shared by every proxy connection.
//! A pattern can match a host in three ways:
//! - **Exact**: the host equals the pattern
//! - **Contains**: the host is a substring of the pattern (pattern contains host)
//! - **Wildcard suffix**: the pattern starts with `*` and contains a dot; the
//!   host ends with the pattern's last dot-delimited segment
//!
//! Which rules apply is decided per protocol path with a [`RuleSet`]; the
//! CONNECT path and the plain-HTTP path use different sets by default.
//! Persistence lives in [`store`].

pub mod store;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single matching rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Host equals pattern
    Exact,
    /// Host is a substring of the pattern
    Contains,
    /// `*`-prefixed pattern whose last dot segment ends the host
    WildcardSuffix,
}

impl MatchRule {
    /// Parse a rule from its config name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "wildcard_suffix" | "wildcard-suffix" | "wildcard" => Some(Self::WildcardSuffix),
            _ => None,
        }
    }
}

/// Set of rules applied on one protocol path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSet {
    /// Apply the exact rule
    pub exact: bool,
    /// Apply the contains rule
    pub contains: bool,
    /// Apply the wildcard-suffix rule
    pub wildcard_suffix: bool,
}

impl RuleSet {
    /// Only the exact rule
    pub const EXACT: Self = Self {
        exact: true,
        contains: false,
        wildcard_suffix: false,
    };

    /// All three rules
    pub const ALL: Self = Self {
        exact: true,
        contains: true,
        wildcard_suffix: true,
    };

    /// Build a rule set from a list of rules
    pub fn from_rules(rules: &[MatchRule]) -> Self {
        Self {
            exact: rules.contains(&MatchRule::Exact),
            contains: rules.contains(&MatchRule::Contains),
            wildcard_suffix: rules.contains(&MatchRule::WildcardSuffix),
        }
    }

    /// Check one pattern against one (already normalized) host
    pub fn matches(&self, pattern: &str, host: &str) -> bool {
        if self.exact && pattern == host {
            return true;
        }

        if is_wildcard(pattern) {
            if self.wildcard_suffix {
                // `rsplit` always yields at least one item
                let last = pattern.rsplit('.').next().unwrap_or_default();
                return host.ends_with(last);
            }
            return false;
        }

        self.contains && !host.is_empty() && pattern.contains(host)
    }
}

/// Which protocol path a lookup is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPath {
    /// CONNECT tunnels
    Connect,
    /// Plain GET/POST relaying
    Http,
}

/// Rule sets per protocol path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPolicy {
    /// Rules for CONNECT
    pub connect: RuleSet,
    /// Rules for plain HTTP
    pub http: RuleSet,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            connect: RuleSet::EXACT,
            http: RuleSet::ALL,
        }
    }
}

impl BlockPolicy {
    /// Rule set for a protocol path
    pub fn rules_for(&self, path: ProtocolPath) -> RuleSet {
        match path {
            ProtocolPath::Connect => self.connect,
            ProtocolPath::Http => self.http,
        }
    }
}

fn is_wildcard(pattern: &str) -> bool {
    pattern.starts_with('*') && pattern.contains('.')
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// In-memory blocklist
///
/// Read-mostly and safe to share between connection tasks; mutations take
/// the write lock.
#[derive(Debug, Default)]
pub struct Blocklist {
    patterns: RwLock<Vec<String>>,
    policy: BlockPolicy,
}

impl Blocklist {
    /// Create an empty blocklist with the default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a blocklist with initial patterns
    pub fn with_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::new();
        for pattern in patterns {
            list.add(pattern.as_ref());
        }
        list
    }

    /// Replace the per-path policy
    pub fn with_policy(mut self, policy: BlockPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current policy
    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }

    /// Append a pattern. Duplicates are kept.
    pub fn add(&self, pattern: &str) {
        let pattern = normalize(pattern);
        if pattern.is_empty() {
            return;
        }
        self.patterns.write().push(pattern);
    }

    /// Remove the first occurrence of a pattern
    pub fn remove(&self, pattern: &str) -> bool {
        let pattern = normalize(pattern);
        let mut patterns = self.patterns.write();
        match patterns.iter().position(|p| *p == pattern) {
            Some(index) => {
                patterns.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether the exact pattern is present
    pub fn contains(&self, pattern: &str) -> bool {
        let pattern = normalize(pattern);
        self.patterns.read().iter().any(|p| *p == pattern)
    }

    /// Remove every pattern
    pub fn clear(&self) {
        self.patterns.write().clear();
    }

    /// Snapshot of the patterns in insertion order
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.read().clone()
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// First pattern matching `host` under `rules`
    pub fn find_match(&self, host: &str, rules: RuleSet) -> Option<String> {
        let host = normalize(host);
        self.patterns
            .read()
            .iter()
            .find(|pattern| rules.matches(pattern, &host))
            .cloned()
    }

    /// Whether `host` is blocked on the given protocol path
    pub fn is_blocked(&self, host: &str, path: ProtocolPath) -> bool {
        match self.find_match(host, self.policy.rules_for(path)) {
            Some(pattern) => {
                debug!(host, pattern = %pattern, ?path, "Host matched blocklist");
                true
            }
            None => false,
        }
    }
}
