//! Command safety policy.
//!
//! Decides whether a proposed fix may run. The rules, in order:
//! 1. A command containing any deny-listed substring is rejected, even when
//!    it also starts with an allowed prefix.
//! 2. A command starting with an allow-listed prefix is accepted.
//! 3. Everything else is rejected (default-deny).
//!
//! Matching is case-insensitive, ignores surrounding whitespace and collapses
//! runs of internal whitespace, so `RM   -RF /` still hits `rm -rf`.

use serde::{Deserialize, Serialize};

/// Command prefixes recognized as safe remediation steps.
pub const DEFAULT_ALLOW_PREFIXES: &[&str] = &[
    // .NET
    "dotnet restore",
    "dotnet build",
    "dotnet test",
    "dotnet clean",
    "dotnet nuget locals",
    // npm
    "npm ci",
    "npm install",
    "npm run build",
    "npm run test",
    "npm test",
    "npm cache clean",
    "npm cache verify",
    // Cargo
    "cargo fetch",
    "cargo build",
    "cargo test",
    "cargo clean",
    "cargo update",
    // Version control cleanup
    "git clean",
    "git checkout --",
    "git restore",
    "git stash",
    "git fetch",
    "git submodule update",
];

/// Substrings that make a command unsafe wherever they appear.
pub const DEFAULT_DENY_SUBSTRINGS: &[&str] = &[
    // Recursive force-delete
    "rm -rf",
    "rm -fr",
    "rm -r -f",
    "rmdir /s",
    "rd /s",
    "del /s",
    "del /f",
    "remove-item -recurse",
    // Filesystem reformat
    "format c:",
    "format-volume",
    "mkfs",
    "diskpart",
    "dd if=",
    // Privilege elevation
    "sudo",
    "doas",
    "runas",
    "su -",
    // System accounts and registry
    "net user",
    "net localgroup",
    "useradd",
    "userdel",
    "usermod",
    "passwd",
    "reg add",
    "reg delete",
    "regedit",
];

/// Allow/deny lists for the safety policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Prefixes a command must start with to be allowed
    pub allow_prefixes: Vec<String>,
    /// Substrings that reject a command outright
    pub deny_substrings: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_prefixes: DEFAULT_ALLOW_PREFIXES.iter().map(|s| (*s).to_string()).collect(),
            deny_substrings: DEFAULT_DENY_SUBSTRINGS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Outcome of evaluating one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Command starts with this allow-listed prefix
    Allowed { prefix: String },
    /// Command contains this deny-listed substring
    Denied { substring: String },
    /// Command matched neither list
    NotAllowListed,
}

impl PolicyDecision {
    /// Whether the command may run.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Human-readable reason for logs.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed { prefix } => format!("matches allowed prefix '{prefix}'"),
            Self::Denied { substring } => format!("contains forbidden '{substring}'"),
            Self::NotAllowListed => "not on the allow list".to_string(),
        }
    }
}

/// Immutable allow/deny rule set.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl SafetyPolicy {
    /// Build a policy from configuration. Blank entries are ignored.
    #[must_use]
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            allow: normalize_entries(&config.allow_prefixes),
            deny: normalize_entries(&config.deny_substrings),
        }
    }

    /// Whether a command may run.
    #[must_use]
    pub fn is_safe(&self, command: &str) -> bool {
        self.evaluate(command).is_allowed()
    }

    /// Evaluate a command and report which rule decided it.
    #[must_use]
    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        let normalized = normalize(command);

        if let Some(substring) = self.deny.iter().find(|d| normalized.contains(d.as_str())) {
            return PolicyDecision::Denied {
                substring: substring.clone(),
            };
        }

        if normalized.is_empty() {
            return PolicyDecision::NotAllowListed;
        }

        self.allow
            .iter()
            .find(|a| normalized.starts_with(a.as_str()))
            .map_or(PolicyDecision::NotAllowListed, |prefix| {
                PolicyDecision::Allowed {
                    prefix: prefix.clone(),
                }
            })
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_entries(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| normalize(e))
        .filter(|e| !e.is_empty())
        .collect()
}
