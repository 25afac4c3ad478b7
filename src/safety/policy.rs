use std::fmt;

use serde::{Deserialize, Serialize};

/// Safety tier bound to a session. Lower tiers trust the operator more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// Tier 1: no approvals, deny-list of catastrophic patterns only.
    Trusted,
    /// Tier 2: approvals for anything off the safe allow-list.
    #[default]
    Standard,
    /// Tier 3: minimal allow-list, short commands only.
    Restricted,
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trusted => write!(f, "trusted"),
            Self::Standard => write!(f, "standard"),
            Self::Restricted => write!(f, "restricted"),
        }
    }
}

/// Effective validation rules for one session. Tier presets are immutable;
/// a session's effective policy is a preset plus an optional
/// [`PolicyOverride`] applied field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyPolicy {
    pub tier: SafetyTier,
    pub require_approval: bool,
    /// First-token allow-list; `None` means no allow-list check.
    pub allowed_prefixes: Option<Vec<String>>,
    pub blocked_substrings: Vec<String>,
    pub max_command_length: usize,
    pub allow_filesystem_write: bool,
    pub allow_network: bool,
    pub allow_process_control: bool,
}

impl SafetyPolicy {
    pub fn for_tier(tier: SafetyTier) -> Self {
        match tier {
            SafetyTier::Trusted => Self {
                tier,
                require_approval: false,
                allowed_prefixes: None,
                blocked_substrings: strings(&["rm -rf /", "mkfs", ":(){ :|:& };:"]),
                max_command_length: 4096,
                allow_filesystem_write: true,
                allow_network: true,
                allow_process_control: true,
            },
            SafetyTier::Standard => Self {
                tier,
                require_approval: true,
                allowed_prefixes: Some(strings(&[
                    "ls",
                    "cat",
                    "grep",
                    "find",
                    "echo",
                    "pwd",
                    "cd",
                    "head",
                    "tail",
                    "wc",
                    "which",
                    "env",
                    "git status",
                    "git diff",
                    "git log",
                ])),
                blocked_substrings: strings(&[
                    "sudo",
                    "rm -rf",
                    "mkfifo",
                    "> /dev/",
                    "shutdown",
                    "reboot",
                ]),
                max_command_length: 1024,
                allow_filesystem_write: false,
                allow_network: false,
                allow_process_control: false,
            },
            SafetyTier::Restricted => Self {
                tier,
                require_approval: true,
                allowed_prefixes: Some(strings(&["ls", "cat", "pwd", "echo", "git status"])),
                blocked_substrings: strings(&[
                    "sudo",
                    "rm",
                    "mv",
                    "cp",
                    "curl",
                    "wget",
                    "> /dev/",
                ]),
                max_command_length: 256,
                allow_filesystem_write: false,
                allow_network: false,
                allow_process_control: false,
            },
        }
    }

    /// Applies an override on top of this policy, field by field.
    pub fn with_override(mut self, ov: &PolicyOverride) -> Self {
        if let Some(require_approval) = ov.require_approval {
            self.require_approval = require_approval;
        }
        if let Some(ref allowed) = ov.allowed_prefixes {
            self.allowed_prefixes = Some(allowed.clone());
        }
        if let Some(ref blocked) = ov.blocked_substrings {
            self.blocked_substrings = blocked.clone();
        }
        if let Some(max_len) = ov.max_command_length {
            self.max_command_length = max_len;
        }
        if let Some(fs) = ov.allow_filesystem_write {
            self.allow_filesystem_write = fs;
        }
        if let Some(net) = ov.allow_network {
            self.allow_network = net;
        }
        if let Some(proc) = ov.allow_process_control {
            self.allow_process_control = proc;
        }
        self
    }

    /// First-token membership check: prefix match on multi-word entries,
    /// exact match on single tokens.
    pub fn allows(&self, command: &str) -> Option<bool> {
        let allowed = self.allowed_prefixes.as_ref()?;
        let trimmed = command.trim();
        let first_token = trimmed.split_whitespace().next().unwrap_or("");
        Some(allowed.iter().any(|entry| {
            if entry.contains(' ') {
                trimmed == entry || trimmed.starts_with(&format!("{} ", entry))
            } else {
                first_token == entry
            }
        }))
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::for_tier(SafetyTier::default())
    }
}

/// Field-by-field override of a tier preset for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub require_approval: Option<bool>,
    pub allowed_prefixes: Option<Vec<String>>,
    pub blocked_substrings: Option<Vec<String>>,
    pub max_command_length: Option<usize>,
    pub allow_filesystem_write: Option<bool>,
    pub allow_network: Option<bool>,
    pub allow_process_control: Option<bool>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
