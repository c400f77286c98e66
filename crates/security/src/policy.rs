//! Approval policy: decides which tool calls are sensitive.
//!
//! A call is sensitive when it
//! - navigates to a domain outside the whitelist (subdomains of a
//!   whitelisted domain are allowed; private network hosts never are),
//! - types more than `type_text_threshold` characters, or
//! - names a tool in the `always_confirm` list.
//!
//! The policy only classifies. Pausing the call and asking a human is the
//! execution loop's job.

use pagepilot_config::ApprovalConfig;

/// Result of checking a tool call against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sensitivity {
    /// Run without asking
    Safe,
    /// Pause and ask the approver first
    NeedsApproval { reason: String },
}

impl Sensitivity {
    pub fn needs_approval(&self) -> bool {
        matches!(self, Sensitivity::NeedsApproval { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    enabled: bool,
    whitelisted_domains: Vec<String>,
    type_text_threshold: usize,
    always_confirm: Vec<String>,
}

impl ApprovalPolicy {
    pub fn new(config: &ApprovalConfig) -> Self {
        Self {
            enabled: config.enabled,
            whitelisted_domains: config
                .whitelisted_domains
                .iter()
                .map(|d| d.trim().trim_start_matches("*.").to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            type_text_threshold: config.type_text_threshold,
            always_confirm: config.always_confirm.clone(),
        }
    }

    /// A policy that never asks.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            whitelisted_domains: Vec::new(),
            type_text_threshold: usize::MAX,
            always_confirm: Vec::new(),
        }
    }

    pub fn check(&self, tool_name: &str, arguments: &serde_json::Value) -> Sensitivity {
        if !self.enabled {
            return Sensitivity::Safe;
        }

        if self.always_confirm.iter().any(|t| t == tool_name) {
            return Sensitivity::NeedsApproval {
                reason: format!("'{tool_name}' always requires confirmation"),
            };
        }

        match tool_name {
            "navigate" => {
                let url = arguments["url"].as_str().unwrap_or_default();
                let host = host_of(url);
                if host.is_empty() {
                    return Sensitivity::Safe;
                }
                if is_private_host(&host) {
                    return Sensitivity::NeedsApproval {
                        reason: format!("navigation to private network address {host}"),
                    };
                }
                if self.is_whitelisted(&host) {
                    Sensitivity::Safe
                } else {
                    Sensitivity::NeedsApproval {
                        reason: format!("navigation to non-whitelisted domain {host}"),
                    }
                }
            }
            "type_text" | "type" => {
                let len = arguments["text"].as_str().map_or(0, |t| t.chars().count());
                if len > self.type_text_threshold {
                    Sensitivity::NeedsApproval {
                        reason: format!(
                            "typing {len} characters (threshold {})",
                            self.type_text_threshold
                        ),
                    }
                } else {
                    Sensitivity::Safe
                }
            }
            _ => Sensitivity::Safe,
        }
    }

    fn is_whitelisted(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.");
        self.whitelisted_domains.iter().any(|d| {
            host == d
                || host
                    .strip_suffix(d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::new(&ApprovalConfig::default())
    }
}

/// Lowercased host of a URL or bare host name, without port or credentials.
fn host_of(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let rest = lower.split_once("://").map_or(lower.as_str(), |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    if host.starts_with('[') {
        // IPv6 literal
        return host.split(']').next().map(|h| format!("{h}]")).unwrap_or_default();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

fn is_private_host(host: &str) -> bool {
    let second_octet = |prefix: &str| {
        host.strip_prefix(prefix)
            .and_then(|rest| rest.split('.').next())
            .and_then(|o| o.parse::<u8>().ok())
    };

    host == "localhost"
        || host.ends_with(".localhost")
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || second_octet("172.").is_some_and(|o| (16..=31).contains(&o))
        || host.starts_with("169.254.")
        || host == "[::1]"
        || host == "0.0.0.0"
}
