//! Policy engine: per-call classification into allow / deny /
//! require-approval.
//!
//! Evaluation is total -- it always produces a decision and never fails.
//! The ladder runs first-match-wins:
//!
//! 1. Session deny-list.
//! 2. Session allow-list (when set, anything absent is denied).
//! 3. Operator rules, in order. Built-in heuristics only run when no rule
//!    matched, so an allow-all or deny-all pattern fully overrides them.
//! 4. Read-only tool names auto-allow.
//! 5. Shell commands: a safe read-only pattern set bypasses approval, a
//!    confirm list forces it, everything else is allowed.
//! 6. Mutating tool names require approval.
//! 7. Everything else requires approval.
//!
//! Every evaluation is recorded in the audit ring.

use chrono::Utc;
use regex::Regex;
use serde_json::Value;

use openvia_types::Session;

use crate::audit::{AuditEntry, AuditLog};

/// Tool-name substrings that mark a tool as read-only (rung 4).
const READ_ONLY_HINTS: &[&str] = &["read", "list", "ls", "search", "grep", "glob", "view"];

/// Tool-name substrings that mark a tool as mutating (rung 6).
const MUTATING_HINTS: &[&str] = &["write", "edit", "delete", "remove", "create"];

/// Default shell-command substrings that require approval.
const DEFAULT_CONFIRM_LIST: &[&str] = &[
    "rm", "mv", "sudo", "su", "dd", "reboot", "shutdown", "mkfs", "chmod", "chown", ">", ">>", "|",
];

/// Shell metacharacters that disqualify a command from the safe set, no
/// matter which executable it names.
const SHELL_META: &[&str] = &[";", "&", "|", "`", "$(", ">", "<"];

/// Safe read-only command patterns. Each covers one executable with
/// simple flag-style arguments only; chaining and redirection are already
/// excluded by the metacharacter check.
const SAFE_COMMAND_PATTERNS: &[&str] = &[
    r"^(?:date|get-date)(?:\s+[-+'%/:.\w]+)*\s*$",
    r"^timedatectl(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^whoami\s*$",
    r"^hostname(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^uname(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^uptime(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^pwd\s*$",
    r"^id(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^df(?:\s+-{1,2}[\w-]+)*\s*$",
    r"^free(?:\s+-{1,2}[\w-]+)*\s*$",
];

/// Maximum characters of any argument value shown in an approval prompt.
const PROMPT_ARG_LIMIT: usize = 100;

/// The outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Execute without asking.
    Allow,
    /// Refuse; the reason is fed back to the LLM as a tool-result error.
    Deny {
        /// Why the call was refused.
        reason: String,
    },
    /// Ask the user before executing.
    RequireApproval {
        /// The prompt shown to the user.
        prompt: String,
    },
}

impl PolicyDecision {
    /// Short label for audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Deny { .. } => "deny",
            PolicyDecision::RequireApproval { .. } => "require_approval",
        }
    }
}

/// What a matching rule decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDecision {
    /// Execute without asking.
    Allow,
    /// Refuse.
    Deny,
    /// Ask the user.
    RequireApproval,
}

/// One operator-supplied rule.
///
/// `tool_pattern` is `*` (all tools), `prefix*` (starts-with), or an exact
/// name. Rules run in order; the first match wins.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    /// The pattern to match tool names against.
    pub tool_pattern: String,
    /// The decision when the pattern matches.
    pub decision: RuleDecision,
    /// Optional reason shown on deny / in the approval prompt.
    pub reason: Option<String>,
}

impl PolicyRule {
    fn matches(&self, tool_name: &str) -> bool {
        if self.tool_pattern == "*" {
            return true;
        }
        if let Some(prefix) = self.tool_pattern.strip_suffix('*') {
            return tool_name.starts_with(prefix);
        }
        self.tool_pattern == tool_name
    }
}

/// The policy engine. Rules and the confirm list are fixed at
/// construction; evaluation is pure apart from the audit side effect.
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
    confirm_list: Vec<String>,
    safe_patterns: Vec<Regex>,
    audit: AuditLog,
}

impl PolicyEngine {
    /// Create an engine with the given rules and confirm list.
    /// `confirm_list = None` uses the built-in default.
    pub fn new(rules: Vec<PolicyRule>, confirm_list: Option<Vec<String>>) -> Self {
        let safe_patterns = SAFE_COMMAND_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            rules,
            confirm_list: confirm_list
                .unwrap_or_else(|| DEFAULT_CONFIRM_LIST.iter().map(|s| s.to_string()).collect()),
            safe_patterns,
            audit: AuditLog::new(),
        }
    }

    /// An engine with no rules and the default confirm list.
    pub fn with_defaults() -> Self {
        Self::new(Vec::new(), None)
    }

    /// The audit ring.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Classify one `(tool, args, session)` triple. Total: always returns
    /// a decision, and records it in the audit ring.
    pub fn evaluate(&self, tool_name: &str, args: &Value, session: &Session) -> PolicyDecision {
        let decision = self.classify(tool_name, args, session);
        self.audit.record(AuditEntry {
            timestamp: Utc::now(),
            user_id: session.user_id.clone(),
            chat_id: session.chat_id.clone(),
            tool: tool_name.to_string(),
            args_snapshot: truncate(&args.to_string(), PROMPT_ARG_LIMIT),
            decision: decision.label().to_string(),
        });
        decision
    }

    fn classify(&self, tool_name: &str, args: &Value, session: &Session) -> PolicyDecision {
        // 1. Session deny-list.
        if session.denied_tools.contains(tool_name) {
            return PolicyDecision::Deny {
                reason: format!("tool '{tool_name}' is denied for this user"),
            };
        }

        // 2. Session allow-list.
        if let Some(ref allowed) = session.allowed_tools {
            if !allowed.contains(tool_name) {
                return PolicyDecision::Deny {
                    reason: format!("tool '{tool_name}' is not in the allowed list"),
                };
            }
        }

        // 3. Operator rules, first match wins.
        for rule in &self.rules {
            if rule.matches(tool_name) {
                return match rule.decision {
                    RuleDecision::Allow => PolicyDecision::Allow,
                    RuleDecision::Deny => PolicyDecision::Deny {
                        reason: rule
                            .reason
                            .clone()
                            .unwrap_or_else(|| format!("tool '{tool_name}' denied by rule")),
                    },
                    RuleDecision::RequireApproval => PolicyDecision::RequireApproval {
                        prompt: rule.reason.clone().unwrap_or_else(|| {
                            default_prompt(tool_name, args)
                        }),
                    },
                };
            }
        }

        // 4. Read-only tool names.
        let lower = tool_name.to_ascii_lowercase();
        if READ_ONLY_HINTS.iter().any(|h| lower.contains(h)) {
            return PolicyDecision::Allow;
        }

        // 5. Shell commands.
        if lower == "bash" || lower == "shell" {
            if let Some(command) = args.get("command").and_then(|v| v.as_str()) {
                if self.is_safe_readonly(command) {
                    return PolicyDecision::Allow;
                }
                if let Some(hit) = self
                    .confirm_list
                    .iter()
                    .find(|needle| command.contains(needle.as_str()))
                {
                    return PolicyDecision::RequireApproval {
                        prompt: format!(
                            "Permission Request: `{tool_name}` wants to run: {} (matched '{hit}')",
                            truncate(command, PROMPT_ARG_LIMIT),
                        ),
                    };
                }
                return PolicyDecision::Allow;
            }
            // No command argument: fall through to the default rung.
        }

        // 6. Mutating tool names.
        if MUTATING_HINTS.iter().any(|h| lower.contains(h)) {
            let target = args
                .get("path")
                .or_else(|| args.get("file"))
                .and_then(|v| v.as_str())
                .unwrap_or("(unspecified target)");
            return PolicyDecision::RequireApproval {
                prompt: format!(
                    "Permission Request: `{tool_name}` wants to modify {}",
                    truncate(target, PROMPT_ARG_LIMIT),
                ),
            };
        }

        // 7. Default: ask.
        PolicyDecision::RequireApproval {
            prompt: default_prompt(tool_name, args),
        }
    }

    /// True when the command matches the fixed read-only allowlist and
    /// carries no shell metacharacters.
    fn is_safe_readonly(&self, command: &str) -> bool {
        let command = command.trim();
        if SHELL_META.iter().any(|m| command.contains(m)) {
            return false;
        }
        self.safe_patterns.iter().any(|re| re.is_match(command))
    }
}

/// Generic approval prompt enumerating arguments, each truncated.
fn default_prompt(tool_name: &str, args: &Value) -> String {
    let summary = match args {
        Value::Object(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{k}={}", truncate(&v.to_string(), PROMPT_ARG_LIMIT)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => "(no arguments)".to_string(),
        other => truncate(&other.to_string(), PROMPT_ARG_LIMIT),
    };
    format!("Permission Request: `{tool_name}` with arguments: {summary}")
}

/// Truncate to at most `limit` characters, appending an ellipsis marker.
fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(limit).collect();
        out.push('…');
        out
    }
}
