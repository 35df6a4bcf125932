//! The built-in permission deny-list.
//!
//! A fixed set of dangerous command patterns is always enforced unless a
//! workspace explicitly opts out with `permissions: "skip"`. Workspace
//! deny rules are unioned with the defaults (never replacing them),
//! de-duplicated, defaults first.

use pulse_core::config::PermissionSetting;

/// Flag token the claude CLI expects in front of the rules.
pub const DISALLOWED_TOOLS_FLAG: &str = "--disallowedTools";

/// Patterns covering filesystem destruction, privilege escalation,
/// disk formatting, raw device writes, and system shutdown/reboot.
pub const DEFAULT_DENY_RULES: &[&str] = &[
    "Bash(rm -rf /*)",
    "Bash(rm -rf ~*)",
    "Bash(rm -fr /*)",
    "Bash(sudo *)",
    "Bash(su *)",
    "Bash(mkfs*)",
    "Bash(fdisk *)",
    "Bash(dd if=* of=/dev/*)",
    "Bash(> /dev/sd*)",
    "Bash(shutdown*)",
    "Bash(reboot*)",
    "Bash(halt*)",
    "Bash(poweroff*)",
];

/// Merge workspace deny rules with the defaults. `"skip"` yields nothing;
/// custom rules are appended after the defaults, each at most once.
pub fn merged_deny_rules(permissions: Option<&PermissionSetting>) -> Vec<String> {
    match permissions {
        Some(setting) if setting.is_skip() => Vec::new(),
        setting => {
            let mut rules: Vec<String> =
                DEFAULT_DENY_RULES.iter().map(|r| (*r).to_string()).collect();
            for rule in setting.map(PermissionSetting::deny_rules).unwrap_or(&[]) {
                if !rules.iter().any(|existing| existing == rule) {
                    rules.push(rule.clone());
                }
            }
            rules
        }
    }
}

/// Render the deny-list as CLI arguments: the flag token followed by every
/// rule. Empty when the workspace opted out.
pub fn disallowed_tools_args(permissions: Option<&PermissionSetting>) -> Vec<String> {
    let rules = merged_deny_rules(permissions);
    if rules.is_empty() {
        return Vec::new();
    }
    let mut args = Vec::with_capacity(rules.len() + 1);
    args.push(DISALLOWED_TOOLS_FLAG.to_string());
    args.extend(rules);
    args
}
