//! Heartbeat prompt assembly.

use std::path::Path;

/// Standing instruction prepended to every heartbeat prompt. The trailing
/// sentinel contract is what outcome classification keys on.
const PREAMBLE: &str = "You are running a scheduled heartbeat check for this workspace. \
Work through the checklist below. If everything is in order and nothing \
needs a human, end your reply with the single line HEARTBEAT_OK. If anything \
needs attention, describe it concisely instead.";

/// Build the prompt for one heartbeat run from its heartbeat file.
///
/// A missing or unreadable file is the caller's short-circuit to an error
/// outcome; no process is spawned for it.
pub fn build_heartbeat_prompt(heartbeat_path: &Path) -> std::io::Result<String> {
    let body = std::fs::read_to_string(heartbeat_path)?;
    Ok(format!("{PREAMBLE}\n\n{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prompt_wraps_heartbeat_file_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("HEARTBEAT.md");
        std::fs::write(&path, "- check CI\n- check deps").unwrap();

        let prompt = build_heartbeat_prompt(&path).unwrap();
        assert!(prompt.contains("HEARTBEAT_OK"));
        assert!(prompt.ends_with("- check CI\n- check deps"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(build_heartbeat_prompt(&dir.path().join("HEARTBEAT.md")).is_err());
    }
}
