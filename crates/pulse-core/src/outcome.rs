//! Run outcome classification.
//!
//! An agent that has nothing to report prints the `HEARTBEAT_OK` sentinel;
//! anything else on a clean exit is assumed to need human review.

use crate::types::OK_SENTINEL;
use serde::{Deserialize, Serialize};

/// Classification of one finished (or reconciled) heartbeat run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Clean exit and the sentinel was present.
    Ok,
    /// Clean exit, free-form output: needs a human to look.
    Attention,
    /// Non-zero exit or a failure before/around the agent process.
    Error,
    /// The previous daemon died while this run was in flight.
    Lost,
    /// Reserved for a future replay path; never produced today.
    Recovered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Attention => "attention",
            Self::Error => "error",
            Self::Lost => "lost",
            Self::Recovered => "recovered",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a run from its result text and exit code.
///
/// Exit code wins: a non-zero exit is an error no matter what the agent
/// printed. On a clean exit the sentinel anywhere in the text means `ok`.
pub fn classify(result_text: &str, exit_code: i32) -> Outcome {
    if exit_code != 0 {
        Outcome::Error
    } else if result_text.contains(OK_SENTINEL) {
        Outcome::Ok
    } else {
        Outcome::Attention
    }
}

/// Truncate text for log summaries, capped at `max` characters.
pub fn excerpt(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_exit_is_error_regardless_of_content() {
        assert_eq!(classify("anything", 1), Outcome::Error);
        assert_eq!(classify("HEARTBEAT_OK", 2), Outcome::Error);
        assert_eq!(classify("", -1), Outcome::Error);
    }

    #[test]
    fn sentinel_on_clean_exit_is_ok() {
        assert_eq!(classify("HEARTBEAT_OK", 0), Outcome::Ok);
        assert_eq!(classify("  HEARTBEAT_OK  ", 0), Outcome::Ok);
        assert_eq!(classify("done.\nHEARTBEAT_OK\n", 0), Outcome::Ok);
    }

    #[test]
    fn free_form_text_on_clean_exit_is_attention() {
        assert_eq!(classify("ATTENTION: x failing", 0), Outcome::Attention);
        assert_eq!(classify("", 0), Outcome::Attention);
    }

    #[test]
    fn excerpt_truncates_long_text() {
        let long = "x".repeat(500);
        let cut = excerpt(&long, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn excerpt_keeps_short_text_whole() {
        assert_eq!(excerpt("  short  ", 200), "short");
    }

    #[test]
    fn outcome_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Outcome::Attention).unwrap(), "\"attention\"");
        assert_eq!(serde_json::to_string(&Outcome::Lost).unwrap(), "\"lost\"");
    }
}
