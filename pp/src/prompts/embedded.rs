//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// System prompt built from a role descriptor
pub const AGENT_SYSTEM: &str = include_str!("../../prompts/agent-system.pmt");

/// User message carrying one stage's instruction
pub const STAGE_TASK: &str = include_str!("../../prompts/stage-task.pmt");

/// Follow-up sent when a structured answer fails validation
pub const REPAIR: &str = include_str!("../../prompts/repair.pmt");

/// Names of every embedded template
pub const NAMES: [&str; 3] = ["agent-system", "stage-task", "repair"];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "agent-system" => Some(AGENT_SYSTEM),
        "stage-task" => Some(STAGE_TASK),
        "repair" => Some(REPAIR),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_embedded_agent_system() {
        let prompt = get_embedded("agent-system").unwrap();
        assert!(prompt.contains("{{role}}"));
        assert!(prompt.contains("{{goal}}"));
        assert!(prompt.contains("{{backstory}}"));
    }

    #[test]
    fn test_get_embedded_stage_task() {
        let prompt = get_embedded("stage-task").unwrap();
        assert!(prompt.contains("{{instruction}}"));
        assert!(prompt.contains("{{expected_output}}"));
    }

    #[test]
    fn test_all_names_resolve() {
        for name in NAMES {
            assert!(get_embedded(name).is_some(), "{name} should be embedded");
        }
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
