//! Embedded prompts
//!
//! Compiled into the binary from the .pmt files at build time.

use tracing::debug;

pub const REQUIREMENT: &str = include_str!("../../prompts/requirement.pmt");
pub const SYSTEM: &str = include_str!("../../prompts/system.pmt");
pub const INTERACTION: &str = include_str!("../../prompts/interaction.pmt");
pub const GENERATE: &str = include_str!("../../prompts/generate.pmt");
pub const REPAIR: &str = include_str!("../../prompts/repair.pmt");
pub const EVALUATE: &str = include_str!("../../prompts/evaluate.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "requirement" => Some(REQUIREMENT),
        "system" => Some(SYSTEM),
        "interaction" => Some(INTERACTION),
        "generate" => Some(GENERATE),
        "repair" => Some(REPAIR),
        "evaluate" => Some(EVALUATE),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
