use leadflow_core::types::Lead;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The lead asked to stop receiving messages.
    LeadOptedOut,
    /// An operator halted all outbound traffic.
    GlobalKillSwitch,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LeadOptedOut => "lead opted out",
            Self::GlobalKillSwitch => "global kill switch engaged",
        })
    }
}

/// Combines the global outbound flag with the lead's own opt-out.
pub struct KillSwitch;

impl KillSwitch {
    /// The lead's opt-out wins over the global switch so callers can mark
    /// the member terminal instead of holding it.
    pub fn check(lead: &Lead, global_engaged: bool) -> Option<BlockReason> {
        if lead.opted_out {
            Some(BlockReason::LeadOptedOut)
        } else if global_engaged {
            Some(BlockReason::GlobalKillSwitch)
        } else {
            None
        }
    }
}
