use leadflow_core::types::{LeadStatus, WorkflowTrigger};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something that happened to a lead and may start workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerEvent {
    LeadCreated {
        lead_id: Uuid,
    },
    LeadStatusChanged {
        lead_id: Uuid,
        from: LeadStatus,
        to: LeadStatus,
    },
    MessageReceived {
        lead_id: Uuid,
        body: String,
    },
    TagAdded {
        lead_id: Uuid,
        tag: String,
    },
}

impl TriggerEvent {
    pub fn lead_id(&self) -> Uuid {
        match self {
            Self::LeadCreated { lead_id }
            | Self::LeadStatusChanged { lead_id, .. }
            | Self::MessageReceived { lead_id, .. }
            | Self::TagAdded { lead_id, .. } => *lead_id,
        }
    }

    pub fn matches(&self, trigger: &WorkflowTrigger) -> bool {
        match (self, trigger) {
            (Self::LeadCreated { .. }, WorkflowTrigger::LeadCreated) => true,
            (Self::LeadStatusChanged { to, .. }, WorkflowTrigger::LeadStatusChanged { to: wanted }) => {
                wanted.map_or(true, |w| w == *to)
            }
            (Self::MessageReceived { body, .. }, WorkflowTrigger::MessageReceived { keyword }) => {
                match keyword {
                    None => true,
                    Some(k) => body.to_lowercase().contains(&k.trim().to_lowercase()),
                }
            }
            (Self::TagAdded { tag, .. }, WorkflowTrigger::TagAdded { tag: wanted }) => {
                tag.eq_ignore_ascii_case(wanted.trim())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching() {
        let lead_id = Uuid::new_v4();
        let changed = TriggerEvent::LeadStatusChanged {
            lead_id,
            from: LeadStatus::New,
            to: LeadStatus::Qualified,
        };
        assert!(changed.matches(&WorkflowTrigger::LeadStatusChanged { to: None }));
        assert!(changed.matches(&WorkflowTrigger::LeadStatusChanged {
            to: Some(LeadStatus::Qualified)
        }));
        assert!(!changed.matches(&WorkflowTrigger::LeadStatusChanged {
            to: Some(LeadStatus::Lost)
        }));
        assert!(!changed.matches(&WorkflowTrigger::LeadCreated));

        let inbound = TriggerEvent::MessageReceived {
            lead_id,
            body: "What is the PRICE?".into(),
        };
        assert!(inbound.matches(&WorkflowTrigger::MessageReceived {
            keyword: Some("price".into())
        }));
        assert!(!inbound.matches(&WorkflowTrigger::MessageReceived {
            keyword: Some("demo".into())
        }));

        let tagged = TriggerEvent::TagAdded {
            lead_id,
            tag: "VIP".into(),
        };
        assert!(tagged.matches(&WorkflowTrigger::TagAdded { tag: "vip".into() }));
        assert_eq!(tagged.lead_id(), lead_id);
    }
}
