use leadflow_core::types::{AudienceStatus, CampaignStatus};
use leadflow_core::{LeadflowError, LeadflowResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignTrigger {
    Start,
    Schedule,
    Pause,
    Resume,
    Cancel,
    Complete,
    /// Manual retry of failed members on a finished campaign.
    Reopen,
}

impl fmt::Display for CampaignTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Schedule => "schedule",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
            Self::Reopen => "reopen",
        };
        f.write_str(name)
    }
}

/// One allowed campaign status change and the operation that causes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub trigger: CampaignTrigger,
}

/// Finite set of legal campaign lifecycle moves.
#[derive(Debug, Clone)]
pub struct CampaignStateMachine {
    transitions: Vec<StateTransition>,
}

impl CampaignStateMachine {
    pub fn new() -> Self {
        use CampaignStatus::*;
        use CampaignTrigger as T;

        let table = [
            (Draft, Running, T::Start),
            (Scheduled, Running, T::Start),
            (Draft, Scheduled, T::Schedule),
            (Scheduled, Scheduled, T::Schedule),
            (Running, Paused, T::Pause),
            (Paused, Running, T::Resume),
            (Draft, Cancelled, T::Cancel),
            (Scheduled, Cancelled, T::Cancel),
            (Running, Cancelled, T::Cancel),
            (Paused, Cancelled, T::Cancel),
            (Running, Completed, T::Complete),
            (Completed, Running, T::Reopen),
        ];
        Self {
            transitions: table
                .into_iter()
                .map(|(from, to, trigger)| StateTransition { from, to, trigger })
                .collect(),
        }
    }

    pub fn can_transition(&self, from: CampaignStatus, to: CampaignStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Target status for `trigger` applied in `from`.
    pub fn next(&self, from: CampaignStatus, trigger: CampaignTrigger) -> LeadflowResult<CampaignStatus> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.trigger == trigger)
            .map(|t| t.to)
            .ok_or_else(|| LeadflowError::transition(from, trigger))
    }
}

impl Default for CampaignStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Legal moves for a single audience member.
pub struct AudienceStateMachine;

impl AudienceStateMachine {
    pub fn can_transition(from: AudienceStatus, to: AudienceStatus) -> bool {
        use AudienceStatus::*;
        match from {
            Pending => to != Pending,
            InProgress | Waiting => to != Pending,
            Failed => matches!(to, InProgress | Cancelled),
            Completed | OptedOut | Cancelled => false,
        }
    }

    pub fn ensure(from: AudienceStatus, to: AudienceStatus) -> LeadflowResult<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(LeadflowError::transition(from, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CampaignStatus::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let sm = CampaignStateMachine::new();
        assert_eq!(sm.next(Draft, CampaignTrigger::Schedule).unwrap(), Scheduled);
        assert_eq!(sm.next(Scheduled, CampaignTrigger::Start).unwrap(), Running);
        assert_eq!(sm.next(Running, CampaignTrigger::Pause).unwrap(), Paused);
        assert_eq!(sm.next(Paused, CampaignTrigger::Resume).unwrap(), Running);
        assert_eq!(sm.next(Running, CampaignTrigger::Complete).unwrap(), Completed);
    }

    #[test]
    fn test_invalid_moves_rejected() {
        let sm = CampaignStateMachine::new();
        assert!(matches!(
            sm.next(Paused, CampaignTrigger::Start),
            Err(LeadflowError::InvalidTransition { .. })
        ));
        assert!(sm.next(Cancelled, CampaignTrigger::Resume).is_err());
        assert!(sm.next(Completed, CampaignTrigger::Cancel).is_err());
        assert!(sm.next(Draft, CampaignTrigger::Pause).is_err());
        assert!(!sm.can_transition(Cancelled, Running));
    }

    #[test]
    fn test_audience_transitions() {
        use AudienceStatus as A;
        assert!(AudienceStateMachine::can_transition(A::Pending, A::InProgress));
        assert!(AudienceStateMachine::can_transition(A::Waiting, A::Waiting));
        assert!(AudienceStateMachine::can_transition(A::InProgress, A::OptedOut));
        assert!(AudienceStateMachine::can_transition(A::Failed, A::InProgress));
        assert!(!AudienceStateMachine::can_transition(A::Failed, A::Completed));
        assert!(!AudienceStateMachine::can_transition(A::Completed, A::InProgress));
        assert!(!AudienceStateMachine::can_transition(A::OptedOut, A::InProgress));
        assert!(AudienceStateMachine::ensure(A::Cancelled, A::Pending).is_err());
    }
}
