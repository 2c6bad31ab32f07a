use thiserror::Error;

use crate::types::{CombatInstanceId, FloorId, MonsterId, NodeId, ParticipantId};

/// Ordinary game-logic rejections. Every variant renders to a reason string
/// suitable for direct display to the participant.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Denial {
    #[error("no position found for {0} on floor {1}")]
    PositionNotFound(ParticipantId, FloorId),
    #[error("node {0} does not exist on floor {1}")]
    InvalidTarget(NodeId, FloorId),
    #[error("no connection leads from {0} to {1}")]
    NoPath(NodeId, NodeId),
    #[error("not enough movement points: have {have:.2}, need {need:.2}")]
    InsufficientMovementPoints { have: f64, need: f64 },
    #[error("node {0} is already at capacity")]
    NodeAtCapacity(NodeId),
    #[error("node {0} is locked ({1})")]
    NodeLocked(NodeId, String),
    #[error("no start point available on floor {0}: {1}")]
    NoStartPointAvailable(FloorId, String),
    #[error("floor {0} has no nodes")]
    NoNodesOnFloor(FloorId),
    #[error("{0} must be in a party engaged at this node to join the combat")]
    PartyMembershipRequired(ParticipantId),
    #[error("combat instance {0} already has a full roster")]
    CombatInstanceFull(CombatInstanceId),
    #[error("combat instance {0} not found")]
    CombatInstanceNotFound(CombatInstanceId),
    #[error("no character data available for {0}")]
    CharacterDataRequired(ParticipantId),
}

impl Denial {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Infrastructure faults. Unlike [`Denial`], these abort the operation and
/// must be surfaced to the caller for retry/backoff decisions.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StoreError {
    #[error("floor {0} is not defined")]
    FloorNotFound(FloorId),
    #[error("node {0} is not defined")]
    NodeNotFound(NodeId),
    #[error("monster {0} is not defined")]
    MonsterNotFound(MonsterId),
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Denied(#[from] Denial),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            CoreError::Denied(denial) => Some(denial),
            CoreError::Store(_) => None,
        }
    }

    pub fn is_denial(&self) -> bool {
        self.denial().is_some()
    }
}
