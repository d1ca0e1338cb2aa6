use serde::{Deserialize, Serialize};

use crate::domain::purchase_order::OrderStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderEvent {
    SubmitRequested,
    ApprovalGranted,
    ApprovalDenied,
    FulfillmentConfirmed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn event(&self) -> OrderEvent {
        match self {
            Self::Approve => OrderEvent::ApprovalGranted,
            Self::Reject => OrderEvent::ApprovalDenied,
        }
    }
}

/// Follow-up work a transition schedules once it has been committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PublishSubmitted,
    PublishApproved,
    PublishRejected,
    PublishCompleted,
    GenerateArtifact,
    DeliverApproval,
    DeliverRejection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub event: OrderEvent,
    pub actions: Vec<FlowAction>,
}
