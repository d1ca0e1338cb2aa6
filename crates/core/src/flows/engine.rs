use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::purchase_order::OrderStatus;
use crate::flows::states::{FlowAction, OrderEvent, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: OrderStatus, event: OrderEvent },
}

/// Transition table for the purchase-order lifecycle.
#[derive(Clone, Debug, Default)]
pub struct OrderFlow;

impl OrderFlow {
    pub fn apply(
        &self,
        current: OrderStatus,
        event: OrderEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: OrderStatus,
        event: OrderEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: OrderStatus,
    event: OrderEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        DeliverApproval, DeliverRejection, GenerateArtifact, PublishApproved, PublishCompleted,
        PublishRejected, PublishSubmitted,
    };
    use OrderEvent::{ApprovalDenied, ApprovalGranted, FulfillmentConfirmed, SubmitRequested};
    use OrderStatus::{Approved, Completed, Draft, Pending, Rejected};

    let (to, actions) = match (current, event) {
        (Draft, SubmitRequested) => (Pending, vec![PublishSubmitted]),
        (Pending, ApprovalGranted) => {
            (Approved, vec![PublishApproved, GenerateArtifact, DeliverApproval])
        }
        (Pending, ApprovalDenied) => (Rejected, vec![PublishRejected, DeliverRejection]),
        (Approved, FulfillmentConfirmed) => (Completed, vec![PublishCompleted]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}
