pub mod engine;
pub mod states;
pub mod submission;

pub use engine::{FlowTransitionError, OrderFlow};
pub use states::{Decision, FlowAction, OrderEvent, TransitionOutcome};
pub use submission::check_submission;
