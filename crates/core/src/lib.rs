pub mod artifacts;
pub mod audit;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod flows;
pub mod notifications;
pub mod store;

pub use artifacts::{
    Artifact, ArtifactCache, ArtifactHandle, ArtifactKey, ArtifactSource, ArtifactTier,
    DocumentRenderer, MemoryTier, RenderError, RenderedDocument, TierError,
};
pub use delivery::{
    DeliveryChannel, DeliveryPipeline, DeliveryReport, DeliveryResult, MessageComposer,
    OutboundMessage,
};
pub use domain::purchase_order::{
    LineItem, NewPurchaseOrder, OrderStatus, PricingTerms, PurchaseOrder, PurchaseOrderId, Totals,
};
pub use domain::vendor::{Vendor, VendorField, VendorRepair};
pub use engine::{DecisionOutcome, OrderEngine, SubmissionOutcome};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationError};
pub use events::{BusEvent, EventBus, EventSubscriber, EventType, Severity, ThrottlePolicy};
pub use flows::Decision;
pub use notifications::{Notification, NotificationQueue};
pub use store::{PurchaseOrderStore, StoreError};
