//! Order lifecycle orchestration.
//!
//! Every transition commits to the store before anything else happens. Document generation
//! and vendor delivery run afterwards on spawned tasks whose outcome is reported on the
//! event bus; a failed delivery never rolls a decision back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactCache, ArtifactHandle};
use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::delivery::{DeliveryPipeline, DeliveryReport, DeliveryResult, MessageComposer};
use crate::domain::purchase_order::{
    LineItem, NewPurchaseOrder, OrderStatus, PricingTerms, PurchaseOrder, PurchaseOrderId,
};
use crate::domain::vendor::VendorRepair;
use crate::errors::{ApplicationError, DomainError, ValidationError};
use crate::events::{EventBus, EventType};
use crate::flows::{
    check_submission, Decision, FlowAction, OrderEvent, OrderFlow, TransitionOutcome,
};
use crate::store::PurchaseOrderStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub po: PurchaseOrder,
    pub repairs: Vec<VendorRepair>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Decided { po: PurchaseOrder },
    AlreadyDecided { status: OrderStatus, rejection_reason: Option<String> },
}

/// Collaborators the post-commit tasks need after the request that spawned them returns.
struct SideEffects {
    cache: Arc<ArtifactCache>,
    delivery: Arc<DeliveryPipeline>,
    composer: MessageComposer,
    bus: EventBus,
    audit: Arc<dyn AuditSink>,
}

pub struct OrderEngine {
    store: Arc<dyn PurchaseOrderStore>,
    effects: Arc<SideEffects>,
    flow: OrderFlow,
    default_pricing: PricingTerms,
    order_locks: Mutex<HashMap<PurchaseOrderId, Arc<AsyncMutex<()>>>>,
    pending_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn PurchaseOrderStore>,
        cache: Arc<ArtifactCache>,
        delivery: Arc<DeliveryPipeline>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            effects: Arc::new(SideEffects {
                cache,
                delivery,
                composer: MessageComposer::default(),
                bus,
                audit: Arc::new(TracingAuditSink),
            }),
            flow: OrderFlow,
            default_pricing: PricingTerms::default(),
            order_locks: Mutex::new(HashMap::new()),
            pending_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.effects = Arc::new(SideEffects {
            cache: Arc::clone(&self.effects.cache),
            delivery: Arc::clone(&self.effects.delivery),
            composer: self.effects.composer.clone(),
            bus: self.effects.bus.clone(),
            audit,
        });
        self
    }

    pub fn with_composer(mut self, composer: MessageComposer) -> Self {
        self.effects = Arc::new(SideEffects {
            cache: Arc::clone(&self.effects.cache),
            delivery: Arc::clone(&self.effects.delivery),
            composer,
            bus: self.effects.bus.clone(),
            audit: Arc::clone(&self.effects.audit),
        });
        self
    }

    pub fn with_default_pricing(mut self, pricing: PricingTerms) -> Self {
        self.default_pricing = pricing;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.effects.bus
    }

    pub async fn create_draft(
        &self,
        input: NewPurchaseOrder,
        actor: &str,
    ) -> Result<PurchaseOrder, ApplicationError> {
        let po = PurchaseOrder::new_draft(input, &self.default_pricing, actor)?;
        self.persist(&po).await?;

        let context = audit_context(&po.id, actor);
        self.effects.audit.emit(AuditEvent::from_context(
            &context,
            "order.draft_created",
            AuditCategory::Persistence,
            AuditOutcome::Success,
        ));
        info!(
            event_name = "order.draft_created",
            correlation_id = %context.correlation_id,
            po_id = %po.id,
            order_number = %po.order_number,
            "draft purchase order created"
        );
        Ok(po)
    }

    pub async fn update_draft_items(
        &self,
        po_id: &PurchaseOrderId,
        items: Vec<LineItem>,
    ) -> Result<PurchaseOrder, ApplicationError> {
        let _guard = self.order_lock(po_id).lock_owned().await;
        let mut po = self.load(po_id).await?;
        po.replace_items(items)?;
        self.persist(&po).await?;
        debug!(event_name = "order.items_replaced", po_id = %po.id, items = po.items.len(), "draft items replaced");
        Ok(po)
    }

    pub async fn submit_for_approval(
        &self,
        po_id: &PurchaseOrderId,
        actor: &str,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let _guard = self.order_lock(po_id).lock_owned().await;
        let mut po = self.load(po_id).await?;
        let context = audit_context(po_id, actor);
        let event = OrderEvent::SubmitRequested;

        if self.flow.apply(po.status, event).is_ok() {
            if let Err(error) = check_submission(&po) {
                self.audit_validation_failure(&context, &error);
                return Err(error.into());
            }
        }
        let transition = self.plan(po.status, event, &context)?;

        let repairs = po.vendor.repair_contact();
        for repair in &repairs {
            self.effects.audit.emit(
                AuditEvent::from_context(
                    &context,
                    "order.vendor_contact_synthesized",
                    AuditCategory::Validation,
                    AuditOutcome::Success,
                )
                .with_metadata("field", format!("{:?}", repair.field).to_ascii_lowercase())
                .with_metadata("value", repair.value.clone()),
            );
            warn!(
                event_name = "order.vendor_contact_synthesized",
                correlation_id = %context.correlation_id,
                po_id = %po.id,
                field = ?repair.field,
                value = %repair.value,
                "vendor contact was missing and has been synthesized"
            );
        }

        po.transition_to(transition.to)?;
        self.persist(&po).await?;
        self.run_actions(&transition, &po, context);

        Ok(SubmissionOutcome { po, repairs })
    }

    pub async fn decide(
        &self,
        po_id: &PurchaseOrderId,
        decision: Decision,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let _guard = self.order_lock(po_id).lock_owned().await;
        let mut po = self.load(po_id).await?;
        let context = audit_context(po_id, actor);

        if po.status.is_decided() {
            debug!(
                event_name = "order.decision_ignored",
                correlation_id = %context.correlation_id,
                po_id = %po.id,
                status = po.status.as_str(),
                "order already decided; nothing to do"
            );
            return Ok(DecisionOutcome::AlreadyDecided {
                status: po.status,
                rejection_reason: po.rejection_reason,
            });
        }

        let event = decision.event();
        let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
        if decision == Decision::Reject
            && reason.is_none()
            && self.flow.apply(po.status, event).is_ok()
        {
            let error = ValidationError::MissingRejectionReason;
            self.audit_validation_failure(&context, &error);
            return Err(error.into());
        }
        let transition = self.plan(po.status, event, &context)?;

        match (decision, reason) {
            (Decision::Reject, Some(reason)) => po.reject(reason, actor)?,
            (Decision::Reject, None) => return Err(ValidationError::MissingRejectionReason.into()),
            (Decision::Approve, _) => po.approve(actor)?,
        }
        self.persist(&po).await?;

        info!(
            event_name = "order.decided",
            correlation_id = %context.correlation_id,
            po_id = %po.id,
            status = po.status.as_str(),
            actor,
            "purchase order decided"
        );

        self.run_actions(&transition, &po, context);
        Ok(DecisionOutcome::Decided { po })
    }

    pub async fn complete(
        &self,
        po_id: &PurchaseOrderId,
        actor: &str,
    ) -> Result<PurchaseOrder, ApplicationError> {
        let _guard = self.order_lock(po_id).lock_owned().await;
        let mut po = self.load(po_id).await?;
        let context = audit_context(po_id, actor);

        let transition = self.plan(po.status, OrderEvent::FulfillmentConfirmed, &context)?;
        po.transition_to(transition.to)?;
        self.persist(&po).await?;
        self.run_actions(&transition, &po, context);
        Ok(po)
    }

    pub async fn delete_draft(
        &self,
        po_id: &PurchaseOrderId,
        actor: &str,
    ) -> Result<(), ApplicationError> {
        {
            let _guard = self.order_lock(po_id).lock_owned().await;
            let po = self.load(po_id).await?;
            if !po.is_deletable() {
                return Err(DomainError::NotEditable { status: po.status }.into());
            }
            self.store.delete(po_id).await?;
            self.effects.cache.invalidate(po_id).await;
            self.effects.audit.emit(AuditEvent::from_context(
                &audit_context(po_id, actor),
                "order.draft_deleted",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            ));
        }
        lock(&self.order_locks).remove(po_id);
        Ok(())
    }

    pub async fn get_or_create_artifact(
        &self,
        po_id: &PurchaseOrderId,
    ) -> Result<ArtifactHandle, ApplicationError> {
        let po = self.load(po_id).await?;
        fetch_artifact(&self.effects, &po)
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))
    }

    /// Publishes an arbitrary event; known type names map onto the built-in types.
    pub fn notify(&self, event_type: &str, data: Value) {
        self.effects.bus.publish(EventType::parse(event_type), data);
    }

    pub async fn load(&self, po_id: &PurchaseOrderId) -> Result<PurchaseOrder, ApplicationError> {
        self.store.load(po_id).await?.ok_or_else(|| ApplicationError::NotFound(po_id.0.clone()))
    }

    pub async fn list_pending(&self) -> Result<Vec<PurchaseOrder>, ApplicationError> {
        Ok(self.store.list_pending().await?)
    }

    pub async fn list_by_site(&self, site: &str) -> Result<Vec<PurchaseOrder>, ApplicationError> {
        Ok(self.store.list_by_site(site).await?)
    }

    /// Awaits every post-commit task spawned so far.
    pub async fn wait_for_side_effects(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = lock(&self.pending_tasks).drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(event_name = "order.side_effect_aborted", error = %error, "post-commit task did not finish");
                }
            }
        }
    }

    async fn persist(&self, po: &PurchaseOrder) -> Result<(), ApplicationError> {
        po.check_invariants()?;
        self.store.save(po).await?;
        Ok(())
    }

    fn plan(
        &self,
        status: OrderStatus,
        event: OrderEvent,
        context: &AuditContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        self.flow
            .apply_with_audit(status, event, self.effects.audit.as_ref(), context)
            .map_err(|error| DomainError::from(error).into())
    }

    fn audit_validation_failure(&self, context: &AuditContext, error: &ValidationError) {
        self.effects.audit.emit(
            AuditEvent::from_context(
                context,
                "order.validation_failed",
                AuditCategory::Validation,
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        );
    }

    fn order_lock(&self, po_id: &PurchaseOrderId) -> Arc<AsyncMutex<()>> {
        Arc::clone(lock(&self.order_locks).entry(po_id.clone()).or_default())
    }

    /// Publishes the transition's events now and hands document and delivery work to a
    /// background task.
    fn run_actions(&self, transition: &TransitionOutcome, po: &PurchaseOrder, context: AuditContext) {
        let mut deferred = Vec::new();
        for action in &transition.actions {
            match action {
                FlowAction::PublishSubmitted => {
                    self.effects.bus.publish(EventType::OrderSubmitted, order_payload(po));
                }
                FlowAction::PublishApproved => {
                    self.effects.bus.publish(EventType::OrderApproved, order_payload(po));
                }
                FlowAction::PublishRejected => {
                    let mut payload = order_payload(po);
                    payload["reason"] = json!(po.rejection_reason);
                    self.effects.bus.publish(EventType::OrderRejected, payload);
                }
                FlowAction::PublishCompleted => {
                    self.effects.bus.publish(EventType::OrderCompleted, order_payload(po));
                }
                FlowAction::GenerateArtifact
                | FlowAction::DeliverApproval
                | FlowAction::DeliverRejection => deferred.push(*action),
            }
        }
        if !deferred.is_empty() {
            self.spawn_side_effects(po.clone(), context, deferred);
        }
    }

    fn spawn_side_effects(&self, po: PurchaseOrder, context: AuditContext, actions: Vec<FlowAction>) {
        let effects = Arc::clone(&self.effects);
        let handle = tokio::spawn(async move {
            run_deferred(effects, po, context, actions).await;
        });
        let mut pending = lock(&self.pending_tasks);
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }
}

async fn run_deferred(
    effects: Arc<SideEffects>,
    po: PurchaseOrder,
    context: AuditContext,
    actions: Vec<FlowAction>,
) {
    let mut artifact: Option<Arc<crate::artifacts::Artifact>> = None;
    for action in actions {
        let message = match action {
            FlowAction::GenerateArtifact => {
                match fetch_artifact(&effects, &po).await {
                    Ok(handle) => artifact = Some(handle.artifact),
                    Err(error) => {
                        warn!(
                            event_name = "order.document_failed",
                            correlation_id = %context.correlation_id,
                            po_id = %po.id,
                            error = %error,
                            "approval document could not be generated; vendor not notified"
                        );
                        let mut payload = order_payload(&po);
                        payload["error"] = json!(error.to_string());
                        effects.bus.publish(EventType::DeliveryFailed, payload);
                        return;
                    }
                }
                continue;
            }
            FlowAction::DeliverApproval => effects.composer.approval(&po, artifact.as_deref()),
            FlowAction::DeliverRejection => effects.composer.rejection(&po),
            _ => continue,
        };

        let report = effects.delivery.deliver(&message).await;
        record_delivery(&effects, &po, &context, &report);
    }
}

async fn fetch_artifact(
    effects: &SideEffects,
    po: &PurchaseOrder,
) -> Result<ArtifactHandle, crate::artifacts::CacheError> {
    let handle = effects.cache.get_or_create(po).await?;
    if !handle.warnings.is_empty() {
        let mut payload = order_payload(po);
        payload["warnings"] = json!(handle.warnings);
        payload["message"] = json!(handle
            .warnings
            .iter()
            .map(|warning| format!("{}: {}", warning.tier, warning.message))
            .collect::<Vec<_>>()
            .join("; "));
        effects.bus.publish(EventType::ArtifactCacheWarning, payload);
    }
    Ok(handle)
}

fn record_delivery(
    effects: &SideEffects,
    po: &PurchaseOrder,
    context: &AuditContext,
    report: &DeliveryReport,
) {
    let mut payload = order_payload(po);
    payload["attempts"] = json!(report.attempts);

    match &report.result {
        DeliveryResult::Success { channel } => {
            payload["channel"] = json!(channel);
            effects.audit.emit(
                AuditEvent::from_context(
                    context,
                    "delivery.succeeded",
                    AuditCategory::Delivery,
                    AuditOutcome::Success,
                )
                .with_metadata("channel", channel.clone()),
            );
            effects.bus.publish(EventType::DeliverySucceeded, payload);
        }
        DeliveryResult::Failure(failure) => {
            warn!(
                event_name = "delivery.failed",
                correlation_id = %context.correlation_id,
                po_id = %po.id,
                attempts = report.attempts.len(),
                error = %failure,
                "vendor notification failed; order decision stands"
            );
            payload["error"] = json!(failure.to_string());
            effects.audit.emit(
                AuditEvent::from_context(
                    context,
                    "delivery.failed",
                    AuditCategory::Delivery,
                    AuditOutcome::Failed,
                )
                .with_metadata("error", failure.to_string()),
            );
            effects.bus.publish(EventType::DeliveryFailed, payload);
        }
    }
}

fn order_payload(po: &PurchaseOrder) -> Value {
    json!({
        "po_id": po.id.0,
        "order_number": po.order_number,
        "site": po.site,
        "status": po.status.as_str(),
        "total": po.totals().total.to_string(),
    })
}

fn audit_context(po_id: &PurchaseOrderId, actor: &str) -> AuditContext {
    AuditContext::new(Some(po_id.clone()), Uuid::new_v4().to_string(), actor)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
