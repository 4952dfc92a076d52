//! Update fan-out
//!
//! Decides which registered widgets receive a content update and whether the
//! sender's identity is needed, resolves that identity once, then hands each
//! target to the composition engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::engine::WidgetCompositionEngine;
use crate::error::{ComposeError, ComposeResult};
use crate::sources::IdentitySource;
use crate::surface::{Placeholder, SurfaceSink, SurfaceUpdate};
use crate::widget::{ContentUpdate, SenderInfo, WidgetRegistration};

/// Composites one update onto one widget
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(
        &self,
        update: &ContentUpdate,
        registration: &WidgetRegistration,
        sender_info: Option<&SenderInfo>,
    ) -> ComposeResult<()>;
}

#[async_trait]
impl Compositor for WidgetCompositionEngine {
    async fn composite(
        &self,
        update: &ContentUpdate,
        registration: &WidgetRegistration,
        sender_info: Option<&SenderInfo>,
    ) -> ComposeResult<()> {
        WidgetCompositionEngine::composite(self, update, registration, sender_info).await
    }
}

/// A widget selected to receive an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub registration: WidgetRegistration,
    pub needs_sender_info: bool,
}

/// Targets of `update` among `registrations`, in registration order
///
/// A reaction is drawn inside the sender overlay, so it needs sender info
/// only where the overlay already does and never widens the set.
pub fn route(update: &ContentUpdate, registrations: &[WidgetRegistration]) -> Vec<Target> {
    registrations
        .iter()
        .filter(|registration| registration.accepts(&update.sender_id))
        .map(|registration| Target {
            registration: registration.clone(),
            needs_sender_info: registration.shows_sender_overlay() || update.is_mood(),
        })
        .collect()
}

/// Result of one dispatch
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Widgets the update was routed to
    pub targets: Vec<i32>,
    /// Widgets whose composition failed its preconditions
    pub failures: Vec<(i32, ComposeError)>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes updates to widgets and drives their composition
#[derive(Clone)]
pub struct WidgetUpdateDispatcher {
    identity: Arc<dyn IdentitySource>,
    compositor: Arc<dyn Compositor>,
    sink: Arc<dyn SurfaceSink>,
}

impl WidgetUpdateDispatcher {
    pub fn new(
        identity: Arc<dyn IdentitySource>,
        compositor: Arc<dyn Compositor>,
        sink: Arc<dyn SurfaceSink>,
    ) -> Self {
        Self {
            identity,
            compositor,
            sink,
        }
    }

    /// Route `update` and composite it onto every target
    ///
    /// Sender identity is looked up at most once and shared by all targets
    /// that need it. A failed lookup leaves every target without it.
    pub async fn dispatch(
        &self,
        update: &ContentUpdate,
        registrations: &[WidgetRegistration],
    ) -> DispatchReport {
        let targets = route(update, registrations);
        let mut report = DispatchReport {
            targets: targets.iter().map(|t| t.registration.id).collect(),
            failures: Vec::new(),
        };

        if targets.is_empty() {
            debug!(sender = %update.sender_id, "No widget accepts update");
            return report;
        }

        let sender_info = if targets.iter().any(|t| t.needs_sender_info) {
            self.resolve_sender(&update.sender_id).await
        } else {
            None
        };

        for target in &targets {
            let info = sender_info.as_ref().filter(|_| target.needs_sender_info);
            if let Err(e) = self
                .compositor
                .composite(update, &target.registration, info)
                .await
            {
                warn!(widget_id = target.registration.id, error = %e, "Composition rejected");
                report.failures.push((target.registration.id, e));
            }
        }

        info!(
            sender = %update.sender_id,
            targets = report.targets.len(),
            failures = report.failures.len(),
            "Update dispatched"
        );
        report
    }

    /// Push a placeholder to every registration without compositing
    pub async fn show_placeholder(
        &self,
        registrations: &[WidgetRegistration],
        placeholder: Placeholder,
    ) -> ComposeResult<()> {
        for registration in registrations {
            self.sink
                .push(registration.id, SurfaceUpdate::placeholder(placeholder))
                .await?;
        }
        info!(
            widgets = registrations.len(),
            placeholder = ?placeholder,
            "Placeholder shown"
        );
        Ok(())
    }

    async fn resolve_sender(&self, sender_id: &str) -> Option<SenderInfo> {
        match self.identity.get_user(sender_id).await {
            Ok(info) if !info.photo_link.is_empty() => Some(info),
            Ok(_) => {
                warn!(sender = %sender_id, "Sender has no photo, overlay dropped");
                None
            }
            Err(e) => {
                warn!(sender = %sender_id, error = %e, "Sender lookup failed, overlay dropped");
                None
            }
        }
    }
}
