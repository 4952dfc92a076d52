//! Job bodies
//!
//! Each worker reads its input bag, talks to the registry and the external
//! sources, and drives the dispatcher. Source lookups that fail become
//! `Retry`; malformed input becomes `Failure`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::manager::Worker;
use super::{JobInput, JobOutcome, KEY_TOKEN, KEY_UPDATE, KEY_WIDGET_IDS};
use crate::dispatch::WidgetUpdateDispatcher;
use crate::error::{JobError, JobResult, SourceError};
use crate::sources::{ContentHistory, SocialGraph, TokenRegistrar};
use crate::surface::Placeholder;
use crate::widget::{ContentUpdate, RegistrationStore, WidgetRegistration};

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct JobContext {
    pub user_id: String,
    pub store: Arc<dyn RegistrationStore>,
    pub social: Arc<dyn SocialGraph>,
    pub history: Arc<dyn ContentHistory>,
    pub tokens: Arc<dyn TokenRegistrar>,
    pub dispatcher: WidgetUpdateDispatcher,
}

impl JobContext {
    /// Redraw `registrations` from the latest content of their senders
    ///
    /// Each registration draws the most recent update among friends its
    /// filter accepts. Registrations resolving to the same update are
    /// dispatched together so the sender is looked up once.
    async fn refresh(&self, registrations: &[WidgetRegistration]) -> JobResult<()> {
        if registrations.is_empty() {
            debug!("No widgets to refresh");
            return Ok(());
        }

        let friends = self.social.get_connection_ids(&self.user_id).await?;
        if friends.is_empty() {
            info!(widgets = registrations.len(), "Friend list empty");
            self.dispatcher
                .show_placeholder(registrations, Placeholder::EmptyFriends)
                .await?;
            return Ok(());
        }

        let mut latest: HashMap<BTreeSet<String>, Option<ContentUpdate>> = HashMap::new();
        let mut groups: Vec<(ContentUpdate, Vec<WidgetRegistration>)> = Vec::new();
        let mut empty = Vec::new();

        for registration in registrations {
            let senders: BTreeSet<String> = friends
                .iter()
                .filter(|friend| registration.accepts(friend))
                .cloned()
                .collect();

            let update = match latest.get(&senders) {
                Some(update) => update.clone(),
                None => {
                    let update = self.last_photo(&senders).await?;
                    latest.insert(senders, update.clone());
                    update
                }
            };

            match update {
                Some(update) => match groups.iter_mut().find(|(u, _)| *u == update) {
                    Some((_, targets)) => targets.push(registration.clone()),
                    None => groups.push((update, vec![registration.clone()])),
                },
                None => empty.push(registration.clone()),
            }
        }

        if !empty.is_empty() {
            self.dispatcher
                .show_placeholder(&empty, Placeholder::EmptyPhoto)
                .await?;
        }

        let mut rejected = Vec::new();
        for (update, targets) in &groups {
            let report = self.dispatcher.dispatch(update, targets).await;
            rejected.extend(report.failures);
        }

        match rejected.into_iter().next() {
            None => Ok(()),
            Some((_, e)) => Err(e.into()),
        }
    }

    async fn last_photo(&self, senders: &BTreeSet<String>) -> JobResult<Option<ContentUpdate>> {
        if senders.is_empty() {
            return Ok(None);
        }
        let senders: Vec<String> = senders.iter().cloned().collect();
        match self
            .history
            .get_last_photo_from_senders(&self.user_id, &senders)
            .await
        {
            Ok(update) => Ok(update),
            Err(SourceError::NotFound(what)) => {
                debug!(what = %what, "No photo history");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Enrolls newly placed widgets and draws them
pub struct InitWorker {
    ctx: Arc<JobContext>,
}

impl InitWorker {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, input: &JobInput) -> JobResult<()> {
        let ids = input.ids(KEY_WIDGET_IDS)?;
        let mut placed = Vec::with_capacity(ids.len());
        for id in ids {
            placed.push(self.ctx.store.get_or_create(id).await?);
        }
        info!(widgets = ?placed.iter().map(|r| r.id).collect::<Vec<_>>(), "Widgets enrolled");
        self.ctx.refresh(&placed).await
    }
}

#[async_trait]
impl Worker for InitWorker {
    async fn do_work(&self, input: &JobInput) -> JobOutcome {
        self.run(input).await.into()
    }
}

/// Redraws every registered widget
pub struct RefreshWorker {
    ctx: Arc<JobContext>,
}

impl RefreshWorker {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self) -> JobResult<()> {
        let registrations = self.ctx.store.get_all().await?;
        self.ctx.refresh(&registrations).await
    }
}

#[async_trait]
impl Worker for RefreshWorker {
    async fn do_work(&self, _input: &JobInput) -> JobOutcome {
        self.run().await.into()
    }
}

/// Draws one pushed update on every widget that accepts it
pub struct SingleUpdateWorker {
    ctx: Arc<JobContext>,
}

impl SingleUpdateWorker {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, input: &JobInput) -> JobResult<()> {
        let update: ContentUpdate = serde_json::from_str(input.str(KEY_UPDATE)?)
            .map_err(|e| JobError::InvalidInput(format!("update payload: {}", e)))?;

        if update.sender_id == self.ctx.user_id {
            debug!("Own content, nothing to draw");
            return Ok(());
        }

        let friends = self.ctx.social.get_connection_ids(&self.ctx.user_id).await?;
        if !friends.contains(&update.sender_id) {
            warn!(sender = %update.sender_id, "Update from non-friend ignored");
            return Ok(());
        }

        let registrations = self.ctx.store.get_all().await?;
        let report = self.ctx.dispatcher.dispatch(&update, &registrations).await;
        match report.failures.into_iter().next() {
            None => Ok(()),
            Some((_, e)) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Worker for SingleUpdateWorker {
    async fn do_work(&self, input: &JobInput) -> JobOutcome {
        self.run(input).await.into()
    }
}

/// Forwards a rotated push token
pub struct TokenRefreshWorker {
    ctx: Arc<JobContext>,
}

impl TokenRefreshWorker {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, input: &JobInput) -> JobResult<()> {
        let token = input.str(KEY_TOKEN)?;
        self.ctx.tokens.register_token(&self.ctx.user_id, token).await?;
        Ok(())
    }
}

#[async_trait]
impl Worker for TokenRefreshWorker {
    async fn do_work(&self, input: &JobInput) -> JobOutcome {
        self.run(input).await.into()
    }
}

/// Purges removed widgets
pub struct RemoveWorker {
    store: Arc<dyn RegistrationStore>,
}

impl RemoveWorker {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    async fn run(&self, input: &JobInput) -> JobResult<()> {
        let ids = input.ids(KEY_WIDGET_IDS)?;
        self.store.remove(&ids).await?;
        info!(widgets = ?ids, "Widgets removed");
        Ok(())
    }
}

#[async_trait]
impl Worker for RemoveWorker {
    async fn do_work(&self, input: &JobInput) -> JobOutcome {
        self.run(input).await.into()
    }
}
