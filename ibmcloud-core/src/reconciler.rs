//! Reconciler - Drive one remote object through its lifecycle
//!
//! The Reconciler issues the create/update/delete call and then waits, using
//! the StatePoller, until the remote side has caught up. Nothing is rolled
//! back: a failed or timed-out operation leaves the object as the last
//! successful call left it.

use crate::client::{RemoteClient, UpdateMode};
use crate::error::{ClientError, ReconcileError, ReconcileResult};
use crate::poller::{
    NotFoundPolicy, OperationContext, PollConfig, PollDecision, StatePoller, StatusSets,
};
use crate::resource::{Attributes, LifecycleStatus, Observation, ResourceRecord};

/// Result of a read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(ResourceRecord),
    /// The object no longer exists and should be dropped from tracking
    Gone,
}

/// Runs create/read/update/delete for the objects of one client
pub struct Reconciler<C: RemoteClient> {
    client: C,
    poll: PollConfig,
}

impl<C: RemoteClient> Reconciler<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Create an object and wait until it is available
    pub async fn create(
        &self,
        spec: Attributes,
        ctx: &OperationContext,
    ) -> ReconcileResult<ResourceRecord> {
        let kind = self.client.kind().name;
        let mut record = ResourceRecord::pending(spec);

        let id = self.client.create(&record.desired).await?;
        if id.is_empty() {
            return Err(ReconcileError::Permanent(format!(
                "{} create returned an empty identifier",
                kind
            )));
        }
        record.id = id;
        tracing::info!(kind, id = %record.id, "created, waiting for it to become available");

        let sets = self.sets(
            &[LifecycleStatus::Pending],
            LifecycleStatus::Available,
        );
        let result = self
            .poller()
            .poll(
                &record.id,
                |o| sets.classify(&o.status),
                NotFoundPolicy::Grace,
                ctx,
            )
            .await?;

        if let Some(observation) = result.observation {
            record.observe(observation);
        }
        record.advance(LifecycleStatus::Available)?;
        tracing::info!(kind, id = %record.id, attempts = result.attempts, "available");
        Ok(record)
    }

    /// Fetch an object once
    pub async fn read(&self, id: &str) -> ReconcileResult<ReadOutcome> {
        match self.client.get(id).await {
            Ok(observation) => Ok(ReadOutcome::Found(self.record_from(id, observation))),
            Err(ClientError::NotFound(_)) => {
                tracing::info!(kind = self.client.kind().name, id, "gone");
                Ok(ReadOutcome::Gone)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a partial change and wait until the object settles
    pub async fn update(
        &self,
        id: &str,
        patch: Attributes,
        ctx: &OperationContext,
    ) -> ReconcileResult<ResourceRecord> {
        let kind = self.client.kind().name;

        if patch.is_empty() {
            tracing::debug!(kind, id, "empty patch, nothing to update");
            let observation = self.client.get(id).await?;
            return Ok(self.record_from(id, observation));
        }

        let mut record = ResourceRecord::available(id, Attributes::new());
        record.desired = patch;
        record.advance(LifecycleStatus::Updating)?;

        self.client.update(id, &record.desired).await?;

        let observation = match self.client.update_mode() {
            UpdateMode::Synchronous => {
                let observation = self.client.get(id).await?;
                let vocabulary = self.client.vocabulary();
                if vocabulary.lifecycle(&observation.status) == Some(LifecycleStatus::Failed) {
                    return Err(ReconcileError::Failed {
                        id: id.to_string(),
                        status: observation.status,
                        reason: "update left the object in a failure state".to_string(),
                    });
                }
                Some(observation)
            }
            UpdateMode::Asynchronous => {
                tracing::info!(kind, id, "update accepted, waiting for it to settle");
                let sets = self.sets(
                    &[LifecycleStatus::Updating, LifecycleStatus::Pending],
                    LifecycleStatus::Available,
                );
                self.poller()
                    .poll(id, |o| sets.classify(&o.status), NotFoundPolicy::Grace, ctx)
                    .await?
                    .observation
            }
        };

        if let Some(observation) = observation {
            record.observe(observation);
        }
        record.advance(LifecycleStatus::Available)?;
        Ok(record)
    }

    /// Delete an object and wait until it is gone
    ///
    /// Deleting an object that does not exist succeeds without calling the
    /// remote delete.
    pub async fn delete(
        &self,
        id: &str,
        ctx: &OperationContext,
    ) -> ReconcileResult<ResourceRecord> {
        let kind = self.client.kind().name;

        let current = match self.client.get(id).await {
            Ok(observation) => observation,
            Err(ClientError::NotFound(_)) => {
                tracing::info!(kind, id, "already deleted");
                return Ok(deleted_record(id, Attributes::new()));
            }
            Err(err) => return Err(err.into()),
        };

        let mut record = ResourceRecord::available(id, current.attributes);
        record.advance(LifecycleStatus::Deleting)?;

        match self.client.delete(id).await {
            Ok(()) => {}
            Err(ClientError::NotFound(_)) => {
                record.advance(LifecycleStatus::Deleted)?;
                return Ok(record);
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(kind, id, "delete accepted, waiting for it to disappear");

        let vocabulary = self.client.vocabulary();
        let deleted = vocabulary.statuses(LifecycleStatus::Deleted).to_vec();
        let failed = vocabulary.statuses(LifecycleStatus::Failed).to_vec();
        let classify = |o: &Observation| {
            let is = |set: &[String]| set.iter().any(|s| s.eq_ignore_ascii_case(&o.status));
            if is(&deleted) {
                PollDecision::Success
            } else if is(&failed) {
                PollDecision::Failure(format!("deletion failed in status '{}'", o.status))
            } else {
                PollDecision::Continue
            }
        };
        let result = self
            .poller()
            .poll(id, classify, NotFoundPolicy::Success, ctx)
            .await?;

        if let Some(observation) = result.observation {
            record.observe(observation);
        }
        record.advance(LifecycleStatus::Deleted)?;
        tracing::info!(kind, id, attempts = result.attempts, "deleted");
        Ok(record)
    }

    fn poller(&self) -> StatePoller<'_, C> {
        StatePoller::new(&self.client, self.poll)
    }

    fn sets(&self, pending: &[LifecycleStatus], target: LifecycleStatus) -> StatusSets {
        let vocabulary = self.client.vocabulary();
        StatusSets {
            pending: pending
                .iter()
                .flat_map(|phase| vocabulary.statuses(*phase).iter().cloned())
                .collect(),
            target: vocabulary.statuses(target).to_vec(),
            failed: vocabulary.statuses(LifecycleStatus::Failed).to_vec(),
        }
    }

    fn record_from(&self, id: &str, observation: Observation) -> ResourceRecord {
        let status = self
            .client
            .vocabulary()
            .lifecycle(&observation.status)
            .unwrap_or_else(|| {
                tracing::debug!(id, status = %observation.status, "unrecognised status");
                LifecycleStatus::Pending
            });
        ResourceRecord {
            id: id.to_string(),
            desired: Attributes::new(),
            observed: observation.attributes,
            status,
        }
    }
}

fn deleted_record(id: &str, observed: Attributes) -> ResourceRecord {
    ResourceRecord {
        id: id.to_string(),
        desired: Attributes::new(),
        observed,
        status: LifecycleStatus::Deleted,
    }
}
