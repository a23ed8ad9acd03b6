//! Poller - Sample remote state until a target state is reached
//!
//! The StatePoller calls `RemoteClient::get` with a fixed delay between
//! samples and hands every observation to a pure classification function.
//! Observing and interpreting are kept apart so one poller serves create,
//! update and delete alike.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::client::RemoteClient;
use crate::error::{ClientError, ReconcileError, ReconcileResult};
use crate::resource::Observation;

/// Status reported in a [`PollResult`] when the object no longer exists
pub const NOT_FOUND_STATUS: &str = "not_found";

/// Lower bound applied to `PollConfig::delay`
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(10);

/// Deadline used when the timeout does not fit in an `Instant`
const UNBOUNDED: Duration = Duration::from_secs(86400 * 365 * 30);

/// Poll loop tuning shared by all operations of a reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Minimum time between two consecutive samples, never below [`MIN_POLL_DELAY`]
    pub delay: Duration,
    /// How long a freshly created or updated object may stay invisible
    pub not_found_grace: Duration,
}

impl PollConfig {
    /// Delay actually waited between samples
    pub fn effective_delay(&self) -> Duration {
        self.delay.max(MIN_POLL_DELAY)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            not_found_grace: Duration::from_secs(30),
        }
    }
}

/// Per-call limits of one reconciler operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl OperationContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What the classifier concluded from one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    Continue,
    Success,
    Failure(String),
}

/// How a not-found answer from `get` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// The object is gone, which is what we were waiting for
    Success,
    /// The object is not visible yet; give up after the configured grace
    Grace,
}

/// Pending, target and failed status sets for the default classifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSets {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub failed: Vec<String>,
}

impl StatusSets {
    /// Statuses outside every set end the poll with a failure
    pub fn classify(&self, status: &str) -> PollDecision {
        let contains = |set: &[String]| set.iter().any(|s| s.eq_ignore_ascii_case(status));
        if contains(&self.target) {
            PollDecision::Success
        } else if contains(&self.failed) {
            PollDecision::Failure(format!("reached failure status '{}'", status))
        } else if contains(&self.pending) {
            PollDecision::Continue
        } else {
            PollDecision::Failure(format!(
                "unexpected status '{}' (pending: {:?}, target: {:?})",
                status, self.pending, self.target
            ))
        }
    }
}

/// Final sample of a successful poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub status: String,
    /// `None` when the poll ended because the object disappeared
    pub observation: Option<Observation>,
    pub attempts: u32,
}

enum Interrupted {
    Cancelled,
    Deadline,
}

/// Repeatedly samples one remote object
pub struct StatePoller<'c, C: RemoteClient> {
    client: &'c C,
    config: PollConfig,
}

impl<'c, C: RemoteClient> StatePoller<'c, C> {
    pub fn new(client: &'c C, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Poll `id` until `classify` reports success or failure
    pub async fn poll<F>(
        &self,
        id: &str,
        classify: F,
        not_found: NotFoundPolicy,
        ctx: &OperationContext,
    ) -> ReconcileResult<PollResult>
    where
        F: Fn(&Observation) -> PollDecision,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(ctx.timeout)
            .unwrap_or_else(|| started + UNBOUNDED);
        let delay = self.config.effective_delay();
        let mut attempts = 0u32;
        let mut last: Option<Observation> = None;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled { id: id.to_string() });
            }

            attempts += 1;
            let sample = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(Interrupted::Cancelled),
                _ = sleep_until(deadline) => Err(Interrupted::Deadline),
                result = self.client.get(id) => Ok(result),
            };
            let sample = match sample {
                Ok(sample) => sample,
                Err(interrupted) => return Err(self.interrupted(id, interrupted, ctx, last)),
            };

            match sample {
                Ok(observation) => match classify(&observation) {
                    PollDecision::Continue => {
                        tracing::debug!(id, status = %observation.status, attempts, "still waiting");
                        last = Some(observation);
                    }
                    PollDecision::Success => {
                        tracing::debug!(id, status = %observation.status, attempts, "target reached");
                        return Ok(PollResult {
                            status: observation.status.clone(),
                            observation: Some(observation),
                            attempts,
                        });
                    }
                    PollDecision::Failure(reason) => {
                        return Err(ReconcileError::Failed {
                            id: id.to_string(),
                            status: observation.status,
                            reason,
                        });
                    }
                },
                Err(ClientError::NotFound(_)) => match not_found {
                    NotFoundPolicy::Success => {
                        tracing::debug!(id, attempts, "object is gone");
                        return Ok(PollResult {
                            status: NOT_FOUND_STATUS.to_string(),
                            observation: None,
                            attempts,
                        });
                    }
                    NotFoundPolicy::Grace => {
                        if started.elapsed() >= self.config.not_found_grace {
                            return Err(ReconcileError::Failed {
                                id: id.to_string(),
                                status: NOT_FOUND_STATUS.to_string(),
                                reason: format!(
                                    "object not visible after {:?}",
                                    self.config.not_found_grace
                                ),
                            });
                        }
                        tracing::debug!(id, attempts, "object not visible yet");
                    }
                },
                Err(ClientError::Transient(message)) => {
                    tracing::warn!(id, attempts, %message, "transient error while polling");
                }
                Err(err @ ClientError::Permanent(_)) => return Err(err.into()),
            }

            let wake = Instant::now()
                .checked_add(delay)
                .map_or(deadline, |next| next.min(deadline));
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(self.interrupted(id, Interrupted::Cancelled, ctx, last));
                }
                _ = sleep_until(wake) => {}
            }
            if wake == deadline {
                return Err(self.interrupted(id, Interrupted::Deadline, ctx, last));
            }
        }
    }

    fn interrupted(
        &self,
        id: &str,
        interrupted: Interrupted,
        ctx: &OperationContext,
        last: Option<Observation>,
    ) -> ReconcileError {
        match interrupted {
            Interrupted::Cancelled => ReconcileError::Cancelled { id: id.to_string() },
            Interrupted::Deadline => ReconcileError::ProvisioningTimeout {
                id: id.to_string(),
                timeout: ctx.timeout,
                last_observed: last,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::client::{BoxFuture, ResourceKind, StatusVocabulary, Timeouts};
    use crate::error::ClientResult;
    use crate::resource::Attributes;

    /// Replays scripted `get` answers, repeating the last one forever
    struct ScriptedClient {
        answers: Mutex<VecDeque<ClientResult<&'static str>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedClient {
        fn new(answers: Vec<ClientResult<&'static str>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemoteClient for ScriptedClient {
        fn kind(&self) -> ResourceKind {
            ResourceKind {
                name: "scripted",
                description: "scripted object",
                timeouts: Timeouts::default(),
            }
        }

        fn vocabulary(&self) -> StatusVocabulary {
            StatusVocabulary::default()
        }

        fn create(&self, _spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
            Box::pin(async { Ok("scripted-id".to_string()) })
        }

        fn get(&self, _id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            };
            Box::pin(async move {
                answer.map(|status| Observation::new(status, Attributes::new()))
            })
        }

        fn update(&self, _id: &str, _patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete(&self, _id: &str) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn sets() -> StatusSets {
        StatusSets {
            pending: vec!["pending".to_string()],
            target: vec!["available".to_string()],
            failed: vec!["failed".to_string()],
        }
    }

    fn config() -> PollConfig {
        PollConfig {
            delay: Duration::from_secs(10),
            not_found_grace: Duration::from_secs(15),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_after_pending_samples() {
        let client = ScriptedClient::new(vec![Ok("pending"), Ok("pending"), Ok("available")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let result = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap();

        assert_eq!(result.status, "available");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_are_spaced_by_the_delay() {
        let client = ScriptedClient::new(vec![
            Ok("pending"),
            Err(ClientError::transient("503")),
            Ok("pending"),
            Ok("available"),
        ]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_while_pending_reports_last_observation() {
        let client = ScriptedClient::new(vec![Ok("pending")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(30));
        let started = Instant::now();

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert_eq!(client.calls().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        match err {
            ReconcileError::ProvisioningTimeout { last_observed, .. } => {
                assert_eq!(last_observed.unwrap().status, "pending");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_status_stops_polling() {
        let client = ScriptedClient::new(vec![Ok("pending"), Ok("failed")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Failed { ref status, .. } if status == "failed"));
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_status_is_not_a_wildcard() {
        let client = ScriptedClient::new(vec![Ok("")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_aborts_immediately() {
        let client = ScriptedClient::new(vec![Err(ClientError::permanent("403 Forbidden"))]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Permanent(_)));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_success_when_waiting_for_deletion() {
        let client = ScriptedClient::new(vec![
            Ok("deleting"),
            Err(ClientError::not_found("fip-1")),
        ]);
        let poller = StatePoller::new(&client, config());
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let result = poller
            .poll(
                "fip-1",
                |_| PollDecision::Continue,
                NotFoundPolicy::Success,
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(result.status, NOT_FOUND_STATUS);
        assert!(result.observation.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_escalates_after_grace() {
        let client = ScriptedClient::new(vec![Err(ClientError::not_found("fip-1"))]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        // samples at 0s and 10s are inside the grace, the one at 20s is not
        assert_eq!(client.calls().len(), 3);
        assert!(matches!(err, ReconcileError::Failed { ref status, .. } if status == NOT_FOUND_STATUS));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let client = ScriptedClient::new(vec![Ok("pending")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let cancel = CancellationToken::new();
        let ctx = OperationContext::with_timeout(Duration::from_secs(600)).with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            cancel.cancel();
        });
        let started = Instant::now();
        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ReconcileError::Cancelled { .. }));
        assert_eq!(client.calls().len(), 2);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_polls_until_target() {
        let client = ScriptedClient::new(vec![Ok("pending"), Ok("available")]);
        let poller = StatePoller::new(&client, config());
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::MAX);

        let result = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap();

        assert_eq!(result.status, "available");
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_delay_waits_for_the_deadline() {
        let client = ScriptedClient::new(vec![Ok("pending")]);
        let config = PollConfig {
            delay: Duration::MAX,
            ..config()
        };
        let poller = StatePoller::new(&client, config);
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_secs(30));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::ProvisioningTimeout { .. }));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_is_raised_to_the_minimum() {
        let client = ScriptedClient::new(vec![Ok("pending")]);
        let config = PollConfig {
            delay: Duration::ZERO,
            ..config()
        };
        let poller = StatePoller::new(&client, config);
        let sets = sets();
        let ctx = OperationContext::with_timeout(Duration::from_millis(50));

        let err = poller
            .poll("fip-1", |o| sets.classify(&o.status), NotFoundPolicy::Grace, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::ProvisioningTimeout { .. }));
        let calls = client.calls();
        // samples at 0, 10, 20, 30 and 40 ms
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= MIN_POLL_DELAY);
        }
    }
}
