//! Run-once task keyed on resource creation events.
//!
//! An [`AfterCreate`] waits for a fixed set of logical ids. The event that
//! removes the last one fires the handler on its own tokio task; every later
//! event, and any event for an id outside the set, is ignored. The pending
//! set and the fired flag share one mutex, which is what makes the trigger
//! one-shot.
//!
//! The run's [`ForkReport`] is published on a `watch` channel and handed to a
//! [`StatusReporter`] at each transition.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use construct::{
    ExecutionEnvironment, ForkError, ForkHandler, ForkReport, LogicalId, ResolvedAttributes,
    StatusReporter,
};

#[derive(Debug)]
struct TriggerState {
    pending: BTreeSet<LogicalId>,
    fired: bool,
}

/// Fires a [`ForkHandler`] once all of its prerequisite resources exist.
pub struct AfterCreate {
    id: LogicalId,
    handler: Arc<dyn ForkHandler>,
    environment: ExecutionEnvironment,
    reporter: Arc<dyn StatusReporter>,
    state: Mutex<TriggerState>,
    status: watch::Sender<ForkReport>,
}

impl AfterCreate {
    /// Creates a trigger waiting for every id in `waits_for`.
    ///
    /// `environment` is resolved against the attributes seen at firing time.
    pub fn new(
        id: LogicalId,
        waits_for: impl IntoIterator<Item = LogicalId>,
        handler: Arc<dyn ForkHandler>,
        environment: ExecutionEnvironment,
        reporter: Arc<dyn StatusReporter>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ForkReport::pending(id.clone()));
        Arc::new(Self {
            id,
            handler,
            environment,
            reporter,
            state: Mutex::new(TriggerState {
                pending: waits_for.into_iter().collect(),
                fired: false,
            }),
            status,
        })
    }

    pub fn id(&self) -> &LogicalId {
        &self.id
    }

    /// Ids still awaited. Empty once fired.
    pub fn pending(&self) -> BTreeSet<LogicalId> {
        self.lock().pending.clone()
    }

    pub fn has_fired(&self) -> bool {
        self.lock().fired
    }

    /// The latest report.
    pub fn status(&self) -> ForkReport {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ForkReport> {
        self.status.subscribe()
    }

    /// Records that `resource` now exists.
    ///
    /// Returns `true` only for the event that fired the trigger.
    pub fn resource_created(
        self: &Arc<Self>,
        resource: &LogicalId,
        attributes: &ResolvedAttributes,
    ) -> bool {
        {
            let mut state = self.lock();
            if state.fired || !state.pending.remove(resource) {
                return false;
            }
            debug!(
                trigger = %self.id,
                %resource,
                remaining = state.pending.len(),
                "prerequisite created"
            );
            if !state.pending.is_empty() {
                return false;
            }
            state.fired = true;
        }

        info!(trigger = %self.id, "all prerequisites created; firing");
        let environment = self.environment.resolve(attributes);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(environment).await });
        true
    }

    async fn run(
        self: Arc<Self>,
        environment: Result<BTreeMap<String, String>, construct::ConstructError>,
    ) {
        let running = self.status().start();
        self.publish(running.clone()).await;

        let result = match environment {
            Ok(env) => self.handler.invoke(env).await,
            Err(e) => Err(ForkError::InvalidRequest {
                reason: e.to_string(),
            }),
        };

        let finished = running.finish(&result);
        info!(trigger = %self.id, status = %finished.status, "fork finished");
        self.publish(finished).await;
    }

    async fn publish(&self, report: ForkReport) {
        self.status.send_replace(report.clone());
        if let Err(e) = self.reporter.report(&report).await {
            warn!(trigger = %self.id, error = %e, "failed to deliver status report");
        }
    }

    /// Waits until the run reaches a terminal status and returns that report.
    ///
    /// Never returns if the trigger never fires.
    pub async fn wait_for_completion(&self) -> ForkReport {
        let mut rx = self.status.subscribe();
        let report = match rx.wait_for(|r| r.status.is_terminal()).await {
            Ok(report) => report.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.status(),
        };
        report
    }

    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use construct::{
        AttributeRef, ForkRunId, ForkStatus, ForkSummary, ReportError, DEST_REPO, SRC_REPO,
    };

    use super::*;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        seen: Mutex<Vec<BTreeMap<String, String>>>,
    }

    #[async_trait]
    impl ForkHandler for CountingHandler {
        async fn invoke(
            &self,
            environment: BTreeMap<String, String>,
        ) -> Result<ForkSummary, ForkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let summary = ForkSummary {
                run_id: ForkRunId::new_random(),
                source: environment[SRC_REPO].clone(),
                destination: environment[DEST_REPO].clone(),
                credentials: "ambient-principal".into(),
                refs_pushed: 1,
                push_attempts: 1,
            };
            self.seen.lock().unwrap().push(environment);
            Ok(summary)
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<ForkReport>>,
    }

    #[async_trait]
    impl StatusReporter for RecordingReporter {
        async fn report(&self, report: &ForkReport) -> Result<(), ReportError> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn environment() -> ExecutionEnvironment {
        let mut env = ExecutionEnvironment::new();
        env.insert(SRC_REPO, "https://example.com/a.git");
        env.insert(DEST_REPO, AttributeRef::new(id("Mirror"), "CloneUrlHttp"));
        env
    }

    fn attributes() -> ResolvedAttributes {
        let mut attrs = ResolvedAttributes::new();
        attrs.insert(
            id("Mirror"),
            BTreeMap::from([("CloneUrlHttp".to_string(), "/srv/mirror.git".to_string())]),
        );
        attrs
    }

    fn trigger(
        handler: &Arc<CountingHandler>,
        reporter: &Arc<RecordingReporter>,
    ) -> Arc<AfterCreate> {
        AfterCreate::new(
            id("MirrorFork"),
            [id("Mirror"), id("MirrorHandlerPolicy")],
            handler.clone(),
            environment(),
            reporter.clone(),
        )
    }

    #[tokio::test]
    async fn fires_once_after_every_prerequisite() {
        let handler = Arc::new(CountingHandler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let trigger = trigger(&handler, &reporter);
        let attrs = attributes();

        assert!(!trigger.resource_created(&id("Mirror"), &attrs));
        assert!(!trigger.has_fired());
        assert!(trigger.resource_created(&id("MirrorHandlerPolicy"), &attrs));
        assert!(!trigger.resource_created(&id("MirrorHandlerPolicy"), &attrs));
        assert!(!trigger.resource_created(&id("Mirror"), &attrs));

        let report = trigger.wait_for_completion().await;
        assert_eq!(report.status, ForkStatus::Succeeded);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.seen.lock().unwrap()[0][DEST_REPO], "/srv/mirror.git");

        let statuses: Vec<ForkStatus> = reporter
            .reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec![ForkStatus::Running, ForkStatus::Succeeded]);
    }

    #[tokio::test]
    async fn waiters_registered_before_firing_see_the_terminal_report() {
        let handler = Arc::new(CountingHandler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let trigger = trigger(&handler, &reporter);

        let waiter = tokio::spawn({
            let trigger = trigger.clone();
            async move { trigger.wait_for_completion().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let attrs = attributes();
        trigger.resource_created(&id("Mirror"), &attrs);
        trigger.resource_created(&id("MirrorHandlerPolicy"), &attrs);

        let report = waiter.await.unwrap();
        assert_eq!(report.status, ForkStatus::Succeeded);
        assert_eq!(report, trigger.wait_for_completion().await);
    }

    #[tokio::test]
    async fn unknown_resources_are_ignored() {
        let handler = Arc::new(CountingHandler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let trigger = trigger(&handler, &reporter);

        assert!(!trigger.resource_created(&id("Unrelated"), &attributes()));
        assert_eq!(trigger.pending().len(), 2);
        assert_eq!(trigger.status().status, ForkStatus::Pending);
    }

    #[tokio::test]
    async fn unresolvable_environment_fails_the_run() {
        let handler = Arc::new(CountingHandler::default());
        let reporter = Arc::new(RecordingReporter::default());
        let trigger = trigger(&handler, &reporter);
        let empty = ResolvedAttributes::new();

        trigger.resource_created(&id("Mirror"), &empty);
        trigger.resource_created(&id("MirrorHandlerPolicy"), &empty);

        let report = trigger.wait_for_completion().await;
        assert_eq!(report.status, ForkStatus::Failed);
        assert!(report.reason.unwrap().contains("CloneUrlHttp"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
