//! Run controller: owns the worker pool and the run clock

use crate::error::EngineResult;
use crate::executor::WorkflowExecutor;
use crate::metrics::ITERATIONS;
use crate::profile::RunProfile;
use crate::report::{RunReport, StopReason};
use crate::scheduler::StageScheduler;
use crate::vu::{VirtualUser, VuState};
use crate::workflow::Workflow;
use chrono::Utc;
use stampede_http::HttpClient;
use stampede_metrics::{MetricRegistry, Statistic, ThresholdEvaluator};
use stampede_resilience::ShutdownCoordinator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, debug_span, info, warn, Instrument};
use uuid::Uuid;

/// Cloneable handle for stopping a run from outside
#[derive(Debug, Clone)]
pub struct RunHandle {
    shutdown: Arc<ShutdownCoordinator>,
}

impl RunHandle {
    /// Ask every virtual user to stop after its current iteration
    ///
    /// Returns false if the run was already stopping.
    pub fn cancel(&self) -> bool {
        self.shutdown.signal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_shutting_down()
    }
}

/// Everything validated and registered before the first tick
struct Prepared {
    scheduler: StageScheduler,
    registry: Arc<MetricRegistry>,
    executor: Arc<WorkflowExecutor>,
    evaluator: ThresholdEvaluator,
}

struct Worker {
    id: u64,
    retire: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn retire(&self) {
        self.retire.store(true, Ordering::Release);
    }
}

/// Drives one run from the first tick to the final report
///
/// Every tick the controller asks the [`StageScheduler`] for the target VU
/// count, reaps finished workers, then spawns new ones or retires the newest
/// until the live count matches.
pub struct RunController {
    profile: RunProfile,
    workflow: Arc<Workflow>,
    client: Arc<dyn HttpClient>,
    base_url: String,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RunController {
    pub fn new(
        profile: RunProfile,
        workflow: Workflow,
        client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::with_timeout(profile.graceful_stop));
        Self {
            profile,
            workflow: Arc::new(workflow),
            client,
            base_url: base_url.into(),
            shutdown,
        }
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn profile(&self) -> &RunProfile {
        &self.profile
    }

    /// Check the profile, workflow and thresholds without starting a run
    pub fn validate(&self) -> EngineResult<()> {
        self.prepare().map(|_| ())
    }

    fn prepare(&self) -> EngineResult<Prepared> {
        self.profile.validate()?;
        let scheduler = StageScheduler::new(self.profile.stages.clone())?;
        self.workflow.validate()?;

        let registry = Arc::new(MetricRegistry::new());
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&self.workflow),
            Arc::clone(&self.client),
            Arc::clone(&registry),
            self.base_url.clone(),
        )?);
        let evaluator = ThresholdEvaluator::new(self.profile.thresholds.clone());
        evaluator.validate(&registry)?;

        Ok(Prepared {
            scheduler,
            registry,
            executor,
            evaluator,
        })
    }

    /// Run to completion, cancellation or threshold abort
    ///
    /// Configuration problems are reported before any virtual user starts.
    pub async fn run(self) -> EngineResult<RunReport> {
        let Prepared {
            scheduler,
            registry,
            executor,
            evaluator,
        } = self.prepare()?;

        let seed = self.profile.seed.unwrap_or_else(rand::random);
        let run_id = Uuid::new_v4();
        info!(
            "Starting run '{}' ({}) against {}: {} stages over {:?}, seed {}",
            self.profile.name,
            run_id,
            self.base_url,
            scheduler.stages().len(),
            scheduler.total_duration(),
            seed
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let builtins = executor.builtins().clone();

        let mut active: Vec<Worker> = Vec::new();
        let mut retiring: Vec<Worker> = Vec::new();
        let mut next_id = 1u64;
        let mut vus_max = 0u64;
        let mut aborted_by = None;
        let mut last_threshold_check = Duration::ZERO;

        let mut ticker = tokio::time::interval(self.profile.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop_reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break StopReason::Cancelled,
                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            active.retain(|worker| !worker.handle.is_finished());
            retiring.retain(|worker| !worker.handle.is_finished());

            if scheduler.is_complete(elapsed) {
                info!("All stages finished after {:?}", elapsed);
                break StopReason::Completed;
            }

            let target = scheduler.target_at(elapsed) as usize;
            while active.len() < target {
                active.push(self.spawn_worker(next_id, seed, &executor));
                next_id += 1;
            }
            if active.len() > target {
                // newest first
                for worker in active.drain(target..).rev() {
                    debug!("Retiring VU {}", worker.id);
                    worker.retire();
                    retiring.push(worker);
                }
            }

            let live = active.len() as u64;
            record_gauge(&builtins.vus, live as f64);
            if live > vus_max {
                vus_max = live;
                record_gauge(&builtins.vus_max, live as f64);
            }

            if !evaluator.is_empty()
                && elapsed.saturating_sub(last_threshold_check)
                    >= self.profile.threshold_check_interval
            {
                last_threshold_check = elapsed;
                if let Some(violation) = evaluator.check_abort(&registry, elapsed) {
                    warn!(
                        "Threshold '{}' on '{}' failed (observed {:?}), aborting run",
                        violation.expression, violation.metric, violation.observed
                    );
                    aborted_by = Some(violation);
                    self.shutdown.signal();
                    break StopReason::ThresholdAborted;
                }
            }
        };

        let interrupted = self.drain(active, retiring).await;
        record_gauge(&builtins.vus, 0.0);

        let thresholds = evaluator.evaluate(&registry);
        let verdict = RunReport::verdict_for(&thresholds, stop_reason);
        let iterations = registry
            .statistic(ITERATIONS, Statistic::Count)
            .ok()
            .flatten()
            .unwrap_or(0.0) as u64;
        let duration = start.elapsed();

        info!(
            "Run '{}' {} after {:.1}s: {} iterations, {} interrupted, verdict {}",
            self.profile.name,
            stop_reason,
            duration.as_secs_f64(),
            iterations,
            interrupted,
            verdict
        );

        Ok(RunReport {
            run_id,
            name: self.profile.name.clone(),
            started_at,
            duration_secs: duration.as_secs_f64(),
            seed,
            stop_reason,
            verdict,
            iterations,
            interrupted,
            vus_max,
            aborted_by,
            thresholds,
            metrics: registry.snapshot_all(),
        })
    }

    fn spawn_worker(&self, id: u64, seed: u64, executor: &Arc<WorkflowExecutor>) -> Worker {
        let retire = Arc::new(AtomicBool::new(false));
        let guard = self.shutdown.task_started();
        let executor = Arc::clone(executor);
        let shutdown = Arc::clone(&self.shutdown);
        let flag = Arc::clone(&retire);

        let handle = tokio::spawn(
            async move {
                let _guard = guard;
                let mut vu = VirtualUser::new(id, seed);
                vu.set_state(VuState::Running);
                debug!("VU {} started", id);

                loop {
                    if flag.load(Ordering::Acquire) || shutdown.is_shutting_down() {
                        vu.set_state(VuState::Retiring);
                        break;
                    }
                    executor.run_iteration(&mut vu).await;
                    tokio::task::yield_now().await;
                }

                debug!("VU {} stopped after {} iterations", id, vu.iteration());
                vu.set_state(VuState::Terminated);
            }
            .instrument(debug_span!("vu", id)),
        );

        Worker { id, retire, handle }
    }

    /// Stop every worker, waiting up to the grace period; returns how many had to be aborted
    async fn drain(&self, active: Vec<Worker>, retiring: Vec<Worker>) -> u64 {
        let workers: Vec<Worker> = active.into_iter().chain(retiring).collect();
        for worker in &workers {
            worker.retire();
        }
        self.shutdown.signal();

        if self.shutdown.wait_for_drain(self.profile.graceful_stop).await {
            for worker in workers {
                if let Err(e) = worker.handle.await {
                    if e.is_panic() {
                        warn!("VU {} panicked: {}", worker.id, e);
                    }
                }
            }
            return 0;
        }

        self.shutdown.force();
        let mut interrupted = 0;
        for worker in &workers {
            if !worker.handle.is_finished() {
                worker.handle.abort();
                interrupted += 1;
            }
        }
        // aborted iterations give back their gauge moves as they are dropped
        for worker in workers {
            let _ = worker.handle.await;
        }
        warn!("Interrupted {} VUs still running after the grace period", interrupted);
        interrupted
    }
}

fn record_gauge(metric: &stampede_metrics::Metric, value: f64) {
    if let Err(e) = metric.record(value) {
        warn!("Failed to record '{}': {}", metric.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::metrics::{HTTP_REQS, HTTP_REQ_DURATION, VUS, VUS_MAX};
    use crate::profile::Stage;
    use crate::report::Verdict;
    use crate::workflow::Step;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use stampede_http::{HttpError, HttpManager, HttpRequest, HttpResponse, MockResponse};
    use stampede_metrics::{Aggregate, Threshold, ThresholdError};

    /// Records every URL it is asked for and answers 200 after a delay
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl RecordingClient {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            self.calls.lock().push(request.url.clone());
            tokio::time::sleep(self.delay).await;
            let mut response = HttpResponse::new(200, b"{}".to_vec());
            response.elapsed = self.delay;
            Ok(response)
        }
    }

    fn browse_workflow() -> Workflow {
        Workflow::new("browse")
            .step(Step::request("users", |_| Some(HttpRequest::get("/api/users"))))
            .step(Step::check().status("status is 200", 200))
            .step(Step::sleep(Duration::from_millis(500)))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_and_reports() {
        let client = RecordingClient::new(Duration::from_millis(50));
        let profile = RunProfile::new("smoke", vec![Stage::new(secs(2), 4), Stage::new(secs(3), 4)])
            .with_seed(1)
            .with_threshold("http_req_duration", "p(95)<500")
            .unwrap()
            .with_threshold("status is 200", "rate>0.99")
            .unwrap();
        let controller =
            RunController::new(profile, browse_workflow(), client.clone(), "http://sut.local");

        let report = controller.run().await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Completed);
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.vus_max, 4);
        assert_eq!(report.interrupted, 0);
        assert_eq!(report.seed, 1);
        assert!(report.iterations > 10);
        assert!(report.duration_secs >= 5.0);
        assert_eq!(report.thresholds.results.len(), 2);
        assert!(client
            .calls()
            .iter()
            .all(|url| url == "http://sut.local/api/users"));

        match &report.metric(VUS).unwrap().aggregate {
            Aggregate::Gauge(gauge) => assert_eq!(gauge.value, 0.0),
            other => panic!("unexpected aggregate {:?}", other),
        }
        match &report.metric(VUS_MAX).unwrap().aggregate {
            Aggregate::Gauge(gauge) => assert_eq!(gauge.value, 4.0),
            other => panic!("unexpected aggregate {:?}", other),
        }
        match &report.metric(HTTP_REQS).unwrap().aggregate {
            Aggregate::Counter(counter) => assert_eq!(counter.count, report.iterations as f64),
            other => panic!("unexpected aggregate {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_without_hanging() {
        let client = RecordingClient::new(Duration::from_millis(20));
        let profile = RunProfile::new(
            "long",
            vec![Stage::new(secs(60), 10), Stage::new(secs(600), 10)],
        )
        .with_seed(3);
        let controller =
            RunController::new(profile, browse_workflow(), client.clone(), "http://sut.local");
        let handle = controller.handle();

        let run = tokio::spawn(controller.run());
        tokio::time::sleep(secs(30)).await;
        assert!(handle.cancel());
        assert!(!handle.cancel());
        let started_before_cancel = client.calls().len();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.interrupted, 0);
        assert!(report.duration_secs < 35.0);
        assert!(report.iterations > 0);

        // every iteration sends one request first, so no request after the
        // signal means no iteration began after it
        assert_eq!(client.calls().len(), started_before_cancel);
        assert_eq!(report.iterations, started_before_cancel as u64);

        // in-flight requests all completed during the drain
        let sent = match &report.metric(HTTP_REQS).unwrap().aggregate {
            Aggregate::Counter(counter) => counter.count,
            other => panic!("unexpected aggregate {:?}", other),
        };
        let answered = match &report.metric(HTTP_REQ_DURATION).unwrap().aggregate {
            Aggregate::Trend(trend) => trend.count as f64,
            other => panic!("unexpected aggregate {:?}", other),
        };
        assert_eq!(sent, started_before_cancel as f64);
        assert_eq!(answered, sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_interrupts_stuck_workers() {
        let client = RecordingClient::new(Duration::from_millis(10));
        let workflow = Workflow::new("slow")
            .step(Step::gauge_add("active_users", 1.0))
            .step(Step::request("users", |_| Some(HttpRequest::get("/api/users"))))
            .step(Step::sleep(secs(120)))
            .step(Step::gauge_add("active_users", -1.0));
        let profile = RunProfile::new("slow", vec![Stage::new(secs(5), 2)])
            .with_seed(9)
            .with_graceful_stop(secs(1));
        let controller = RunController::new(profile, workflow, client, "http://sut.local");

        let report = controller.run().await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Completed);
        assert_eq!(report.interrupted, 2);
        assert!(report.duration_secs < 10.0);

        // the interrupted iterations never reached their closing step
        match &report.metric("active_users").unwrap().aggregate {
            Aggregate::Gauge(gauge) => {
                assert_eq!(gauge.value, 0.0);
                assert_eq!(gauge.max, 2.0);
            }
            other => panic!("unexpected aggregate {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_abort_fails_run() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            stampede_http::HttpMethod::Get,
            "http://sut.local/api/users",
            MockResponse::new(500),
        );
        let mut profile = RunProfile::new(
            "failing",
            vec![Stage::new(Duration::ZERO, 2), Stage::new(secs(300), 2)],
        )
        .with_seed(5);
        profile.threshold_check_interval = secs(1);
        profile.thresholds.push(
            Threshold::parse("http_req_failed", "rate<0.1")
                .unwrap()
                .abort_on_fail(secs(2)),
        );
        let controller =
            RunController::new(profile, browse_workflow(), Arc::new(client), "http://sut.local");

        let report = controller.run().await.unwrap();

        assert_eq!(report.stop_reason, StopReason::ThresholdAborted);
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.exit_code(), 1);
        let violation = report.aborted_by.as_ref().unwrap();
        assert_eq!(violation.metric, "http_req_failed");
        assert_eq!(violation.observed, Some(1.0));
        assert!(report.duration_secs >= 2.0 && report.duration_secs < 10.0);
        assert!(!report.thresholds.passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_threshold_rejected_before_spawning() {
        let client = RecordingClient::new(Duration::from_millis(10));
        let profile = RunProfile::new("invalid", vec![Stage::new(secs(10), 5)])
            .with_threshold("no_such_metric", "avg<100")
            .unwrap();
        let controller =
            RunController::new(profile, browse_workflow(), client.clone(), "http://sut.local");

        let result = controller.run().await;
        assert!(matches!(
            result,
            Err(EngineError::Threshold(ThresholdError::UnknownMetric(_)))
        ));
        assert!(client.calls().is_empty());

        let profile = RunProfile::new("not applicable", vec![Stage::new(secs(10), 5)])
            .with_threshold("http_req_failed", "p(95)<100")
            .unwrap();
        let controller =
            RunController::new(profile, browse_workflow(), client.clone(), "http://sut.local");
        assert!(matches!(
            controller.validate(),
            Err(EngineError::Threshold(ThresholdError::NotApplicable { .. }))
        ));
        assert!(matches!(
            controller.run().await,
            Err(EngineError::Threshold(ThresholdError::NotApplicable { .. }))
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_branches_are_reproducible() {
        let workflow = || {
            Workflow::new("branchy")
                .step(
                    Step::branch()
                        .arm(
                            0.3,
                            vec![Step::request("a", |_| Some(HttpRequest::get("/a"))).into()],
                        )
                        .otherwise(vec![
                            Step::request("b", |_| Some(HttpRequest::get("/b"))).into()
                        ]),
                )
                .step(Step::sleep(Duration::from_millis(100)))
        };
        let run = |seed: u64| {
            let workflow = workflow();
            async move {
                let client = RecordingClient::new(Duration::from_millis(10));
                let profile =
                    RunProfile::new("seeded", vec![Stage::new(secs(1), 1), Stage::new(secs(10), 1)])
                        .with_seed(seed);
                RunController::new(profile, workflow, client.clone(), "http://sut.local")
                    .run()
                    .await
                    .unwrap();
                client.calls()
            }
        };

        let first = run(2024).await;
        let second = run(2024).await;
        let other = run(7).await;

        let common = first.len().min(second.len());
        assert!(common > 50);
        assert_eq!(first[..common], second[..common]);

        let taken = first.iter().filter(|url| url.ends_with("/a")).count();
        assert!(taken > 0 && taken < first.len());

        let common = first.len().min(other.len());
        assert_ne!(first[..common], other[..common]);
    }
}
