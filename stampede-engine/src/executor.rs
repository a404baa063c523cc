//! Workflow executor: runs one iteration of a workflow for one virtual user

use crate::context::IterationContext;
use crate::error::EngineResult;
use crate::metrics::{group_metric_name, BuiltinMetrics};
use crate::vu::VirtualUser;
use crate::workflow::{
    CheckStep, ExtractStep, MetricAction, MetricStep, RequestStep, Step, Workflow,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use stampede_http::HttpClient;
use stampede_metrics::{Metric, MetricKind, MetricRegistry, MetricValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    /// A request marked `abort_on_failure` failed and the remaining steps were skipped
    pub aborted: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlow {
    Continue,
    Abort,
}

/// Interprets workflow steps against an [`HttpClient`], recording every
/// sample into the run's registry
///
/// Shared by all virtual users of a run; per-iteration state lives in the
/// [`IterationContext`].
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    client: Arc<dyn HttpClient>,
    registry: Arc<MetricRegistry>,
    builtins: BuiltinMetrics,
    base_url: String,
}

impl WorkflowExecutor {
    /// Registers the built-in metrics and every metric the workflow references
    pub fn new(
        workflow: Arc<Workflow>,
        client: Arc<dyn HttpClient>,
        registry: Arc<MetricRegistry>,
        base_url: impl Into<String>,
    ) -> EngineResult<Self> {
        let builtins = BuiltinMetrics::register(&registry);
        workflow.register_metrics(&registry)?;

        Ok(Self {
            workflow,
            client,
            registry,
            builtins,
            base_url: base_url.into(),
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn builtins(&self) -> &BuiltinMetrics {
        &self.builtins
    }

    /// Run every step of the workflow once, in order
    pub async fn run_iteration(&self, vu: &mut VirtualUser) -> IterationOutcome {
        let iteration = vu.advance();
        let vu_id = vu.id();
        let start = Instant::now();

        let flow = {
            let mut ctx = IterationContext::new(vu_id, iteration, vu.rng_mut());
            let flow = self.run_steps(self.workflow.steps(), &mut ctx).await;
            if flow == StepFlow::Continue {
                ctx.settle_gauges();
            }
            flow
        };

        let duration = start.elapsed();
        self.record(&self.builtins.iterations, 1.0);
        self.record(&self.builtins.iteration_duration, millis(duration));

        if flow == StepFlow::Abort {
            debug!("VU {} aborted iteration {}", vu_id, iteration);
        }

        IterationOutcome {
            aborted: flow == StepFlow::Abort,
            duration,
        }
    }

    fn run_steps<'a, 'b: 'a>(
        &'a self,
        steps: &'a [Step],
        ctx: &'a mut IterationContext<'b>,
    ) -> BoxFuture<'a, StepFlow> {
        async move {
            for step in steps {
                if self.run_step(step, ctx).await == StepFlow::Abort {
                    return StepFlow::Abort;
                }
            }
            StepFlow::Continue
        }
        .boxed()
    }

    async fn run_step(&self, step: &Step, ctx: &mut IterationContext<'_>) -> StepFlow {
        match step {
            Step::Request(request) => self.run_request(request, ctx).await,
            Step::Check(check) => {
                let branch = match self.run_check(check, ctx) {
                    Some(true) => &check.on_pass,
                    Some(false) => &check.on_fail,
                    None => return StepFlow::Continue,
                };
                self.run_steps(branch, ctx).await
            }
            Step::Sleep(sleep) => {
                let duration = sleep.duration(ctx.rng());
                tokio::time::sleep(duration).await;
                StepFlow::Continue
            }
            Step::Branch(branch) => {
                let choice = branch.choose(ctx.rng());
                self.run_steps(branch.steps_for(choice), ctx).await
            }
            Step::Group(group) => {
                ctx.enter_group(&group.name);
                let metric = group_metric_name(ctx.group_path());
                let span = info_span!("group", name = %group.name, vu = ctx.vu_id());
                let start = Instant::now();

                let flow = self.run_steps(&group.steps, ctx).instrument(span).await;

                self.record_named(&metric, millis(start.elapsed()));
                ctx.leave_group();
                flow
            }
            Step::Repeat(repeat) => {
                for _ in 0..repeat.times {
                    if self.run_steps(&repeat.steps, ctx).await == StepFlow::Abort {
                        return StepFlow::Abort;
                    }
                }
                StepFlow::Continue
            }
            Step::When(when) => {
                let steps = if (when.condition)(&*ctx) {
                    &when.then
                } else {
                    &when.otherwise
                };
                self.run_steps(steps, ctx).await
            }
            Step::Extract(extract) => {
                self.run_extract(extract, ctx);
                StepFlow::Continue
            }
            Step::Metric(metric) => {
                self.run_metric(metric, ctx);
                StepFlow::Continue
            }
        }
    }

    async fn run_request(&self, step: &RequestStep, ctx: &mut IterationContext<'_>) -> StepFlow {
        let Some(mut request) = (step.build)(&mut *ctx) else {
            debug!("Skipping '{}': its inputs are missing", step.name);
            ctx.mark_skipped(&step.name);
            return StepFlow::Continue;
        };
        if request.timeout.is_none() {
            request.timeout = step.timeout;
        }
        request.url = request.resolve_url(&self.base_url);

        self.record(&self.builtins.http_reqs, 1.0);
        self.record(&self.builtins.data_sent, request.body_len() as f64);

        let start = Instant::now();
        match self.client.send(&request).await {
            Ok(response) => {
                let duration = millis(response.elapsed);
                self.record(&self.builtins.http_req_duration, duration);
                self.record(
                    &self.builtins.http_req_failed,
                    !(200..400).contains(&response.status),
                );
                self.record(&self.builtins.data_received, response.size() as f64);
                for trend in &step.trends {
                    self.record_named(trend, duration);
                }
                if let Some(histogram) = &step.size_histogram {
                    self.record_named(histogram, response.size() as f64);
                }

                debug!(
                    "{} {} -> {} in {:.1}ms",
                    request.method, request.url, response.status, duration
                );
                ctx.set_last_response(Ok(response));
                StepFlow::Continue
            }
            Err(e) => {
                let duration = millis(start.elapsed());
                self.record(&self.builtins.http_req_duration, duration);
                self.record(&self.builtins.http_req_failed, true);
                for trend in &step.trends {
                    self.record_named(trend, duration);
                }

                debug!("{} {} failed: {}", request.method, request.url, e);
                let abort = step.abort_on_failure && e.is_transport();
                ctx.set_last_response(Err(e.to_string()));
                if abort {
                    StepFlow::Abort
                } else {
                    StepFlow::Continue
                }
            }
        }
    }

    /// Evaluate every predicate, never short-circuiting; true if all passed
    ///
    /// Nothing is recorded and neither sub-workflow runs when the request
    /// being checked was skipped.
    fn run_check(&self, step: &CheckStep, ctx: &IterationContext<'_>) -> Option<bool> {
        if let Some(skipped) = ctx.last_skipped() {
            debug!("Not checking '{}': it was skipped", skipped);
            return None;
        }
        let mut all_passed = true;

        for check in &step.checks {
            let passed = match ctx.last_response() {
                Some(response) => (check.predicate)(response, ctx),
                None => false,
            };
            if !passed {
                debug!("Check '{}' failed for VU {}", check.name, ctx.vu_id());
            }
            self.record_named(&check.name, passed);
            self.record(&self.builtins.checks, passed);
            all_passed &= passed;
        }

        if let Some(escalate) = &step.escalate {
            self.record_named(escalate, !all_passed);
        }
        Some(all_passed)
    }

    fn run_extract(&self, step: &ExtractStep, ctx: &mut IterationContext<'_>) {
        if ctx.last_skipped().is_some() {
            ctx.remove_var(&step.var);
            return;
        }
        let body = ctx.last_response().map(|response| response.json_value());

        let value = match body {
            Some(Ok(body)) => (step.extract)(&body, &mut *ctx),
            Some(Err(e)) => {
                debug!("'{}': response body is not JSON: {}", step.name, e);
                None
            }
            None => None,
        };

        let extracted = value.is_some();
        match value {
            Some(value) => ctx.set_var(step.var.as_str(), value),
            None => {
                ctx.remove_var(&step.var);
            }
        }

        self.record_named(&step.name, extracted);
        self.record(&self.builtins.checks, extracted);
        if let Some(escalate) = &step.escalate {
            self.record_named(escalate, !extracted);
        }
    }

    fn run_metric(&self, step: &MetricStep, ctx: &mut IterationContext<'_>) {
        let Some(metric) = self.registry.get(&step.name) else {
            warn!("Metric '{}' is not registered", step.name);
            return;
        };

        let result = match step.action {
            MetricAction::Add(delta) => {
                let result = metric.add(delta);
                if result.is_ok() && metric.kind() == MetricKind::Gauge {
                    ctx.note_gauge_move(&metric, delta);
                }
                result
            }
            MetricAction::Set(value) => metric.record(value),
            MetricAction::Sample(value) => metric.record(value),
            MetricAction::LastDuration => match ctx.last_response() {
                Some(response) => metric.record(millis(response.elapsed)),
                None => return,
            },
            MetricAction::LastSize => match ctx.last_response() {
                Some(response) if metric.kind() == MetricKind::Counter => {
                    metric.add(response.size() as f64)
                }
                Some(response) => metric.record(response.size() as f64),
                None => return,
            },
        };

        if let Err(e) = result {
            warn!("Failed to update metric '{}': {}", step.name, e);
        }
    }

    fn record(&self, metric: &Metric, value: impl Into<MetricValue>) {
        if let Err(e) = metric.record(value) {
            warn!("Failed to record sample for '{}': {}", metric.name(), e);
        }
    }

    fn record_named(&self, name: &str, value: impl Into<MetricValue>) {
        if let Err(e) = self.registry.record(name, value) {
            warn!("Failed to record sample for '{}': {}", name, e);
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CHECKS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS};
    use serde_json::json;
    use stampede_http::{HttpManager, HttpMethod, HttpRequest, MockResponse};
    use stampede_metrics::{Aggregate, Statistic};

    const BASE: &str = "http://sut.local";

    fn executor(workflow: Workflow, client: HttpManager) -> WorkflowExecutor {
        WorkflowExecutor::new(
            Arc::new(workflow),
            Arc::new(client),
            Arc::new(MetricRegistry::new()),
            BASE,
        )
        .unwrap()
    }

    fn rate(executor: &WorkflowExecutor, name: &str) -> Option<f64> {
        executor.registry().statistic(name, Statistic::Rate).unwrap()
    }

    fn create_user_workflow() -> Workflow {
        Workflow::new("create user")
            .step(Step::request("create user", |ctx| {
                HttpRequest::post("/api/users")
                    .json(&json!({"username": format!("user_{}", ctx.vu_id())}))
                    .ok()
            }))
            .step(
                Step::check()
                    .status("User create status is 201", 201)
                    .json("User create response is valid JSON")
                    .escalate("errors")
                    .on_pass(vec![Step::counter_add("created_users", 1.0)])
                    .on_fail(vec![Step::rate("success_rate", false)]),
            )
            .step(Step::extract_pointer("user id parsed", "user_id", "/id"))
            .step(
                Step::request("get user", |ctx| {
                    ctx.var_i64("user_id")
                        .map(|id| HttpRequest::get(format!("/api/users/{}", id)))
                })
                .trend("user_search_time"),
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_iteration_records_builtins() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Post,
            "http://sut.local/api/users",
            MockResponse::json(201, &json!({"id": 7})).with_delay(Duration::from_millis(40)),
        );
        client.add_mock(
            HttpMethod::Get,
            "http://sut.local/api/users/7",
            MockResponse::json(200, &json!({"id": 7})),
        );
        let executor = executor(create_user_workflow(), client);
        let mut vu = VirtualUser::new(1, 42);

        let outcome = executor.run_iteration(&mut vu).await;
        assert!(!outcome.aborted);
        assert!(outcome.duration >= Duration::from_millis(40));

        let registry = executor.registry();
        assert_eq!(registry.statistic(HTTP_REQS, Statistic::Count).unwrap(), Some(2.0));
        assert_eq!(registry.statistic(ITERATIONS, Statistic::Count).unwrap(), Some(1.0));
        assert_eq!(rate(&executor, HTTP_REQ_FAILED), Some(0.0));
        assert_eq!(rate(&executor, CHECKS), Some(1.0));
        assert_eq!(rate(&executor, "errors"), Some(0.0));
        assert_eq!(rate(&executor, "user id parsed"), Some(1.0));
        assert_eq!(
            registry.statistic("created_users", Statistic::Count).unwrap(),
            Some(1.0)
        );
        assert_eq!(
            registry.statistic("user_search_time", Statistic::Count).unwrap(),
            Some(1.0)
        );
        let max = registry.statistic(HTTP_REQ_DURATION, Statistic::Max).unwrap();
        assert!(max.unwrap() >= 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_fails_checks_and_skips_dependents() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Post,
            "http://sut.local/api/users",
            MockResponse::timeout(),
        );
        let executor = executor(create_user_workflow(), client);
        let mut vu = VirtualUser::new(1, 42);

        let outcome = executor.run_iteration(&mut vu).await;
        assert!(!outcome.aborted);

        // the dependent GET is skipped because user_id was never extracted
        let registry = executor.registry();
        assert_eq!(registry.statistic(HTTP_REQS, Statistic::Count).unwrap(), Some(1.0));
        assert_eq!(rate(&executor, HTTP_REQ_FAILED), Some(1.0));
        assert_eq!(rate(&executor, "User create status is 201"), Some(0.0));
        assert_eq!(rate(&executor, "errors"), Some(1.0));
        assert_eq!(rate(&executor, "success_rate"), Some(0.0));
        assert_eq!(rate(&executor, "user id parsed"), Some(0.0));
        assert_eq!(registry.statistic("created_users", Statistic::Count).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_a_failed_check() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Post,
            "http://sut.local/api/users",
            MockResponse::new(201).with_body("<html>oops</html>"),
        );
        let executor = executor(create_user_workflow(), client);
        let mut vu = VirtualUser::new(1, 42);

        executor.run_iteration(&mut vu).await;

        assert_eq!(rate(&executor, HTTP_REQ_FAILED), Some(0.0));
        assert_eq!(rate(&executor, "User create status is 201"), Some(1.0));
        assert_eq!(rate(&executor, "User create response is valid JSON"), Some(0.0));
        assert_eq!(rate(&executor, "user id parsed"), Some(0.0));
        assert_eq!(rate(&executor, "errors"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_on_failure_skips_rest_of_iteration() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(HttpMethod::Get, "http://sut.local/health", MockResponse::timeout());
        let workflow = Workflow::new("abort")
            .step(
                Step::request("health", |_| Some(HttpRequest::get("/health")))
                    .timeout(Duration::from_millis(100))
                    .abort_on_failure(),
            )
            .step(Step::counter_add("unreachable", 1.0));
        let executor = executor(workflow, client);
        let mut vu = VirtualUser::new(1, 1);

        let outcome = executor.run_iteration(&mut vu).await;
        assert!(outcome.aborted);
        assert!(outcome.duration >= Duration::from_millis(100));
        assert_eq!(
            executor.registry().statistic("unreachable", Statistic::Count).unwrap(),
            None
        );
        assert_eq!(
            executor
                .registry()
                .statistic(ITERATIONS, Statistic::Count)
                .unwrap(),
            Some(1.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_after_skipped_request_records_nothing() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Get,
            "http://sut.local/api/orders",
            MockResponse::json(200, &json!([{"id": 1}])),
        );
        let workflow = Workflow::new("order details")
            .step(Step::request("orders", |_| Some(HttpRequest::get("/api/orders"))))
            .step(Step::check().status("Orders listed", 200))
            .step(Step::request("order details", |ctx| {
                ctx.var_str("order_number")
                    .map(|n| HttpRequest::get(format!("/api/orders/number/{}", n)))
            }))
            .step(
                Step::check()
                    .status("Order details retrieval successful", 200)
                    .escalate("errors")
                    .on_pass(vec![Step::counter_add("details_seen", 1.0)])
                    .on_fail(vec![Step::counter_add("details_missing", 1.0)]),
            )
            .step(Step::extract_pointer("order details parsed", "order", "/id"))
            .step(Step::trend_last_duration("order_search_time"));
        let executor = executor(workflow, client);
        let mut vu = VirtualUser::new(1, 1);

        executor.run_iteration(&mut vu).await;

        let registry = executor.registry();
        assert_eq!(registry.statistic(HTTP_REQS, Statistic::Count).unwrap(), Some(1.0));
        assert_eq!(rate(&executor, "Orders listed"), Some(1.0));
        assert_eq!(rate(&executor, "Order details retrieval successful"), None);
        assert_eq!(rate(&executor, "order details parsed"), None);
        assert_eq!(rate(&executor, "errors"), None);
        match registry.snapshot(CHECKS).unwrap().aggregate {
            Aggregate::Rate(summary) => assert_eq!((summary.passes, summary.fails), (1, 0)),
            other => panic!("unexpected aggregate {:?}", other),
        }
        assert_eq!(registry.statistic("details_seen", Statistic::Count).unwrap(), None);
        assert_eq!(registry.statistic("details_missing", Statistic::Count).unwrap(), None);
        assert_eq!(
            registry.statistic("order_search_time", Statistic::Count).unwrap(),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_iteration_restores_gauges() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(HttpMethod::Get, "http://sut.local/health", MockResponse::timeout());
        let workflow = Workflow::new("abort")
            .step(Step::gauge_add("active_users", 1.0))
            .step(
                Step::request("health", |_| Some(HttpRequest::get("/health")))
                    .timeout(Duration::from_millis(100))
                    .abort_on_failure(),
            )
            .step(Step::gauge_add("active_users", -1.0));
        let executor = executor(workflow, client);
        let mut vu = VirtualUser::new(1, 1);

        let outcome = executor.run_iteration(&mut vu).await;
        assert!(outcome.aborted);

        let registry = executor.registry();
        assert_eq!(
            registry.statistic("active_users", Statistic::Value).unwrap(),
            Some(0.0)
        );
        assert_eq!(registry.statistic("active_users", Statistic::Max).unwrap(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_repeat_and_gauges() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Get,
            "http://sut.local/api/orders",
            MockResponse::json(200, &json!([])),
        );
        let workflow = Workflow::new("browse")
            .step(Step::gauge_add("active_users", 1.0))
            .step(Step::group(
                "Rapid browsing",
                vec![Step::repeat(
                    3,
                    vec![
                        Step::request("orders", |_| Some(HttpRequest::get("/api/orders")))
                            .size_histogram("response_size")
                            .into(),
                        Step::sleep(Duration::from_millis(200)),
                    ],
                )],
            ))
            .step(Step::gauge_add("active_users", -1.0));
        let executor = executor(workflow, client);
        let mut vu = VirtualUser::new(1, 1);

        executor.run_iteration(&mut vu).await;

        let registry = executor.registry();
        assert_eq!(registry.statistic(HTTP_REQS, Statistic::Count).unwrap(), Some(3.0));
        let group = registry
            .statistic("group_duration::Rapid browsing", Statistic::Min)
            .unwrap()
            .unwrap();
        assert!((600.0..700.0).contains(&group), "group took {}ms", group);
        assert_eq!(
            registry.statistic("active_users", Statistic::Value).unwrap(),
            Some(0.0)
        );
        assert_eq!(registry.statistic("active_users", Statistic::Max).unwrap(), Some(1.0));
        match registry.snapshot("response_size").unwrap().aggregate {
            Aggregate::Histogram(summary) => assert_eq!(summary.count, 3),
            other => panic!("unexpected aggregate {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_when_follows_captured_data() {
        let client = HttpManager::offline().unwrap();
        client.add_mock(
            HttpMethod::Get,
            "http://sut.local/api/orders",
            MockResponse::json(200, &json!([{"orderNumber": "ORD-1"}])),
        );
        client.add_mock(
            HttpMethod::Get,
            "http://sut.local/api/orders/number/ORD-1",
            MockResponse::json(200, &json!({"orderNumber": "ORD-1"})),
        );
        let workflow = Workflow::new("view order")
            .step(Step::request("orders", |_| Some(HttpRequest::get("/api/orders"))))
            .step(Step::extract_pointer("order listed", "order_number", "/0/orderNumber"))
            .step(
                Step::when_var(
                    "order_number",
                    vec![Step::request("by number", |ctx| {
                        ctx.var_str("order_number")
                            .map(|n| HttpRequest::get(format!("/api/orders/number/{}", n)))
                    })
                    .into()],
                )
                .otherwise(vec![Step::counter_add("no_orders", 1.0)]),
            );
        let executor = executor(workflow, client);
        let mut vu = VirtualUser::new(1, 1);

        executor.run_iteration(&mut vu).await;

        let registry = executor.registry();
        assert_eq!(registry.statistic(HTTP_REQS, Statistic::Count).unwrap(), Some(2.0));
        assert_eq!(registry.statistic("no_orders", Statistic::Count).unwrap(), None);
        assert_eq!(rate(&executor, HTTP_REQ_FAILED), Some(0.0));
    }
}
