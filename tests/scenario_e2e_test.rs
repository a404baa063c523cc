//! Built-in scenarios run end to end against an in-process users/orders service

mod common;

use anyhow::Result;
use common::{init_test_tracing, TestService};
use stampede::ScenarioKind;
use stampede_config::RunConfig;
use stampede_engine::{RunController, RunReport, Stage, StopReason, Verdict};
use stampede_http::{HttpClient, HttpManager};
use stampede_metrics::Aggregate;
use std::sync::Arc;
use std::time::Duration;

/// Hold `vus` virtual users for a short window, then drain
fn short_stages(vus: u64) -> Vec<Stage> {
    vec![
        Stage::new(Duration::ZERO, vus),
        Stage::new(Duration::from_secs(2), vus),
    ]
}

async fn run_scenario(kind: ScenarioKind, service: &TestService, vus: u64) -> Result<RunReport> {
    let scenario = kind.scenario();
    let mut profile = scenario.profile(&RunConfig::default())?.with_seed(7);
    profile.stages = short_stages(vus);

    let client: Arc<dyn HttpClient> = Arc::new(HttpManager::new()?);
    let controller = RunController::new(profile, scenario.workflow, client, &service.base_url);

    let report = tokio::time::timeout(Duration::from_secs(60), controller.run()).await??;
    Ok(report)
}

fn counter(report: &RunReport, name: &str) -> f64 {
    match report.metric(name).map(|m| &m.aggregate) {
        Some(Aggregate::Counter(c)) => c.count,
        other => panic!("{} is not a counter: {:?}", name, other),
    }
}

fn rate(report: &RunReport, name: &str) -> (f64, u64, u64) {
    match report.metric(name).map(|m| &m.aggregate) {
        Some(Aggregate::Rate(r)) => (r.rate, r.passes, r.fails),
        other => panic!("{} is not a rate: {:?}", name, other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_scenario_against_healthy_service() -> Result<()> {
    init_test_tracing();
    let service = TestService::start().await?;

    let report = run_scenario(ScenarioKind::Load, &service, 2).await?;
    println!("{}", stampede::output::render_text(&report));

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.interrupted, 0);
    assert_eq!(report.vus_max, 2);
    assert!(report.iterations >= 2);

    // every iteration creates three users and two orders
    let iterations = report.iterations as f64;
    assert_eq!(counter(&report, "created_users"), 3.0 * iterations);
    assert_eq!(counter(&report, "created_orders"), 2.0 * iterations);
    assert_eq!(service.user_count() as f64, 3.0 * iterations);
    assert_eq!(service.order_count() as f64, 2.0 * iterations);

    let (checks, _, fails) = rate(&report, "checks");
    assert_eq!(fails, 0);
    assert_eq!(checks, 1.0);
    let (failed, _, _) = rate(&report, "http_req_failed");
    assert_eq!(failed, 0.0);
    let (errors, _, error_fails) = rate(&report, "errors");
    assert_eq!(errors, 0.0);
    assert_eq!(error_fails, 5 * report.iterations);

    assert_eq!(
        counter(&report, "http_reqs") as u64,
        (service.hits("POST /api/users")
            + service.hits("GET /api/users")
            + service.hits("GET /api/users/{id}")
            + service.hits("GET /api/users/email/{email}")
            + service.hits("PUT /api/users/{id}")
            + service.hits("POST /api/orders")
            + service.hits("GET /api/orders")
            + service.hits("GET /api/orders/user/{user_id}")
            + service.hits("GET /api/orders/number/{number}")
            + service.hits("PUT /api/orders/{id}/status"))
    );
    assert!(report.metric("group_duration::User Management").is_some());
    assert!(report
        .metric("group_duration::Order Management::Update order status")
        .is_some());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_scenario_fails_thresholds_when_creation_breaks() -> Result<()> {
    init_test_tracing();
    let service = TestService::start().await?;
    service.reject_user_creation();

    let report = run_scenario(ScenarioKind::Load, &service, 2).await?;

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(service.user_count(), 0);
    assert_eq!(service.hits("POST /api/orders"), 0);

    let (errors, _, _) = rate(&report, "errors");
    assert_eq!(errors, 1.0);

    let failed: Vec<_> = report
        .thresholds
        .results
        .iter()
        .filter(|result| !result.passed)
        .map(|result| result.metric.as_str())
        .collect();
    assert!(failed.contains(&"errors"));
    assert!(failed.contains(&"http_req_failed"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stress_scenario_against_healthy_service() -> Result<()> {
    init_test_tracing();
    let service = TestService::start().await?;

    let report = run_scenario(ScenarioKind::Stress, &service, 3).await?;

    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.vus_max, 3);
    assert!(report.iterations >= 3);

    let (failed, _, _) = rate(&report, "http_req_failed");
    assert_eq!(failed, 0.0);

    // lifecycle creates exactly one user per run of its branch
    let lifecycles = match report
        .metric("user_creation_time")
        .map(|m| &m.aggregate)
    {
        Some(Aggregate::Trend(t)) => t.count,
        other => panic!("user_creation_time is not a trend: {:?}", other),
    };
    assert_eq!(service.hits("POST /api/users"), lifecycles);
    assert_eq!(service.hits("PUT /api/users/{id}"), lifecycles);

    if service.hits("GET /api/orders") > 0 {
        match report.metric("response_size").map(|m| &m.aggregate) {
            Some(Aggregate::Histogram(h)) => assert!(h.count > 0),
            other => panic!("response_size is not a histogram: {:?}", other),
        }
    }

    Ok(())
}
