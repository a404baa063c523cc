//! Load scenario: users CRUD followed by order management

use super::{
    encode_segment, entity_id, has_items, json_array, json_entity, millis, next_index, pick,
    push_var, random_status, secs, Scenario, ScenarioKind, ORDER_STATUSES,
};
use rand::Rng;
use serde_json::json;
use stampede_engine::{IterationContext, Stage, Step, Workflow};
use stampede_http::HttpRequest;
use stampede_metrics::MetricKind;

const REQUEST_DURATION: &str = "request_duration";

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::Load,
        workflow: workflow(),
        stages: vec![
            Stage::new(secs(30), 10),
            Stage::new(secs(90), 50),
            Stage::new(secs(180), 100),
            Stage::new(secs(300), 100),
            Stage::new(secs(120), 50),
            Stage::new(secs(30), 0),
        ],
        thresholds: vec![
            ("http_req_duration", "p(95)<500"),
            ("http_req_duration", "p(99)<1000"),
            ("http_req_failed", "rate<0.1"),
            ("errors", "rate<0.1"),
        ],
    }
}

pub fn workflow() -> Workflow {
    Workflow::new("load")
        .metric("errors", MetricKind::Rate)
        .metric("success_rate", MetricKind::Rate)
        .metric(REQUEST_DURATION, MetricKind::Trend)
        .metric("active_users", MetricKind::Gauge)
        .metric("created_users", MetricKind::Counter)
        .metric("created_orders", MetricKind::Counter)
        .step(Step::gauge_add("active_users", 1.0))
        .step(Step::group("User Management", user_management()))
        .step(Step::group("Order Management", order_management()))
        .step(Step::sleep(secs(2)))
        .step(Step::gauge_add("active_users", -1.0))
}

fn user_management() -> Vec<Step> {
    vec![
        Step::repeat(
            3,
            vec![
                Step::request("create user", |ctx| {
                    let i = next_index(ctx, "user_index");
                    let (vu, iter) = (ctx.vu_id(), ctx.iteration());
                    HttpRequest::post("/api/users")
                        .json(&json!({
                            "name": format!("Test User {}-{}-{}", vu, iter, i),
                            "email": format!("test.user.{}.{}.{}@example.com", vu, iter, i),
                            "phone": format!("+55{:011}", vu),
                        }))
                        .ok()
                })
                .trend(REQUEST_DURATION)
                .into(),
                Step::check()
                    .status("User create status is 201", 201)
                    .json("User create response is valid JSON")
                    .escalate("errors")
                    .on_pass(vec![
                        Step::extract("created user recorded", "created_user", |body, ctx| {
                            let user = json_entity(body, ctx)?;
                            push_var(ctx, "users", user.clone());
                            Some(user)
                        })
                        .into(),
                        Step::counter_add("created_users", 1.0),
                        Step::rate("success_rate", true),
                    ])
                    .on_fail(vec![Step::rate("success_rate", false)])
                    .into(),
                Step::sleep(millis(500)),
            ],
        ),
        Step::group(
            "Get all users",
            vec![
                Step::request("list users", |_| Some(HttpRequest::get("/api/users")))
                    .trend(REQUEST_DURATION)
                    .into(),
                Step::check()
                    .status("Get all users status is 200", 200)
                    .json_array("Get all users returns array")
                    .into(),
            ],
        ),
        Step::sleep(secs(1)),
        Step::when(
            |ctx| has_items(ctx, "users"),
            vec![
                Step::group(
                    "Get user by ID",
                    vec![
                        Step::request("get user by id", |ctx| {
                            let user = pick_user(ctx)?;
                            Some(HttpRequest::get(format!("/api/users/{}", entity_id(&user)?)))
                        })
                        .trend(REQUEST_DURATION)
                        .into(),
                        Step::check()
                            .status("Get user by ID status is 200", 200)
                            .check("Get user by ID returns correct user", |response, ctx| {
                                same_field(response, ctx, "id")
                            })
                            .into(),
                    ],
                ),
                Step::sleep(millis(500)),
                Step::group(
                    "Get user by email",
                    vec![
                        Step::request("get user by email", |ctx| {
                            let user = pick_user(ctx)?;
                            let email = user.get("email")?.as_str()?;
                            Some(HttpRequest::get(format!(
                                "/api/users/email/{}",
                                encode_segment(email)
                            )))
                        })
                        .trend(REQUEST_DURATION)
                        .into(),
                        Step::check()
                            .status("Get user by email status is 200", 200)
                            .check("Get user by email returns correct user", |response, ctx| {
                                same_field(response, ctx, "email")
                            })
                            .into(),
                    ],
                ),
                Step::sleep(millis(500)),
                Step::group(
                    "Update user",
                    vec![
                        Step::request("update user", |ctx| {
                            let user = pick_user(ctx)?;
                            let id = entity_id(&user)?;
                            HttpRequest::put(format!("/api/users/{}", id))
                                .json(&json!({
                                    "name": format!("Updated User {}-{}", ctx.vu_id(), ctx.iteration()),
                                    "email": user.get("email"),
                                    "phone": "+55 (11) 98765-4321",
                                }))
                                .ok()
                        })
                        .trend(REQUEST_DURATION)
                        .into(),
                        Step::check()
                            .status("Update user status is 200", 200)
                            .into(),
                    ],
                ),
                Step::sleep(millis(500)),
            ],
        )
        .into(),
    ]
}

fn order_management() -> Vec<Step> {
    let with_users = vec![
        Step::repeat(
            2,
            vec![
                Step::request("create order", |ctx| {
                    let i = next_index(ctx, "order_index");
                    let user = pick(ctx, "all_users")?;
                    let status = random_status(ctx, ORDER_STATUSES.len());
                    let amount = ctx.rng().random_range(0..10_000u32) as f64 / 100.0;
                    let (vu, iter) = (ctx.vu_id(), ctx.iteration());
                    HttpRequest::post("/api/orders")
                        .json(&json!({
                            "userId": user.get("id"),
                            "orderNumber": format!(
                                "ORD-{}-{}-{}",
                                chrono::Utc::now().timestamp_millis(),
                                vu,
                                i
                            ),
                            "status": status,
                            "totalAmount": amount,
                            "description": format!("Test Order {}-{}-{}", vu, iter, i),
                        }))
                        .ok()
                })
                .trend(REQUEST_DURATION)
                .into(),
                Step::check()
                    .status("Order create status is 201", 201)
                    .json("Order create response is valid JSON")
                    .escalate("errors")
                    .on_pass(vec![
                        Step::counter_add("created_orders", 1.0),
                        Step::rate("success_rate", true),
                    ])
                    .on_fail(vec![Step::rate("success_rate", false)])
                    .into(),
                Step::sleep(millis(500)),
            ],
        ),
        Step::group(
            "Get all orders",
            vec![
                Step::request("list orders", |_| Some(HttpRequest::get("/api/orders")))
                    .trend(REQUEST_DURATION)
                    .into(),
                Step::check()
                    .status("Get all orders status is 200", 200)
                    .json_array("Get all orders returns array")
                    .into(),
            ],
        ),
        Step::sleep(secs(1)),
        Step::group(
            "Get orders by user ID",
            vec![
                Step::request("orders by user", |ctx| {
                    let user = pick(ctx, "all_users")?;
                    Some(HttpRequest::get(format!(
                        "/api/orders/user/{}",
                        entity_id(&user)?
                    )))
                })
                .trend(REQUEST_DURATION)
                .into(),
                Step::check()
                    .status("Get orders by user status is 200", 200)
                    .into(),
            ],
        ),
        Step::sleep(millis(500)),
        Step::request("list orders again", |_| Some(HttpRequest::get("/api/orders")))
            .trend(REQUEST_DURATION)
            .into(),
        Step::extract("order list parsed", "orders", json_array).into(),
        Step::when(
            |ctx| has_items(ctx, "orders"),
            vec![
                Step::group(
                    "Get order by order number",
                    vec![
                        Step::request("order by number", |ctx| {
                            let order = pick(ctx, "orders")?;
                            let number = order.get("orderNumber")?.as_str()?;
                            Some(HttpRequest::get(format!(
                                "/api/orders/number/{}",
                                encode_segment(number)
                            )))
                        })
                        .trend(REQUEST_DURATION)
                        .into(),
                        Step::check()
                            .status("Get order by number status is 200", 200)
                            .into(),
                    ],
                ),
                Step::sleep(millis(500)),
                Step::group(
                    "Update order status",
                    vec![
                        Step::request("update order status", |ctx| {
                            let order = pick(ctx, "orders")?;
                            let status = random_status(ctx, ORDER_STATUSES.len());
                            Some(
                                HttpRequest::put(format!(
                                    "/api/orders/{}/status?status={}",
                                    entity_id(&order)?,
                                    status
                                ))
                                .header("Content-Type", "application/json"),
                            )
                        })
                        .trend(REQUEST_DURATION)
                        .into(),
                        Step::check()
                            .status("Update order status is 200", 200)
                            .into(),
                    ],
                ),
            ],
        )
        .into(),
    ];

    vec![
        Step::request("list users for orders", |_| Some(HttpRequest::get("/api/users")))
            .trend(REQUEST_DURATION)
            .into(),
        Step::extract("user list parsed", "all_users", json_array).into(),
        Step::when(|ctx| has_items(ctx, "all_users"), with_users).into(),
    ]
}

/// Pick one of the users created this iteration and remember it for the checks
fn pick_user(ctx: &mut IterationContext<'_>) -> Option<serde_json::Value> {
    let user = pick(ctx, "users")?;
    ctx.set_var("picked_user", user.clone());
    Some(user)
}

/// The response body carries the same `field` as the picked user
fn same_field(
    response: &stampede_http::HttpResponse,
    ctx: &IterationContext<'_>,
    field: &str,
) -> bool {
    let Some(expected) = ctx.var("picked_user").and_then(|user| user.get(field)) else {
        return false;
    };
    response
        .json_value()
        .map(|body| body.get(field) == Some(expected))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_requests(steps: &[Step]) -> usize {
        steps
            .iter()
            .map(|step| match step {
                Step::Request(_) => 1,
                Step::Check(check) => {
                    count_requests(&check.on_pass) + count_requests(&check.on_fail)
                }
                Step::Group(group) => count_requests(&group.steps),
                Step::Repeat(repeat) => count_requests(&repeat.steps),
                Step::When(when) => count_requests(&when.then) + count_requests(&when.otherwise),
                Step::Branch(branch) => {
                    branch
                        .arms
                        .iter()
                        .map(|arm| count_requests(&arm.steps))
                        .sum::<usize>()
                        + count_requests(&branch.otherwise)
                }
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_load_workflow_shape() {
        let scenario = scenario();
        assert_eq!(scenario.kind, ScenarioKind::Load);
        assert_eq!(scenario.workflow.name(), "load");
        // distinct request steps: 5 user steps, 7 order steps
        assert_eq!(count_requests(scenario.workflow.steps()), 12);
        assert_eq!(scenario.stages.last(), Some(&Stage::new(secs(30), 0)));
    }
}
