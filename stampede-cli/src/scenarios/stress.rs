//! Stress scenario: weighted user-lifecycle and browse-and-order flows

use super::{
    entity_id, encode_segment, has_items, json_array, json_entity, millis, pick, random_status,
    secs, Scenario, ScenarioKind,
};
use rand::Rng;
use serde_json::{json, Value};
use stampede_engine::{Stage, Step, Workflow};
use stampede_http::HttpRequest;
use stampede_metrics::MetricKind;

/// Response body sizes in bytes
const RESPONSE_SIZE_BOUNDS: [f64; 9] = [
    128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 65536.0,
];

pub fn scenario() -> Scenario {
    Scenario {
        kind: ScenarioKind::Stress,
        workflow: workflow(),
        stages: vec![
            Stage::new(secs(60), 20),
            Stage::new(secs(180), 100),
            Stage::new(secs(300), 200),
            Stage::new(secs(120), 100),
            Stage::new(secs(60), 0),
        ],
        thresholds: vec![
            ("http_req_duration", "p(95)<800"),
            ("http_req_duration", "p(99)<2000"),
            ("http_req_failed", "rate<0.15"),
            ("errors", "rate<0.15"),
        ],
    }
}

/// The two flows are drawn independently, so an iteration may run both or neither
pub fn workflow() -> Workflow {
    Workflow::new("stress")
        .metric("errors", MetricKind::Rate)
        .metric("success_rate", MetricKind::Rate)
        .metric("active_users", MetricKind::Gauge)
        .metric("user_creation_time", MetricKind::Trend)
        .metric("order_creation_time", MetricKind::Trend)
        .metric("user_search_time", MetricKind::Trend)
        .metric("order_search_time", MetricKind::Trend)
        .histogram("response_size", &RESPONSE_SIZE_BOUNDS)
        .step(Step::gauge_add("active_users", 1.0))
        .step(Step::branch().arm(0.3, vec![user_lifecycle()]))
        .step(Step::branch().arm(0.7, vec![browse_and_order()]))
        .step(Step::sleep(secs(2)))
        .step(Step::gauge_add("active_users", -1.0))
}

fn failed() -> Vec<Step> {
    vec![Step::rate("success_rate", false)]
}

fn user_lifecycle() -> Step {
    Step::group(
        "Complete User Lifecycle",
        vec![
            Step::request("create user", |ctx| {
                let vu = ctx.vu_id();
                HttpRequest::post("/api/users")
                    .json(&json!({
                        "name": format!("Stress Test User {}-{}", vu, ctx.iteration()),
                        "email": format!(
                            "stress.{}.{}.{}@example.com",
                            vu,
                            ctx.iteration(),
                            chrono::Utc::now().timestamp_millis()
                        ),
                        "phone": format!("+55 (11) 9999{:04}", vu),
                    }))
                    .ok()
            })
            .into(),
            Step::check()
                .status("User creation successful", 201)
                .escalate("errors")
                .on_pass(vec![
                    Step::trend_last_duration("user_creation_time"),
                    Step::rate("success_rate", true),
                    Step::histogram_last_size("response_size"),
                    Step::extract("created user parsed", "user", json_entity)
                        .escalate("errors")
                        .into(),
                    Step::when_var(
                        "user",
                        vec![
                            Step::sleep(millis(500)),
                            Step::group(
                                "Retrieve created user",
                                vec![
                                    Step::request("get created user", |ctx| {
                                        let id = entity_id(ctx.var("user")?)?;
                                        Some(HttpRequest::get(format!("/api/users/{}", id)))
                                    })
                                    .size_histogram("response_size")
                                    .into(),
                                    Step::check().status("User retrieval successful", 200).into(),
                                ],
                            ),
                            Step::sleep(millis(500)),
                            Step::group(
                                "Update user details",
                                vec![
                                    Step::request("update created user", |ctx| {
                                        let user = ctx.var("user")?.clone();
                                        let id = entity_id(&user)?;
                                        HttpRequest::put(format!("/api/users/{}", id))
                                            .json(&updated_user(user))
                                            .ok()
                                    })
                                    .size_histogram("response_size")
                                    .into(),
                                    Step::check().status("User update successful", 200).into(),
                                ],
                            ),
                        ],
                    )
                    .otherwise(failed())
                    .into(),
                ])
                .on_fail(failed())
                .into(),
        ],
    )
}

/// `{...user, name: "Updated <name>", phone: ...}`
fn updated_user(mut user: Value) -> Value {
    let name = user
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(fields) = user.as_object_mut() {
        fields.insert("name".to_string(), json!(format!("Updated {}", name)));
        fields.insert("phone".to_string(), json!("+55 (11) 98765-4321"));
    }
    user
}

fn browse_and_order() -> Step {
    Step::group(
        "Browse and Order Flow",
        vec![
            Step::group(
                "Browse users",
                vec![
                    Step::request("browse users", |_| Some(HttpRequest::get("/api/users")))
                        .trend("user_search_time")
                        .into(),
                    Step::check()
                        .status("User list retrieval successful", 200)
                        .escalate("errors")
                        .on_pass(vec![
                            Step::rate("success_rate", true),
                            Step::histogram_last_size("response_size"),
                        ])
                        .on_fail(failed())
                        .into(),
                ],
            ),
            Step::sleep(secs(1)),
            Step::group(
                "Browse orders",
                vec![
                    Step::request("browse orders", |_| Some(HttpRequest::get("/api/orders")))
                        .trend("order_search_time")
                        .into(),
                    Step::check()
                        .status("Order list retrieval successful", 200)
                        .escalate("errors")
                        .on_pass(vec![
                            Step::rate("success_rate", true),
                            Step::histogram_last_size("response_size"),
                            Step::extract("order list parsed", "orders", json_array).into(),
                            Step::when(
                                |ctx| has_items(ctx, "orders"),
                                vec![
                                    Step::sleep(millis(500)),
                                    Step::group(
                                        "View order details",
                                        vec![
                                            Step::request("order details", |ctx| {
                                                let order = pick(ctx, "orders")?;
                                                let number =
                                                    order.get("orderNumber")?.as_str()?;
                                                Some(HttpRequest::get(format!(
                                                    "/api/orders/number/{}",
                                                    encode_segment(number)
                                                )))
                                            })
                                            .size_histogram("response_size")
                                            .into(),
                                            Step::check()
                                                .status("Order details retrieval successful", 200)
                                                .into(),
                                        ],
                                    ),
                                ],
                            )
                            .into(),
                        ])
                        .on_fail(failed())
                        .into(),
                ],
            ),
            Step::sleep(secs(1)),
            Step::group("Create new order", create_order()),
            Step::sleep(secs(1)),
            Step::group(
                "Rapid browsing simulation",
                vec![Step::repeat(
                    3,
                    vec![
                        Step::branch()
                            .arm(
                                0.5,
                                vec![Step::request("rapid users", |_| {
                                    Some(HttpRequest::get("/api/users"))
                                })
                                .size_histogram("response_size")
                                .into()],
                            )
                            .otherwise(vec![Step::request("rapid orders", |_| {
                                Some(HttpRequest::get("/api/orders"))
                            })
                            .size_histogram("response_size")
                            .into()])
                            .into(),
                        Step::check().status("Browse request successful", 200).into(),
                        Step::sleep(millis(200)),
                    ],
                )],
            ),
        ],
    )
}

fn create_order() -> Vec<Step> {
    vec![
        Step::request("users for order", |_| Some(HttpRequest::get("/api/users"))).into(),
        Step::extract("user list parsed", "users", json_array)
            .escalate("errors")
            .into(),
        Step::when(
            |ctx| has_items(ctx, "users"),
            vec![
                Step::request("create order", |ctx| {
                    let user = pick(ctx, "users")?;
                    // CANCELLED is left out for new orders
                    let status = random_status(ctx, 5);
                    let amount = ctx.rng().random_range(0..50_000u32) as f64 / 100.0;
                    let name = user.get("name").and_then(Value::as_str).unwrap_or_default();
                    HttpRequest::post("/api/orders")
                        .json(&json!({
                            "userId": user.get("id"),
                            "orderNumber": format!(
                                "STR-{}-{}-{}",
                                chrono::Utc::now().timestamp_millis(),
                                ctx.vu_id(),
                                ctx.iteration()
                            ),
                            "status": status,
                            "totalAmount": amount,
                            "description": format!("Order for {}", name),
                        }))
                        .ok()
                })
                .trend("order_creation_time")
                .into(),
                Step::check()
                    .status("Order creation successful", 201)
                    .escalate("errors")
                    .on_pass(vec![
                        Step::rate("success_rate", true),
                        Step::histogram_last_size("response_size"),
                        Step::sleep(millis(500)),
                        Step::extract("created order parsed", "order", json_entity).into(),
                        Step::when_var(
                            "order",
                            vec![Step::group(
                                "View newly created order",
                                vec![
                                    Step::request("get created order", |ctx| {
                                        let id = entity_id(ctx.var("order")?)?;
                                        Some(HttpRequest::get(format!("/api/orders/{}", id)))
                                    })
                                    .size_histogram("response_size")
                                    .into(),
                                    Step::check()
                                        .status("Newly created order retrieval successful", 200)
                                        .into(),
                                ],
                            )],
                        )
                        .into(),
                    ])
                    .on_fail(failed())
                    .into(),
            ],
        )
        .into(),
    ]
}
