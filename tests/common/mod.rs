//! In-process users/orders service used as the system under test
#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub id: u64,
    pub user_id: u64,
    pub order_number: String,
    pub status: String,
    pub total_amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    status: String,
}

#[derive(Default)]
struct Store {
    users: Mutex<Vec<User>>,
    orders: Mutex<Vec<Order>>,
    next_id: AtomicU64,
    requests: Mutex<HashMap<String, u64>>,
    reject_user_creation: AtomicBool,
}

impl Store {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn hit(&self, route: &str) {
        *self.requests.lock().entry(route.to_string()).or_insert(0) += 1;
    }
}

type AppState = Arc<Store>;

/// A running users/orders service bound to an ephemeral local port
pub struct TestService {
    pub base_url: String,
    store: AppState,
    handle: JoinHandle<()>,
}

impl TestService {
    pub async fn start() -> anyhow::Result<Self> {
        let store = Arc::new(Store::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;

        let app = router(Arc::clone(&store));
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Test service stopped: {}", e);
            }
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            store,
            handle,
        })
    }

    /// Make every `POST /api/users` answer 500
    pub fn reject_user_creation(&self) {
        self.store
            .reject_user_creation
            .store(true, Ordering::Relaxed);
    }

    pub fn user_count(&self) -> usize {
        self.store.users.lock().len()
    }

    pub fn order_count(&self) -> usize {
        self.store.orders.lock().len()
    }

    /// Requests served per route pattern
    pub fn hits(&self, route: &str) -> u64 {
        self.store.requests.lock().get(route).copied().unwrap_or(0)
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(store: AppState) -> Router {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}", get(get_user).put(update_user))
        .route("/api/users/email/{email}", get(get_user_by_email))
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/number/{number}", get(get_order_by_number))
        .route("/api/orders/user/{user_id}", get(get_orders_by_user))
        .route("/api/orders/{id}/status", put(update_order_status))
        .with_state(store)
}

async fn list_users(State(store): State<AppState>) -> Json<Vec<User>> {
    store.hit("GET /api/users");
    Json(store.users.lock().clone())
}

async fn create_user(
    State(store): State<AppState>,
    Json(mut user): Json<User>,
) -> Result<(StatusCode, Json<User>), StatusCode> {
    store.hit("POST /api/users");
    if store.reject_user_creation.load(Ordering::Relaxed) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    user.id = store.next_id();
    store.users.lock().push(user.clone());
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(store): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<User>, StatusCode> {
    store.hit("GET /api/users/{id}");
    let users = store.users.lock();
    users
        .iter()
        .find(|user| user.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_user_by_email(
    State(store): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<User>, StatusCode> {
    store.hit("GET /api/users/email/{email}");
    let users = store.users.lock();
    users
        .iter()
        .find(|user| user.email == email)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_user(
    State(store): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<User>,
) -> Result<Json<User>, StatusCode> {
    store.hit("PUT /api/users/{id}");
    let mut users = store.users.lock();
    let user = users
        .iter_mut()
        .find(|user| user.id == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    user.name = update.name;
    user.email = update.email;
    user.phone = update.phone;
    Ok(Json(user.clone()))
}

async fn list_orders(State(store): State<AppState>) -> Json<Vec<Order>> {
    store.hit("GET /api/orders");
    Json(store.orders.lock().clone())
}

async fn create_order(
    State(store): State<AppState>,
    Json(mut order): Json<Order>,
) -> Result<(StatusCode, Json<Order>), StatusCode> {
    store.hit("POST /api/orders");
    if !store.users.lock().iter().any(|user| user.id == order.user_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    order.id = store.next_id();
    store.orders.lock().push(order.clone());
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(store): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, StatusCode> {
    store.hit("GET /api/orders/{id}");
    let orders = store.orders.lock();
    orders
        .iter()
        .find(|order| order.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_order_by_number(
    State(store): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<Order>, StatusCode> {
    store.hit("GET /api/orders/number/{number}");
    let orders = store.orders.lock();
    orders
        .iter()
        .find(|order| order.order_number == number)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_orders_by_user(
    State(store): State<AppState>,
    Path(user_id): Path<u64>,
) -> Json<Vec<Order>> {
    store.hit("GET /api/orders/user/{user_id}");
    let orders = store.orders.lock();
    Json(
        orders
            .iter()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect(),
    )
}

async fn update_order_status(
    State(store): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Order>, StatusCode> {
    store.hit("PUT /api/orders/{id}/status");
    let mut orders = store.orders.lock();
    let order = orders
        .iter_mut()
        .find(|order| order.id == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    order.status = query.status;
    Ok(Json(order.clone()))
}

/// Route test output through the test harness; repeated calls are ignored
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
