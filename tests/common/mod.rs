//! Shared fixtures for the pipeline tests.

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Method, Request},
    response::Response,
    routing::get,
    Router,
};

use gatehouse::auth::{
    require_activated_user, require_authenticated_user, require_permission, MemoryStore,
    Permissions, User,
};
use gatehouse::auth::store::SCOPE_AUTHENTICATION;
use gatehouse::config::GateConfig;
use gatehouse::http::handlers::current_user;
use gatehouse::observability::{JsonLogger, LogLevel};
use gatehouse::security::{ManualClock, RateLimiter};
use gatehouse::{build_router, AppState};

/// Activated, holds `movies:read`.
pub const ALICE_TOKEN: &str = "Y3QMGX3PJ3WLRL2YRTQGQ6KRHU";
/// Not activated.
pub const BOB_TOKEN: &str = "2UKUA5PQ5QDJC42LCY7LPXD6DA";
/// Activated, no permissions.
pub const CAROL_TOKEN: &str = "VTD75N2RXI2ANUF2DV33HBCTIA";
/// Well formed but never issued.
pub const UNKNOWN_TOKEN: &str = "C6LJBA62VFUNJQTWCFEUTV3Z44";

pub const TRUSTED_ORIGIN: &str = "https://app.example.com";

/// In-memory log sink shared between the logger and the test.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub fn errors(&self) -> Vec<serde_json::Value> {
        self.lines()
            .into_iter()
            .filter(|line| line["level"] == "ERROR")
            .collect()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn user(id: i64, name: &str, activated: bool) -> User {
    User {
        id,
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        activated,
    }
}

pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.insert_user(user(1, "Alice", true));
    store.insert_user(user(2, "Bob", false));
    store.insert_user(user(3, "Carol", true));
    store.insert_token(1, SCOPE_AUTHENTICATION, ALICE_TOKEN);
    store.insert_token(2, SCOPE_AUTHENTICATION, BOB_TOKEN);
    store.insert_token(3, SCOPE_AUTHENTICATION, CAROL_TOKEN);
    store.grant_permissions(1, ["movies:read"].into_iter().collect());
    store.grant_permissions(3, Permissions::new());
    Arc::new(store)
}

pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.cors.trusted_origins = vec![TRUSTED_ORIGIN.to_string()];
    config.listener.env = "testing".to_string();
    config
}

pub struct Fixture {
    pub state: AppState,
    pub logs: Capture,
    pub clock: ManualClock,
}

impl Fixture {
    pub fn new(config: GateConfig) -> Self {
        let logs = Capture::default();
        let logger = JsonLogger::new(logs.clone(), LogLevel::Info);
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(config.limiter.clone(), Arc::new(clock.clone()));
        let store = seeded_store();
        let state = AppState::new(config, logger, store.clone(), store).with_limiter(limiter);
        Self { state, logs, clock }
    }

    pub fn with_state(state: AppState, logs: Capture) -> Self {
        Self {
            state,
            logs,
            clock: ManualClock::new(),
        }
    }

    /// The full pipeline around the test routes.
    pub fn app(&self) -> Router {
        build_router(self.state.clone(), routes(&self.state))
    }
}

async fn public() -> &'static str {
    "public"
}

async fn list_movies() -> &'static str {
    "movies"
}

async fn create_movie() -> &'static str {
    "created"
}

async fn explode() -> &'static str {
    panic!("handler exploded")
}

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/public", get(public))
        .route("/v1/panic", get(explode))
        .route(
            "/v1/users/me",
            get(current_user).route_layer(require_activated_user(state)),
        )
        .route(
            "/v1/profile",
            get(current_user).route_layer(require_authenticated_user(state)),
        )
        .route(
            "/v1/movies",
            get(list_movies)
                .route_layer(require_permission(state, "movies:read"))
                .merge(
                    axum::routing::post(create_movie)
                        .route_layer(require_permission(state, "movies:write")),
                ),
        )
}

pub fn peer(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last_octet], 40000))
}

/// A request as it arrives from `peer`.
pub fn request(method: Method, uri: &str, from: SocketAddr) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(from));
    request
}

pub fn get_from(uri: &str, from: SocketAddr) -> Request<Body> {
    request(Method::GET, uri, from)
}

pub fn with_header(mut request: Request<Body>, name: &'static str, value: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(name, value.parse().unwrap());
    request
}

pub fn bearer(request: Request<Body>, token: &str) -> Request<Body> {
    with_header(request, "authorization", &format!("Bearer {token}"))
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
