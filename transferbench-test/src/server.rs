//! Exposes an in-process mock of the storage API for use in integration tests.
//!
//! ```
//! use transferbench_test::server::MockStorage;
//!
//! #[tokio::main]
//! async fn main() {
//!    let node = MockStorage::new().await;
//!    let url = node.url("/api/v0/add");
//!    // point a test target at `node.port()`...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::json;

/// How the mock answers requests.
///
/// The mock does not store anything: every `add` answers with the configured hash and size,
/// every `cat` streams `cat_len` bytes regardless of the requested hash.
#[derive(Clone, Debug)]
pub struct MockBehavior {
    /// Status returned from `add`. Anything but `200` skips the JSON body.
    pub add_status: StatusCode,
    /// Content hash returned from `add`.
    pub hash: String,
    /// Size reported by `add`.
    pub reported_size: u64,
    /// Status returned from `cat`.
    pub cat_status: StatusCode,
    /// Number of bytes served by `cat`.
    pub cat_len: usize,
    /// Status returned from `version`.
    pub version_status: StatusCode,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            add_status: StatusCode::OK,
            hash: "abc".into(),
            reported_size: 1000,
            cat_status: StatusCode::OK,
            cat_len: 1000,
            version_status: StatusCode::OK,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    behavior: Mutex<MockBehavior>,
    add_calls: AtomicUsize,
    cat_calls: AtomicUsize,
    gc_calls: AtomicUsize,
    version_calls: AtomicUsize,
    cat_args: Mutex<Vec<String>>,
    add_pins: Mutex<Vec<Option<String>>>,
}

type SharedState = Arc<MockState>;

/// An in-process storage API node.
///
/// Listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct MockStorage {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: SharedState,
}

impl MockStorage {
    /// Starts a node with the default [`MockBehavior`].
    pub async fn new() -> Self {
        Self::with_behavior(MockBehavior::default()).await
    }

    /// Starts a node answering according to `behavior`.
    pub async fn with_behavior(behavior: MockBehavior) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = SharedState::new(MockState {
            behavior: Mutex::new(behavior),
            ..Default::default()
        });

        let router = Router::new()
            .route("/api/v0/add", post(add))
            .route("/api/v0/cat", post(cat))
            .route("/api/v0/version", post(version))
            .route("/api/v0/repo/gc", post(repo_gc))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// The port the node listens on.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Number of `add` requests received.
    pub fn add_calls(&self) -> usize {
        self.state.add_calls.load(Ordering::SeqCst)
    }

    /// Number of `cat` requests received.
    pub fn cat_calls(&self) -> usize {
        self.state.cat_calls.load(Ordering::SeqCst)
    }

    /// Number of `repo/gc` requests received.
    pub fn gc_calls(&self) -> usize {
        self.state.gc_calls.load(Ordering::SeqCst)
    }

    /// Number of `version` requests received.
    pub fn version_calls(&self) -> usize {
        self.state.version_calls.load(Ordering::SeqCst)
    }

    /// The `arg` parameters of all `cat` requests, in order.
    pub fn cat_args(&self) -> Vec<String> {
        self.state.cat_args.lock().unwrap().clone()
    }

    /// The `pin` parameters of all `add` requests, in order.
    pub fn add_pins(&self) -> Vec<Option<String>> {
        self.state.add_pins.lock().unwrap().clone()
    }
}

impl Drop for MockStorage {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns a localhost port that nothing listens on.
pub fn unused_port() -> u16 {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    listener.local_addr().unwrap().port()
}

fn behavior(state: &MockState) -> MockBehavior {
    state.behavior.lock().unwrap().clone()
}

async fn add(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    _body: Bytes,
) -> Response {
    state.add_calls.fetch_add(1, Ordering::SeqCst);
    state
        .add_pins
        .lock()
        .unwrap()
        .push(params.get("pin").cloned());
    let behavior = behavior(&state);

    if behavior.add_status != StatusCode::OK {
        return behavior.add_status.into_response();
    }

    axum::Json(json!({
        "Name": "file",
        "Hash": behavior.hash,
        "Size": behavior.reported_size.to_string(),
    }))
    .into_response()
}

async fn cat(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.cat_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(arg) = params.get("arg") {
        state.cat_args.lock().unwrap().push(arg.clone());
    }
    let behavior = behavior(&state);

    if behavior.cat_status != StatusCode::OK {
        return behavior.cat_status.into_response();
    }

    vec![0x5a_u8; behavior.cat_len].into_response()
}

async fn version(State(state): State<SharedState>) -> Response {
    state.version_calls.fetch_add(1, Ordering::SeqCst);
    let behavior = behavior(&state);

    if behavior.version_status != StatusCode::OK {
        return behavior.version_status.into_response();
    }

    axum::Json(json!({ "Version": "0.0.0-mock" })).into_response()
}

async fn repo_gc(State(state): State<SharedState>) -> Response {
    state.gc_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK.into_response()
}
