#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use serde_json::{Value, json};
use taxo_server::rate_limit::CallerRole;
use taxo_server::{AppConfig, AppParts, CacheBackend, build_app};
use taxo_storage::{DocumentStore, Filter, FindQuery, FindResult, InMemoryStore, StorageError};
use tokio::task::JoinHandle;

/// Document store that counts the reads reaching it, so tests can tell a
/// cache hit from a handler run.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    reads: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<FindResult, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find(collection, query).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Value>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_one(collection, filter).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError> {
        self.inner.insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Value,
    ) -> Result<Option<Value>, StorageError> {
        self.inner.update_one(collection, filter, patch).await
    }
}

/// Config for tests: in-process backend, limits high enough to stay out of
/// the way unless a test lowers them.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.port = 0;
    cfg.rate_limit.general.max = 10_000;
    cfg
}

pub fn app(cfg: AppConfig, store: Arc<dyn DocumentStore>, backend: CacheBackend) -> Router {
    app_with_auth(cfg, store, backend, None)
}

pub fn app_with_auth(
    cfg: AppConfig,
    store: Arc<dyn DocumentStore>,
    backend: CacheBackend,
    auth_routes: Option<Router>,
) -> Router {
    build_app(AppParts {
        config: cfg,
        store,
        backend,
        auth_routes,
    })
    .expect("build app")
}

pub async fn start_server(app: Router) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = rx.await;
        })
        .await;
    });

    (format!("http://{addr}"), tx, server)
}

pub fn tag(name: &str, category: &str) -> Value {
    json!({
        "name": name,
        "category": category,
        "subcategory": "general",
    })
}

pub async fn create_tag(client: &reqwest::Client, base: &str, body: &Value) -> Value {
    let res = client
        .post(format!("{base}/api/v1/tags"))
        .json(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201, "create tag");
    res.json().await.unwrap()
}

pub fn header<'a>(res: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Stands in for an authentication layer: the `x-role` header becomes the
/// caller's role.
pub fn with_roles(app: Router) -> Router {
    app.layer(middleware::from_fn(tag_role))
}

async fn tag_role(mut req: Request, next: Next) -> Response {
    let role = req
        .headers()
        .get("x-role")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(role) = role {
        req.extensions_mut().insert(CallerRole(role));
    }
    next.run(req).await
}
