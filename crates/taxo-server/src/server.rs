use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use taxo_storage::{DocumentStore, InMemoryStore};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::backend::{CacheBackend, DegradePolicy};
use crate::cache::{CacheScope, CacheStore, CachedRoute, InvalidationHook, KeyCodec, cache_aside};
use crate::config::{AppConfig, PaginationConfig};
use crate::rate_limit::{RateLimiter, rate_limit};
use crate::{handlers, middleware as app_middleware};

/// Shared state of the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub invalidation: InvalidationHook,
    pub cache: Arc<CacheStore>,
    pub pagination: PaginationConfig,
    pub backend_mode: &'static str,
    /// Roles allowed to purge the response cache
    pub admin_roles: Arc<[String]>,
}

/// Everything `build_app` wires together. The backend handle is shared by the
/// cache and the rate limiters; it is opened by the caller and closed by
/// [`TaxoServer::run`] on shutdown.
pub struct AppParts {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub backend: CacheBackend,
    pub auth_routes: Option<Router>,
}

pub fn build_app(parts: AppParts) -> Result<Router, String> {
    let AppParts {
        config: cfg,
        store,
        backend,
        auth_routes,
    } = parts;

    let policy = DegradePolicy::from_config(&cfg.cache);
    let codec = KeyCodec::from_config(&cfg.redis, &cfg.cache);
    let cache_backend = if cfg.cache.enabled {
        backend.clone()
    } else {
        CacheBackend::Disabled
    };
    let cache = Arc::new(CacheStore::new(
        cache_backend,
        policy,
        codec.clone(),
        &cfg.cache,
    ));
    let invalidation = InvalidationHook::new(
        cache.clone(),
        Duration::from_millis(cfg.cache.invalidation_timeout_ms),
    );
    let state = AppState {
        store,
        invalidation,
        cache: cache.clone(),
        pagination: cfg.pagination.clone(),
        backend_mode: cache.backend().mode(),
        admin_roles: cfg.rate_limit.exempt_roles.clone().into(),
    };

    let cached = |scope: CacheScope| {
        middleware::from_fn_with_state(CachedRoute::new(cache.clone(), scope), cache_aside)
    };

    let mut api = Router::new()
        .route("/tags", get(handlers::tags::list_tags).post(handlers::tags::create_tag).layer(cached(CacheScope::TagList)))
        .route("/tags/popular", get(handlers::tags::popular_tags).layer(cached(CacheScope::TagPopular)))
        .route("/tags/search", get(handlers::tags::search_tags).layer(cached(CacheScope::TagSearch)))
        .route("/tags/bulk", post(handlers::tags::bulk_create_tags))
        .route(
            "/tags/category/{category}",
            get(handlers::tags::tags_by_category).layer(cached(CacheScope::TagsByCategory)),
        )
        .route(
            "/tags/{slug}",
            get(handlers::tags::get_tag)
                .patch(handlers::tags::update_tag)
                .delete(handlers::tags::delete_tag)
                .layer(cached(CacheScope::TagDetail)),
        )
        .route(
            "/categories",
            get(handlers::categories::list_categories)
                .post(handlers::categories::create_category)
                .layer(cached(CacheScope::CategoryList)),
        )
        .route(
            "/categories/{slug}",
            get(handlers::categories::get_category)
                .patch(handlers::categories::update_category)
                .delete(handlers::categories::delete_category)
                .layer(cached(CacheScope::CategoryDetail)),
        )
        .route(
            "/categories/{slug}/subcategories",
            get(handlers::categories::get_subcategories).layer(cached(CacheScope::Subcategories)),
        )
        .route("/cache", delete(handlers::purge_cache))
        .with_state(state.clone());

    if let Some(auth) = auth_routes {
        let auth = if cfg.rate_limit.enabled {
            let limiter = RateLimiter::auth(
                &cfg.rate_limit,
                cfg.server.trust_proxy,
                backend.clone(),
                policy,
                codec.clone(),
            )?;
            auth.layer(middleware::from_fn_with_state(limiter, rate_limit))
        } else {
            auth
        };
        api = api.nest("/auth", auth);
    }

    if cfg.rate_limit.enabled {
        let limiter = RateLimiter::general(
            &cfg.rate_limit,
            cfg.server.trust_proxy,
            backend,
            policy,
            codec,
        )?;
        api = api.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .nest("/api/v1", api)
        // Order: request id -> timeout -> cors/compression -> trace
        .layer(middleware::from_fn_with_state(
            cfg.request_timeout(),
            app_middleware::request_timeout,
        ))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        );
    Ok(app)
}

pub struct TaxoServer {
    addr: SocketAddr,
    app: Router,
    backend: CacheBackend,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    store: Option<Arc<dyn DocumentStore>>,
    auth_routes: Option<Router>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            store: None,
            auth_routes: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Document store for the handlers. Defaults to an empty in-memory store.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Routes mounted under `/api/v1/auth` behind the strict auth limiter.
    pub fn with_auth_routes(mut self, routes: Router) -> Self {
        self.auth_routes = Some(routes);
        self
    }

    /// Opens the backend and wires the application.
    ///
    /// # Errors
    ///
    /// Fails when the backend is unreachable and graceful degradation is
    /// off, or when the rate-limit configuration is invalid.
    pub async fn build(self) -> anyhow::Result<TaxoServer> {
        let backend = crate::create_cache_backend(&self.config.redis, &self.config.cache)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn DocumentStore>);
        let app = build_app(AppParts {
            config: self.config,
            store,
            backend: backend.clone(),
            auth_routes: self.auth_routes,
        })
        .map_err(|e| anyhow::anyhow!(e))?;

        Ok(TaxoServer {
            addr: self.addr,
            app,
            backend,
        })
    }
}

impl TaxoServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(backend = self.backend.mode(), "listening on {}", self.addr);
        if !self.backend.is_shared() {
            tracing::warn!("cache and rate limits are local to this instance; enable Redis to share them");
        }
        let result = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;
        self.backend.close();
        result?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
