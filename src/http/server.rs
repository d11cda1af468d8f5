//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tracing::{error, info, warn};

use super::middleware::rate_limit;
use crate::error::{Result, ShardgateError};
use crate::ratelimit::RateLimiter;
use crate::store::Store;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Per-request deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// How long a client may take to send the request body
    pub read: Duration,
    /// How long a request may take from arrival to a finished response
    pub write: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            write: Duration::from_secs(10),
        }
    }
}

impl HttpTimeouts {
    /// Wrap `router` so slow bodies and slow responses are cut off.
    ///
    /// A request that overruns `write` is answered with 408.
    pub fn apply(&self, router: Router) -> Router {
        router
            .layer(RequestBodyTimeoutLayer::new(self.read))
            .layer(TimeoutLayer::new(self.write))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(store): State<Arc<dyn Store>>) -> Response {
    match store.metrics() {
        Some(metrics) => Json(metrics).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "metrics not available" })),
        )
            .into_response(),
    }
}

/// Build the application router with every route behind the limiter.
pub fn router(limiter: Arc<dyn RateLimiter>, store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(health))
        .route("/metrics", get(metrics))
        .with_state(store)
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
}

fn join_result(joined: std::result::Result<std::io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(served) => served.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ShardgateError::Io(e)
        }),
        Err(e) => Err(ShardgateError::Io(std::io::Error::other(e.to_string()))),
    }
}

/// HTTP server for the admission gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes with the limiter layer applied
    router: Router,
    /// How long in-flight requests may drain after the stop signal
    shutdown_grace: Duration,
    /// Deadlines applied to every request
    timeouts: HttpTimeouts,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiter: Arc<dyn RateLimiter>, store: Arc<dyn Store>) -> Self {
        Self {
            addr,
            router: router(limiter, store),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            timeouts: HttpTimeouts::default(),
        }
    }

    /// Override the per-request read and write deadlines.
    pub fn with_timeouts(mut self, timeouts: HttpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the drain period used after the stop signal.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bind the configured address and serve until the process is told to
    /// stop.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(stop_signal()).await
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    ///
    /// Requests in flight when the signal fires get the grace period to
    /// finish; connections still open after that are dropped.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            read_timeout = ?self.timeouts.read,
            write_timeout = ?self.timeouts.write,
            "Starting HTTP server"
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = self
            .timeouts
            .apply(self.router)
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut serving = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            joined = &mut serving => return join_result(joined),
            _ = signal => {}
        }

        info!("Shutting down HTTP server");
        let _ = stop_tx.send(());

        match tokio::time::timeout(self.shutdown_grace, &mut serving).await {
            Ok(joined) => join_result(joined)?,
            Err(_) => {
                warn!(grace = ?self.shutdown_grace, "Drain period elapsed, dropping open connections");
                serving.abort();
            }
        }

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
///
/// A signal source that cannot be installed is logged and never fires.
pub async fn stop_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let source = tokio::select! {
        _ = interrupt => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    info!(signal = source, "Stop signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::clock::ManualClock;
    use crate::ratelimit::{Algorithm, FixedWindowLimiter, SlidingWindowLimiter};
    use crate::store::testing::FailingStore;
    use crate::store::{ShardedStore, StoreConfig, StoreMetrics};

    const EPOCH_SECS: i64 = 1_700_000_000;

    fn get_from(uri: &str, caller: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", caller)
            .body(Body::empty())
            .unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn fixed_app(limit: u64) -> (Router, Arc<ShardedStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(EPOCH_SECS));
        let store = Arc::new(ShardedStore::start(StoreConfig::default(), clock.clone()));
        let limiter = Arc::new(
            FixedWindowLimiter::with_clock(store.clone(), limit, Duration::from_secs(60), clock.clone())
                .unwrap(),
        );
        (router(limiter, store.clone()), store, clock)
    }

    #[tokio::test]
    async fn test_allowed_request_carries_quota_headers() {
        let (app, store, _clock) = fixed_app(2);

        let response = app.oneshot(get_from("/healthz", "1.1.1.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit"), Some("2"));
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("1"));
        // 1_700_000_000 is 20s into its minute
        assert_eq!(header(&response, "x-ratelimit-reset"), Some("1700000040"));
        assert!(response.headers().get("retry-after").is_none());

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_request_gets_429_and_retry_after() {
        let (app, store, _clock) = fixed_app(1);

        let first = app.clone().oneshot(get_from("/healthz", "2.2.2.2")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(get_from("/healthz", "2.2.2.2")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&second, "x-ratelimit-remaining"), Some("0"));
        assert_eq!(header(&second, "retry-after"), Some("40"));

        // Another caller has its own quota
        let other = app.oneshot(get_from("/healthz", "3.3.3.3")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sliding_window_denial_reports_full_window() {
        let clock = Arc::new(ManualClock::at_unix(EPOCH_SECS));
        let store = Arc::new(ShardedStore::start(StoreConfig::default(), clock.clone()));
        let limiter = Arc::new(
            SlidingWindowLimiter::with_clock(store.clone(), 1, Duration::from_secs(30), clock.clone())
                .unwrap(),
        );
        assert_eq!(limiter.algorithm(), Algorithm::SlidingWindow);
        let app = router(limiter, store.clone());

        app.clone().oneshot(get_from("/readyz", "4.4.4.4")).await.unwrap();
        let denied = app.oneshot(get_from("/readyz", "4.4.4.4")).await.unwrap();

        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&denied, "retry-after"), Some("30"));
        assert_eq!(header(&denied, "x-ratelimit-reset"), Some("1700000030"));

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_limiter_error_maps_to_500() {
        let store: Arc<dyn Store> = Arc::new(FailingStore);
        let limiter = Arc::new(
            FixedWindowLimiter::new(store.clone(), 10, Duration::from_secs(1)).unwrap(),
        );
        let app = router(limiter, store);

        let response = app.oneshot(get_from("/healthz", "5.5.5.5")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_store_counters() {
        let (app, store, _clock) = fixed_app(100);

        app.clone().oneshot(get_from("/healthz", "6.6.6.6")).await.unwrap();
        let response = app.oneshot(get_from("/metrics", "6.6.6.6")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let metrics: StoreMetrics = serde_json::from_slice(&body).unwrap();
        assert_eq!(metrics.shard_count, 64);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.live_keys, 1);

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_unavailable_without_backend_support() {
        let store: Arc<dyn Store> = Arc::new(ShardedStore::new(StoreConfig::default()));
        let limiter =
            Arc::new(FixedWindowLimiter::new(store.clone(), 10, Duration::from_secs(1)).unwrap());
        let app = router(limiter, Arc::new(NoMetrics(store.clone())));

        let response = app.oneshot(get_from("/metrics", "7.7.7.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        store.close().await.unwrap();
    }

    /// Delegates everything but metrics.
    struct NoMetrics(Arc<dyn Store>);

    #[async_trait::async_trait]
    impl Store for NoMetrics {
        async fn increment(
            &self,
            key: &str,
            expiration: Duration,
        ) -> std::result::Result<u64, crate::error::StoreError> {
            self.0.increment(key, expiration).await
        }

        async fn add_timestamp(
            &self,
            key: &str,
            timestamp: chrono::DateTime<chrono::Utc>,
            window: Duration,
        ) -> std::result::Result<(), crate::error::StoreError> {
            self.0.add_timestamp(key, timestamp, window).await
        }

        async fn count_in_window(
            &self,
            key: &str,
            start: chrono::DateTime<chrono::Utc>,
            end: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<u64, crate::error::StoreError> {
            self.0.count_in_window(key, start, end).await
        }

        async fn close(&self) -> std::result::Result<(), crate::error::StoreError> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let timeouts = HttpTimeouts {
            read: Duration::from_secs(5),
            write: Duration::from_millis(50),
        };
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            }),
        );
        let app = timeouts.apply(slow);

        let response = app.oneshot(get_from("/slow", "8.8.8.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_timeouts_leave_fast_requests_alone() {
        let (app, store, _clock) = fixed_app(5);
        let app = HttpTimeouts::default().apply(app);

        let response = app.oneshot(get_from("/healthz", "9.9.9.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some("4"));

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let store = Arc::new(ShardedStore::new(StoreConfig::default()));
        let limiter =
            Arc::new(FixedWindowLimiter::new(store.clone(), 10, Duration::from_secs(1)).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = HttpServer::new(listener.local_addr().unwrap(), limiter, store.clone())
            .with_shutdown_grace(Duration::from_millis(200));

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_on(listener, async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let served = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(served.is_ok());

        store.close().await.unwrap();
    }
}
