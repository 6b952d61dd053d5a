//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Request bodies are
//! collected up front and the caller identity is read from the configured
//! trusted header, so `dispatch` is a plain async function over request
//! parts and can be driven directly from tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::db::MongoClient;
use crate::notify::{MemoryNotificationSink, MongoNotificationSink, NotificationSink};
use crate::projection::{ProjectionStore, Reconciler};
use crate::routes::{self, accounts, admin, animals, error_response, transfers, FullBody};
use crate::store::{LedgerStore, MemoryLedgerStore, MongoLedgerStore};
use crate::transfer::TransferService;
use crate::types::{Result, StudbookError};

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Present when running against MongoDB (readiness pings it)
    pub mongo: Option<MongoClient>,
    pub projections: Arc<ProjectionStore>,
    pub transfers: Arc<TransferService>,
    pub reconciler: Arc<Reconciler>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services over a ledger store and notification sink
    pub fn new(
        args: Args,
        mongo: Option<MongoClient>,
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let projections = Arc::new(ProjectionStore::new(
            Arc::clone(&ledger),
            args.projection_config(),
        ));
        let transfers = Arc::new(TransferService::new(
            Arc::clone(&ledger),
            Arc::clone(&projections),
            notifier,
        ));
        let reconciler = Arc::new(Reconciler::new(ledger, Arc::clone(&projections)));

        Self {
            args,
            mongo,
            projections,
            transfers,
            reconciler,
            started_at: Instant::now(),
        }
    }

    /// In-memory ledger and inbox (dev mode without MongoDB)
    pub fn in_memory(args: Args) -> Self {
        Self::new(
            args,
            None,
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryNotificationSink::new()),
        )
    }

    /// MongoDB-backed ledger and inbox
    pub async fn with_mongo(args: Args, mongo: MongoClient) -> Result<Self> {
        let ledger = MongoLedgerStore::new(mongo.clone(), args.transaction_retries).await?;
        let notifier = MongoNotificationSink::new(&mongo).await?;
        Ok(Self::new(
            args,
            Some(mongo),
            Arc::new(ledger),
            Arc::new(notifier),
        ))
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Studbook listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.mongo.is_none() {
        warn!("Running on the in-memory ledger - data is lost on restart");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Extract request parts and dispatch
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let account = req
        .headers()
        .get(state.args.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    debug!("[{}] {} {} (account: {:?})", addr, method, path, account);

    let body = req.into_body().collect().await?.to_bytes();

    Ok(dispatch(&state, method, &path, query.as_deref(), account.as_deref(), body).await)
}

/// Route a request to its handler
pub async fn dispatch(
    state: &AppState,
    method: Method,
    path: &str,
    query: Option<&str>,
    account: Option<&str>,
    body: Bytes,
) -> Response<FullBody> {
    let result = match (method.clone(), path) {
        // Liveness check
        (Method::GET, "/health") | (Method::GET, "/healthz") => Ok(routes::health_check(state)),

        // Readiness check
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            Ok(routes::readiness_check(state).await)
        }

        // Version info for deployment verification
        (Method::GET, "/version") => Ok(routes::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => Ok(preflight_response()),

        (Method::POST, "/transfers") => transfers::handle_propose(state, account, &body).await,
        (Method::GET, "/transfers") => transfers::handle_list(state, account, query).await,

        (Method::PUT, "/accounts/me/privacy") => {
            accounts::handle_update_privacy(state, account, &body).await
        }

        (Method::POST, "/admin/projections/reconcile") => {
            admin::handle_reconcile(state, account).await
        }

        _ => dispatch_resource(state, method.clone(), path, account).await,
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            if err.status_code().is_server_error() {
                error!("{} {} failed: {}", method, path, err);
            } else {
                debug!("{} {} rejected: {}", method, path, err);
            }
            error_response(&err)
        }
    }
}

/// Routes with identifiers in the path
async fn dispatch_resource(
    state: &AppState,
    method: Method,
    path: &str,
    account: Option<&str>,
) -> Result<Response<FullBody>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (Method::GET, ["transfers", id]) => transfers::handle_get(state, account, id).await,
        (Method::POST, ["transfers", id, "accept"]) => {
            transfers::handle_accept(state, account, id).await
        }
        (Method::POST, ["transfers", id, "decline"]) => {
            transfers::handle_decline(state, account, id).await
        }
        (Method::POST, ["transfers", id, "accept-view-only"]) => {
            transfers::handle_accept_view_only(state, account, id).await
        }

        (Method::GET, ["animals", id]) => animals::handle_get_private(state, account, id).await,
        (Method::GET, ["animals", id, "public"]) => animals::handle_get_public(state, id).await,
        (Method::DELETE, ["animals", id, "view-only", account_id]) => {
            animals::handle_revoke_view_only(state, account, id, account_id).await
        }

        (Method::POST, ["admin", "projections", id, "refresh"]) => {
            admin::handle_refresh(state, account, id).await
        }

        _ => Err(StudbookError::NotFound(format!("No route for {}", path))),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn state() -> AppState {
        AppState::in_memory(Args::parse_from(["studbook"]))
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let state = state();
        let response = dispatch(&state, Method::GET, "/nope", None, None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preflight() {
        let state = state();
        let response =
            dispatch(&state, Method::OPTIONS, "/transfers", None, None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response
            .headers()
            .contains_key(ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn test_missing_identity_is_401() {
        let state = state();
        let response = dispatch(&state, Method::GET, "/transfers", None, None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_resource_route_errors_are_mapped() {
        let state = state();
        let response = dispatch(
            &state,
            Method::GET,
            "/transfers/missing",
            None,
            Some("u1"),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = dispatch(
            &state,
            Method::POST,
            "/transfers/missing/accept",
            None,
            None,
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_and_ready_on_memory_backend() {
        let state = state();
        let response = dispatch(&state, Method::GET, "/health", None, None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = dispatch(&state, Method::GET, "/ready", None, None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
