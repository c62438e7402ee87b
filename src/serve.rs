//! Purpose: Provide the HTTP/JSON server wrapping the core transformations.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server for browser frontends.
//! Invariants: Decode/Validation/Usage failures map to 400, everything else 500.
//! Invariants: Error bodies carry `{"error": <message>}` and nothing internal.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use tokio::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crashflow::api::{
    Error, ErrorKind, ScriptOptions, fix_malformed_json, generate_sql, records_from_value,
};

const WELCOME_MESSAGE: &str = "crashflow API is ready. POST /api/fix-json to normalize a payload.";

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    // The core is stateless; the router carries no shared state.
    let app = Router::new()
        .route("/api", get(welcome))
        .route("/api/fix-json", post(fix_json))
        .route("/api/generate-sql", post(generate_script))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on http://{addr}/api");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn welcome() -> Response {
    Json(json!({ "message": WELCOME_MESSAGE })).into_response()
}

async fn fix_json(Json(payload): Json<Value>) -> Response {
    let Some(text) = payload.get("malformed_json").and_then(Value::as_str) else {
        return error_response(
            Error::new(ErrorKind::Validation).with_message("malformed_json must be a string"),
        );
    };
    match fix_malformed_json(text) {
        Ok(fixed) => Json(json!({ "fixed_json": fixed })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn generate_script(Json(payload): Json<Value>) -> Response {
    let Some(records_value) = payload.get("records") else {
        return error_response(
            Error::new(ErrorKind::Validation).with_message("records must be an array"),
        );
    };
    let Some(mode) = payload.get("mode").and_then(Value::as_str) else {
        return error_response(
            Error::new(ErrorKind::Validation).with_message("mode must be a string"),
        );
    };
    let mut options = ScriptOptions::new();
    if let Some(batch_size) = payload.get("batch_size") {
        let Some(batch_size) = batch_size.as_u64() else {
            return error_response(
                Error::new(ErrorKind::Validation).with_message("batch_size must be an integer"),
            );
        };
        options = options.with_batch_size(batch_size as usize);
    }

    let result = records_from_value(records_value)
        .and_then(|records| generate_sql(&records, mode, &options));
    match result {
        Ok(sql) => Json(json!({ "sql": sql })).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage | ErrorKind::Decode | ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Internal | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let message = err.message().unwrap_or("error").to_string();
    (error_status(err.kind()), Json(json!({ "error": message }))).into_response()
}
