//! HTTP server for style transfer requests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::pipeline::StyleTransfer;
use crate::DefaultBackend;

/// Default upload limit for the whole multipart body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Application state shared across handlers.
///
/// The mutex only guards taking a handle; requests run on their own clone.
struct AppState {
    engine: Mutex<StyleTransfer<DefaultBackend>>,
}

impl AppState {
    fn engine(&self) -> StyleTransfer<DefaultBackend> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Response body of `/style-transfer`.
#[derive(Debug, Serialize)]
pub struct StyleTransferResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylized_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StyleTransferResponse {
    fn success(jpeg: &[u8]) -> Self {
        Self {
            stylized_image: Some(general_purpose::STANDARD.encode(jpeg)),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            stylized_image: None,
            error: Some(message),
        }
    }
}

type Reply = (StatusCode, Json<StyleTransferResponse>);

fn reject(status: StatusCode, message: String) -> Reply {
    (status, Json(StyleTransferResponse::error(message)))
}

/// Build the router with CORS, tracing, and body limit layers.
///
/// # Errors
///
/// Returns an error if an allowed origin is not a valid header value.
pub fn router(engine: StyleTransfer<DefaultBackend>, config: &ServerConfig) -> Result<Router> {
    let state = Arc::new(AppState {
        engine: Mutex::new(engine),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/style-transfer", post(style_transfer_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.allowed_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|e| Error::invalid("allowed_origins", format!("{origin}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the address is invalid or the listener fails.
pub async fn serve(config: ServerConfig, engine: StyleTransfer<DefaultBackend>) -> Result<()> {
    let app = router(engine, &config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::invalid("address", format!("{}:{}: {e}", config.host, config.port)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health         - Health check");
    info!("  POST /style-transfer - Multipart fields `image` and `style`");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Server {
            reason: e.to_string(),
        })?;

    info!("Server shutdown complete");
    Ok(())
}

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Style transfer endpoint.
async fn style_transfer_handler(State(state): State<Arc<AppState>>, multipart: Multipart) -> Reply {
    let request_id = uuid::Uuid::new_v4().to_string();
    info!(request_id = %request_id, "Processing style transfer request");

    let start = Instant::now();

    let (content, style) = match read_uploads(multipart).await {
        Ok(uploads) => uploads,
        Err(message) => {
            error!(request_id = %request_id, error = %message, "Invalid upload");
            return reject(StatusCode::BAD_REQUEST, message);
        }
    };

    info!(
        request_id = %request_id,
        content_bytes = content.len(),
        style_bytes = style.len(),
        "Uploads received"
    );

    // Every request optimizes its own target on a blocking worker
    let engine = state.engine();
    let outcome = tokio::task::spawn_blocking(move || engine.run(&content, &style)).await;

    let jpeg = match outcome {
        Ok(Ok(jpeg)) => jpeg,
        Ok(Err(e)) => {
            error!(request_id = %request_id, error = %e, "Style transfer failed");
            let status = if e.is_input_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return reject(status, e.to_string());
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Style transfer worker panicked");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, format!("worker failed: {e}"));
        }
    };

    info!(
        request_id = %request_id,
        output_bytes = jpeg.len(),
        total_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Style transfer completed"
    );

    (StatusCode::OK, Json(StyleTransferResponse::success(&jpeg)))
}

/// Pull the `image` and `style` file fields out of the form.
async fn read_uploads(mut multipart: Multipart) -> std::result::Result<(Vec<u8>, Vec<u8>), String> {
    let mut content = None;
    let mut style = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("malformed multipart body: {e}"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            "image" => &mut content,
            "style" => &mut style,
            _ => continue,
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("failed to read field `{name}`: {e}"))?;
        *slot = Some(bytes.to_vec());
    }

    match (content, style) {
        (Some(content), Some(style)) => Ok((content, style)),
        (None, _) => Err("missing multipart field `image`".to_string()),
        (_, None) => Err("missing multipart field `style`".to_string()),
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
