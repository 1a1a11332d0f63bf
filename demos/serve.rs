//! Serves a directory with range support.
//!
//! ```text
//! cargo run --example serve -- [config.toml]
//! SERVE_ROOT=./test SERVE_ADDR=127.0.0.1:3000 cargo run --example serve
//! ```

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{self, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use axum_byteranges::{serve_file, ServeConfig};

struct AppState {
    root: PathBuf,
    config: ServeConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => match ServeConfig::from_toml_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config file {}: {}. Using defaults.", path, e);
                ServeConfig::default()
            }
        },
        None => ServeConfig::default(),
    };
    tracing::info!("Configuration loaded: {:?}", config);

    let root = PathBuf::from(std::env::var("SERVE_ROOT").unwrap_or_else(|_| ".".to_string()));
    let addr: SocketAddr = std::env::var("SERVE_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;

    let state = Arc::new(AppState { root, config });
    let app = Router::new()
        .route("/{*path}", any(get_file))
        .with_state(state);

    tracing::info!("Serving on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    extract::Path(path): extract::Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match resolve(&state.root, &path) {
        Some(full_path) => serve_file(&method, &headers, &full_path, &state.config).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Join a request path under `root`, refusing anything but plain names.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut components = relative.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_))) {
        Some(root.join(relative))
    } else {
        None
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_byteranges=debug,serve=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
