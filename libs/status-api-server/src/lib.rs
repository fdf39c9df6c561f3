use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use tokio_util::sync::CancellationToken;

use bridge_api::Readiness;

/// HTTP сервер liveness probe: `GET /status`.
pub async fn run(
    port: u16,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind status api :{port}: {e}"))?;

    tracing::info!(port, "status api listening");

    axum::serve(listener, router(readiness))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .with_state(readiness)
}

// --- REST: GET /status ---

async fn handle_status(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_ready_until_marked() {
        let readiness = Readiness::new();

        let response = handle_status(State(readiness.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        let response = handle_status(State(readiness)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run(0, Readiness::new(), shutdown.clone()));

        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
        assert!(result.is_ok());
    }
}
