/*
 * Terraform Controller - Kubernetes Orchestrator for Terraform Workloads
 * Copyright (C) 2025 Alustan
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Controller service binary
//!
//! Starts the periodic reconciler and the sync webhook:
//! - `POST /sync` decodes a `SyncRequest` and drives one sync to its
//!   terminal status, returned as `{"body": <status>}`
//! - the reconciler walks every `Terraform` resource on an interval

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use controller::config::ControllerConfig;
use controller::plugins::PluginRegistry;
use controller::types::Context;
use controller::{sync, SyncRequest};
use serde_json::json;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Build identification, stamped by the release pipeline
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Commit: {}", option_env!("BUILD_COMMIT").unwrap_or("unknown"));
    println!("Date: {}", option_env!("BUILD_DATE").unwrap_or("unknown"));
    println!("Built by: {}", option_env!("BUILD_BY").unwrap_or("unknown"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(ControllerConfig::from_env());
    println!("Sync interval: {:?}", config.sync_interval);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let ctx = Context {
        client,
        config,
        plugins: Arc::new(PluginRegistry::with_builtin()),
    };

    // Periodic reconciliation in the background
    let reconciler_handle = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            sync::run_reconciler(ctx).await;
        })
    };

    let app = Router::new()
        .route("/sync", post(sync_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(30 * 60))),
        )
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    println!("Starting server on port 8080...");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconciler_handle.abort();
    info!("Controller service stopped");

    Ok(())
}

async fn sync_handler(State(ctx): State<Context>, body: Bytes) -> Response {
    let request: SyncRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let status = sync::handle(&ctx, request).await;
    Json(json!({ "body": status })).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
