//! Metrics endpoint and its access gate.

use super::allowlist::IpAllowList;
use super::handlers::AppState;
use crate::config::{BasicAuthConfig, MetricsMiddleware, PrometheusConfig};
use crate::core::error::Result;
use crate::metrics::{MetricsReport, render_json, render_line_protocol};
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Access gate in front of the metrics routes, built once from config.
#[derive(Clone)]
pub struct MetricsGuard {
    mode: MetricsMiddleware,
    allowlist: IpAllowList,
    expected_authorization: Option<String>,
}

impl MetricsGuard {
    pub fn from_config(config: &PrometheusConfig) -> Result<Self> {
        Ok(Self {
            mode: config.middleware,
            allowlist: IpAllowList::parse(&config.ip_whitelist)?,
            expected_authorization: config.basic_auth.as_ref().map(expected_header),
        })
    }
}

fn expected_header(credentials: &BasicAuthConfig) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", credentials.username, credentials.password))
    )
}

/// Middleware enforcing the configured gate.
pub async fn guard(
    State(guard): State<Arc<MetricsGuard>>,
    request: Request,
    next: Next,
) -> Response {
    match guard.mode {
        MetricsMiddleware::None => next.run(request).await,
        MetricsMiddleware::IpWhitelist => {
            let client = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip());
            match client {
                Some(ip) if guard.allowlist.allows(ip) => next.run(request).await,
                Some(ip) => {
                    debug!(%ip, "metrics request refused by allow-list");
                    StatusCode::FORBIDDEN.into_response()
                }
                None => StatusCode::FORBIDDEN.into_response(),
            }
        }
        MetricsMiddleware::BasicAuth => {
            let presented = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            let authorized = matches!(
                (presented, guard.expected_authorization.as_deref()),
                (Some(presented), Some(expected)) if presented == expected
            );
            if authorized {
                next.run(request).await
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Basic realm=\"metrics\"")],
                )
                    .into_response()
            }
        }
    }
}

/// GET {route} - aggregate line-protocol body
pub async fn export_metrics(State(state): State<AppState>) -> Response {
    match render_line_protocol(&state.reader.snapshot()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// GET {route}/json - per-partition detail
pub async fn export_metrics_json(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(render_json(state.reader.snapshot()))
}
