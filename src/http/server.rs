//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the filter middleware and forwarding handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Apply configuration updates while running
//! - Stop on the shutdown signal, draining in-flight requests

use std::time::Duration;

use axum::{middleware, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::FilterConfig;
use crate::http::middleware::{filter_middleware, FilterSettings, FilterState};
use crate::http::proxy::{proxy_handler, ProxyState};
use crate::lifecycle::Shutdown;
use crate::rules::RuleError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid filter rules: {0}")]
    Rules(#[from] RuleError),

    #[error("invalid upstream address: {0}")]
    Upstream(#[from] axum::http::uri::InvalidUri),
}

/// HTTP server for the response filter.
pub struct FilterServer {
    router: Router,
    filter: FilterState,
    upstream_address: String,
}

impl FilterServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &FilterConfig) -> Result<Self, ServerError> {
        let proxy = ProxyState::new(
            &config.upstream.address,
            Duration::from_secs(config.timeouts.connect_secs),
        )?;
        let filter = FilterState::new(FilterSettings::from_config(&config.filter)?);

        let router = Self::build_router(config, proxy, filter.clone());
        Ok(Self {
            router,
            filter,
            upstream_address: config.upstream.address.clone(),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &FilterConfig, proxy: ProxyState, filter: FilterState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(proxy)
            .layer(middleware::from_fn_with_state(filter, filter_middleware))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Handle to the live filter settings.
    pub fn filter_state(&self) -> &FilterState {
        &self.filter
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configs received on `updates` replace the filter settings; listener,
    /// upstream and timeout changes take effect on restart only.
    pub async fn run(
        self,
        listener: TcpListener,
        mut updates: mpsc::UnboundedReceiver<FilterConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, upstream = %self.upstream_address, "HTTP server starting");

        let filter = self.filter.clone();
        let upstream_address = self.upstream_address.clone();
        let mut stop = shutdown.subscribe();
        let reloader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => apply_update(&filter, &upstream_address, &config),
                        None => break,
                    },
                    _ = stop.recv() => break,
                }
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn apply_update(filter: &FilterState, upstream_address: &str, config: &FilterConfig) {
    match FilterSettings::from_config(&config.filter) {
        Ok(settings) => {
            tracing::info!(
                rules = settings.rules.len(),
                max_buffer_size = settings.max_buffer_size,
                "Filter configuration reloaded"
            );
            filter.update(settings);
        }
        Err(e) => {
            tracing::error!(error = %e, "Rejected filter configuration, keeping current");
        }
    }
    if config.upstream.address != upstream_address {
        tracing::warn!(
            configured = %config.upstream.address,
            active = %upstream_address,
            "Upstream address changes need a restart"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RuleConfig;

    #[test]
    fn test_rejects_invalid_rules() {
        let mut config = FilterConfig::default();
        config.filter.rules.push(RuleConfig {
            name: "broken".into(),
            search: Some("[".into()),
            replace: Some("x".into()),
            ..RuleConfig::default()
        });
        assert!(matches!(FilterServer::new(&config), Err(ServerError::Rules(_))));
    }

    #[tokio::test]
    async fn test_update_swaps_rules() {
        let server = FilterServer::new(&FilterConfig::default()).unwrap();
        assert!(server.filter_state().settings().rules.is_empty());

        let mut config = FilterConfig::default();
        config.filter.max_buffer_size = 64;
        config.filter.rules.push(RuleConfig {
            name: "tag".into(),
            set_header: Some(crate::config::schema::SetHeaderConfig {
                name: "x-filtered".into(),
                value: "1".into(),
            }),
            ..RuleConfig::default()
        });
        apply_update(server.filter_state(), "127.0.0.1:3000", &config);

        let settings = server.filter_state().settings();
        assert_eq!(settings.rules.len(), 1);
        assert_eq!(settings.max_buffer_size, 64);
    }
}
