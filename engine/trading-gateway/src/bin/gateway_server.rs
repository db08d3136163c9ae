//! TradingGateway HTTP server
//!
//! Builder credentials and the session secret are checked before the
//! listener starts; a missing venue or relayer setting only disables the
//! routes that need it.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trading_gateway::builder::{LocalBuilderSource, RemoteBuilderSource};
use trading_gateway::session::{
    CookieCodec, InMemorySessionStore, RedisSessionStore, SessionSettings,
};
use trading_gateway::upstream::HttpUpstream;
use trading_gateway::{
    rest_api, BuilderCredentials, BuilderHeaderSource, BuilderSigner, GatewayConfig,
    OrderGateway, RelayerProxy, SessionManager, SessionStore, UpstreamClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting TradingGateway v{}", trading_gateway::VERSION);

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;

    // Builder credentials are server-only and required
    let credentials = BuilderCredentials::from_env().context("builder credentials")?;
    info!("Loaded builder credentials for key {:?}", credentials);
    let signer = Arc::new(BuilderSigner::new(credentials));

    let secret = config.session.secret.as_ref().context("SESSION_SECRET not set")?;
    let codec = CookieCodec::new(secret.expose_secret().as_bytes())
        .context("SESSION_SECRET rejected")?;

    let store: Arc<dyn SessionStore> = match &config.session.redis_url {
        Some(url) => {
            let store = RedisSessionStore::new(url, config.session_ttl())
                .await
                .context("failed to connect to session Redis")?;
            info!("Using Redis session store");
            Arc::new(store)
        }
        None => {
            warn!("SESSION_REDIS_URL not set, sessions are kept in process memory");
            Arc::new(InMemorySessionStore::new())
        }
    };
    let sessions = Arc::new(SessionManager::new(
        store,
        codec,
        SessionSettings {
            cookie_name: config.session.cookie_name.clone(),
            ttl: config.session_ttl(),
            secure_cookie: config.session.cookie_secure,
        },
    ));

    let http = HttpUpstream::new(config.upstream_timeout()).context("failed to build HTTP client")?;
    let upstream: Arc<dyn UpstreamClient> = Arc::new(http);

    let builder_source: Arc<dyn BuilderHeaderSource> = match &config.builder.sign_url {
        Some(url) => {
            info!("Builder headers fetched from {}", url);
            Arc::new(RemoteBuilderSource::new(
                upstream.clone(),
                url.clone(),
                config.builder_sign_timeout(),
            ))
        }
        None => Arc::new(LocalBuilderSource::new(signer.clone())),
    };

    if config.venue.url.is_none() {
        warn!("CLOB_API_URL not set, order and link endpoints will fail");
    }
    if config.relayer.url.is_none() {
        warn!("RELAYER_URL not set, relayer endpoints will fail");
    }
    if config.relayer.api_key.is_none() {
        warn!("RELAYER_API_KEY not set, relayer submissions will fail");
    }

    let gateway = Arc::new(OrderGateway::new(
        sessions,
        upstream.clone(),
        builder_source,
        config.venue.url.clone(),
    ));
    let relayer = Arc::new(RelayerProxy::new(
        upstream,
        config.relayer.url.clone(),
        config.relayer.api_key.clone(),
    ));

    if let Some(addr) = &config.metrics.addr {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install metrics exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    // Create routes
    let routes = rest_api::create_routes(gateway, relayer, signer);

    // Start server
    let addr = config.server_addr().context("invalid server address")?;
    info!("TradingGateway listening on {}", addr);
    warp::serve(routes).run(addr).await;

    Ok(())
}
