//! # Toy Rental
//!
//! Subscription and credential backend for the toy-rental service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export DATABASE_URL=postgres://...   # optional, in-memory otherwise
//!
//! # Run the server
//! toy-rental
//! ```

use rent_api::{routes, state::AppState};
use rent_core::reclaim;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    print_banner();

    let state = AppState::from_env().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Plans loaded: {}", state.catalog.plans.len());
    info!("Payment provider: {}", state.ledger.provider_name());

    let reclaimer = reclaim::spawn(state.engine.clone(), state.config.token_sweep_interval);

    let app = routes::create_router(state);

    info!("Toy Rental starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Register: POST http://{}/api/v1/users", addr);
        info!("Webhook: POST http://{}/webhook/stripe", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reclaimer.stop().await;
    info!("Toy Rental stopped");

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn print_banner() {
    println!(
        r#"
  Toy Rental RS
  ━━━━━━━━━━━━━━━━━━━━━━━
  Subscriptions & credentials
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
