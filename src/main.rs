#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use idgate::{
    configure_services, store::InMemoryStore, utils::logging::init_logging, ClientRegistry,
    GatewayState, KeyManager, OAuthFlowController, ProviderRegistry, SessionManager, Settings,
    TokenService, UserDirectory,
};
use log::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Loads .env, Settings.toml and environment overrides
    let settings = Settings::load().context("Failed to load settings")?;
    init_logging(&settings.logging.level);

    // No traffic without valid signing keys
    let keys = KeyManager::load(
        &settings.keys.private_key_path,
        &settings.keys.public_key_path,
    )
    .context("Failed to load signing keys")?;
    let tokens = TokenService::new(keys);

    let store = InMemoryStore::new();
    let operation_timeout = Duration::from_secs(settings.storage.operation_timeout_seconds);
    let clients = ClientRegistry::new(
        Arc::new(store.clone()),
        operation_timeout,
        settings.storage.secret_hash_cost,
    );
    let seeded = clients
        .seed(&settings.clients)
        .await
        .context("Failed to seed client registrations")?;
    info!("Seeded {seeded} client registration(s)");
    let users = UserDirectory::new(Arc::new(store), operation_timeout);

    let providers =
        ProviderRegistry::from_settings(&settings).context("Failed to initialize providers")?;
    if providers.is_empty() {
        log::warn!("No identity providers are configured; every login will fail");
    }

    let state = GatewayState {
        flow: OAuthFlowController::new(providers, clients, users.clone(), tokens.clone()),
        sessions: SessionManager::from_settings(&settings),
        tokens,
        users,
    };

    start_server(state, &settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if binding fails or the server stops with an error.
async fn start_server(state: GatewayState, settings: &Settings) -> anyhow::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, settings, &state);

    let cors_origins = settings.get_cors_origins();
    let state = web::Data::new(state);

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept", "X-Request-Id"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await
    .context("Server terminated with an error")
}

fn print_startup_info(bind_address: &str, settings: &Settings, state: &GatewayState) {
    println!("Starting idgate {} on http://{bind_address}", idgate::VERSION);
    println!();
    println!("Login endpoints:");
    println!("  GET  /login/{{provider}}     - Start a login (client_id, redirect_url, state)");
    println!("  GET  /callback/{{provider}}  - Provider callback");
    println!("  GET  /logout               - Clear session");
    println!();
    println!("Token endpoints:");
    println!("  POST /oauth/token          - Exchange session for a token");
    println!("  POST /token/{{provider}}     - Exchange a provider ID token for a token");
    println!("  GET  /userinfo             - Current user (Bearer token)");
    println!();
    println!("Configured providers:");
    for name in state.flow.providers().names() {
        println!("  {name}: {}", settings.callback_url(name));
    }
    println!();
    println!("System endpoints:");
    println!("  GET  /ping                 - Health check");
    println!("  GET  /error                - Error details");
}
