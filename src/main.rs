use actix::Actor;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use futures::future;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use catenis_api_emulator::config::{CliOptions, Config};
use catenis_api_emulator::handlers::command::ServerControl;
use catenis_api_emulator::routes;
use catenis_api_emulator::services::auth::{AuthService, RequestAuthenticator};
use catenis_api_emulator::services::context::ContextStore;
use catenis_api_emulator::services::dispatcher::NotificationDispatcher;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse();
    let config = Config::from_options(&options);

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match config.log_level.as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set up the logger")?;

    if options.shutdown {
        return shutdown_running_instance(&config).await;
    }

    info!(
        "Starting Catenis API emulator (ver. {})",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(ContextStore::new());
    let authenticator: Arc<dyn RequestAuthenticator> = Arc::new(AuthService::new(store.clone()));
    let dispatcher = NotificationDispatcher::new(store.clone()).start();
    let control = ServerControl::default();

    let config_data = web::Data::new(config.clone());
    let store_data = web::Data::from(store);
    let authenticator_data = web::Data::new(authenticator);
    let dispatcher_data = web::Data::new(dispatcher);
    let control_data = web::Data::new(control.clone());

    let api_base_path = config.api_base_path();
    let api_server = {
        let config_data = config_data.clone();
        let store_data = store_data.clone();
        let authenticator_data = authenticator_data.clone();
        let dispatcher_data = dispatcher_data.clone();
        HttpServer::new(move || {
            App::new()
                .app_data(config_data.clone())
                .app_data(store_data.clone())
                .app_data(authenticator_data.clone())
                .app_data(dispatcher_data.clone())
                .wrap(middleware::Logger::default())
                .configure(|cfg| routes::api_routes(cfg, &api_base_path))
        })
        .workers(1)
        .bind(("0.0.0.0", config.api_port))
        .with_context(|| format!("Failed to bind API server to port {}", config.api_port))?
        .run()
    };

    let cmd_server = HttpServer::new(move || {
        App::new()
            .app_data(store_data.clone())
            .app_data(dispatcher_data.clone())
            .app_data(control_data.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::command_routes)
    })
    .workers(1)
    .bind(("0.0.0.0", config.cmd_port))
    .with_context(|| format!("Failed to bind command server to port {}", config.cmd_port))?
    .run();

    control.register(api_server.handle(), cmd_server.handle());

    info!(
        "Emulated Catenis API listening on port {}, command server on port {}",
        config.api_port, config.cmd_port
    );

    future::try_join(api_server, cmd_server)
        .await
        .context("Server error")?;

    info!("Catenis API emulator stopped");
    Ok(())
}

/// Probe a running emulator instance on the command port and ask it to
/// close itself.
async fn shutdown_running_instance(config: &Config) -> anyhow::Result<()> {
    let base = format!("http://127.0.0.1:{}", config.cmd_port);
    let client = reqwest::Client::new();

    let info: String = client
        .get(format!("{}/info", base))
        .send()
        .await
        .context("No emulator instance answered on the command port")?
        .json()
        .await
        .context("Unexpected response from command server")?;

    if !info.starts_with("Catenis API Emulator") {
        anyhow::bail!("Process on command port is not a Catenis API emulator: {}", info);
    }

    client
        .post(format!("{}/close", base))
        .send()
        .await
        .context("Failed to request emulator shutdown")?
        .error_for_status()
        .context("Emulator refused the shutdown request")?;

    info!("Shutdown requested: {}", info);
    Ok(())
}
