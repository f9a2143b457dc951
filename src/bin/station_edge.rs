//! Edge runtime entrypoint: loads config, runs migrations, wires every
//! component onto the event bus, and drives graceful top-down shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use edge_messaging::{decode, BrokerClient, BrokerConfig, InboundMessage, OutboxDrainer};
use edge_types::envelope::Party;
use plc_gateway::{GatewayClient, GatewayConfig, GatewayMode};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use station_edge::api::{self, sse::bridge_bus_to_broadcast, AppState};
use station_edge::bus::EventBus;
use station_edge::changeover::ChangeoverManager;
use station_edge::config::Config;
use station_edge::heartbeat::HeartbeatReporter;
use station_edge::order_manager::OrderManager;
use station_edge::payload_engine::PayloadEngine;
use station_edge::poller::ReportingPointPoller;
use station_edge::store::admin::PgAdminStore;
use station_edge::store::changeover::PgChangeoverStore;
use station_edge::store::job_styles::{CachedJobStyleCatalog, JobStyleStore, PgJobStyleStore};
use station_edge::store::orders::PgOrderStore;
use station_edge::store::outbox::PgOutboxStore;
use station_edge::store::payloads::PgPayloadStore;
use station_edge::store::reporting_points::PgReportingPointStore;

const JOB_STYLE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "station-edge")]
struct Cli {
    #[arg(long, default_value = "config.yaml")]
    config: String,
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "station-edge failed to start");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.debug { "station_edge=debug,tower_http=debug" } else { "station_edge=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    let station_id = config.station_id();
    info!(station_id = %station_id, "starting station-edge");

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("migrations applied");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bus = Arc::new(EventBus::new());

    let self_party = Party { role: "edge".to_string(), station: station_id.clone(), factory: config.namespace.clone() };
    let core_party = Party { role: "core".to_string(), station: "*".to_string(), factory: config.namespace.clone() };

    // Store layer.
    let payload_store: Arc<dyn station_edge::store::payloads::PayloadStore> = Arc::new(PgPayloadStore::new(pool.clone()));
    let order_store: Arc<dyn station_edge::store::orders::OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
    let changeover_store: Arc<dyn station_edge::store::changeover::ChangeoverStore> =
        Arc::new(PgChangeoverStore::new(pool.clone()));
    let reporting_point_store: Arc<dyn station_edge::store::reporting_points::ReportingPointStore> =
        Arc::new(PgReportingPointStore::new(pool.clone()));
    let outbox_store: Arc<dyn edge_messaging::OutboxStore> = Arc::new(PgOutboxStore::new(pool.clone()));
    let admin_store: Arc<dyn station_edge::store::admin::AdminStore> = Arc::new(PgAdminStore::new(pool.clone()));

    // Engine components.
    let orders = OrderManager::new(order_store, outbox_store.clone(), bus.clone(), self_party.clone(), core_party.clone());
    let payloads = PayloadEngine::new(payload_store.clone(), orders.clone(), bus.clone());
    payloads.install();
    let changeover = ChangeoverManager::new(changeover_store, bus.clone());

    let job_style_store = Arc::new(PgJobStyleStore::new(pool.clone()));
    let catalog = Arc::new(CachedJobStyleCatalog::new());
    match job_style_store.load_all().await {
        Ok(snapshot) => catalog.replace(snapshot),
        Err(e) => warn!(error = %e, "initial job style catalog load failed, starting empty"),
    }

    let heartbeater = HeartbeatReporter::new(
        outbox_store.clone(),
        bus.clone(),
        catalog.clone(),
        station_id.clone(),
        hostname(),
        env!("CARGO_PKG_VERSION").to_string(),
        vec![config.line_id.parse().unwrap_or_default()],
        self_party.clone(),
        core_party.clone(),
    );
    heartbeater.install();

    // PLC gateway.
    let (gateway_events_tx, mut gateway_events_rx) = mpsc::unbounded_channel();
    let gateway_config = GatewayConfig {
        host: config.warlink.host.clone(),
        port: config.warlink.port,
        poll_rate: config.warlink.poll_rate(),
        enabled: config.warlink.enabled,
        mode: match config.warlink.mode {
            station_edge::config::GatewayMode::Poll => GatewayMode::Poll,
            station_edge::config::GatewayMode::Sse => GatewayMode::Sse,
        },
    };
    let gateway = Arc::new(GatewayClient::new(gateway_config, gateway_events_tx));
    {
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(event) = gateway_events_rx.recv().await {
                bus.emit(event);
            }
        });
    }

    let reporting_poller = ReportingPointPoller::new(
        reporting_point_store.clone(),
        gateway.clone(),
        bus.clone(),
        config.poll_rate(),
        config.counter.jump_threshold,
    );

    // Broker + outbox.
    let broker = Arc::new(BrokerClient::new(BrokerConfig {
        brokers: config.messaging.kafka.brokers.clone(),
        group_id: config.messaging.kafka.group_id.clone(),
        station_id: station_id.clone(),
    })?);
    let outbox_drainer = OutboxDrainer::new(
        outbox_store,
        broker.clone(),
        config.messaging.orders_topic.clone(),
        config.messaging.outbox_drain_interval(),
        50,
    );

    // SSE bridge.
    let (events_tx, _events_rx) = broadcast::channel(256);
    bridge_bus_to_broadcast(&bus, events_tx.clone());

    let app_state = AppState::new(
        orders.clone(),
        payloads.clone(),
        payload_store,
        changeover.clone(),
        reporting_point_store,
        admin_store,
        bus.clone(),
        events_tx,
        shutdown_rx.clone(),
        config.web.auto_confirm,
    );

    // Spawn long-lived tasks.
    let mut tasks = Vec::new();

    if config.warlink.enabled {
        let gateway = gateway.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { gateway.run(rx).await }));
    }

    {
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            reporting_poller.run(rx).await;
        }));
    }

    {
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            outbox_drainer.run(rx).await;
        }));
    }

    {
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            heartbeater.run(rx).await;
        }));
    }

    {
        let mut rx = shutdown_rx.clone();
        let job_style_store = job_style_store.clone();
        let catalog = catalog.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(JOB_STYLE_REFRESH_INTERVAL) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                }
                if *rx.borrow() {
                    return;
                }
                match job_style_store.load_all().await {
                    Ok(snapshot) => catalog.replace(snapshot),
                    Err(e) => warn!(error = %e, "job style catalog refresh failed"),
                }
            }
        }));
    }

    {
        let broker = broker.clone();
        let topic = config.messaging.dispatch_topic.clone();
        let rx = shutdown_rx.clone();
        let orders = orders.clone();
        let station_id = station_id.clone();
        tasks.push(tokio::spawn(async move {
            broker
                .run_reader(&topic, rx, move |bytes| {
                    match decode(bytes, &station_id) {
                        Ok(InboundMessage::Ignored) => {}
                        Ok(message) => {
                            let orders = orders.clone();
                            tokio::spawn(async move {
                                if let Err(e) = orders.handle_dispatch_reply(message).await {
                                    warn!(error = %e, "failed to apply dispatch reply");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "dropping malformed inbound envelope"),
                    }
                })
                .await;
        }));
    }

    let web_addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = tokio::net::TcpListener::bind(&web_addr).await?;
    info!(addr = %web_addr, "HTTP surface listening");
    let app = api::router(app_state);
    let mut http_shutdown_rx = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.changed().await;
            })
            .await
    });

    wait_for_signal().await;
    info!("shutdown signal received, stopping tasks");
    let _ = shutdown_tx.send(true);
    gateway.stop();

    // Background tasks and the `/events` long-poll all watch the same
    // shutdown signal and unwind on their own; wait for them before the
    // HTTP server so the server is the last thing to go down.
    for task in tasks {
        let _ = task.await;
    }

    match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, http_task).await {
        Ok(join_result) => {
            let _ = join_result;
        }
        Err(_) => warn!("HTTP server did not shut down within the grace period"),
    }

    pool.close().await;
    info!("station-edge stopped cleanly");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
