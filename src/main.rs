use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, Layer},
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use chain::blockcypher::BlockCypherClient;
use chain::esplora::EsploraClient;
use config::Config;
use db::auth::AuthRepository;
use db::deposits::DepositRepository;
use observer::ChainObserver;
use rates::RateClient;
use routes::auth::AuthService;
use state::AppState;

mod chain;
mod config;
mod db;
mod error;
mod money;
mod observer;
mod rates;
mod routes;
mod settlement;
mod state;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new()
        .json()
        .with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Unable to set global subscriber");

    let database_pool = match process_database(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(port) => {
            tracing::info!("Listening on port: {}", port.local_addr().unwrap().port());
            port
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let state = build_state(database_pool.clone(), &config);

    // background chain scan and deposit-expiry sweep
    let observer = ChainObserver::new(
        database_pool.clone(),
        Arc::new(EsploraClient::new(config.btc_explorer_url.clone())),
        Arc::new(EsploraClient::new(config.ltc_explorer_url.clone())),
        state.blockcypher.clone(),
        config.shared_btc_address.clone(),
        config.shared_ltc_address.clone(),
    );
    tokio::spawn(observer.run(Duration::from_secs(config.deposit_scan_secs)));
    tokio::spawn(observer::run_expiry_sweep(
        DepositRepository::new(database_pool),
        Duration::from_secs(config.expiry_sweep_secs),
    ));

    let router = process_begin(state);
    tracing::info!("Routes constructed successfully");

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn build_state(db_pool: PgPool, config: &Config) -> AppState {
    let repo = AuthRepository::new(db_pool.clone());
    let auth = Arc::new(AuthService::new(repo, config.jwt_secret.clone()));
    let rates = Arc::new(RateClient::new(config.price_api_url.clone()));
    let blockcypher = Arc::new(BlockCypherClient::new(
        config.blockcypher_url.clone(),
        config.blockcypher_token.clone(),
    ));

    AppState {
        pool: db_pool,
        auth,
        rates,
        broadcast: blockcypher.clone(),
        blockcypher,
        shared_btc_address: config.shared_btc_address.clone(),
        shared_ltc_address: config.shared_ltc_address.clone(),
    }
}

fn process_begin(state: AppState) -> Router {
    let head_route = Router::new();

    let auth_routes = routes::auth::auth_routes(state.auth.clone());
    let wallet_routes = routes::wallet::wallet_routes(state.clone())
        .route_layer(ValidateRequestHeaderLayer::accept("Authorization"))
        .route_layer(CompressionLayer::new().gzip(true));
    let deposit_routes = routes::deposits::deposit_routes(state.clone())
        .route_layer(ValidateRequestHeaderLayer::accept("Authorization"));
    let withdrawal_routes = routes::withdrawals::withdrawal_routes(state.clone())
        .route_layer(ValidateRequestHeaderLayer::accept("Authorization"));
    let address_routes = routes::addresses::address_routes(state.clone())
        .route_layer(ValidateRequestHeaderLayer::accept("Authorization"));
    let order_routes = routes::orders::order_routes(state)
        .route_layer(ValidateRequestHeaderLayer::accept("Authorization"));

    head_route
        .nest("/v1", auth_routes)
        .nest("/v1", wallet_routes)
        .nest("/v1", deposit_routes)
        .nest("/v1", withdrawal_routes)
        .nest("/v1", address_routes)
        .nest("/v1", order_routes)
        .route_layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|err| format!("Failed to run migrations: {}", err))
    {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}
