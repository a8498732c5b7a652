mod api;
mod artifacts;
mod auth;
mod cascade;
mod engagement;
mod models;
mod recency;
mod store;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::env;
use std::sync::Arc;

use api::AppState;
use artifacts::ArtifactStore;
use auth::AuthService;
use cascade::CascadeDeleter;
use engagement::EngagementTracker;
use store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load environment variables
    dotenvy::dotenv().ok();

    // Get configuration from environment
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a number");

    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "inkstream.db".to_string());

    let artifacts_dir = env::var("ARTIFACTS_DIR").unwrap_or_else(|_| "artifacts".to_string());

    let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
        log::warn!("JWT_SECRET not set, using default (not secure for production!)");
        "default_jwt_secret_change_me".to_string()
    });

    // Initialize store and services
    let store = Arc::new(Store::new(&db_path).expect("Failed to initialize database"));
    let artifact_store =
        Arc::new(ArtifactStore::new(&artifacts_dir).expect("Failed to initialize artifact store"));
    let auth_service = Arc::new(AuthService::new(jwt_secret));
    let engagement = Arc::new(EngagementTracker::new(store.clone()));
    let cascade = Arc::new(CascadeDeleter::new(store.clone(), artifact_store.clone()));

    log::info!("Database: {}", db_path);
    log::info!("Artifacts: {}", artifacts_dir);
    log::info!("Starting inkstream server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // Register AuthService individually for the auth extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(store.clone()))
            // AppState for handlers that need the full set of services
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                auth_service: auth_service.clone(),
                engagement: engagement.clone(),
                cascade: cascade.clone(),
                artifacts: artifact_store.clone(),
            }))
            // Increase payload size limit for artifact uploads (50MB)
            .app_data(web::PayloadConfig::new(50 * 1024 * 1024))
            .configure(api::configure_routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
