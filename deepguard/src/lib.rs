//! DeepGuard: a self-hostable deepfake detection service.
//!
//! The server accepts authenticated image uploads, runs them through an external
//! classifier process, and records each verdict in PostgreSQL. Around that core sit
//! account management with JWT sessions, a password reset flow delivered over email,
//! and optional S3-compatible object storage for the uploaded images.
//!
//! ## Architecture
//!
//! - [`api`] - HTTP handlers and request/response models
//! - [`auth`] - password hashing, session tokens, and the request extractor
//! - [`db`] - repositories over PostgreSQL, plus embedded migrations
//! - [`detector`] - invocation of the external classifier process
//! - [`storage`] - S3-compatible object storage for uploaded images
//! - [`email`] - outbound email (SMTP or file transport)
//! - [`config`] - YAML + environment configuration
//!
//! ## Usage
//!
//! ```no_run
//! use deepguard::{Application, Config, config::Args};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async { /* shutdown signal */ }).await
//! }
//! ```

use anyhow::Context;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post, put},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info};
use utoipa::OpenApi as _;
use utoipa_scalar::{Scalar, Servable};

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod detector;
pub mod email;
pub mod errors;
pub mod openapi;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod types;

pub use config::Config;

use crate::{
    detector::{Detector, ScriptDetector},
    email::EmailService,
    openapi::ApiDoc,
    storage::ObjectStorage,
};

/// Headroom on top of the configured image size limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state available to all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub mailer: Arc<EmailService>,
    /// Absent when no object storage is configured; uploads then stay local.
    pub storage: Option<Arc<ObjectStorage>>,
    pub detector: Arc<dyn Detector>,
}

/// Embedded database migrations.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Build the CORS layer from configuration.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = config
        .cors
        .allowed_origins
        .iter()
        .map(|url| {
            HeaderValue::from_str(url.as_str().trim_end_matches('/'))
                .with_context(|| format!("invalid CORS origin: {url}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if config.cors.allow_credentials {
        cors = cors.allow_credentials(true);
    }
    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/auth/signup", post(api::handlers::auth::signup))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .route("/auth/me", get(api::handlers::auth::me))
        .route("/auth/profile", put(api::handlers::auth::update_profile))
        .route("/auth/password", put(api::handlers::auth::change_password))
        .route("/auth/forgot-password", post(api::handlers::auth::forgot_password))
        .route(
            "/auth/reset-password/{token}",
            get(api::handlers::auth::verify_reset_token).put(api::handlers::auth::reset_password),
        );

    // The multipart body is slightly larger than the image it carries
    let body_limit = state.config.detector.max_upload_bytes as usize + MULTIPART_OVERHEAD;
    let detect_routes = Router::new()
        .route("/detect", post(api::handlers::detect::detect))
        .layer(DefaultBodyLimit::max(body_limit));

    let history_routes = Router::new()
        .route("/history", get(api::handlers::history::list_history))
        .route("/history/stats", get(api::handlers::history::get_stats))
        .route(
            "/history/{id}",
            get(api::handlers::history::get_detection).delete(api::handlers::history::delete_detection),
        );

    let api_routes = Router::new()
        .route("/health", get(api::handlers::health::health))
        .merge(auth_routes)
        .merge(detect_routes)
        .merge(history_routes);

    let cors = create_cors_layer(&state.config)?;
    let uploads_dir = state.config.detector.uploads_dir.clone();

    let router = Router::new()
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// The assembled application: router, configuration, and database pool.
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Connect to the database, run migrations, and assemble the router.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool.max_connections)
            .min_connections(config.database.pool.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.pool.acquire_timeout_secs))
            .connect(&config.database.url)
            .await
            .context("connect to database")?;

        migrator().run(&pool).await.context("run database migrations")?;

        Self::with_pool(config, pool)
    }

    /// Assemble the application on an existing pool. Migrations are the caller's
    /// responsibility.
    pub fn with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.detector.uploads_dir).with_context(|| {
            format!("create uploads directory {}", config.detector.uploads_dir.display())
        })?;

        let mailer = Arc::new(EmailService::new(&config)?);
        let storage = config.storage.as_ref().map(|storage_config| Arc::new(ObjectStorage::new(storage_config)));
        let detector: Arc<dyn Detector> = Arc::new(ScriptDetector::new(&config.detector));

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .mailer(mailer)
            .maybe_storage(storage)
            .detector(detector)
            .build();

        let router = build_router(state)?;

        Ok(Self { router, config, pool })
    }

    /// Serve until the shutdown future resolves, then close the pool.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address).await.with_context(|| format!("bind to {address}"))?;

        info!("Listening on {address}");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serve HTTP")?;

        self.pool.close().await;
        Ok(())
    }
}
