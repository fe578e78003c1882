#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod models;
mod registration;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use std::sync::Arc;
use std::time::Duration;

use api::{
    api_admin_courses, api_admin_create_course, api_admin_delete_course,
    api_admin_delete_registration, api_admin_login, api_admin_logout, api_admin_registration_detail,
    api_admin_registrations, api_admin_set_payment, api_admin_set_registration_time,
    api_admin_update_course, api_catalog, api_course_availability, api_course_videos,
    api_query_registration, api_registration_time, api_submit_registration,
    api_update_registration, bad_request, health, internal_error, not_found,
    unprocessable_entity,
};
use auth::{AdminCredentials, SessionStore, SqliteSessionStore, unauthorized};
use config::{AppConfig, load_environment};
use cors::{CorsFairing, preflight};
use error::AppError;
use registration::DependentItemPolicy;
use rocket::fs::FileServer;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("Environment error: {0}")]
    Env(#[from] dotenvy::Error),
    #[error("Server error: {0}")]
    Rocket(#[from] rocket::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    load_environment()?;
    let _telemetry = init_tracing()?;

    let config = AppConfig::from_env()?;

    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;
    info!("Migrations completed successfully");

    if config.seed_catalog {
        db::seed_default_catalog(&pool).await?;
    }

    let policy = match &config.dependent_items_path {
        Some(path) => DependentItemPolicy::load(path)?,
        None => DependentItemPolicy::default(),
    };

    let credentials = AdminCredentials::from_secret(&config.admin_secret)?;

    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(
        pool.clone(),
        chrono::Duration::hours(config.session_ttl_hours),
    ));

    spawn_session_sweeper(
        sessions.clone(),
        Duration::from_secs(config.session_sweep_interval_secs),
    );

    let _rocket = init_rocket(pool, config, policy, credentials, sessions)
        .launch()
        .await?;

    Ok(())
}

fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>, every: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match sessions.purge_expired().await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired admin sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired admin sessions: {}", e);
                }
            }

            tokio::time::sleep(every).await;
        }
    });
}

pub fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    policy: DependentItemPolicy,
    credentials: AdminCredentials,
    sessions: Arc<dyn SessionStore>,
) -> Rocket<Build> {
    info!("Starting after-school registration service");

    let mut figment = rocket::Config::figment();
    if let Some(port) = config.port {
        figment = figment.merge(("port", port));
    }

    let static_dir = config.static_dir.clone();
    let cors = CorsFairing::new(&config.cors_allowed_origin);

    let mut rocket = rocket::custom(figment)
        .manage(pool)
        .manage(policy)
        .manage(credentials)
        .manage(sessions)
        .manage(config)
        .mount(
            "/",
            routes![
                api_submit_registration,
                api_update_registration,
                api_query_registration,
                preflight,
            ],
        )
        .mount(
            "/api",
            routes![
                api_course_availability,
                api_registration_time,
                api_course_videos,
                api_catalog,
                health,
            ],
        )
        .mount(
            "/admin",
            routes![
                api_admin_login,
                api_admin_logout,
                api_admin_registrations,
                api_admin_courses,
                api_admin_registration_detail,
                api_admin_delete_registration,
                api_admin_set_payment,
                api_admin_create_course,
                api_admin_update_course,
                api_admin_delete_course,
                api_admin_set_registration_time,
            ],
        )
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                not_found,
                unprocessable_entity,
                internal_error
            ],
        )
        .attach(TelemetryFairing)
        .attach(cors);

    if static_dir.is_dir() {
        info!(path = %static_dir.display(), "Serving static files");
        rocket = rocket.mount("/", FileServer::from(static_dir));
    }

    rocket
}
