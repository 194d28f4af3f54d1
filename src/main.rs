use sqlx::SqlitePool;
use tera::Tera;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ai;
use ai::ollama::OllamaClient;
mod config;
use config::Config;
mod credential;
mod data;
use data::repository::{ChatRepository, UserRepository};
mod middleware;
mod router;
use router::app_router;
mod session;
use session::SessionResolver;

use std::{process, sync::Arc};

pub struct AppState {
    chat_repo: ChatRepository,
    user_repo: UserRepository,
    sessions: SessionResolver,
    tera: Tera,
    ollama: OllamaClient,
    bcrypt_cost: u32,
}

impl AppState {
    pub fn new(pool: SqlitePool, tera: Tera, ollama: OllamaClient, bcrypt_cost: u32) -> Self {
        let user_repo = UserRepository::new(pool.clone());
        Self {
            chat_repo: ChatRepository::new(pool),
            sessions: SessionResolver::new(user_repo.clone()),
            user_repo,
            tera,
            ollama,
            bcrypt_cost,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ollama_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            process::exit(1);
        }
    };

    let pool = match data::connect(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(path = %config.database_path, "can't open database: {}", e);
            process::exit(1);
        }
    };

    let tera = match Tera::new("templates/**/*") {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("template parsing error(s): {}", e);
            process::exit(1);
        }
    };

    let ollama = match OllamaClient::new(&config.ollama_url) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("can't build inference client: {}", e);
            process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(pool, tera, ollama, config.bcrypt_cost));
    let app = app_router(state);

    let addr = config.listen_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, "can't bind listener: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(%addr, ollama = %config.ollama_url, "listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
        process::exit(1);
    }
}
