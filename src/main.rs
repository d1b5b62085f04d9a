use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use log::info;

use chess_arena::config::ServerConfig;
use chess_arena::ranking::LoggingRanking;
use chess_arena::routes::configure_routes;
use chess_arena::state::AppState;
use chess_arena::store::InMemorySessionStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::from_env();
    info!(
        "Starting chess arena server at http://{}:{}",
        config.host, config.port
    );

    // The in-memory store and logging ranker stand in for the durable-store
    // and ranking collaborators; deployments swap in real implementations.
    let store: Arc<dyn chess_arena::store::SessionStore> = Arc::new(InMemorySessionStore::new());
    let ranking: Arc<dyn chess_arena::ranking::RankingService> = Arc::new(LoggingRanking);
    let app_state = web::Data::new(AppState::new(store, ranking));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(config.bind_addr())?
    .run()
    .await
}
