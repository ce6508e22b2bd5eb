use std::net::SocketAddr;
use std::sync::Arc;

use taskflow::config::Config;
use taskflow::database::setup_database;
use taskflow::logging;
use taskflow::routes::routes;
use taskflow::shutdown::shutdown_token;
use taskflow::store::{PgStore, Store};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  logging::init("scheduler");
  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url).await?;
  let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
  let shutdown = shutdown_token();

  let api = routes(store, config.api.clone());
  let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
  let (bound, server) = warp::serve(api)
    .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })?;

  info!(addr = %bound, "Scheduler API listening");
  server.await;
  info!("Scheduler API stopped");
  Ok(())
}
