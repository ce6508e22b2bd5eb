use std::net::SocketAddr;
use std::sync::Arc;

use taskflow::config::Config;
use taskflow::database::setup_database;
use taskflow::dispatcher::Dispatcher;
use taskflow::logging;
use taskflow::reaper::Reaper;
use taskflow::rpc::heartbeat_routes;
use taskflow::shutdown::shutdown_token;
use taskflow::store::{PgStore, Store};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
  logging::init("coordinator");
  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url).await?;
  let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
  let shutdown = shutdown_token();

  let dispatcher = Dispatcher::with_rpc(store.clone(), config.dispatch.clone())?;
  let reaper = Reaper::new(store.clone(), config.reaper.clone());

  let server_shutdown = shutdown.clone();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.heartbeat_port));
  let (bound, heartbeat_server) = warp::serve(heartbeat_routes(store))
    .try_bind_with_graceful_shutdown(addr, async move { server_shutdown.cancelled().await })?;
  info!(addr = %bound, "Heartbeat listener running");

  tokio::join!(
    dispatcher.run(shutdown.clone()),
    reaper.run(shutdown.clone()),
    heartbeat_server,
  );
  info!("Coordinator stopped");
  Ok(())
}
