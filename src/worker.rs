use std::net::SocketAddr;
use std::sync::Arc;

use taskflow::config::Config;
use taskflow::database::setup_database;
use taskflow::executor::Executor;
use taskflow::heartbeat::HeartbeatSender;
use taskflow::logging;
use taskflow::rpc::worker_routes;
use taskflow::shutdown::shutdown_token;
use taskflow::store::{PgStore, Store};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
  logging::init("worker");
  let config = Config::from_env()?;
  let db_pool = setup_database(&config.database_url).await?;
  let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
  let shutdown = shutdown_token();

  let executor = Arc::new(Executor::new(store, config.worker.concurrency));
  let heartbeat = HeartbeatSender::new(&config.heartbeat)?;

  let server_shutdown = shutdown.clone();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.worker.port));
  let (bound, server) = warp::serve(worker_routes(executor))
    .try_bind_with_graceful_shutdown(addr, async move { server_shutdown.cancelled().await })?;
  info!(
    addr = %bound,
    hostname = %heartbeat.hostname(),
    concurrency = config.worker.concurrency,
    "Worker service running"
  );

  tokio::join!(server, heartbeat.run(shutdown.clone()));
  info!("Worker stopped");
  Ok(())
}
