use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Token cancelled on Ctrl-C or SIGTERM. Loops and servers stop when it fires.
pub fn shutdown_token() -> CancellationToken {
  let token = CancellationToken::new();
  let trigger = token.clone();
  tokio::spawn(async move {
    wait_for_signal().await;
    trigger.cancel();
  });
  token
}

async fn wait_for_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
          _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        return;
      }
      Err(e) => warn!(error = %e, "SIGTERM handler unavailable"),
    }
  }

  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("Received Ctrl-C, shutting down"),
    Err(e) => {
      error!(error = %e, "Ctrl-C handler unavailable");
      std::future::pending::<()>().await;
    }
  }
}
