use std::sync::Arc;

use fixup_core::config::Config;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), fixup_core::Error> {
    // The gateway's TLS stack needs a process-level crypto provider.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: failed to install default crypto provider: {e:?}");
    }

    fixup_core::logging::init("fixup")?;

    let cfg = Arc::new(Config::load()?);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    fixup_discord::router::run(cfg, cancel)
        .await
        .map_err(|e| fixup_core::Error::External(format!("discord bot failed: {e:#}")))?;

    Ok(())
}
