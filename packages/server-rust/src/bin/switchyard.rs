//! `switchyard` binary: loads configuration, starts every component and
//! serves the admin API until Ctrl-C.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use switchyard_core::SystemClock;
use switchyard_server::cli::{load_services_file, ConfigArgs};
use switchyard_server::registry::{MemoryRegistryStore, RegistryStore};
use switchyard_server::remote::HttpTransport;
use switchyard_server::telemetry::{init_metrics, init_tracing};
use switchyard_server::Switchyard;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ConfigArgs::parse();
    init_tracing(&args.log_level, args.log_format)?;

    let config = args.to_config().context("invalid configuration")?;

    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
        info!(%addr, "prometheus exporter listening");
    }

    let store = registry_store(&args)?;
    let transport = HttpTransport::new(
        config.remote.call_timeout,
        config.remote.service_token.clone(),
    )?;
    let app = Switchyard::with_parts(config, store, Arc::new(transport), Arc::new(SystemClock))?;
    app.start().await?;

    if let Some(path) = &args.services_file {
        let services = load_services_file(path)?;
        app.discover(&services).await?;
    }

    let mut server = app.admin_server();
    let port = server.start().await?;
    info!(port, "switchyard admin listening");

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c; serving until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    app.stop(false).await
}

fn registry_store(args: &ConfigArgs) -> anyhow::Result<Arc<dyn RegistryStore>> {
    match &args.registry_path {
        #[cfg(feature = "redb")]
        Some(path) => {
            let store = switchyard_server::registry::RedbRegistryStore::open(path)?;
            info!(path = %path.display(), "using redb registry store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redb"))]
        Some(_) => anyhow::bail!("--registry-path requires the redb feature"),
        None => Ok(Arc::new(MemoryRegistryStore::new())),
    }
}
