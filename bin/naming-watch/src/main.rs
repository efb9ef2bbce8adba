use anyhow::Result;
use resolver_core::{ResolveError, Snapshot};
use resolver_naming::{MemoryNamingClient, NamingClient};
use resolver_session::{ClientConn, NamingResolverBuilder};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{ServiceEntry, WatchConfig};

/// Prints every published address set as one JSON line
struct StdoutConn {
    target: String,
}

impl ClientConn for StdoutConn {
    fn update_state(&self, snapshot: Snapshot) {
        match serde_json::to_string(&snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode snapshot: {}", e),
        }
        info!("{} resolved to {} endpoints", self.target, snapshot.len());
    }

    fn report_error(&self, error: ResolveError) {
        error!("Resolution error for {}: {}", self.target, error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting naming-watch...");

    let path = WatchConfig::path_from_env();
    let config = WatchConfig::load(Path::new(&path))?;
    info!("Loaded configuration from {}", path);

    let registry = Arc::new(MemoryNamingClient::new());
    sync_registry(&registry, &config.services).await;

    let client: Arc<dyn NamingClient> = registry.clone();
    let builder = NamingResolverBuilder::with_config(Some(client), config.builder_config());
    let conn = Arc::new(StdoutConn {
        target: config.target.clone(),
    });
    let resolver = builder.build_session(&config.target, conn).await?;

    let interval = config.poll_interval();
    info!("Reloading registry contents every {:?}", interval);

    // Periodic reload loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting...");
                break;
            }
            _ = resolver.closed() => {
                warn!("Resolver stopped, exiting...");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match WatchConfig::load(Path::new(&path)) {
                    Ok(reloaded) => sync_registry(&registry, &reloaded.services).await,
                    Err(e) => warn!("Keeping previous registry contents: {:#}", e),
                }
            }
        }
    }

    resolver.close().await;
    registry.shutdown().await;
    Ok(())
}

/// Make the registry hold exactly the services listed in the file
async fn sync_registry(registry: &MemoryNamingClient, services: &[ServiceEntry]) {
    let mut listed = HashSet::new();
    for entry in services {
        listed.insert((entry.group.clone(), entry.service.clone()));
        registry
            .replace_instances(&entry.group, &entry.service, entry.instances.clone())
            .await;
        debug!(
            "Loaded {} instances for {}@@{}",
            entry.instances.len(),
            entry.group,
            entry.service
        );
    }

    for (group, service) in registry.services().await {
        if !listed.contains(&(group.clone(), service.clone())) {
            registry.replace_instances(&group, &service, Vec::new()).await;
            debug!("Cleared {}@@{}", group, service);
        }
    }
}
