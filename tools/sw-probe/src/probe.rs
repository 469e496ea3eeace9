//! One install → activate → fetch pass against a live origin.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use webchordr_net::{HttpNetwork, LoaderConfig, Request};
use webchordr_sw::{
    CacheStore, CacheWorker, Clients, MemoryCacheStore, Registration, ResponseSource,
    WorkerConfig,
};

/// Outcome of one probe run.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub version: String,
    pub partitions: Vec<String>,
    pub notified: usize,
    pub fetches: Vec<FetchResult>,
}

/// How one path was answered.
#[derive(Debug, Serialize)]
pub struct FetchResult {
    pub path: String,
    pub source: &'static str,
    pub status: u16,
    pub bytes: usize,
}

/// Read a worker configuration file.
pub fn load_config(path: &Path) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    Ok(WorkerConfig::from_json(&json)?)
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::ShellFallback => "shell",
    }
}

/// Install and activate `config`'s version, then fetch `paths` through it.
pub async fn run(
    config: WorkerConfig,
    paths: &[String],
) -> Result<ProbeReport, Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let network = Arc::new(HttpNetwork::new(config.origin.clone(), LoaderConfig::default())?);
    let store = Arc::new(MemoryCacheStore::new());
    let clients = Arc::new(Clients::new());
    let (_, mut messages) = clients.connect(config.shell_url()?).await;

    let worker = CacheWorker::new(
        Arc::clone(&config),
        store.clone(),
        network.clone(),
        clients.clone(),
    )?;
    let (registration, _events) = Registration::new(config.origin.clone(), network);
    registration.update(Arc::new(worker)).await?;

    let mut notified = 0;
    while messages.try_recv().is_ok() {
        notified += 1;
    }
    info!(version = %config.version, notified, "Probe worker active");

    let mut fetches = Vec::with_capacity(paths.len());
    for path in paths {
        let request = Request::get(config.resolve(path)?);
        let result = match registration.handle_fetch(request, None).await {
            Some(routed) => FetchResult {
                path: path.clone(),
                source: source_label(routed.source),
                status: routed.response.status.as_u16(),
                bytes: routed.response.body().len(),
            },
            None => FetchResult {
                path: path.clone(),
                source: "failed",
                status: 0,
                bytes: 0,
            },
        };
        fetches.push(result);
    }

    Ok(ProbeReport {
        version: config.version.to_string(),
        partitions: store.keys().await?,
        notified,
        fetches,
    })
}
