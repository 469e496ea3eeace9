//! End-to-end lifecycle tests: install, activate and fetch against an
//! in-memory store, scripted network and in-memory clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use url::Url;
use webchordr_net::{NetError, Network, Request, Response, ResponseKind};
use webchordr_sw::{
    CacheKey, CacheStore, CacheWorker, ClientError, ClientId, ClientNotification, ClientRegistry,
    Clients, MemoryCacheStore, PrecacheManifest, Registration, ResponseSource, StoreError,
    VersionId, WorkerConfig, WorkerError, WorkerState,
};

const ORIGIN: &str = "https://chordr.example/";

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn v(id: &str) -> VersionId {
    VersionId::new(id).unwrap()
}

// ==================== Doubles ====================

/// Serves every path with a body naming the path and the site revision.
/// Paths listed in `offline` fail.
struct ScriptedNetwork {
    revision: &'static str,
    offline: Vec<&'static str>,
    delay: Duration,
    calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedNetwork {
    fn new(revision: &'static str) -> Arc<Self> {
        Self::build(revision, vec![], Duration::ZERO)
    }

    fn build(revision: &'static str, offline: Vec<&'static str>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            revision,
            offline,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), path.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline.iter().any(|p| *p == path) {
            return Err(NetError::RequestFailed(format!("{} offline", path)));
        }
        Ok(Response::basic(
            request.url.clone(),
            format!("{}@{}", path, self.revision),
        ))
    }
}

/// Never answers requests for `stalled`; every other path succeeds.
struct StalledNetwork {
    stalled: &'static str,
}

#[async_trait]
impl Network for StalledNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path();
        if path == self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(Response::basic(request.url.clone(), format!("{}@stalled", path)))
    }
}

/// Counts every store call, optionally failing enumeration or deletion.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryCacheStore,
    calls: AtomicUsize,
    fail_keys: bool,
    fail_delete: Option<&'static str>,
}

impl RecordingStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        self.touch();
        self.inner.open(partition).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.touch();
        if self.fail_keys {
            return Err(StoreError::Backend("keys unavailable".to_string()));
        }
        self.inner.keys().await
    }

    async fn delete(&self, partition: &str) -> Result<bool, StoreError> {
        self.touch();
        if self.fail_delete == Some(partition) {
            return Err(StoreError::Backend(format!("{} locked", partition)));
        }
        self.inner.delete(partition).await
    }

    async fn match_request(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<Response>, StoreError> {
        self.touch();
        self.inner.match_request(partition, key).await
    }

    async fn put(
        &self,
        partition: &str,
        key: CacheKey,
        response: Response,
    ) -> Result<(), StoreError> {
        self.touch();
        self.inner.put(partition, key, response).await
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(CacheKey, Response)>,
    ) -> Result<(), StoreError> {
        self.touch();
        self.inner.put_all(partition, entries).await
    }
}

/// Registry whose claim always fails.
struct UnclaimableClients;

#[async_trait]
impl ClientRegistry for UnclaimableClients {
    async fn claim(&self, _version: &VersionId) -> Result<usize, ClientError> {
        Err(ClientError::ClaimFailed("host refused".to_string()))
    }

    async fn match_all(&self, _include_uncontrolled: bool) -> Result<Vec<ClientId>, ClientError> {
        Ok(Vec::new())
    }

    async fn post_message(
        &self,
        client: ClientId,
        _message: &ClientNotification,
    ) -> Result<(), ClientError> {
        Err(ClientError::NotFound(client))
    }
}

// ==================== Fixtures ====================

fn shell_manifest() -> PrecacheManifest {
    PrecacheManifest::new(["/", "/manifest.json"], Vec::<String>::new())
}

fn full_manifest() -> PrecacheManifest {
    PrecacheManifest::new(
        ["/", "/manifest.json", "/catalog.json"],
        ["/assets/fonts/merriweather-v21-latin-regular.woff2"],
    )
}

fn worker_with(
    version: &str,
    manifest: PrecacheManifest,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientRegistry>,
) -> CacheWorker {
    let config = WorkerConfig::new(v(version), Url::parse(ORIGIN).unwrap()).with_manifest(manifest);
    CacheWorker::new(Arc::new(config), store, network, clients).unwrap()
}

async fn sorted_keys(store: &dyn CacheStore) -> Vec<String> {
    let mut keys = store.keys().await.unwrap();
    keys.sort();
    keys
}

// ==================== Install ====================

#[tokio::test]
async fn install_stores_manifest_under_versioned_shell() {
    let store = Arc::new(MemoryCacheStore::new());
    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        Arc::new(Clients::new()),
    );

    worker.install().await.unwrap();

    for path in ["/", "/manifest.json"] {
        let entry = store
            .match_request("shell:v1", &CacheKey::get(url(path)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.text().unwrap(), format!("{}@r1", path));
    }
    assert_eq!(store.entries("shell:v1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn install_twice_is_idempotent() {
    let store = Arc::new(MemoryCacheStore::new());
    let worker = worker_with(
        "v1",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        Arc::new(Clients::new()),
    );

    worker.install().await.unwrap();
    let mut first = store.entries("shell:v1").await.unwrap();
    worker.install().await.unwrap();
    let mut second = store.entries("shell:v1").await.unwrap();

    first.sort_by_key(|k| k.to_string());
    second.sort_by_key(|k| k.to_string());
    assert_eq!(first, second);
    assert_eq!(store.entries("assets").await.unwrap().len(), 1);
    assert_eq!(sorted_keys(store.as_ref()).await, vec!["assets", "shell:v1"]);
}

#[tokio::test]
async fn install_fails_when_any_entry_fails() {
    let store = Arc::new(MemoryCacheStore::new());
    let network = ScriptedNetwork::build("r1", vec!["/catalog.json"], Duration::ZERO);
    let worker = worker_with(
        "v1",
        full_manifest(),
        store.clone(),
        network,
        Arc::new(Clients::new()),
    );

    let err = worker.install().await.unwrap_err();

    assert_eq!(err.category(), "install");
    assert!(store.entries("shell:v1").await.unwrap_or_default().is_empty());
}

// ==================== Activate ====================

#[tokio::test]
async fn activate_sweeps_previous_shell_and_keeps_assets() {
    let store = Arc::new(MemoryCacheStore::new());
    store.open("shell:v0").await.unwrap();
    store.open("assets").await.unwrap();
    store
        .put(
            "assets",
            CacheKey::get(url("/assets/images/logo-32-light.png")),
            Response::basic(url("/assets/images/logo-32-light.png"), "png"),
        )
        .await
        .unwrap();

    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.sweep.deleted, vec!["shell:v0"]);
    assert_eq!(sorted_keys(store.as_ref()).await, vec!["assets", "shell:v1"]);
    assert!(store
        .match_request("assets", &CacheKey::get(url("/assets/images/logo-32-light.png")))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn activate_claims_and_notifies_clients() {
    let clients = Arc::new(Clients::new());
    let (id, mut rx) = clients.connect(url("/song/42")).await;

    let worker = worker_with(
        "v2",
        shell_manifest(),
        Arc::new(MemoryCacheStore::new()),
        ScriptedNetwork::new("r2"),
        clients.clone(),
    );
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(clients.controller(id).await, Some(v("v2")));

    let message = rx.recv().await.unwrap();
    assert_eq!(message.to_json(), r#"{"type":"VERSION_UPDATE","version":"v2"}"#);
}

#[tokio::test]
async fn activate_tolerates_failed_deletion() {
    let store = Arc::new(RecordingStore {
        fail_delete: Some("shell:v0"),
        ..Default::default()
    });
    store.open("shell:v0").await.unwrap();
    store.open("shell:old").await.unwrap();

    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.sweep.failed, vec!["shell:v0"]);
    assert_eq!(report.sweep.deleted, vec!["shell:old"]);
}

#[tokio::test]
async fn activate_aborts_when_partitions_cannot_be_listed() {
    let clients = Arc::new(Clients::new());
    let (id, mut rx) = clients.connect(url("/")).await;
    let store = Arc::new(RecordingStore {
        fail_keys: true,
        ..Default::default()
    });

    let worker = worker_with(
        "v1",
        shell_manifest(),
        store,
        ScriptedNetwork::new("r1"),
        clients.clone(),
    );
    worker.install().await.unwrap();

    let err = worker.activate().await.unwrap_err();
    assert!(matches!(err, WorkerError::Activation(_)));
    // Clients are never claimed over a half-swept cache.
    assert_eq!(clients.controller(id).await, None);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn activate_aborts_when_claim_fails() {
    let worker = worker_with(
        "v1",
        shell_manifest(),
        Arc::new(MemoryCacheStore::new()),
        ScriptedNetwork::new("r1"),
        Arc::new(UnclaimableClients),
    );
    worker.install().await.unwrap();

    let err = worker.activate().await.unwrap_err();
    assert!(matches!(err, WorkerError::Claim(ClientError::ClaimFailed(_))));
}

// ==================== Fetch ====================

#[tokio::test]
async fn cached_entry_is_served_without_network() {
    let network = ScriptedNetwork::new("r1");
    let worker = worker_with(
        "v1",
        full_manifest(),
        Arc::new(MemoryCacheStore::new()),
        network.clone(),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();
    let precache_calls = network.calls().len();

    let routed = worker.fetch(&Request::get(url("/catalog.json"))).await.unwrap();

    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text().unwrap(), "/catalog.json@r1");
    assert_eq!(network.calls().len(), precache_calls);
}

#[tokio::test]
async fn navigation_is_answered_with_shell_document() {
    let network = ScriptedNetwork::new("r1");
    let worker = worker_with(
        "v1",
        shell_manifest(),
        Arc::new(MemoryCacheStore::new()),
        network.clone(),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();
    let precache_calls = network.calls().len();

    for path in ["/song/42", "/setlist", "/settings/"] {
        let routed = worker.fetch(&Request::get(url(path))).await.unwrap();
        assert_eq!(routed.source, ResponseSource::ShellFallback, "{}", path);
        assert_eq!(routed.response.text().unwrap(), "/@r1");
    }
    assert_eq!(network.calls().len(), precache_calls);
}

#[tokio::test]
async fn catalog_miss_is_fetched_and_stored() {
    let store = Arc::new(MemoryCacheStore::new());
    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();

    let routed = worker.fetch(&Request::get(url("/catalog.json"))).await.unwrap();
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.status, StatusCode::OK);
    assert_eq!(routed.response.kind, ResponseKind::Basic);

    let stored = store
        .match_request("shell:v1", &CacheKey::get(url("/catalog.json")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.body(), routed.response.body());
}

#[tokio::test]
async fn post_goes_to_network_and_leaves_store_untouched() {
    let store = Arc::new(RecordingStore::default());
    let network = ScriptedNetwork::new("r1");
    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        network.clone(),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();
    let store_calls = store.calls();

    let routed = worker
        .fetch(&Request::post(url("/save"), "{\"song\":42}"))
        .await
        .unwrap();

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.text().unwrap(), "/save@r1");
    assert_eq!(store.calls(), store_calls);
    assert_eq!(
        network.calls().last(),
        Some(&(Method::POST, "/save".to_string()))
    );
}

#[tokio::test]
async fn failed_fetch_yields_no_response() {
    let store = Arc::new(MemoryCacheStore::new());
    let network = ScriptedNetwork::build("r1", vec!["/song/9.json"], Duration::ZERO);
    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        network,
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();

    assert!(worker.fetch(&Request::get(url("/song/9.json"))).await.is_none());
    assert!(store
        .match_request("shell:v1", &CacheKey::get(url("/song/9.json")))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn concurrent_misses_for_same_key_store_one_entry() {
    let store = Arc::new(MemoryCacheStore::new());
    let network = ScriptedNetwork::build("r1", vec![], Duration::from_millis(20));
    let worker = worker_with(
        "v1",
        shell_manifest(),
        store.clone(),
        network.clone(),
        Arc::new(Clients::new()),
    );
    worker.install().await.unwrap();

    let first = Request::get(url("/song/42.json"));
    let second = Request::get(url("/song/42.json"));
    let (a, b) = tokio::join!(worker.fetch(&first), worker.fetch(&second));

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.response.text().unwrap(), "/song/42.json@r1");
    assert_eq!(b.response.text().unwrap(), "/song/42.json@r1");

    let song_entries: Vec<_> = store
        .entries("shell:v1")
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.url().path() == "/song/42.json")
        .collect();
    assert_eq!(song_entries.len(), 1);
    let fetched = network
        .calls()
        .iter()
        .filter(|(_, p)| p == "/song/42.json")
        .count();
    assert!((1..=2).contains(&fetched));
}

// ==================== Host ====================

#[tokio::test]
async fn redeploy_replaces_shell_and_notifies_open_clients() {
    let store = Arc::new(MemoryCacheStore::new());
    let clients = Arc::new(Clients::new());
    let (id, mut rx) = clients.connect(url("/song/42")).await;
    let (registration, _events) =
        Registration::new(Url::parse(ORIGIN).unwrap(), ScriptedNetwork::new("live"));

    let v1 = worker_with(
        "v1",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        clients.clone(),
    );
    assert_eq!(registration.update(Arc::new(v1)).await.unwrap(), WorkerState::Active);

    let v2 = worker_with(
        "v2",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::new("r2"),
        clients.clone(),
    );
    assert_eq!(registration.update(Arc::new(v2)).await.unwrap(), WorkerState::Active);

    assert_eq!(registration.active_version().await, Some(v("v2")));
    assert_eq!(sorted_keys(store.as_ref()).await, vec!["assets", "shell:v2"]);
    assert_eq!(clients.controller(id).await, Some(v("v2")));

    let routed = registration
        .handle_fetch(Request::get(url("/catalog.json")), Some(id))
        .await
        .unwrap();
    assert_eq!(routed.response.text().unwrap(), "/catalog.json@r2");

    let versions: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|m| match m {
            ClientNotification::VersionUpdate { version } => version.to_string(),
        })
        .collect();
    assert_eq!(versions, vec!["v1", "v2"]);
}

#[tokio::test]
async fn failed_redeploy_keeps_previous_version_serving() {
    let store = Arc::new(MemoryCacheStore::new());
    let clients = Arc::new(Clients::new());
    let (registration, _events) =
        Registration::new(Url::parse(ORIGIN).unwrap(), ScriptedNetwork::new("live"));

    let v1 = worker_with(
        "v1",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        clients.clone(),
    );
    registration.update(Arc::new(v1)).await.unwrap();

    let v2 = worker_with(
        "v2",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::build("r2", vec!["/manifest.json"], Duration::ZERO),
        clients.clone(),
    );
    let err = registration.update(Arc::new(v2)).await.unwrap_err();

    assert_eq!(err.category(), "install");
    assert_eq!(registration.active_version().await, Some(v("v1")));
    let routed = registration
        .handle_fetch(Request::get(url("/catalog.json")), None)
        .await
        .unwrap();
    assert_eq!(routed.response.text().unwrap(), "/catalog.json@r1");
}

#[tokio::test]
async fn active_version_serves_while_next_version_installs() {
    let store = Arc::new(MemoryCacheStore::new());
    let clients = Arc::new(Clients::new());
    let (registration, _events) =
        Registration::new(Url::parse(ORIGIN).unwrap(), ScriptedNetwork::new("live"));

    let v1 = worker_with(
        "v1",
        full_manifest(),
        store.clone(),
        ScriptedNetwork::new("r1"),
        clients.clone(),
    );
    registration.update(Arc::new(v1)).await.unwrap();

    let v2 = worker_with(
        "v2",
        full_manifest(),
        store.clone(),
        Arc::new(StalledNetwork {
            stalled: "/manifest.json",
        }),
        clients.clone(),
    );
    let install = registration.update(Arc::new(v2));
    tokio::pin!(install);

    let routed = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::select! {
            biased;
            result = &mut install => panic!("install should still be pending: {:?}", result),
            routed = registration.handle_fetch(Request::get(url("/")), None) => routed,
        }
    })
    .await
    .expect("fetch waited on the installing worker")
    .unwrap();

    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text().unwrap(), "/@r1");
    assert_eq!(registration.active_version().await, Some(v("v1")));
    assert_eq!(
        registration.installing().await.map(|s| s.version().clone()),
        Some(v("v2"))
    );
}
