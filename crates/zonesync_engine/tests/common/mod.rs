//! Shared fixtures: a loopback record service, Company/Employee models and
//! peers syncing against one in-process server.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use zonesync_engine::protocol::{
    ChangeToken, EntityKey, FetchResult, FieldValue, Fields, RecordId, RecordOutcome,
    ShareId, ShareInfo, ShareRequest, SubscriptionId, SyncRecord, Timestamp, ZoneId,
};
use zonesync_engine::{
    AdapterRegistry, EntityDescriptor, LocalStore, MemoryMetadataStore, MemoryStore,
    MetadataStore, RemoteRecordService, RetryConfig, StoreAdapter, SyncConfig, SyncError,
    SyncReport, SyncResult, Syncable, Synchronizer, TypedCollection, ZoneMetadata,
};
use zonesync_server::{RecordServer, ServerError};

type SaveHook = Box<dyn Fn() + Send + Sync>;

/// Holds one fetch open until the test releases it.
#[derive(Default)]
pub struct FetchGate {
    pub entered: Notify,
    pub release: Notify,
}

/// A record service that calls straight into an in-process server.
pub struct LoopbackRemote {
    server: Arc<RecordServer>,
    before_save: Mutex<Option<SaveHook>>,
    fetch_gate: Mutex<Option<(ZoneId, Arc<FetchGate>)>>,
}

impl LoopbackRemote {
    pub fn new(server: Arc<RecordServer>) -> Self {
        Self {
            server,
            before_save: Mutex::new(None),
            fetch_gate: Mutex::new(None),
        }
    }

    /// Blocks the next fetch of `zone` until the gate is released.
    pub fn gate_next_fetch(&self, zone: ZoneId) -> Arc<FetchGate> {
        let gate = Arc::new(FetchGate::default());
        *self.fetch_gate.lock() = Some((zone, gate.clone()));
        gate
    }

    /// Runs `hook` at the start of every save call.
    pub fn on_save(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_save.lock() = Some(Box::new(hook));
    }

    pub fn clear_hook(&self) {
        *self.before_save.lock() = None;
    }
}

fn map_error(error: ServerError) -> SyncError {
    match error {
        ServerError::TokenExpired { zone } => SyncError::TokenExpired { zone },
        ServerError::Unavailable(message) => SyncError::transport_retryable(message),
        ServerError::NotAuthorized(message) => SyncError::PermissionDenied(message),
        other => SyncError::transport_fatal(other.to_string()),
    }
}

#[async_trait]
impl RemoteRecordService for LoopbackRemote {
    async fn fetch_changes(
        &self,
        zone: &ZoneId,
        token: Option<&ChangeToken>,
        limit: usize,
    ) -> SyncResult<FetchResult> {
        let gate = {
            let mut slot = self.fetch_gate.lock();
            match slot.as_ref() {
                Some((gated, _)) if gated == zone => slot.take().map(|(_, gate)| gate),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.server
            .fetch_changes(zone, token, limit)
            .map_err(map_error)
    }

    async fn save_records(
        &self,
        zone: &ZoneId,
        records: Vec<SyncRecord>,
    ) -> SyncResult<Vec<RecordOutcome>> {
        if let Some(hook) = self.before_save.lock().as_ref() {
            hook();
        }
        self.server.save_records(zone, records).map_err(map_error)
    }

    async fn delete_records(
        &self,
        zone: &ZoneId,
        keys: Vec<EntityKey>,
    ) -> SyncResult<Vec<RecordOutcome>> {
        self.server.delete_records(zone, keys).map_err(map_error)
    }

    async fn create_subscription(&self, zone: &ZoneId) -> SyncResult<SubscriptionId> {
        self.server.create_subscription(zone).map_err(map_error)
    }

    async fn cancel_subscription(
        &self,
        zone: &ZoneId,
        subscription: &SubscriptionId,
    ) -> SyncResult<()> {
        self.server
            .cancel_subscription(zone, subscription)
            .map_err(map_error)
    }

    async fn create_share(&self, zone: &ZoneId, request: ShareRequest) -> SyncResult<ShareInfo> {
        self.server.create_share(zone, request).map_err(map_error)
    }

    async fn modify_share(
        &self,
        zone: &ZoneId,
        share: &ShareId,
        request: ShareRequest,
    ) -> SyncResult<ShareInfo> {
        self.server
            .modify_share(zone, share, request)
            .map_err(map_error)
    }

    async fn remove_share(&self, zone: &ZoneId, share: &ShareId) -> SyncResult<()> {
        self.server.remove_share(zone, share).map_err(map_error)
    }
}

fn text(fields: &Fields, name: &str) -> SyncResult<String> {
    fields
        .get(name)
        .and_then(FieldValue::as_text)
        .map(str::to_string)
        .ok_or_else(|| SyncError::Configuration(format!("missing text field '{name}'")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub identifier: String,
    pub name: String,
}

impl Company {
    pub fn new(identifier: &str, name: &str) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
        }
    }
}

impl Syncable for Company {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Company", "identifier")
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("identifier".into(), FieldValue::Text(self.identifier.clone()));
        fields.insert("name".into(), FieldValue::Text(self.name.clone()));
        fields
    }

    fn from_fields(fields: &Fields) -> SyncResult<Self> {
        Ok(Self {
            identifier: text(fields, "identifier")?,
            name: text(fields, "name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub identifier: String,
    pub name: String,
    pub company: String,
}

impl Employee {
    pub fn new(identifier: &str, name: &str, company: &str) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            company: company.into(),
        }
    }
}

impl Syncable for Employee {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Employee", "identifier").with_parent("company", "Company")
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("identifier".into(), FieldValue::Text(self.identifier.clone()));
        fields.insert("name".into(), FieldValue::Text(self.name.clone()));
        fields.insert(
            "company".into(),
            FieldValue::Reference(RecordId::new(self.company.clone())),
        );
        fields
    }

    fn from_fields(fields: &Fields) -> SyncResult<Self> {
        let company = fields
            .get("company")
            .and_then(FieldValue::as_reference)
            .ok_or_else(|| SyncError::Configuration("missing company reference".into()))?;
        Ok(Self {
            identifier: text(fields, "identifier")?,
            name: text(fields, "name")?,
            company: company.to_string(),
        })
    }
}

pub fn zone() -> ZoneId {
    ZoneId::new("Companies")
}

/// Metadata store whose saves can be made to fail.
#[derive(Default)]
pub struct FlakyMetadata {
    inner: MemoryMetadataStore,
    fail_on: Mutex<Option<u32>>,
}

impl FlakyMetadata {
    /// Fails the `nth` save from now (1 is the next one), once.
    pub fn fail_save(&self, nth: u32) {
        *self.fail_on.lock() = Some(nth);
    }
}

impl MetadataStore for FlakyMetadata {
    fn load(&self, zone: &ZoneId) -> SyncResult<Option<ZoneMetadata>> {
        self.inner.load(zone)
    }

    fn save(&self, zone: &ZoneId, metadata: &ZoneMetadata) -> SyncResult<()> {
        {
            let mut fail_on = self.fail_on.lock();
            match *fail_on {
                Some(n) if n <= 1 => {
                    *fail_on = None;
                    return Err(SyncError::Metadata("disk full".into()));
                }
                Some(n) => *fail_on = Some(n - 1),
                None => {}
            }
        }
        self.inner.save(zone, metadata)
    }

    fn remove(&self, zone: &ZoneId) -> SyncResult<()> {
        self.inner.remove(zone)
    }

    fn zones(&self) -> SyncResult<Vec<ZoneId>> {
        self.inner.zones()
    }
}

pub fn at(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

pub fn company_key(id: &str) -> EntityKey {
    EntityKey::new("Company", id)
}

pub fn employee_key(id: &str) -> EntityKey {
    EntityKey::new("Employee", id)
}

pub fn registry(store: Arc<dyn LocalStore>) -> AdapterRegistry {
    AdapterRegistry::new(vec![
        Arc::new(StoreAdapter::for_type::<Company>(store.clone())),
        Arc::new(StoreAdapter::for_type::<Employee>(store)),
    ])
    .unwrap()
}

/// Retries quickly so failure tests stay fast.
pub fn quick_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new(attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .without_jitter()
}

pub fn config(device: &str) -> SyncConfig {
    SyncConfig::new(device).with_retry(RetryConfig::no_retry())
}

/// One device: a local store, its metadata and a synchronizer.
pub struct Peer {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<LoopbackRemote>,
    pub sync: Synchronizer,
}

impl Peer {
    pub fn new(server: &Arc<RecordServer>, config: SyncConfig) -> Self {
        Self::with_metadata(server, config, Arc::new(MemoryMetadataStore::new()))
    }

    pub fn with_metadata(
        server: &Arc<RecordServer>,
        config: SyncConfig,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::with_store(server, config, metadata, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        server: &Arc<RecordServer>,
        config: SyncConfig,
        metadata: Arc<dyn MetadataStore>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let remote = Arc::new(LoopbackRemote::new(server.clone()));
        let local: Arc<dyn LocalStore> = store.clone();
        let sync = Synchronizer::new(config, local.clone(), remote.clone(), metadata);
        sync.register_zone(zone(), registry(local));
        Self {
            store,
            remote,
            sync,
        }
    }

    pub fn companies(&self) -> TypedCollection<Company> {
        TypedCollection::new(self.store.clone())
    }

    pub fn employees(&self) -> TypedCollection<Employee> {
        TypedCollection::new(self.store.clone())
    }

    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.sync.synchronize_zone(&zone()).await
    }

    pub fn metadata(&self) -> ZoneMetadata {
        self.sync.tracker().load(&zone()).unwrap()
    }

    /// Creates Acme with employees Bob and Ann.
    pub fn seed_acme(&self, when: u64) {
        self.companies()
            .put(&Company::new("acme", "Acme"), at(when))
            .unwrap();
        self.employees()
            .put(&Employee::new("bob", "Bob", "acme"), at(when))
            .unwrap();
        self.employees()
            .put(&Employee::new("ann", "Ann", "acme"), at(when))
            .unwrap();
    }
}
