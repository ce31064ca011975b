//! # Terminal Controller
//!
//! Owns one terminal's inventory and wires every mutation to the sync
//! channels, and every inbound snapshot back into the store.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Terminal                                    │
//! │                                                                         │
//! │   scan / import / apply                                                 │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   InventoryStore ──► persist ──► local tabs ──► peer mesh ──► hosted    │
//! │          ▲                                                              │
//! │          │  replace (last full snapshot wins)                           │
//! │   ┌──────┴──────────────────────────────────────────────────────────┐   │
//! │   │ inbound pump (one task, receipt order)                          │   │
//! │   │   local tab post  ──► persist                                   │   │
//! │   │   peer snapshot   ──► persist, local tabs, hosted               │   │
//! │   │   hosted change   ──► fetch, replace if non-empty, local tabs   │   │
//! │   └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │   Every outcome is reported through a TerminalEventEmitter.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound snapshots are never re-sent on the channel they came from.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use discreet_core::csv::{self, ImportSummary};
use discreet_core::{
    adjust_stock, other_colors, seed_snapshot, sizes_in_color, stats, verify_pin,
    InventoryStats, InventoryStore, Product, ScanMode, Snapshot, DEFAULT_STAFF_PIN,
};
use discreet_db::SnapshotFile;

use crate::config::{SyncMode, TerminalConfig};
use crate::directory::{BrokerDirectory, BrokerDirectoryConfig, MemoryDirectory, PeerDirectory};
use crate::error::{SyncError, SyncResult};
use crate::hosted::HostedSync;
use crate::identity::{PeerId, StoreCode};
use crate::local::{LocalBus, LocalTabChannel, DEFAULT_CHANNEL_NAME};
use crate::mesh::{MeshConfig, MeshEvent, MeshHandle, MeshStatus, PeerMesh};
use crate::subscription::{Gate, Subscription};

// =============================================================================
// Events
// =============================================================================

/// Where a snapshot change came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "peer", rename_all = "snake_case")]
pub enum ChangeSource {
    /// A mutation made on this terminal.
    Local,
    LocalTab,
    Peer(PeerId),
    Hosted,
}

/// Trait for surfacing terminal activity to a UI.
pub trait TerminalEventEmitter: Send + Sync {
    /// The current snapshot changed.
    fn emit_inventory(&self, snapshot: &Snapshot, source: &ChangeSource);

    /// Mesh connectivity changed.
    fn emit_connection(&self, connected: bool, open_links: usize);

    /// A transient, user-facing message (unknown barcode, peer linked).
    fn emit_notice(&self, message: &str);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// Emitter that drops everything.
pub struct NoOpEmitter;

impl TerminalEventEmitter for NoOpEmitter {
    fn emit_inventory(&self, _snapshot: &Snapshot, _source: &ChangeSource) {}
    fn emit_connection(&self, _connected: bool, _open_links: usize) {}
    fn emit_notice(&self, _message: &str) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// Owned form of an emitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    InventoryChanged {
        snapshot: Snapshot,
        source: ChangeSource,
    },
    ConnectionChanged {
        connected: bool,
        open_links: usize,
    },
    Notice(String),
    Error {
        message: String,
        retryable: bool,
    },
}

/// Emitter that forwards every event into a channel.
pub struct ChannelEmitter {
    events: mpsc::UnboundedSender<TerminalEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelEmitter { events }), rx)
    }

    fn send(&self, event: TerminalEvent) {
        let _ = self.events.send(event);
    }
}

impl TerminalEventEmitter for ChannelEmitter {
    fn emit_inventory(&self, snapshot: &Snapshot, source: &ChangeSource) {
        self.send(TerminalEvent::InventoryChanged {
            snapshot: snapshot.clone(),
            source: source.clone(),
        });
    }

    fn emit_connection(&self, connected: bool, open_links: usize) {
        self.send(TerminalEvent::ConnectionChanged {
            connected,
            open_links,
        });
    }

    fn emit_notice(&self, message: &str) {
        self.send(TerminalEvent::Notice(message.to_string()));
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        self.send(TerminalEvent::Error {
            message: message.to_string(),
            retryable,
        });
    }
}

// =============================================================================
// Views
// =============================================================================

/// What the customer face shows after a barcode is scanned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerView {
    pub product: Product,
    /// Same style and color, including the product itself.
    pub sizes: Vec<Product>,
    pub other_colors: Vec<String>,
}

/// Point-in-time view of the terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalStatus {
    pub mesh: Option<MeshStatus>,
    pub store_code: Option<StoreCode>,
    pub local_tabs: bool,
    pub stats: InventoryStats,
}

// =============================================================================
// Internals
// =============================================================================

enum Inbound {
    LocalTab(Snapshot),
    Mesh { generation: u64, event: MeshEvent },
    HostedChanged(StoreCode),
}

struct MeshSession {
    handle: MeshHandle,
    forward: JoinHandle<()>,
}

impl Drop for MeshSession {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

struct HostedSession {
    code: StoreCode,
    subscription: Subscription,
}

struct Inner {
    store: Arc<InventoryStore>,
    persistence: Option<SnapshotFile>,
    save_lock: AsyncMutex<()>,
    local: LocalTabChannel,
    local_subscription: Mutex<Option<Subscription>>,
    hosted: HostedSync,
    hosted_session: RwLock<Option<HostedSession>>,
    mesh: RwLock<Option<MeshSession>>,
    /// Bumped on every mesh start and stop; stale mesh events are dropped.
    mesh_generation: AtomicU64,
    inbound: mpsc::UnboundedSender<Inbound>,
    /// Closed by shutdown. Every emitter call runs under it.
    events: Arc<Gate>,
    emitter: Arc<dyn TerminalEventEmitter>,
    staff_pin: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a [`Terminal`].
pub struct TerminalBuilder {
    snapshot: Option<Snapshot>,
    persistence: Option<SnapshotFile>,
    local: Option<LocalTabChannel>,
    hosted: HostedSync,
    emitter: Option<Arc<dyn TerminalEventEmitter>>,
    staff_pin: String,
}

impl Default for TerminalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalBuilder {
    pub fn new() -> Self {
        TerminalBuilder {
            snapshot: None,
            persistence: None,
            local: None,
            hosted: HostedSync::unconfigured(),
            emitter: None,
            staff_pin: DEFAULT_STAFF_PIN.to_string(),
        }
    }

    /// Starts from `snapshot` instead of the persisted one.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Loads the initial snapshot from `file` and saves after every change.
    pub fn with_persistence(mut self, file: SnapshotFile) -> Self {
        self.persistence = Some(file);
        self
    }

    pub fn with_local_channel(mut self, channel: LocalTabChannel) -> Self {
        self.local = Some(channel);
        self
    }

    pub fn with_hosted(mut self, hosted: HostedSync) -> Self {
        self.hosted = hosted;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn TerminalEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_staff_pin(mut self, pin: impl Into<String>) -> Self {
        self.staff_pin = pin.into();
        self
    }

    /// Builds the terminal and subscribes it to its local channel.
    pub async fn build(self) -> Terminal {
        let initial = match (self.snapshot, &self.persistence) {
            (Some(snapshot), _) => snapshot,
            (None, Some(file)) => file.load_or_else(seed_snapshot).await,
            (None, None) => seed_snapshot(),
        };

        let local = self
            .local
            .unwrap_or_else(|| LocalTabChannel::unavailable(DEFAULT_CHANNEL_NAME));
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            store: Arc::new(InventoryStore::new(initial)),
            persistence: self.persistence,
            save_lock: AsyncMutex::new(()),
            local,
            local_subscription: Mutex::new(None),
            hosted: self.hosted,
            hosted_session: RwLock::new(None),
            mesh: RwLock::new(None),
            mesh_generation: AtomicU64::new(0),
            inbound,
            events: Gate::new(),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            staff_pin: self.staff_pin,
        });

        let posts = inner.inbound.clone();
        let subscription = inner.local.subscribe(move |snapshot| {
            let _ = posts.send(Inbound::LocalTab(snapshot));
        });
        *lock(&inner.local_subscription) = Some(subscription);

        tokio::spawn(pump(Arc::downgrade(&inner), inbound_rx));

        info!(
            products = inner.store.current().len(),
            local_tabs = inner.local.is_available(),
            hosted = inner.hosted.is_configured(),
            "Terminal ready"
        );

        Terminal { inner }
    }
}

/// Applies inbound work one message at a time.
async fn pump(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Terminal { inner }.handle_inbound(message).await;
    }
    debug!("Terminal inbound pump stopped");
}

// =============================================================================
// Terminal
// =============================================================================

/// One running terminal. Cheap to clone.
#[derive(Clone)]
pub struct Terminal {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("products", &self.inner.store.current().len())
            .field("local", &self.inner.local.name())
            .field("hosted", &self.inner.hosted)
            .finish_non_exhaustive()
    }
}

impl Terminal {
    pub fn builder() -> TerminalBuilder {
        TerminalBuilder::new()
    }

    /// Builds a terminal from configuration and starts the configured sync
    /// mode.
    ///
    /// ## Mode Startup
    /// - `mesh`: registers with the broker (or an in-process directory when
    ///   no broker is configured) and starts listening for peers.
    /// - `hosted`: connects to the database and attaches to `store_code`
    ///   when one is configured. A failed attach is reported, not fatal.
    /// - `offline`: local tabs only.
    pub async fn from_config(
        config: &TerminalConfig,
        bus: &LocalBus,
        emitter: Arc<dyn TerminalEventEmitter>,
    ) -> SyncResult<Terminal> {
        let local = if config.local.enabled {
            bus.open(&config.local.channel_name)
        } else {
            LocalTabChannel::unavailable(&config.local.channel_name)
        };

        let hosted = match config.mode() {
            SyncMode::Hosted => {
                HostedSync::connect(
                    config.hosted.database_url.as_deref(),
                    &config.hosted.code_prefix,
                )
                .await?
            }
            _ => HostedSync::unconfigured(),
        };

        let mut builder = Terminal::builder()
            .with_local_channel(local)
            .with_hosted(hosted)
            .with_emitter(emitter)
            .with_staff_pin(config.staff.pin.clone());

        match config
            .storage
            .snapshot_path
            .clone()
            .or_else(SnapshotFile::default_path)
        {
            Some(path) => builder = builder.with_persistence(SnapshotFile::new(path)),
            None => warn!("No data directory available, inventory will not be persisted"),
        }

        let terminal = builder.build().await;

        match config.mode() {
            SyncMode::Mesh => {
                let directory: Arc<dyn PeerDirectory> = match &config.mesh.broker_url {
                    Some(url) => Arc::new(
                        BrokerDirectory::connect(BrokerDirectoryConfig::new(url.clone())).await?,
                    ),
                    None => {
                        warn!("No rendezvous broker configured, only terminals in this process can link");
                        Arc::new(MemoryDirectory::new())
                    }
                };
                terminal.start_mesh(config.mesh_config(), directory).await?;
            }
            SyncMode::Hosted => {
                if let Some(code) = config.hosted.store_code.as_deref() {
                    if let Err(e) = terminal.attach_hosted_store(code).await {
                        warn!(store_code = %code, error = %e, "Could not attach to hosted store");
                        terminal.report(&e);
                    }
                }
            }
            SyncMode::Offline => info!("Offline mode, syncing local tabs only"),
        }

        Ok(terminal)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn snapshot(&self) -> Snapshot {
        self.inner.store.current()
    }

    pub fn store(&self) -> Arc<InventoryStore> {
        self.inner.store.clone()
    }

    pub fn stats(&self) -> InventoryStats {
        stats(&self.inner.store.current())
    }

    /// Customer face lookup.
    pub fn lookup(&self, barcode: &str) -> SyncResult<CustomerView> {
        let snapshot = self.inner.store.current();
        let barcode = barcode.trim();
        let product = snapshot
            .find(barcode)
            .ok_or_else(|| discreet_core::CoreError::ProductNotFound(barcode.to_string()))?;

        Ok(CustomerView {
            sizes: sizes_in_color(&snapshot, product).into_iter().cloned().collect(),
            other_colors: other_colors(&snapshot, product)
                .into_iter()
                .map(str::to_string)
                .collect(),
            product: product.clone(),
        })
    }

    pub fn unlock(&self, pin: &str) -> SyncResult<()> {
        verify_pin(pin, &self.inner.staff_pin)?;
        info!("Staff face unlocked");
        Ok(())
    }

    pub fn export_csv(&self) -> String {
        csv::export_csv(&self.inner.store.current())
    }

    pub async fn status(&self) -> TerminalStatus {
        let mesh = match self.mesh_handle().await {
            Some(handle) => handle.status().await.ok(),
            None => None,
        };

        TerminalStatus {
            mesh,
            store_code: self.attached_store().await,
            local_tabs: self.inner.local.is_available(),
            stats: self.stats(),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Runs `mutator` against the current snapshot and publishes the result.
    pub async fn apply<F>(&self, mutator: F) -> Snapshot
    where
        F: FnOnce(&Snapshot) -> Snapshot,
    {
        let next = self.inner.store.apply(mutator);
        self.publish(&next).await;
        next
    }

    /// Adjusts the stock of one barcode.
    ///
    /// An unknown barcode leaves the inventory untouched, emits a notice and
    /// returns the not-found error.
    pub async fn scan(&self, barcode: &str, mode: ScanMode) -> SyncResult<Snapshot> {
        let barcode = barcode.trim();

        match self
            .inner
            .store
            .try_apply(|current| adjust_stock(current, barcode, mode))
        {
            Ok(next) => {
                info!(barcode = %barcode, ?mode, "Scan applied");
                self.publish(&next).await;
                Ok(next)
            }
            Err(e) => {
                if e.is_not_found() {
                    debug!(barcode = %barcode, "Scanned barcode not in inventory");
                    let message = e.to_string();
                    self.emit(|emitter| emitter.emit_notice(&message));
                }
                Err(e.into())
            }
        }
    }

    /// Merges CSV rows into the inventory by barcode.
    pub async fn import_csv(&self, text: &str) -> SyncResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        let next = self.inner.store.try_apply(|current| {
            csv::import_csv(current, text).map(|(next, imported)| {
                summary = imported;
                next
            })
        })?;

        info!(
            updated = summary.updated,
            added = summary.added,
            skipped = summary.skipped,
            "CSV imported"
        );
        self.publish(&next).await;
        Ok(summary)
    }

    /// Fans a locally made snapshot out to every channel.
    async fn publish(&self, next: &Snapshot) {
        self.persist().await;
        self.inner.local.broadcast(next);
        self.emit(|emitter| emitter.emit_inventory(next, &ChangeSource::Local));

        if let Some(mesh) = self.mesh_handle().await {
            if let Err(e) = mesh.broadcast_update(next.clone()).await {
                warn!(error = %e, "Failed to broadcast snapshot to peers");
            }
        }

        self.push_hosted(next).await;
    }

    async fn persist(&self) {
        let Some(file) = &self.inner.persistence else {
            return;
        };

        let _guard = self.inner.save_lock.lock().await;
        let current = self.inner.store.current();
        if let Err(e) = file.save(&current).await {
            error!(path = %file.path().display(), error = %e, "Failed to persist snapshot");
            self.report(&SyncError::from(e));
        }
    }

    // =========================================================================
    // Peer Mesh
    // =========================================================================

    /// Starts the mesh endpoint. Returns the existing identifier if the mesh
    /// is already running.
    pub async fn start_mesh(
        &self,
        config: MeshConfig,
        directory: Arc<dyn PeerDirectory>,
    ) -> SyncResult<PeerId> {
        let mut slot = self.inner.mesh.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.handle.local_id().clone());
        }

        let (handle, mut events) =
            PeerMesh::start(config, directory, self.inner.store.clone()).await?;

        let generation = self.inner.mesh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inbound = self.inner.inbound.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inbound.send(Inbound::Mesh { generation, event }).is_err() {
                    break;
                }
            }
        });

        let local_id = handle.local_id().clone();
        *slot = Some(MeshSession { handle, forward });
        Ok(local_id)
    }

    /// Links to the terminal showing `code`.
    ///
    /// An empty code or this terminal's own identifier is ignored and
    /// returns `Ok(None)`.
    pub async fn connect_peer(&self, code: &str) -> SyncResult<Option<PeerId>> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }

        let mesh = self
            .mesh_handle()
            .await
            .ok_or_else(|| SyncError::ConfigurationMissing("Peer mesh".into()))?;

        if PeerId::parse(code).is_ok_and(|id| &id == mesh.local_id()) {
            debug!(peer = %code, "Ignoring connect to own identifier");
            return Ok(None);
        }

        match mesh.connect(code).await {
            Ok(peer) => Ok(Some(peer)),
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    pub async fn peer_id(&self) -> Option<PeerId> {
        self.mesh_handle().await.map(|h| h.local_id().clone())
    }

    pub async fn mesh_status(&self) -> Option<MeshStatus> {
        self.mesh_handle().await?.status().await.ok()
    }

    /// Closes every peer link and releases the identifier.
    pub async fn stop_mesh(&self) -> SyncResult<()> {
        let session = self.inner.mesh.write().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        self.inner.mesh_generation.fetch_add(1, Ordering::SeqCst);
        session.handle.disconnect().await?;
        self.emit(|emitter| emitter.emit_connection(false, 0));
        info!(peer = %session.handle.local_id(), "Peer mesh stopped");
        Ok(())
    }

    async fn mesh_handle(&self) -> Option<MeshHandle> {
        self.inner.mesh.read().await.as_ref().map(|s| s.handle.clone())
    }

    // =========================================================================
    // Hosted Store
    // =========================================================================

    /// Creates a hosted store from the current inventory and attaches to it.
    pub async fn create_hosted_store(&self) -> SyncResult<StoreCode> {
        let code = self.inner.hosted.create_store(&self.snapshot()).await?;
        self.attach_hosted_store(code.as_str()).await
    }

    /// Follows a hosted store: pulls it now and again on every change, and
    /// pushes every local mutation to it.
    ///
    /// A store with no rows leaves the local inventory as it is.
    pub async fn attach_hosted_store(&self, code: &str) -> SyncResult<StoreCode> {
        if !self.inner.hosted.is_configured() {
            return Err(SyncError::ConfigurationMissing("Hosted store".into()));
        }
        let code = StoreCode::parse(code)?;
        self.detach_hosted_store().await;

        let inbound = self.inner.inbound.clone();
        let changed = code.clone();
        let subscription = self
            .inner
            .hosted
            .subscribe_to_changes(code.as_str(), move || {
                let _ = inbound.send(Inbound::HostedChanged(changed.clone()));
            })
            .await?;

        *self.inner.hosted_session.write().await = Some(HostedSession {
            code: code.clone(),
            subscription,
        });

        if let Err(e) = self.pull_hosted(&code).await {
            self.detach_hosted_store().await;
            return Err(e);
        }

        info!(store_code = %code, "Attached to hosted store");
        Ok(code)
    }

    /// Stops following the hosted store. Returns the code that was attached.
    pub async fn detach_hosted_store(&self) -> Option<StoreCode> {
        let session = self.inner.hosted_session.write().await.take()?;
        session.subscription.unsubscribe();
        info!(store_code = %session.code, "Detached from hosted store");
        Some(session.code)
    }

    /// Pulls the attached hosted store now.
    pub async fn refresh_hosted(&self) -> SyncResult<()> {
        let code = self
            .attached_store()
            .await
            .ok_or_else(|| SyncError::ConfigurationMissing("Hosted store code".into()))?;
        self.pull_hosted(&code).await
    }

    async fn attached_store(&self) -> Option<StoreCode> {
        self.inner
            .hosted_session
            .read()
            .await
            .as_ref()
            .map(|s| s.code.clone())
    }

    async fn pull_hosted(&self, code: &StoreCode) -> SyncResult<()> {
        match self.inner.hosted.fetch_store(code.as_str()).await {
            Ok(snapshot) => {
                if self.inner.store.replace(snapshot.clone()) {
                    debug!(store_code = %code, products = snapshot.len(), "Applied hosted snapshot");
                    self.persist().await;
                    self.inner.local.broadcast(&snapshot);
                    self.emit(|emitter| emitter.emit_inventory(&snapshot, &ChangeSource::Hosted));
                }
                Ok(())
            }
            Err(SyncError::StoreNotFound(_)) => {
                debug!(store_code = %code, "Hosted store has no rows, keeping local inventory");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn push_hosted(&self, snapshot: &Snapshot) {
        let Some(code) = self.attached_store().await else {
            return;
        };
        if let Err(e) = self.inner.hosted.update_store(code.as_str(), snapshot).await {
            warn!(store_code = %code, error = %e, "Failed to push snapshot to hosted store");
            self.report(&e);
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    async fn handle_inbound(&self, message: Inbound) {
        if !self.inner.events.is_open() {
            return;
        }

        match message {
            Inbound::LocalTab(snapshot) => {
                if self.inner.store.replace(snapshot.clone()) {
                    debug!(products = snapshot.len(), "Applied snapshot from local tab");
                    self.persist().await;
                    self.emit(|emitter| emitter.emit_inventory(&snapshot, &ChangeSource::LocalTab));
                }
            }
            Inbound::Mesh { generation, event } => {
                if generation == self.inner.mesh_generation.load(Ordering::SeqCst) {
                    self.handle_mesh_event(event).await;
                }
            }
            Inbound::HostedChanged(code) => {
                if self.attached_store().await.as_ref() != Some(&code) {
                    return;
                }
                if let Err(e) = self.pull_hosted(&code).await {
                    warn!(store_code = %code, error = %e, "Hosted pull failed");
                    self.report(&e);
                }
            }
        }
    }

    async fn handle_mesh_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::Ready(id) => {
                let message = format!("Connection code: {id}");
                self.emit(|emitter| emitter.emit_notice(&message));
            }
            MeshEvent::RegistrationRetry { rejected, attempt } => {
                debug!(peer = %rejected, attempt, "Peer identifier retry");
            }
            MeshEvent::LinkOpened { peer, .. } => {
                let message = format!("Linked with {peer}");
                self.emit(|emitter| emitter.emit_notice(&message));
            }
            MeshEvent::LinkClosed { peer, reason } => match reason {
                Some(reason) => {
                    let message = format!("Link with {peer} failed: {reason}");
                    self.emit(|emitter| emitter.emit_error(&message, true));
                }
                None => {
                    let message = format!("Link with {peer} closed");
                    self.emit(|emitter| emitter.emit_notice(&message));
                }
            },
            MeshEvent::SnapshotReceived {
                from,
                snapshot,
                changed,
            } => {
                if !changed {
                    return;
                }
                self.persist().await;
                self.inner.local.broadcast(&snapshot);
                self.push_hosted(&snapshot).await;
                let source = ChangeSource::Peer(from);
                self.emit(|emitter| emitter.emit_inventory(&snapshot, &source));
            }
            MeshEvent::ConnectionChanged {
                connected,
                open_links,
            } => self.emit(|emitter| emitter.emit_connection(connected, open_links)),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops every channel and saves the inventory. No event is emitted
    /// after this returns.
    pub async fn shutdown(&self) {
        info!("Shutting down terminal");

        let local = lock(&self.inner.local_subscription).take();
        if let Some(subscription) = local {
            subscription.unsubscribe();
        }

        self.detach_hosted_store().await;
        if let Err(e) = self.stop_mesh().await {
            warn!(error = %e, "Peer mesh did not stop cleanly");
        }

        self.persist().await;
        self.inner.events.close();
    }

    fn emit(&self, f: impl FnOnce(&dyn TerminalEventEmitter)) {
        self.inner.events.run(|| f(self.inner.emitter.as_ref()));
    }

    fn report(&self, e: &SyncError) {
        let message = e.to_string();
        let retryable = e.is_retryable();
        self.emit(|emitter| emitter.emit_error(&message, retryable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discreet_core::CoreError;
    use discreet_db::MemoryRowStore;
    use std::time::Duration;

    async fn terminal() -> (Terminal, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (emitter, events) = ChannelEmitter::new();
        let terminal = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_emitter(emitter)
            .build()
            .await;
        (terminal, events)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TerminalEvent>) -> TerminalEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("emitter dropped")
    }

    #[tokio::test]
    async fn test_scan_publishes_local_change() {
        let (terminal, mut events) = terminal().await;

        let next = terminal.scan("100101", ScanMode::Load).await.unwrap();

        assert_eq!(next.find("100101").unwrap().stock, 6);
        assert_eq!(terminal.snapshot(), next);
        assert_eq!(
            next_event(&mut events).await,
            TerminalEvent::InventoryChanged {
                snapshot: next,
                source: ChangeSource::Local
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_barcode_is_a_notice() {
        let (terminal, mut events) = terminal().await;

        let err = terminal.scan("999999", ScanMode::Sell).await.unwrap_err();

        assert!(matches!(err, SyncError::Core(CoreError::ProductNotFound(_))));
        assert_eq!(terminal.snapshot(), seed_snapshot());
        assert!(matches!(next_event(&mut events).await, TerminalEvent::Notice(_)));
    }

    #[tokio::test]
    async fn test_lookup_shows_sizes_and_colors() {
        let (terminal, _events) = terminal().await;

        let view = terminal.lookup(" 100101 ").unwrap();
        assert_eq!(view.product.barcode, "100101");
        assert_eq!(view.sizes.len(), 2);
        assert_eq!(view.other_colors, vec!["כחול".to_string()]);

        assert!(terminal.lookup("nope").is_err());
    }

    #[tokio::test]
    async fn test_unlock_checks_configured_pin() {
        let terminal = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_staff_pin("4321")
            .build()
            .await;

        assert!(terminal.unlock("4321").is_ok());
        assert!(matches!(
            terminal.unlock("1234"),
            Err(SyncError::Core(CoreError::IncorrectPin))
        ));
    }

    #[tokio::test]
    async fn test_import_reports_summary() {
        let (terminal, _events) = terminal().await;

        let csv = "Barcode,ItemCode,Description,Price,ColorCode,ColorName,Size,Stock\n\
                   100101,SHIRT-99,Shirt,120,10,White,S,9\n\
                   200201,PANTS-1,Pants,90,30,Black,M,4\n";
        let summary = terminal.import_csv(csv).await.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.added, 1);
        assert_eq!(terminal.snapshot().len(), 4);
        assert_eq!(terminal.stats().total_units, 9 + 2 + 1 + 4);
    }

    #[tokio::test]
    async fn test_sibling_tab_receives_changes() {
        let bus = LocalBus::new();
        let (emitter, mut events) = ChannelEmitter::new();

        let first = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_local_channel(bus.open(DEFAULT_CHANNEL_NAME))
            .build()
            .await;
        let second = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_local_channel(bus.open(DEFAULT_CHANNEL_NAME))
            .with_emitter(emitter)
            .build()
            .await;

        let next = first.scan("100102", ScanMode::Sell).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            TerminalEvent::InventoryChanged {
                snapshot: next.clone(),
                source: ChangeSource::LocalTab
            }
        );
        assert_eq!(second.snapshot(), next);
    }

    #[tokio::test]
    async fn test_same_tab_post_twice_changes_once() {
        let bus = LocalBus::new();
        let (emitter, mut events) = ChannelEmitter::new();

        let sibling = bus.open(DEFAULT_CHANNEL_NAME);
        let terminal = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_local_channel(bus.open(DEFAULT_CHANNEL_NAME))
            .with_emitter(emitter)
            .build()
            .await;

        let next = Snapshot::new(vec![seed_snapshot()[2].with_stock(9)]);
        sibling.broadcast(&next);
        sibling.broadcast(&next);

        assert_eq!(
            next_event(&mut events).await,
            TerminalEvent::InventoryChanged {
                snapshot: next.clone(),
                source: ChangeSource::LocalTab
            }
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(terminal.snapshot(), next);
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));

        let terminal = Terminal::builder()
            .with_persistence(file.clone())
            .build()
            .await;
        assert_eq!(terminal.snapshot(), seed_snapshot());

        let next = terminal.scan("100103", ScanMode::Load).await.unwrap();
        assert_eq!(file.load().await.unwrap(), Some(next.clone()));

        let reopened = Terminal::builder().with_persistence(file).build().await;
        assert_eq!(reopened.snapshot(), next);
    }

    #[tokio::test]
    async fn test_connect_without_mesh() {
        let (terminal, _events) = terminal().await;

        assert_eq!(terminal.connect_peer("   ").await.unwrap(), None);
        assert!(matches!(
            terminal.connect_peer("dsc-1234").await,
            Err(SyncError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_hosted_requires_configuration() {
        let (terminal, _events) = terminal().await;

        assert!(matches!(
            terminal.create_hosted_store().await,
            Err(SyncError::ConfigurationMissing(_))
        ));
        assert!(matches!(
            terminal.attach_hosted_store("dsc-abcde").await,
            Err(SyncError::ConfigurationMissing(_))
        ));
        assert_eq!(terminal.status().await.store_code, None);
    }

    #[tokio::test]
    async fn test_hosted_store_follows_remote_changes() {
        let rows = Arc::new(MemoryRowStore::new());
        let (emitter, mut events) = ChannelEmitter::new();

        let owner = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_hosted(HostedSync::new(rows.clone(), "dsc"))
            .build()
            .await;
        let follower = Terminal::builder()
            .with_snapshot(Snapshot::empty())
            .with_hosted(HostedSync::new(rows, "dsc"))
            .with_emitter(emitter)
            .build()
            .await;

        let code = owner.create_hosted_store().await.unwrap();
        follower.attach_hosted_store(code.as_str()).await.unwrap();
        assert_eq!(follower.snapshot(), seed_snapshot());
        assert!(matches!(
            next_event(&mut events).await,
            TerminalEvent::InventoryChanged { source: ChangeSource::Hosted, .. }
        ));

        let next = owner.scan("100101", ScanMode::Sell).await.unwrap();

        loop {
            if let TerminalEvent::InventoryChanged { snapshot, .. } = next_event(&mut events).await {
                if snapshot == next {
                    break;
                }
            }
        }
        assert_eq!(follower.snapshot(), next);
    }

    #[tokio::test]
    async fn test_hosted_round_trip_keeps_product_order() {
        let rows = Arc::new(MemoryRowStore::new());
        let mut products = seed_snapshot().to_vec();
        products.reverse();
        let reversed = Snapshot::new(products);

        let owner = Terminal::builder()
            .with_snapshot(reversed.clone())
            .with_hosted(HostedSync::new(rows.clone(), "dsc"))
            .build()
            .await;
        let follower = Terminal::builder()
            .with_snapshot(Snapshot::empty())
            .with_hosted(HostedSync::new(rows, "dsc"))
            .build()
            .await;

        let code = owner.create_hosted_store().await.unwrap();
        assert_eq!(owner.snapshot(), reversed);

        follower.attach_hosted_store(code.as_str()).await.unwrap();
        assert_eq!(follower.snapshot(), reversed);
    }

    #[tokio::test]
    async fn test_empty_hosted_store_keeps_local_inventory() {
        let rows = Arc::new(MemoryRowStore::new());
        let terminal = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_hosted(HostedSync::new(rows, "dsc"))
            .build()
            .await;

        let code = terminal.attach_hosted_store("dsc-empty").await.unwrap();

        assert_eq!(code.as_str(), "dsc-empty");
        assert_eq!(terminal.snapshot(), seed_snapshot());
        assert_eq!(terminal.status().await.store_code, Some(code));
    }

    #[tokio::test]
    async fn test_shutdown_stops_events() {
        let bus = LocalBus::new();
        let (emitter, mut events) = ChannelEmitter::new();

        let sender = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_local_channel(bus.open(DEFAULT_CHANNEL_NAME))
            .build()
            .await;
        let listener = Terminal::builder()
            .with_snapshot(seed_snapshot())
            .with_local_channel(bus.open(DEFAULT_CHANNEL_NAME))
            .with_emitter(emitter)
            .build()
            .await;

        listener.shutdown().await;
        sender.scan("100101", ScanMode::Load).await.unwrap();

        let after = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(matches!(after, Err(_) | Ok(None)));
        assert_eq!(listener.snapshot(), seed_snapshot());
    }
}
