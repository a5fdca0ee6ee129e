//! # Discovery Orchestrator
//!
//! [`Discovery`] ties the sources of attach targets together:
//!
//! - **Network players**: announcements cached by the [`PlayerConnection`],
//!   polled by a background task every `poll_interval_ms`
//! - **Editor processes**: found by a [`ProcessSource`] scan
//! - **Devices**: produced by a [`DeviceSource`], which registers one
//!   [`Connector`](crate::registry::Connector) per device in the shared
//!   [`ConnectorRegistry`]
//!
//! ## Snapshots
//!
//! Process and device scans can be slow, so queries never wait for them.
//! Each query starts a scan on the blocking thread pool if none is running
//! and returns the result of the previous one. The two scans are tracked
//! independently.
//!
//! ## Locking
//!
//! The player connection sits behind an async mutex shared by the poll loop
//! and player queries. [`Discovery::targets`] only tries the lock and
//! reports no players while it is held elsewhere;
//! [`Discovery::targets_wait`] waits for it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use scout_core::{Discovery, Selection};
//!
//! # async fn run() -> scout_core::Result<()> {
//! let mut discovery = Discovery::builder().start()?;
//!
//! for target in discovery.targets_wait(Selection::All).await {
//!     let info = discovery.resolve_attach_info(target.id)?;
//!     println!("{} -> {info}", target.name);
//! }
//!
//! discovery.stop().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::error::{ConnectorError, DiscoveryError, Result};
use crate::listener::PlayerConnection;
use crate::process::{list_editor_processes, EditorMatcher, ProcessSource, SystemProcesses};
use crate::registry::ConnectorRegistry;
use crate::types::{AttachInfo, AttachTarget, Selection, TargetId, TargetKind};
use crate::wire::{parse_announcement, PlayerRecord};

/// Source of connector-backed device targets
///
/// Called on the blocking thread pool. An implementation registers a
/// connector for every device it finds and returns one target per device,
/// using the virtual id the registry assigned.
pub trait DeviceSource: Send + Sync
{
    /// Enumerate reachable devices.
    ///
    /// ## Errors
    ///
    /// `ConnectorError::NotSupported` when the transport does not exist on
    /// this platform; any other variant for a failed scan.
    fn enumerate(&self, registry: &ConnectorRegistry) -> std::result::Result<Vec<AttachTarget>, ConnectorError>;
}

enum ListenerSetup
{
    Open,
    Provided(PlayerConnection),
    Disabled,
}

/// Builder for [`Discovery`]
///
/// ```rust,no_run
/// use scout_core::{DiscoveryConfig, Discovery};
///
/// # async fn run() -> scout_core::Result<()> {
/// let config = DiscoveryConfig::load(None)?;
/// let discovery = Discovery::builder().config(config).start()?;
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryBuilder
{
    config: DiscoveryConfig,
    listener: ListenerSetup,
    process_source: Arc<dyn ProcessSource>,
    device_source: Option<Arc<dyn DeviceSource>>,
    registry: Option<Arc<ConnectorRegistry>>,
}

impl fmt::Debug for DiscoveryBuilder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let listener = match &self.listener {
            ListenerSetup::Open => "open",
            ListenerSetup::Provided(_) => "provided",
            ListenerSetup::Disabled => "disabled",
        };
        f.debug_struct("DiscoveryBuilder")
            .field("config", &self.config)
            .field("listener", &listener)
            .field("device_source", &self.device_source.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for DiscoveryBuilder
{
    fn default() -> Self
    {
        Self {
            config: DiscoveryConfig::default(),
            listener: ListenerSetup::Open,
            process_source: Arc::new(SystemProcesses),
            device_source: None,
            registry: None,
        }
    }
}

impl DiscoveryBuilder
{
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: DiscoveryConfig) -> Self
    {
        self.config = config;
        self
    }

    /// Use an already constructed player connection instead of opening sockets.
    #[must_use]
    pub fn listener(mut self, connection: PlayerConnection) -> Self
    {
        self.listener = ListenerSetup::Provided(connection);
        self
    }

    /// Do not listen for network players at all.
    #[must_use]
    pub fn without_listener(mut self) -> Self
    {
        self.listener = ListenerSetup::Disabled;
        self
    }

    /// Scan processes through `source` instead of the OS process table.
    #[must_use]
    pub fn process_source(mut self, source: impl ProcessSource + 'static) -> Self
    {
        self.process_source = Arc::new(source);
        self
    }

    /// Enumerate devices through `source`.
    #[must_use]
    pub fn device_source(mut self, source: impl DeviceSource + 'static) -> Self
    {
        self.device_source = Some(Arc::new(source));
        self
    }

    /// Share an existing connector registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ConnectorRegistry>) -> Self
    {
        self.registry = Some(registry);
        self
    }

    /// Validate the configuration, open the player connection and start the
    /// background poll loop.
    ///
    /// Must be called from within a Tokio runtime; the scans and the poll
    /// loop are spawned on it.
    ///
    /// ## Errors
    ///
    /// - `Config`: the configuration fails validation
    /// - `NoRuntime`: called outside a Tokio runtime
    pub fn start(self) -> Result<Discovery>
    {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let connection = match self.listener {
            ListenerSetup::Open => {
                let connection = PlayerConnection::open(&self.config);
                if connection.is_listening() {
                    Some(connection)
                } else {
                    warn!("no player multicast socket could be opened, discovering local processes and devices only");
                    None
                }
            }
            ListenerSetup::Provided(connection) => Some(connection),
            ListenerSetup::Disabled => None,
        };
        let listener = connection.map(|c| Arc::new(Mutex::new(c)));

        let (stop_tx, stop_rx) = watch::channel(false);
        let poll_task = listener
            .as_ref()
            .map(|listener| runtime.spawn(poll_loop(Arc::clone(listener), self.config.poll_interval(), stop_rx)));

        info!(
            players = listener.is_some(),
            devices = self.device_source.is_some(),
            poll_interval_ms = self.config.poll_interval_ms,
            "discovery started"
        );

        Ok(Discovery {
            matcher: EditorMatcher::new(&self.config.editor_process_names),
            config: self.config,
            registry: self.registry.unwrap_or_default(),
            listener,
            players: StdMutex::new(HashMap::new()),
            processes: Arc::new(Snapshot::new("processes")),
            devices: Arc::new(Snapshot::new("devices")),
            process_source: self.process_source,
            device_source: self.device_source,
            runtime,
            stop_tx,
            poll_task,
        })
    }
}

/// Discovery engine context
///
/// Created by [`DiscoveryBuilder::start`] and stopped with
/// [`stop`](Self::stop). All queries take `&self` and may be called
/// concurrently.
pub struct Discovery
{
    config: DiscoveryConfig,
    matcher: EditorMatcher,
    registry: Arc<ConnectorRegistry>,
    listener: Option<Arc<Mutex<PlayerConnection>>>,
    /// Records of the players available at the last player query
    players: StdMutex<HashMap<TargetId, PlayerRecord>>,
    processes: Arc<Snapshot>,
    devices: Arc<Snapshot>,
    process_source: Arc<dyn ProcessSource>,
    device_source: Option<Arc<dyn DeviceSource>>,
    runtime: Handle,
    stop_tx: watch::Sender<bool>,
    poll_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Discovery
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Discovery")
            .field("listening", &self.listener.is_some())
            .field("running", &self.poll_task.is_some())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Discovery
{
    /// Start configuring a discovery engine.
    #[must_use]
    pub fn builder() -> DiscoveryBuilder
    {
        DiscoveryBuilder::default()
    }

    /// Configuration the engine was started with.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig
    {
        &self.config
    }

    /// Registry shared with device sources.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectorRegistry>
    {
        &self.registry
    }

    /// Whether network players are being listened for.
    #[must_use]
    pub fn is_listening(&self) -> bool
    {
        self.listener.is_some()
    }

    /// Whether the background poll loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool
    {
        self.poll_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Merged target list, without ever waiting.
    ///
    /// Players are reported only if the player connection is free right now.
    /// Editor processes and devices come from the latest completed scans;
    /// a new scan is started for each source that is not already scanning.
    /// Targets are not deduplicated across sources.
    pub fn targets(&self, selection: Selection) -> Vec<AttachTarget>
    {
        let mut targets = Vec::new();

        if selection.includes_players() {
            if let Some(listener) = &self.listener {
                match listener.try_lock() {
                    Ok(connection) => targets.extend(self.collect_players(&connection)),
                    Err(_) => trace!("player connection busy, skipping players"),
                }
            }
        }

        self.append_snapshots(selection, &mut targets);
        targets
    }

    /// Merged target list, waiting briefly for players.
    ///
    /// Takes the player connection lock (waiting for it if needed), then polls
    /// every `wait_step_ms` until a player is available, at most
    /// `wait_attempts` times. Everything else behaves like
    /// [`targets`](Self::targets).
    pub async fn targets_wait(&self, selection: Selection) -> Vec<AttachTarget>
    {
        let mut targets = Vec::new();

        if selection.includes_players() {
            if let Some(listener) = &self.listener {
                let mut connection = listener.lock().await;
                for attempt in 0..self.config.wait_attempts {
                    if connection.has_available_players() {
                        break;
                    }
                    trace!(attempt, "waiting for player announcements");
                    connection.poll();
                    tokio::time::sleep(self.config.wait_step()).await;
                }
                // Announcements that arrived during the last step
                if !connection.has_available_players() {
                    connection.poll();
                }
                targets.extend(self.collect_players(&connection));
            }
        }

        self.append_snapshots(selection, &mut targets);
        targets
    }

    /// Resolve a target id to the endpoint a debugger should connect to.
    ///
    /// The first rule that applies wins:
    ///
    /// 1. a connector registered for `id` sets up its transport
    /// 2. a player with guid `id` reported by the latest query that saw the
    ///    player connection: its address, and its announced debugger port or
    ///    the fallback port
    /// 3. loopback with the fallback port `base + (id mod 1000)`
    ///
    /// ## Errors
    ///
    /// Only `ConnectorSetup`, when the connector bound to `id` fails.
    pub fn resolve_attach_info(&self, id: impl Into<TargetId>) -> Result<AttachInfo>
    {
        let id = id.into();

        if let Some(connector) = self.registry.connector(id) {
            let external_id = self.registry.reverse_lookup(id).unwrap_or_default();
            debug!(%id, %external_id, "resolving through connector");
            return connector.setup_connection().map_err(|source| {
                error!(%id, %external_id, error = %source, "connector setup failed");
                DiscoveryError::ConnectorSetup { id, external_id, source }
            });
        }

        let fallback = id.fallback_debugger_port(self.config.fallback_port_base);

        if let Some(record) = self.players().get(&id) {
            let port = record.explicit_debugger_port().unwrap_or(fallback);
            debug!(%id, address = %record.endpoint.ip(), port, "resolved network player");
            return Ok(AttachInfo::new(Some(record.id.clone()), record.endpoint.ip(), port));
        }

        debug!(%id, port = fallback, "resolved to loopback");
        Ok(AttachInfo::loopback(fallback))
    }

    /// Find the one target whose name contains `fragment` (case-insensitive).
    ///
    /// Uses the non-waiting [`targets`](Self::targets) query.
    ///
    /// ## Errors
    ///
    /// `TargetNotFound` or `AmbiguousTarget`, see [`select_by_name`].
    pub fn find_target(&self, fragment: &str) -> Result<AttachTarget>
    {
        select_by_name(self.targets(Selection::All), fragment)
    }

    /// Start process and device scans without waiting for them.
    pub fn refresh(&self)
    {
        self.refresh_processes();
        self.refresh_devices();
    }

    /// Wait until no process or device scan is running.
    pub async fn wait_for_refresh(&self)
    {
        self.processes.settled().await;
        self.devices.settled().await;
    }

    /// Tell the connector bound to `id` that the debugger session has ended.
    ///
    /// Returns `false` if no connector is bound to `id`.
    pub fn disconnect(&self, id: impl Into<TargetId>) -> bool
    {
        let id = id.into();
        match self.registry.connector(id) {
            Some(connector) => {
                debug!(%id, "disconnecting connector");
                connector.on_disconnect();
                true
            }
            None => false,
        }
    }

    /// Run `f` with exclusive access to the player connection.
    ///
    /// Returns `None` if discovery is not listening for players.
    pub async fn with_listener<R>(&self, f: impl FnOnce(&mut PlayerConnection) -> R) -> Option<R>
    {
        let listener = self.listener.as_ref()?;
        let mut connection = listener.lock().await;
        Some(f(&mut connection))
    }

    /// Stop the background poll loop and wait for it to exit.
    ///
    /// The loop notices the request within one poll interval. Queries keep
    /// working afterwards, but the player cache is no longer refreshed.
    pub async fn stop(&mut self)
    {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.poll_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "player poll loop ended abnormally");
            }
            info!("discovery stopped");
        }
    }

    fn collect_players(&self, connection: &PlayerConnection) -> Vec<AttachTarget>
    {
        let mut players = self.players();
        // Expired players must not resolve to their old address
        players.clear();

        connection
            .available_players()
            .filter_map(|announcement| match parse_announcement(announcement) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(announcement, error = %e, "skipping malformed player announcement");
                    None
                }
            })
            .filter(|record| {
                if !record.allow_debugging {
                    trace!(guid = record.guid, "player does not allow debugging");
                }
                record.allow_debugging
            })
            .map(|record| {
                let target = AttachTarget::new(record.guid, record.id.clone(), TargetKind::Player)
                    .with_project_name(record.project_name.clone());
                players.insert(target.id, record);
                target
            })
            .collect()
    }

    fn append_snapshots(&self, selection: Selection, targets: &mut Vec<AttachTarget>)
    {
        if selection.includes_editors() {
            self.refresh_processes();
            targets.extend(self.processes.current());
        }
        if selection.includes_players() {
            self.refresh_devices();
            targets.extend(self.devices.current());
        }
    }

    fn refresh_processes(&self)
    {
        let source = Arc::clone(&self.process_source);
        let matcher = self.matcher.clone();
        self.processes
            .refresh(&self.runtime, move || list_editor_processes(source.as_ref(), &matcher));
    }

    fn refresh_devices(&self)
    {
        let Some(source) = &self.device_source else {
            return;
        };
        let source = Arc::clone(source);
        let registry = Arc::clone(&self.registry);

        self.devices.refresh(&self.runtime, move || match source.enumerate(&registry) {
            Ok(devices) => devices,
            Err(ConnectorError::NotSupported(reason)) => {
                info!(%reason, "device discovery not supported on this platform");
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "device discovery failed");
                Vec::new()
            }
        });
    }

    fn players(&self) -> MutexGuard<'_, HashMap<TargetId, PlayerRecord>>
    {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Discovery
{
    fn drop(&mut self)
    {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

/// Pick the single target whose name contains `fragment`, ignoring case.
///
/// ## Errors
///
/// - `TargetNotFound`: nothing matches
/// - `AmbiguousTarget`: more than one target matches; all of them are returned
pub fn select_by_name(targets: Vec<AttachTarget>, fragment: &str) -> Result<AttachTarget>
{
    let needle = fragment.to_lowercase();
    let mut candidates: Vec<AttachTarget> = targets
        .into_iter()
        .filter(|t| t.name.to_lowercase().contains(&needle))
        .collect();

    match candidates.len() {
        0 => Err(DiscoveryError::TargetNotFound(fragment.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => Err(DiscoveryError::AmbiguousTarget {
            name: fragment.to_string(),
            candidates,
        }),
    }
}

async fn poll_loop(listener: Arc<Mutex<PlayerConnection>>, interval: Duration, mut stop: watch::Receiver<bool>)
{
    debug!(interval_ms = interval.as_millis(), "player poll loop started");
    loop {
        let received = listener.lock().await.poll();
        if received > 0 {
            trace!(received, "player announcements received");
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("player poll loop stopped");
}

/// Result of the latest scan of one source, plus its single-flight flag.
struct Snapshot
{
    source: &'static str,
    targets: RwLock<Vec<AttachTarget>>,
    in_flight: AtomicBool,
    done: Notify,
}

impl Snapshot
{
    fn new(source: &'static str) -> Self
    {
        Self {
            source,
            targets: RwLock::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            done: Notify::new(),
        }
    }

    fn current(&self) -> Vec<AttachTarget>
    {
        self.targets.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run `scan` on the blocking pool unless a scan is already running.
    fn refresh(self: &Arc<Self>, runtime: &Handle, scan: impl FnOnce() -> Vec<AttachTarget> + Send + 'static) -> bool
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(source = self.source, "scan already running");
            return false;
        }

        let snapshot = Arc::clone(self);
        runtime.spawn_blocking(move || {
            let _in_flight = InFlight(&snapshot);
            let targets = scan();
            trace!(source = snapshot.source, count = targets.len(), "scan finished");
            *snapshot.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
        });
        true
    }

    async fn settled(&self)
    {
        loop {
            let finished = self.done.notified();
            if !self.in_flight.load(Ordering::Acquire) {
                return;
            }
            finished.await;
        }
    }
}

/// Clears the in-flight flag when a scan ends, including by panic.
struct InFlight<'a>(&'a Snapshot);

impl Drop for InFlight<'_>
{
    fn drop(&mut self)
    {
        self.0.in_flight.store(false, Ordering::Release);
        self.0.done.notify_waiters();
    }
}
