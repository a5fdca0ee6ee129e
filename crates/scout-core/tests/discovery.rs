//! Tests for the discovery orchestrator using in-memory sources

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use scout_core::listener::{MulticastSocket, PlayerConnection};
use scout_core::process::ProcessSource;
use scout_core::{
    AttachInfo, AttachTarget, Connector, ConnectorError, ConnectorRegistry, DeviceSource, Discovery, DiscoveryConfig,
    DiscoveryError, Selection, TargetId, TargetKind,
};

const DEMO: &str = "[IP]10.0.0.5[PORT]55000[FLAGS]0[GUID]42[EDITORID]7[VERSION]1[ID]Demo[DEBUG]1";

fn config() -> DiscoveryConfig
{
    DiscoveryConfig {
        wait_step_ms: 20,
        ..DiscoveryConfig::default()
    }
}

fn listener_with(announcements: &[&str]) -> PlayerConnection
{
    let mut connection = PlayerConnection::detached(&config());
    for announcement in announcements {
        connection.register_player(*announcement);
    }
    connection
}

struct NoProcesses;

impl ProcessSource for NoProcesses
{
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        Ok(Vec::new())
    }

    fn name(&self, _pid: u32) -> io::Result<String>
    {
        Err(io::Error::new(io::ErrorKind::NotFound, "no processes"))
    }
}

struct FixedProcesses(Vec<(u32, &'static str)>);

impl ProcessSource for FixedProcesses
{
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        Ok(self.0.iter().map(|(pid, _)| *pid).collect())
    }

    fn name(&self, pid: u32) -> io::Result<String>
    {
        self.0
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, name)| (*name).to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "exited"))
    }
}

#[derive(Default)]
struct FakeConnector
{
    port: u16,
    fail: bool,
    disconnects: AtomicUsize,
}

impl FakeConnector
{
    fn on_port(port: u16) -> Self
    {
        Self {
            port,
            ..Self::default()
        }
    }

    fn failing() -> Self
    {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl Connector for FakeConnector
{
    fn setup_connection(&self) -> Result<AttachInfo, ConnectorError>
    {
        if self.fail {
            return Err(ConnectorError::SetupFailed("tunnel refused".to_string()));
        }
        Ok(AttachInfo::new(Some("Device".to_string()), IpAddr::V4(Ipv4Addr::LOCALHOST), self.port))
    }

    fn on_disconnect(&self)
    {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct UsbDevices(Vec<(&'static str, Arc<FakeConnector>)>);

impl DeviceSource for UsbDevices
{
    fn enumerate(&self, registry: &ConnectorRegistry) -> Result<Vec<AttachTarget>, ConnectorError>
    {
        Ok(self
            .0
            .iter()
            .map(|(serial, connector)| {
                let connector: Arc<dyn Connector> = connector.clone();
                let id = registry.register_connector(serial, connector);
                AttachTarget::new(id, format!("iPhone ({serial})"), TargetKind::Device)
            })
            .collect())
    }
}

/// Holds its scan until the test sends on the gate, then reports one device.
struct GatedDevices
{
    gate: Mutex<mpsc::Receiver<()>>,
    connector: Arc<FakeConnector>,
}

impl DeviceSource for GatedDevices
{
    fn enumerate(&self, registry: &ConnectorRegistry) -> Result<Vec<AttachTarget>, ConnectorError>
    {
        let released = self.gate.lock().unwrap().recv();
        if released.is_err() {
            return Ok(Vec::new());
        }
        let connector: Arc<dyn Connector> = self.connector.clone();
        let id = registry.register_connector("usb-gated", connector);
        Ok(vec![AttachTarget::new(id, "iPad (usb-gated)", TargetKind::Device)])
    }
}

struct Unsupported;

impl DeviceSource for Unsupported
{
    fn enumerate(&self, _registry: &ConnectorRegistry) -> Result<Vec<AttachTarget>, ConnectorError>
    {
        Err(ConnectorError::NotSupported("usb".to_string()))
    }
}

#[tokio::test]
async fn test_player_resolves_to_address_and_fallback_port()
{
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[DEMO]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    assert_eq!(players, vec![AttachTarget::new(42, "Demo", TargetKind::Player)]);

    let info = discovery.resolve_attach_info(42).unwrap();
    assert_eq!(info.address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(info.port, 56042);
    assert_eq!(info.app_name.as_deref(), Some("Demo"));

    discovery.stop().await;
}

#[tokio::test]
async fn test_player_explicit_debugger_port_wins_over_fallback()
{
    let announcement = format!("{DEMO}[DEBUGGERPORT]56100[PROJECTNAME]Racer");
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[&announcement]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].project_name.as_deref(), Some("Racer"));
    assert_eq!(discovery.resolve_attach_info(42).unwrap().port, 56100);

    discovery.stop().await;
}

#[tokio::test]
async fn test_unknown_id_resolves_to_loopback_fallback()
{
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let info = discovery.resolve_attach_info(1234).unwrap();
    assert_eq!(info, AttachInfo::loopback(56234));
    assert_eq!(info.app_name, None);

    // Ids a multiple of 1000 apart share a port
    assert_eq!(discovery.resolve_attach_info(2234).unwrap().port, 56234);
}

#[tokio::test]
async fn test_connector_beats_player_with_same_id()
{
    let player = "[IP]10.0.0.9[PORT]55000[FLAGS]0[GUID]1000000[EDITORID]7[VERSION]1[ID]Shadow[DEBUG]1";
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[player]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let id = discovery
        .registry()
        .register_connector("usb-0001", Arc::new(FakeConnector::on_port(12000)));
    assert_eq!(id, TargetId(1_000_000));

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    assert!(players.iter().any(|t| t.id == id));

    let info = discovery.resolve_attach_info(id).unwrap();
    assert_eq!(info.port, 12000);
    assert_eq!(info.app_name.as_deref(), Some("Device"));

    discovery.stop().await;
}

#[tokio::test]
async fn test_connector_failure_is_the_only_resolve_error()
{
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(NoProcesses)
        .start()
        .unwrap();
    let id = discovery
        .registry()
        .register_connector("usb-broken", Arc::new(FakeConnector::failing()));

    match discovery.resolve_attach_info(id) {
        Err(DiscoveryError::ConnectorSetup {
            id: failed,
            external_id,
            source,
        }) => {
            assert_eq!(failed, id);
            assert_eq!(external_id, "usb-broken");
            assert!(matches!(source, ConnectorError::SetupFailed(_)));
        }
        other => panic!("expected ConnectorSetup, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_and_undebuggable_players_are_skipped()
{
    let locked = "[IP]10.0.0.6[PORT]55000[FLAGS]0[GUID]43[EDITORID]7[VERSION]1[ID]Locked[DEBUG]0";
    let broken = "[IP]10.0.0.7[PORT]not-a-port[FLAGS]0[GUID]44[EDITORID]7[VERSION]1[ID]Broken[DEBUG]1";
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[DEMO, locked, broken, "garbage"]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    let ids: Vec<TargetId> = players.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![TargetId(42)]);

    // A player filtered out is never cached, so it resolves like an unknown id
    assert_eq!(discovery.resolve_attach_info(43).unwrap(), AttachInfo::loopback(56043));

    discovery.stop().await;
}

#[tokio::test]
async fn test_non_blocking_query_is_empty_while_listener_busy()
{
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[DEMO]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let while_busy = discovery
        .with_listener(|_| discovery.targets(Selection::PlayersOnly))
        .await
        .unwrap();
    assert!(while_busy.is_empty());

    let after = discovery.targets_wait(Selection::PlayersOnly).await;
    assert_eq!(after.len(), 1);

    discovery.stop().await;
}

#[tokio::test]
async fn test_editor_processes_appear_after_refresh()
{
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(FixedProcesses(vec![(100, "Unity"), (101, "bash"), (102, "UnityHelper")]))
        .start()
        .unwrap();

    discovery.refresh();
    discovery.wait_for_refresh().await;

    let editors = discovery.targets(Selection::EditorsOnly);
    assert_eq!(
        editors,
        vec![AttachTarget::new(100, "Unity Editor (Unity)", TargetKind::Editor)]
    );
    assert!(discovery.targets(Selection::PlayersOnly).is_empty());

    let found = discovery.find_target("unity editor").unwrap();
    assert_eq!(found.id, TargetId(100));
    assert!(matches!(
        discovery.find_target("nothing"),
        Err(DiscoveryError::TargetNotFound(_))
    ));

    discovery.wait_for_refresh().await;
}

#[tokio::test]
async fn test_devices_get_sequential_virtual_ids()
{
    let first = Arc::new(FakeConnector::on_port(12001));
    let second = Arc::new(FakeConnector::on_port(12002));
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(NoProcesses)
        .device_source(UsbDevices(vec![("usb-0001", first), ("usb-0002", Arc::clone(&second))]))
        .start()
        .unwrap();

    discovery.refresh();
    discovery.wait_for_refresh().await;

    let mut devices = discovery.targets(Selection::PlayersOnly);
    devices.sort_by_key(|t| t.id);
    let ids: Vec<TargetId> = devices.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![TargetId(1_000_000), TargetId(1_000_001)]);
    assert!(devices.iter().all(|t| t.kind == TargetKind::Device));
    assert!(discovery.targets(Selection::EditorsOnly).is_empty());

    assert_eq!(discovery.resolve_attach_info(1_000_001).unwrap().port, 12002);

    assert!(discovery.disconnect(1_000_001));
    assert_eq!(second.disconnects.load(Ordering::SeqCst), 1);
    assert!(!discovery.disconnect(42));

    discovery.wait_for_refresh().await;
}

#[tokio::test]
async fn test_unsupported_device_source_yields_no_devices()
{
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(NoProcesses)
        .device_source(Unsupported)
        .start()
        .unwrap();

    discovery.refresh();
    discovery.wait_for_refresh().await;
    assert!(discovery.targets(Selection::All).is_empty());

    discovery.wait_for_refresh().await;
}

#[tokio::test]
async fn test_announcement_received_over_loopback()
{
    let receiver = MulticastSocket::from_udp(UdpSocket::bind("127.0.0.1:0").unwrap()).unwrap();
    let target = SocketAddr::from((Ipv4Addr::LOCALHOST, receiver.port()));
    let connection = PlayerConnection::from_sockets(vec![receiver], &config());

    let mut discovery = Discovery::builder()
        .config(config())
        .listener(connection)
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(format!("{DEMO}\0").as_bytes(), target).unwrap();

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].id, TargetId(42));

    discovery.stop().await;
}

#[tokio::test]
async fn test_stop_is_observed_within_one_interval()
{
    let slow = DiscoveryConfig {
        poll_interval_ms: 60_000,
        ..config()
    };
    let mut discovery = Discovery::builder()
        .config(slow)
        .listener(listener_with(&[DEMO]))
        .process_source(NoProcesses)
        .start()
        .unwrap();
    assert!(discovery.is_running());

    tokio::time::timeout(Duration::from_secs(5), discovery.stop())
        .await
        .expect("stop did not interrupt the poll interval");
    assert!(!discovery.is_running());

    // Stopping twice is harmless and queries still answer
    discovery.stop().await;
    assert_eq!(discovery.targets_wait(Selection::PlayersOnly).await.len(), 1);
}

#[tokio::test]
async fn test_expired_player_resolves_to_loopback()
{
    let mut discovery = Discovery::builder()
        .config(config())
        .listener(listener_with(&[DEMO]))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    assert_eq!(discovery.targets_wait(Selection::PlayersOnly).await.len(), 1);
    assert_eq!(
        discovery.resolve_attach_info(42).unwrap().address,
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    );

    // One poll past the time-to-live, with no new announcement
    let ttl = discovery.config().player_ttl;
    discovery
        .with_listener(|connection| {
            for _ in 0..=ttl {
                connection.poll();
            }
        })
        .await
        .unwrap();

    assert!(discovery.targets_wait(Selection::PlayersOnly).await.is_empty());
    assert_eq!(discovery.resolve_attach_info(42).unwrap(), AttachInfo::loopback(56042));

    discovery.stop().await;
}

#[tokio::test]
async fn test_wait_reads_announcement_sent_during_last_step()
{
    let receiver = MulticastSocket::from_udp(UdpSocket::bind("127.0.0.1:0").unwrap()).unwrap();
    let target = SocketAddr::from((Ipv4Addr::LOCALHOST, receiver.port()));
    let two_steps = DiscoveryConfig {
        wait_step_ms: 300,
        wait_attempts: 2,
        poll_interval_ms: 60_000,
        ..DiscoveryConfig::default()
    };
    let connection = PlayerConnection::from_sockets(vec![receiver], &two_steps);

    let mut discovery = Discovery::builder()
        .config(two_steps)
        .listener(connection)
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(450));
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.send_to(format!("{DEMO}\0").as_bytes(), target).unwrap();
    });

    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    sender.join().unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].id, TargetId(42));

    discovery.stop().await;
}

#[tokio::test]
async fn test_wait_on_empty_cache_is_bounded()
{
    let bounded = DiscoveryConfig {
        wait_step_ms: 20,
        wait_attempts: 5,
        poll_interval_ms: 60_000,
        ..DiscoveryConfig::default()
    };
    let mut discovery = Discovery::builder()
        .config(bounded.clone())
        .listener(PlayerConnection::detached(&bounded))
        .process_source(NoProcesses)
        .start()
        .unwrap();

    let started = Instant::now();
    let players = discovery.targets_wait(Selection::PlayersOnly).await;
    let elapsed = started.elapsed();

    assert!(players.is_empty());
    assert!(elapsed >= Duration::from_millis(100), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");

    discovery.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_process_scan_not_blocked_by_device_scan()
{
    let (release, gate) = mpsc::channel();
    let discovery = Discovery::builder()
        .config(config())
        .without_listener()
        .process_source(FixedProcesses(vec![(100, "Unity")]))
        .device_source(GatedDevices {
            gate: Mutex::new(gate),
            connector: Arc::new(FakeConnector::on_port(12003)),
        })
        .start()
        .unwrap();

    discovery.refresh();

    let mut editors = Vec::new();
    for _ in 0..200 {
        editors = discovery.targets(Selection::EditorsOnly);
        if !editors.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        editors,
        vec![AttachTarget::new(100, "Unity Editor (Unity)", TargetKind::Editor)]
    );
    // The device scan is still held at the gate
    assert!(discovery.registry().connector_ids().is_empty());

    release.send(()).unwrap();
    drop(release);
    discovery.wait_for_refresh().await;

    let devices = discovery.targets(Selection::PlayersOnly);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, TargetId(1_000_000));

    discovery.wait_for_refresh().await;
}
