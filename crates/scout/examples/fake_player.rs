//! Fake network player for trying out `scout list --wait`
//!
//! Announces one debuggable player on the player multicast group, on every
//! announcement port, once per second until Ctrl+C.
//!
//! ```text
//! cargo run -p scout --example fake_player -- [GUID] [NAME] [DEBUGGER_PORT]
//! ```

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scout_core::config::{PLAYER_MULTICAST_GROUP, PLAYER_MULTICAST_PORTS};
use scout_core::PlayerRecord;

fn main()
{
    let mut args = std::env::args().skip(1);
    let guid: u32 = args.next().and_then(|a| a.parse().ok()).unwrap_or(4242);
    let name = args.next().unwrap_or_else(|| "FakePlayer(localhost)".to_string());
    let debugger_port: u16 = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);

    let record = PlayerRecord {
        endpoint: SocketAddr::from((Ipv4Addr::LOCALHOST, 55000)),
        flags: 0,
        guid,
        editor_guid: 0,
        version: 1,
        id: name,
        project_name: Some("Demo".to_string()),
        allow_debugging: true,
        debugger_port,
    };
    let mut payload = record.to_announcement().into_bytes();
    payload.push(0);

    let socket = UdpSocket::bind("0.0.0.0:0").expect("Failed to bind sender socket");
    socket.set_multicast_loop_v4(true).expect("Failed to enable multicast loopback");

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::Relaxed)).expect("Error setting signal handler");

    println!("Announcing: {record}");
    println!("Press Ctrl+C to stop");

    while running.load(Ordering::Relaxed) {
        for port in PLAYER_MULTICAST_PORTS {
            if let Err(e) = socket.send_to(&payload, (PLAYER_MULTICAST_GROUP, port)) {
                eprintln!("send to port {port} failed: {e}");
            }
        }
        thread::sleep(Duration::from_secs(1));
    }
    println!("Stopped");
}
