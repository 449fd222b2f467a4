use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tungstenite::Message;

use effectpanel_rs::catalog::{Address, Catalog};
use effectpanel_rs::client::{ClientChannel, ClientRegistry, ViewState};
use effectpanel_rs::config::{DeviceBinding, Family};
use effectpanel_rs::envelope::CommandRequest;
use effectpanel_rs::host::{EffectHost, HostResult, Link};
use effectpanel_rs::listener::web;
use effectpanel_rs::router::{self, Router};

const CATALOG: &str = r#"[
  {"address": "12", "name": "Flame effects", "controls": [
    {"id": "0", "name": "Pilot", "type": "switch", "default": "off"},
    {"id": "1", "name": "Poof", "type": "execute_with_integer_value",
     "default": 100, "min": 100, "max": 2000}
  ]},
  {"address": "25", "name": "Tiki head", "controls": [
    {"id": "0", "name": "Eyes", "type": "hsl_color_picker_rgb_output", "default": "25,25,25"}
  ]}
]"#;

/// Records frames; the first transmit is slow.
struct SlowStart {
    link: Link,
    calls: AtomicUsize,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl EffectHost for SlowStart {
    fn link(&self) -> Link {
        self.link.clone()
    }

    fn transmit(&self, frame: &[u8]) -> HostResult<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(300));
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

async fn start_server(bind: &str) -> (SocketAddr, Arc<SlowStart>) {
    let host = Arc::new(SlowStart {
        link: Link::new(true),
        calls: AtomicUsize::new(0),
        frames: Mutex::new(Vec::new()),
    });
    let mut hosts: HashMap<String, Arc<dyn EffectHost>> = HashMap::new();
    hosts.insert("bus".to_string(), host.clone());

    let mut bindings = HashMap::new();
    bindings.insert(
        Address::from("12"),
        DeviceBinding {
            family: Family::Fire,
            host: Some("bus".to_string()),
            hmtl_address: None,
            outputs: HashMap::new(),
        },
    );
    bindings.insert(
        Address::from("25"),
        DeviceBinding {
            family: Family::Light,
            host: None,
            hmtl_address: None,
            outputs: HashMap::new(),
        },
    );

    let catalog = Catalog::from_str(CATALOG).unwrap();
    let router = Router::from_config(catalog.clone(), &bindings, &hosts).unwrap();
    let state = web::State::new(router::handlers(Arc::new(router)), &catalog).unwrap();
    let app = web::app(Arc::new(state), "/command");

    let listener = tokio::net::TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(web::run(listener, app));
    (addr, host)
}

/// Send each frame in turn, then read `replies` text frames.
fn exchange(addr: SocketAddr, frames: Vec<String>, replies: usize) -> Vec<Value> {
    let (mut socket, _) = tungstenite::connect(format!("ws://{}/command", addr)).unwrap();
    for frame in frames {
        socket.send(Message::Text(frame)).unwrap();
    }
    let mut received = Vec::new();
    while received.len() < replies {
        if let Message::Text(text) = socket.read().unwrap() {
            received.push(serde_json::from_str(&text).unwrap());
        }
    }
    socket.close(None).ok();
    received
}

fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(20));
    }
}

fn command(handler: &str, device: &str, control: &str, value: Value) -> String {
    json!({
        "handler": handler,
        "device_address": device,
        "control_id": control,
        "value": value,
    })
    .to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_poof_and_bounds() {
    let (addr, host) = start_server("127.0.0.1:0").await;
    let frames = vec![
        command("fire", "12", "1", json!(1500)),
        command("fire", "12", "1", json!(5000)),
    ];
    let replies = tokio::task::spawn_blocking(move || exchange(addr, frames, 2))
        .await
        .unwrap();

    assert_eq!("ok", replies[0]["status"]);
    assert_eq!("fire", replies[0]["handler"]);
    assert_eq!("error", replies[1]["status"]);
    assert_eq!("invalid_value", replies[1]["type"]);
    assert_eq!(json!(5000), replies[1]["opts"]["value"]);
    assert_eq!(1, host.calls.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_frames_get_no_reply() {
    let (addr, host) = start_server("127.0.0.1:0").await;
    let frames = vec![
        "not json".to_string(),
        r#"{"device_address": "12"}"#.to_string(),
        command("nobody", "12", "1", json!(1500)),
        command("command", "25", "0", json!("1,2,3")),
    ];
    let replies = tokio::task::spawn_blocking(move || exchange(addr, frames, 1))
        .await
        .unwrap();

    // The only reply is to the last frame.
    assert_eq!("command", replies[0]["handler"]);
    assert_eq!("method_not_implemented", replies[0]["type"]);
    assert_eq!(json!("25"), replies[0]["opts"]["device_address"]);
    assert_eq!(0, host.calls.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_commands_keep_their_order() {
    let (addr, host) = start_server("127.0.0.1:0").await;
    let frames = vec![
        command("fire", "12", "1", json!(1500)),
        command("fire", "12", "0", json!("on")),
    ];
    let replies = tokio::task::spawn_blocking(move || exchange(addr, frames, 2))
        .await
        .unwrap();

    assert_eq!(json!("1"), replies[0]["opts"]["control_id"]);
    assert_eq!(json!("0"), replies[1]["opts"]["control_id"]);

    // The slow first transmit still went out first.
    let frames = host.frames.lock().unwrap();
    assert_eq!(2, frames.len());
    assert!(frames[0].len() > frames[1].len());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_catalog_script() {
    let (addr, _host) = start_server("127.0.0.1:0").await;
    let body = tokio::task::spawn_blocking(move || {
        use std::io::{Read, Write};
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /devices.js HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        body
    })
    .await
    .unwrap();
    assert!(body.contains("window.devices"));
    assert!(body.contains("Flame effects"));
}

#[test]
fn test_client_channel_follows_the_server() {
    let server = Runtime::new().unwrap();
    let (addr, _host) = server.block_on(start_server("127.0.0.1:0"));

    let catalog = Catalog::from_str(CATALOG).unwrap();
    let (view, changes) = ViewState::new(&catalog);
    let mut registry = ClientRegistry::new();
    registry.register("fire", Box::new(view.clone()));
    let client = ClientChannel::start(&format!("ws://{}/command", addr), registry).unwrap();
    wait_for("connect", || client.is_connected());

    let poof = CommandRequest::new("fire", Address::from("12"), "1", json!(1500));
    client.send(&poof).unwrap();
    let change = changes.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(Address::from("12"), change.device);
    assert_eq!("1", change.control);
    assert_eq!(json!(1500), view.get(&Address::from("12"), "1").unwrap().value);

    // Take the server away, then bring it back on the same port.
    server.shutdown_background();
    wait_for("disconnect", || !client.is_connected());
    let server = Runtime::new().unwrap();
    server.block_on(start_server(&addr.to_string()));
    wait_for("reconnect", || client.is_connected());

    // A handler registered again replaces the old one.
    let (fresh, fresh_changes) = ViewState::new(&catalog);
    assert!(client.register_handler("fire", Box::new(fresh.clone())).is_some());
    let too_long = CommandRequest::new("fire", Address::from("12"), "1", json!(5000));
    client.send(&too_long).unwrap();
    let change = fresh_changes.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(change.state.last_error.is_some());
    assert_eq!(json!(100), fresh.get(&Address::from("12"), "1").unwrap().value);
    assert!(changes.try_recv().is_err());
}
