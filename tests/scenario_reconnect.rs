//! `Client::close` followed by `Client::reconnect` on the same instance must
//! succeed against a still-running server, and a client started before its
//! server is listening must retry its connect until the server comes up.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statewire::{
    packet::GROUP_REQUEST, Client, ClientConfig, HandlerRegistry, Server, ServerConfig,
    SharedContextScope, State, StateContext,
};

const PING: u64 = GROUP_REQUEST | 0x1;

struct Idle;
impl State for Idle {
    fn id(&self) -> u32 {
        0
    }
    fn name(&self) -> &'static str {
        "Idle"
    }
}

fn start_server() -> (Server<()>, std::net::SocketAddr) {
    let mut registry: HandlerRegistry<()> =
        HandlerRegistry::new(SharedContextScope::AllConnections(()));
    registry.register_request(PING, Arc::new(|_code, _state, _ctx| Ok(())));

    let state_factory = Arc::new(|| StateContext::new(Box::new(Idle)));
    let mut server = Server::bind(
        "127.0.0.1:0",
        registry,
        state_factory,
        ServerConfig::default(),
    )
    .expect("bind");
    let addr = server.local_addr().unwrap();
    server.start();
    (server, addr)
}

#[test]
fn close_then_reconnect_on_same_instance_succeeds() {
    let (server, addr) = start_server();

    let client = Client::connect(addr, ClientConfig::default()).expect("connect");
    client.send_request(PING).expect("ping before close");

    client.close().expect("close");
    // Idempotent: closing an already-closed client is not an error.
    client.close().expect("close again");

    // An operation attempted while closed is a clear, typed error rather
    // than a hang or a panic.
    assert!(client.send_request(PING).is_err());

    client.reconnect(addr).expect("reconnect");
    client.send_request(PING).expect("ping after reconnect");

    client.send_exit().ok();
    server.stop();
    thread::sleep(Duration::from_millis(50));
    let _ = server.wait();
}

#[test]
fn connect_retries_until_server_starts_listening() {
    // Reserve a port by binding and immediately dropping the listener, then
    // start the real server on that same port shortly after the client's
    // first connect attempt would have failed with "connection refused".
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let server_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        let mut registry: HandlerRegistry<()> =
            HandlerRegistry::new(SharedContextScope::AllConnections(()));
        registry.register_request(PING, Arc::new(|_code, _state, _ctx| Ok(())));
        let state_factory = Arc::new(|| StateContext::new(Box::new(Idle)));
        let mut server = Server::bind(addr, registry, state_factory, ServerConfig::default())
            .expect("bind on the now-free port");
        server.start();
        server
    });

    let config = ClientConfig {
        connect_timeout: Duration::from_millis(200),
        retry_interval: Duration::from_millis(20),
        retry_timeout: Duration::from_secs(2),
    };
    let client = Client::connect(addr, config).expect("connect should retry past refusals");
    client.send_request(PING).expect("ping once connected");

    client.send_exit().ok();
    let server = server_thread.join().unwrap();
    server.stop();
    thread::sleep(Duration::from_millis(50));
    let _ = server.wait();
}
