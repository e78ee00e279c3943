//! A control code with no registered handler is dropped silently: the
//! server still consumes any declared payload bytes and acknowledges with
//! `Accept`, preserving framing for the next packet, rather than guessing
//! what the client meant.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statewire::{
    packet::GROUP_REQUEST, Client, ClientConfig, HandlerRegistry, Server, ServerConfig,
    SharedContextScope, State, StateContext,
};

const KNOWN_REQUEST: u64 = GROUP_REQUEST | 0x1;
const UNKNOWN_REQUEST: u64 = GROUP_REQUEST | 0xff;

struct OnlyState;
impl State for OnlyState {
    fn id(&self) -> u32 {
        0
    }
    fn name(&self) -> &'static str {
        "OnlyState"
    }
}

fn start_server() -> (Server<()>, std::net::SocketAddr) {
    let mut registry: HandlerRegistry<()> =
        HandlerRegistry::new(SharedContextScope::AllConnections(()));
    registry.register_request(KNOWN_REQUEST, Arc::new(|_code, _state, _ctx| Ok(())));

    let state_factory = Arc::new(|| StateContext::new(Box::new(OnlyState)));
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
fn unregistered_control_code_is_accepted_and_connection_stays_open() {
    let (server, addr) = start_server();

    let client = Client::connect(addr, ClientConfig::default()).expect("connect");
    client
        .send_request(UNKNOWN_REQUEST)
        .expect("unknown code should still be acknowledged with Accept");

    // Framing is preserved: a known code dispatched right after still works
    // on the same connection.
    client
        .send_request(KNOWN_REQUEST)
        .expect("connection should still be usable after an unknown code");

    client.send_exit().ok();
    server.stop();
    thread::sleep(Duration::from_millis(50));
    let _ = server.wait();
}

#[test]
fn unregistered_data_code_consumes_declared_payload_before_acking() {
    let (server, addr) = start_server();
    const UNKNOWN_DATA: u64 = statewire::packet::GROUP_DATA | 0xfe;

    let client = Client::connect(addr, ClientConfig::default()).expect("connect");
    client
        .send_data(UNKNOWN_DATA, &[1u8; 8])
        .expect("unknown data code should still be acknowledged with Accept");

    client
        .send_request(KNOWN_REQUEST)
        .expect("framing preserved for the next packet after an unknown data code");

    client.send_exit().ok();
    server.stop();
    thread::sleep(Duration::from_millis(50));
    let _ = server.wait();
}
