//! A handler's early guard (`current_state_id >= required`) rejects a
//! request issued too soon; the client's blocking retry loop eventually
//! times out rather than retrying forever.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statewire::{
    packet::GROUP_REQUEST, Client, ClientConfig, ErrorKind, HandlerRegistry, Server, ServerConfig,
    SharedContextScope, State, StateContext,
};

const REQUEST_COMPUTE: u64 = GROUP_REQUEST | 0x1;

struct NeverReady;
impl State for NeverReady {
    fn id(&self) -> u32 {
        0
    }
    fn name(&self) -> &'static str {
        "NeverReady"
    }
}

fn start_server() -> (Server<()>, std::net::SocketAddr) {
    let mut registry: HandlerRegistry<()> =
        HandlerRegistry::new(SharedContextScope::AllConnections(()));
    registry.register_request(
        REQUEST_COMPUTE,
        Arc::new(|_code, state, _ctx| {
            if state.current_state_id() < 1 {
                return Err(ErrorKind::Callback(
                    "must have both values before computing".into(),
                ));
            }
            Ok(())
        }),
    );

    let state_factory = Arc::new(|| StateContext::new(Box::new(NeverReady)));
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
fn guarded_request_rejects_then_blocking_retry_times_out() {
    let (server, addr) = start_server();

    let config = ClientConfig {
        connect_timeout: Duration::from_secs(2),
        retry_interval: Duration::from_millis(10),
        retry_timeout: Duration::from_millis(60),
    };
    let client = Client::connect(addr, config).expect("connect");

    // A single attempt observes the Reject directly.
    let err = client.send_request(REQUEST_COMPUTE).unwrap_err();
    assert!(matches!(err, ErrorKind::Reject(_)));

    client.send_exit().ok();

    let client2 = Client::connect(addr, config.clone()).expect("reconnect");
    let err = client2.send_request_blocking(REQUEST_COMPUTE).unwrap_err();
    assert!(
        matches!(err, ErrorKind::Socket(_)),
        "expected retry budget exhaustion to surface as a Socket time out, got {err:?}"
    );
    assert!(err.to_string().contains("time out"));

    server.stop();
    thread::sleep(Duration::from_millis(50));
    let _ = server.wait();
}
