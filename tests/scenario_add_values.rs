//! Exercises the canonical "add two values" exchange: a client sends two
//! Data packets, issues a Request to compute their sum, then downloads the
//! result. Grounded directly on the add-server/add-client wiring this
//! framework's control-code algebra and state-guard idiom are modeled on.

use std::thread;
use std::time::Duration;

use statewire::{
    packet::{GROUP_DATA, GROUP_DOWNLOAD, GROUP_REQUEST},
    Client, ClientConfig, ErrorKind, HandlerRegistry, Server, ServerConfig, SharedContextScope,
    Socket, State, StateContext, StateEvent,
};
use std::sync::Arc;

const VALUE_A: u64 = GROUP_DATA | 0x1;
const VALUE_B: u64 = GROUP_DATA | 0x2;
const REQUEST_COMPUTE: u64 = GROUP_REQUEST | 0x1;
const DOWNLOAD_RESULT: u64 = GROUP_DOWNLOAD | 0x1;
const DATA_RESULT: u64 = GROUP_DATA | 0x3;

#[derive(Default, Clone, Copy)]
struct SumParams {
    value_a: u32,
    value_b: u32,
    sum: u32,
}

/// A connection starts here: values may arrive in either order.
struct Connected {
    got_a: bool,
    got_b: bool,
}

impl State for Connected {
    fn id(&self) -> u32 {
        0
    }
    fn name(&self) -> &'static str {
        "Connected"
    }
    fn set(&mut self, context: &mut StateContext, event: StateEvent) {
        if let StateEvent::ControlCode(code) = event {
            match code {
                VALUE_A => self.got_a = true,
                VALUE_B => self.got_b = true,
                _ => {}
            }
        }
        if self.got_a && self.got_b {
            context.next_state(Box::new(Ready));
        }
    }
}

/// Both values are in; a compute request is now accepted.
struct Ready;
impl State for Ready {
    fn id(&self) -> u32 {
        1
    }
    fn name(&self) -> &'static str {
        "Ready"
    }
    fn set(&mut self, context: &mut StateContext, event: StateEvent) {
        if let StateEvent::ControlCode(REQUEST_COMPUTE) = event {
            context.next_state(Box::new(Computed));
        }
    }
}

/// The sum has been computed; the result may now be downloaded.
struct Computed;
impl State for Computed {
    fn id(&self) -> u32 {
        2
    }
    fn name(&self) -> &'static str {
        "Computed"
    }
}

fn start_server() -> (Server<SumParams>, std::net::SocketAddr) {
    let mut registry: HandlerRegistry<SumParams> =
        HandlerRegistry::new(SharedContextScope::AllConnections(SumParams::default()));

    registry.register_data(
        VALUE_A,
        Arc::new(|_code, payload, state, ctx: &mut SumParams| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&payload[..4]);
            ctx.value_a = u32::from_ne_bytes(bytes);
            state.set(StateEvent::ControlCode(VALUE_A));
            Ok(())
        }),
    );
    registry.register_data(
        VALUE_B,
        Arc::new(|_code, payload, state, ctx: &mut SumParams| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&payload[..4]);
            ctx.value_b = u32::from_ne_bytes(bytes);
            state.set(StateEvent::ControlCode(VALUE_B));
            Ok(())
        }),
    );
    registry.register_request(
        REQUEST_COMPUTE,
        Arc::new(|_code, state, ctx: &mut SumParams| {
            if state.current_state_id() < 1 {
                return Err(ErrorKind::Callback(
                    "must have both values before computing".into(),
                ));
            }
            ctx.sum = ctx.value_a + ctx.value_b;
            state.set(StateEvent::ControlCode(REQUEST_COMPUTE));
            Ok(())
        }),
    );
    registry.register_download(
        DOWNLOAD_RESULT,
        Arc::new(|_code, socket: &mut Socket, state, ctx: &mut SumParams| {
            if state.current_state_id() < 2 {
                return Err(ErrorKind::Callback("result is not ready yet".into()));
            }
            state.set(StateEvent::ControlCode(DOWNLOAD_RESULT));
            socket.send_buffer(DATA_RESULT, &ctx.sum.to_ne_bytes())?;
            Ok(())
        }),
    );

    let state_factory = Arc::new(|| {
        StateContext::new(Box::new(Connected {
            got_a: false,
            got_b: false,
        }))
    });

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
fn add_two_values_end_to_end() {
    let (server, addr) = start_server();

    let client = Client::connect(addr, ClientConfig::default()).expect("connect");
    client
        .send_data_blocking(VALUE_A, &7u32.to_ne_bytes())
        .expect("send value a");
    client
        .send_data_blocking(VALUE_B, &35u32.to_ne_bytes())
        .expect("send value b");
    client
        .send_request_blocking(REQUEST_COMPUTE)
        .expect("request compute");
    let result = client
        .recv_data_blocking(DOWNLOAD_RESULT)
        .expect("download result");

    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&result[..4]);
    assert_eq!(u32::from_ne_bytes(bytes), 42);

    client.send_exit().expect("send exit");
    server.stop();
    thread::sleep(Duration::from_millis(50));
    server.wait().expect("server should shut down cleanly");
}
