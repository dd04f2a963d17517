/// End-to-end tests: the debug server driving the reference PPU core over TCP

use std::sync::Arc;
use std::time::Duration;

use gdbserver::parser::{encode_packet, read_packet};
use gdbserver::{EmulatorState, GdbServer, Lifecycle, ServerConfig, ServerHandle, StopNotifier, INTERRUPT};
use ppusim::{Emulator, SimConfig, PPU_THREAD_BASE_ID};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        }
    }

    async fn send(&mut self, payload: &str) {
        self.stream.write_all(&encode_packet(payload)).await.unwrap();
        assert_eq!(self.stream.read_u8().await.unwrap(), b'+');
    }

    async fn reply(&mut self) -> String {
        let fut = read_packet(&mut self.stream);
        let packet = tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("no reply from server")
            .unwrap();
        self.stream.write_all(b"+").await.unwrap();
        format!("{}{}", packet.cmd, packet.data)
    }

    async fn command(&mut self, payload: &str) -> String {
        self.send(payload).await;
        self.reply().await
    }

    async fn interrupt(&mut self) {
        self.stream.write_all(&[INTERRUPT]).await.unwrap();
    }
}

async fn start(sim: SimConfig) -> (ServerHandle, Arc<Emulator>) {
    let stop = StopNotifier::new();
    let emulator = Arc::new(Emulator::new(&sim, stop.clone()).unwrap());
    let config = ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        poll_interval_ms: 5,
    };
    let server = GdbServer::bind(&config, emulator.clone(), stop)
        .await
        .unwrap()
        .unwrap();
    (server.spawn(), emulator)
}

fn pc_reply(pc: u32) -> String {
    format!("{:016x}", pc)
}

#[tokio::test]
async fn test_attach_and_inspect() {
    let (handle, emulator) = start(SimConfig {
        threads: 2,
        ..SimConfig::default()
    })
    .await;
    let mut client = Client::connect(handle.local_endpoint()).await;

    assert_eq!(client.command("qSupported:swbreak+").await, "PacketSize=1200");
    assert_eq!(client.command("?").await, "S05");
    assert_eq!(client.command("qAttached").await, "1");
    assert_eq!(
        client.command("qfThreadInfo").await,
        "m0000000001000000,0000000001000001l"
    );

    assert_eq!(client.command("Hg1000001").await, "OK");
    assert_eq!(client.command("p40").await, pc_reply(0x10000));
    let all = client.command("g").await;
    assert_eq!(all.len(), 32 * 16 + 32 * 16 + 16 + 16 + 8 + 16 + 16 + 8 + 8);
    assert_eq!(client.command("p47").await, "E01");

    assert_eq!(client.command("P3=00000000deadbeef").await, "OK");
    assert_eq!(client.command("p3").await, "00000000deadbeef");

    assert_eq!(client.command("M10100,4:01020304").await, "OK");
    assert_eq!(client.command("m10100,4").await, "01020304");
    assert_eq!(client.command("m1fffc,8").await, "60000000");
    assert_eq!(client.command("m40000000,4").await, "E01");
    assert_eq!(client.command("M40000000,1:ff").await, "E03");

    assert_eq!(emulator.state(), EmulatorState::Ready);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_breakpoints_and_stepping() {
    let (handle, emulator) = start(SimConfig::default()).await;
    let mut client = Client::connect(handle.local_endpoint()).await;

    assert_eq!(client.command("Z0,10010,4").await, "OK");
    assert_eq!(client.command("vCont;c").await, "S05");
    assert_eq!(emulator.state(), EmulatorState::Paused);
    assert_eq!(client.command("qC").await, format!("QC{:016x}", PPU_THREAD_BASE_ID));
    assert_eq!(client.command("p40").await, pc_reply(0x10010));

    // stepping off the breakpoint moves exactly one instruction
    assert_eq!(client.command("vCont;s").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10014));
    assert_eq!(client.command("vCont;s").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10018));

    assert_eq!(client.command("Z0,10020,4").await, "OK");
    assert_eq!(client.command("vCont;c").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10020));

    assert_eq!(client.command("z0,10020,4").await, "OK");
    assert_eq!(client.command("z0,10010,4").await, "OK");
    assert_eq!(client.command("Z0,10030,4").await, "OK");
    assert_eq!(client.command("vCont;c").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10030));

    client.send("k").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(emulator.state(), EmulatorState::Stopped);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_continue_after_step_onto_breakpoint() {
    let (handle, _emulator) = start(SimConfig::default()).await;
    let mut client = Client::connect(handle.local_endpoint()).await;

    assert_eq!(client.command("Z0,10000,4").await, "OK");
    assert_eq!(client.command("vCont;s").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10000));

    assert_eq!(client.command("Z0,10040,4").await, "OK");
    assert_eq!(client.command("vCont;c").await, "S05");
    assert_eq!(client.command("p40").await, pc_reply(0x10040));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_interrupt_running_target() {
    let (handle, emulator) = start(SimConfig {
        cycle_delay: Duration::from_millis(1),
        ..SimConfig::default()
    })
    .await;
    let mut client = Client::connect(handle.local_endpoint()).await;

    client.send("vCont;c").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(emulator.state(), EmulatorState::Running);

    client.interrupt().await;
    assert_eq!(client.reply().await, "S05");
    assert_eq!(emulator.state(), EmulatorState::Paused);

    let pc = u64::from_str_radix(&client.command("p40").await, 16).unwrap();
    assert!(pc > 0x10000 && pc < 0x20000, "pc {:#x}", pc);

    // the core does not run while the debugger holds it
    tokio::time::sleep(Duration::from_millis(20)).await;
    let again = u64::from_str_radix(&client.command("p40").await, 16).unwrap();
    assert_eq!(pc, again);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_attach_pauses_running_emulator() {
    let (handle, emulator) = start(SimConfig {
        cycle_delay: Duration::from_millis(1),
        ..SimConfig::default()
    })
    .await;
    emulator.run();
    assert_eq!(emulator.state(), EmulatorState::Running);

    let mut client = Client::connect(handle.local_endpoint()).await;
    assert_eq!(client.command("?").await, "S05");
    assert_eq!(emulator.state(), EmulatorState::Paused);

    handle.stop().await.unwrap();
}
