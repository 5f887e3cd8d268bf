use std::io::{self, Cursor};
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use libnflog_tools::pcap_parser::data::NfAttrType;
use libnflog_tools::{CapturedFrame, Config, Error, FrameHandler, FrameSource, PcapReplaySource};
use nflog_relay::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn attach(session: &mut RelaySession, client_path: &Path) -> RelayClient {
    let client = RelayClient::connect(client_path, session.path()).expect("client");
    client.set_read_timeout(Some(TIMEOUT)).expect("timeout");
    session.wait_for_peer().expect("handshake");
    client
}

#[test]
fn handshake_then_send() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = RelaySession::new(dir.path().join("emit.sock"));
    session.bind().expect("bind");
    let client = attach(&mut session, &dir.path().join("sink.sock"));
    assert_eq!(session.state(), SessionState::Attached);
    assert_eq!(
        session.peer().and_then(|p| p.as_pathname()),
        Some(dir.path().join("sink.sock").as_path())
    );

    session.send(b"t=1 proto=1").expect("send");
    session.send(b"t=2 proto=1").expect("send");
    assert_eq!(client.recv_line().expect("first"), "t=1 proto=1");
    assert_eq!(client.recv_line().expect("second"), "t=2 proto=1");
}

#[test]
fn send_fails_once_consumer_is_gone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = RelaySession::new(dir.path().join("emit.sock"));
    session.bind().expect("bind");
    let client = attach(&mut session, &dir.path().join("sink.sock"));
    drop(client);

    assert!(matches!(session.send(b"x"), Err(RelayError::Send(_))));
    assert_eq!(session.state(), SessionState::Broken);
    assert!(session.peer().is_none());
    // a broken session stays broken
    assert!(matches!(
        session.send(b"x"),
        Err(RelayError::NotAttached(SessionState::Broken))
    ));
}

#[test]
fn first_handshake_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = RelaySession::new(dir.path().join("emit.sock"));
    session.bind().expect("bind");
    let first = RelayClient::connect(dir.path().join("a.sock"), session.path()).expect("a");
    let second = RelayClient::connect(dir.path().join("b.sock"), session.path()).expect("b");
    first.set_read_timeout(Some(TIMEOUT)).expect("timeout");
    second
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("timeout");
    session.wait_for_peer().expect("handshake");

    session.send(b"only for a").expect("send");
    assert_eq!(first.recv_line().expect("a receives"), "only for a");
    let err = second.recv_line().expect_err("b receives nothing");
    assert!(matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ));
}

#[test]
fn unnamed_sender_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = RelaySession::new(dir.path().join("emit.sock"));
    session.bind().expect("bind");
    let anonymous = UnixDatagram::unbound().expect("unbound socket");
    anonymous
        .send_to(b"hello", session.path())
        .expect("anonymous handshake");
    let client = attach(&mut session, &dir.path().join("sink.sock"));

    session.send(b"record").expect("send");
    assert_eq!(client.recv_line().expect("record"), "record");
}

#[test]
fn new_session_requires_new_handshake() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = dir.path().join("emit.sock");

    let mut session = RelaySession::new(&server);
    session.bind().expect("bind");
    let client = attach(&mut session, &dir.path().join("sink.sock"));
    drop(client);
    assert!(session.send(b"lost").is_err());
    drop(session);

    // stale socket file is replaced
    assert!(server.exists());
    let mut session = RelaySession::new(&server);
    session.bind().expect("rebind");
    assert_eq!(session.state(), SessionState::WaitingForPeer);
    assert!(matches!(
        session.send(b"x"),
        Err(RelayError::NotAttached(SessionState::WaitingForPeer))
    ));
    let client = attach(&mut session, &dir.path().join("sink2.sock"));
    session.send(b"again").expect("send");
    assert_eq!(client.recv_line().expect("record"), "again");
}

#[test]
fn vanished_consumer_fails_handshake() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = RelaySession::new(dir.path().join("emit.sock"));
    session.bind().expect("bind");
    let client =
        RelayClient::connect(dir.path().join("sink.sock"), session.path()).expect("client");
    // handshake queued, then the consumer socket goes away
    drop(client);

    assert!(matches!(
        session.wait_for_peer(),
        Err(RelayError::Handshake(_))
    ));
    assert_eq!(session.state(), SessionState::Broken);
    assert!(session.peer().is_none());
}

fn ipv4_tcp(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut p = vec![
        0x45, 0, 0, 40, 0, 0, 0x40, 0, 64, 6, 0, 0, 192, 168, 1, 10, 192, 168, 1, 20,
    ];
    p.extend_from_slice(&src_port.to_be_bytes());
    p.extend_from_slice(&dst_port.to_be_bytes());
    p.extend_from_slice(&[0; 8]);
    p.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
    p
}

fn put_attribute(buf: &mut Vec<u8>, kind: NfAttrType, value: &[u8]) {
    let len = (4 + value.len()) as u16;
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&(kind as u16).to_ne_bytes());
    buf.extend_from_slice(value);
    buf.resize((buf.len() + 3) & !3, 0);
}

fn nflog_record(payload: &[u8]) -> Vec<u8> {
    let mut record = vec![2, 0, 0, 7];
    put_attribute(&mut record, NfAttrType::PacketHdr, &[0x08, 0x00, 0x03, 0x00]);
    put_attribute(
        &mut record,
        NfAttrType::HwHeader,
        &[
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
        ],
    );
    put_attribute(&mut record, NfAttrType::Payload, payload);
    record
}

/// Legacy pcap file, link type NFLOG
fn nflog_pcap(records: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&239u32.to_le_bytes());
    for (sec, usec, data) in records {
        out.extend_from_slice(&sec.to_le_bytes());
        out.extend_from_slice(&usec.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

fn wait_for_socket(path: &Path) {
    let start = Instant::now();
    while !path.exists() {
        assert!(start.elapsed() < TIMEOUT, "relay socket never appeared");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn replay_relays_records_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = dir.path().join("aud").join("emit.sock");
    let file = nflog_pcap(&[
        (1_700_000_000, 1, nflog_record(&ipv4_tcp(443, 51000, 0x12))),
        // truncated TCP header: dropped
        (1_700_000_000, 2, nflog_record(&ipv4_tcp(1, 2, 0x02)[..30])),
        (1_700_000_000, 3, nflog_record(&ipv4_tcp(22, 60000, 0x10))),
    ]);
    let mut source = PcapReplaySource::new(Cursor::new(file), &Config::default()).expect("pcap");

    let options = RelayOptions {
        socket_path: server.clone(),
        echo: false,
    };
    let relay = thread::spawn(move || {
        let mut relay = Relay::new(options);
        relay.run(&mut source).expect("relay run")
    });

    wait_for_socket(&server);
    let client = RelayClient::connect(dir.path().join("sink.sock"), &server).expect("client");
    client.set_read_timeout(Some(TIMEOUT)).expect("timeout");

    let first = client.recv_line().expect("first record");
    assert_eq!(
        first,
        "t=1700000000000001 dst_hw=00:11:22:33:44:55 src_hw=66:77:88:99:aa:bb hw=0x0800 \
         len=40 src_addr=192.168.1.10 dst_addr=192.168.1.20 proto=6 \
         src_port=443 dst_port=51000 flags=syn,ack"
    );
    let second = parse_record_line(&client.recv_line().expect("second record"));
    assert_eq!(second["t"], "1700000000000003");
    assert_eq!(second["src_port"], "22");
    assert_eq!(second["flags"], "ack");

    let stats = relay.join().expect("relay thread");
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.records_sent, 2);
    assert_eq!(stats.decode_errors, 1);
    // socket file removed once the source is exhausted
    assert!(!server.exists());
}

/// Frame source driven by the test: one frame per dispatch, acknowledged once handled
struct ChannelSource {
    frames: mpsc::Receiver<(u64, Vec<u8>)>,
    handled: mpsc::Sender<()>,
}

impl FrameSource for ChannelSource {
    fn dispatch(&mut self, handler: &mut dyn FrameHandler) -> Result<Option<usize>, Error> {
        let Ok((timestamp_us, payload)) = self.frames.recv() else {
            return Ok(None);
        };
        let frame = CapturedFrame {
            payload: Some(payload.as_slice()),
            hw_protocol: Some(0x0800),
            timestamp_us,
            ..CapturedFrame::default()
        };
        handler.handle_frame(&frame)?;
        self.handled.send(()).expect("test is waiting");
        Ok(Some(1))
    }
}

/// Attach once the relay has bound a fresh session socket
fn attach_when_ready(client_path: &Path, server: &Path) -> RelayClient {
    let start = Instant::now();
    loop {
        match RelayClient::connect(client_path, server) {
            Ok(client) => {
                client.set_read_timeout(Some(TIMEOUT)).expect("timeout");
                return client;
            }
            Err(e) => {
                assert!(start.elapsed() < TIMEOUT, "relay never rebound: {e}");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

#[test]
fn relay_serves_new_consumer_after_loss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = dir.path().join("emit.sock");
    let (frames, frames_rx) = mpsc::channel();
    let (handled_tx, handled) = mpsc::channel();
    let mut source = ChannelSource {
        frames: frames_rx,
        handled: handled_tx,
    };
    let options = RelayOptions {
        socket_path: server.clone(),
        echo: false,
    };
    let relay = thread::spawn(move || {
        let mut relay = Relay::new(options);
        relay.run(&mut source).expect("relay run")
    });

    wait_for_socket(&server);
    let first = attach_when_ready(&dir.path().join("a.sock"), &server);
    frames.send((1, ipv4_tcp(443, 51000, 0x12))).expect("frame 1");
    handled.recv_timeout(TIMEOUT).expect("frame 1 handled");
    assert_eq!(parse_record_line(&first.recv_line().expect("a receives"))["t"], "1");

    drop(first);
    // lost with the first consumer; the relay then rebinds
    frames.send((2, ipv4_tcp(443, 51000, 0x10))).expect("frame 2");
    handled.recv_timeout(TIMEOUT).expect("frame 2 handled");

    let second = attach_when_ready(&dir.path().join("b.sock"), &server);
    frames.send((3, ipv4_tcp(22, 60000, 0x10))).expect("frame 3");
    handled.recv_timeout(TIMEOUT).expect("frame 3 handled");
    let record = parse_record_line(&second.recv_line().expect("b receives"));
    assert_eq!(record["t"], "3");
    assert_eq!(record["src_port"], "22");

    drop(frames);
    let stats = relay.join().expect("relay thread");
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.records_sent, 2);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.decode_errors, 0);
    assert!(!server.exists());
}
