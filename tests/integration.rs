use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

use ferry_ftpd::auth::Permissions;
use ferry_ftpd::config::{AnonymousConfig, UserConfig};
use ferry_ftpd::{ChannelSink, Event, EventKind, ServerConfig, ServerHandle};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(root: &Path, first_data_port: u16) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".into(),
        control_port: 0,
        server_root: root.to_path_buf(),
        data_port_min: first_data_port,
        data_port_max: first_data_port + 19,
        idle_timeout_secs: 30,
        data_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> (ServerHandle, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ferry_ftpd::start(config, Arc::new(ChannelSink::new(tx)))
        .await
        .unwrap();
    (handle, rx)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Client {
            reader: BufReader::new(read_half),
            writer,
        };
        let greeting = client.reply().await;
        (client, greeting)
    }

    async fn reply(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("reply timed out")
            .unwrap();
        line
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn cmd(&mut self, line: &str) -> String {
        self.send(line).await;
        self.reply().await
    }

    async fn login(&mut self, user: &str, pass: &str) {
        assert_eq!(code(&self.cmd(&format!("USER {user}")).await), 331);
        assert_eq!(code(&self.cmd(&format!("PASS {pass}")).await), 230);
    }

    /// Sends PASV and connects to the advertised endpoint.
    async fn pasv(&mut self) -> TcpStream {
        let reply = self.cmd("PASV").await;
        assert_eq!(code(&reply), 227, "{reply}");
        let start = reply.find('(').unwrap() + 1;
        let end = reply.find(')').unwrap();
        let nums: Vec<u16> = reply[start..end]
            .split(',')
            .map(|n| n.trim().parse().unwrap())
            .collect();
        let addr = SocketAddr::from((
            [nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8],
            nums[4] * 256 + nums[5],
        ));
        TcpStream::connect(addr).await.unwrap()
    }

    async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(WAIT, self.reader.read_line(&mut line)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

fn code(reply: &str) -> u16 {
    reply[..3].parse().unwrap()
}

async fn next_event(rx: &mut UnboundedReceiver<Event>) -> EventKind {
    timeout(WAIT, rx.recv())
        .await
        .expect("event timed out")
        .expect("sink closed")
        .kind
}

/// Skips events until one matches.
async fn wait_for(rx: &mut UnboundedReceiver<Event>, wanted: impl Fn(&EventKind) -> bool) -> EventKind {
    loop {
        let kind = next_event(rx).await;
        if wanted(&kind) {
            return kind;
        }
    }
}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<EventKind> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.kind);
    }
    events
}

/// Collects events up to and including the next `Disconnect`.
async fn events_until_disconnect(rx: &mut UnboundedReceiver<Event>) -> Vec<EventKind> {
    let mut seen = Vec::new();
    loop {
        let kind = next_event(rx).await;
        let done = kind == EventKind::Disconnect;
        seen.push(kind);
        if done {
            return seen;
        }
    }
}

fn count(events: &[EventKind], wanted: impl Fn(&EventKind) -> bool) -> usize {
    events.iter().filter(|k| wanted(k)).count()
}

/// Writes NOOPs without reading any reply until the server stops taking them.
async fn flood_noops(writer: &mut OwnedWriteHalf) {
    let chunk = "NOOP\r\n".repeat(10_000);
    for _ in 0..2_000 {
        match timeout(Duration::from_millis(500), writer.write_all(chunk.as_bytes())).await {
            Ok(Ok(())) => {}
            _ => return,
        }
    }
    panic!("server never stopped reading");
}

async fn read_all(mut data: TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    timeout(WAIT, data.read_to_end(&mut buf))
        .await
        .expect("data read timed out")
        .unwrap();
    buf
}

#[tokio::test]
async fn login_flow_and_reply_codes() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42000)).await;
    let (mut client, greeting) = Client::connect(server.local_addr()).await;
    assert!(greeting.starts_with("220 "));
    assert_eq!(next_event(&mut rx).await, EventKind::Connect);

    assert_eq!(code(&client.cmd("PWD").await), 530);
    assert_eq!(code(&client.cmd("PASS 12345").await), 503);
    assert_eq!(code(&client.cmd("FROB").await), 500);
    assert_eq!(code(&client.cmd("SYST").await), 215);
    assert_eq!(code(&client.cmd("NOOP").await), 200);

    assert_eq!(code(&client.cmd("USER user").await), 331);
    assert_eq!(code(&client.cmd("PASS wrong").await), 530);
    client.login("user", "12345").await;
    assert_eq!(
        next_event(&mut rx).await,
        EventKind::Login {
            username: "user".into()
        }
    );

    assert_eq!(code(&client.cmd("EPSV").await), 502);
    assert_eq!(code(&client.cmd("RETR").await), 501);
    assert_eq!(code(&client.cmd(&"X".repeat(600)).await), 500);
    assert_eq!(code(&client.cmd("TYPE I").await), 200);

    assert_eq!(code(&client.cmd("QUIT").await), 221);
    assert!(client.at_eof().await);
    assert_eq!(
        next_event(&mut rx).await,
        EventKind::Logout {
            username: "user".into()
        }
    );
    assert_eq!(next_event(&mut rx).await, EventKind::Disconnect);
    server.stop().await;
}

#[tokio::test]
async fn repeated_failed_logins_close_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        max_login_attempts: 2,
        ..test_config(dir.path(), 42020)
    };
    let (server, mut rx) = start(config).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;

    client.cmd("USER user").await;
    assert_eq!(code(&client.cmd("PASS nope").await), 530);
    client.cmd("USER nobody").await;
    assert_eq!(code(&client.cmd("PASS nope").await), 421);
    assert!(client.at_eof().await);

    wait_for(&mut rx, |k| *k == EventKind::Disconnect).await;
    assert!(!drain(&mut rx).iter().any(|k| matches!(k, EventKind::Login { .. })));
    server.stop().await;
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42040)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let mut data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR blob.bin").await), 150);
    data.write_all(&payload).await.unwrap();
    drop(data);
    assert_eq!(code(&client.reply().await), 226);
    assert_eq!(
        wait_for(&mut rx, |k| matches!(k, EventKind::FileReceived { .. })).await,
        EventKind::FileReceived {
            path: dir.path().join("blob.bin")
        }
    );
    assert_eq!(std::fs::read(dir.path().join("blob.bin")).unwrap(), payload);
    assert!(!dir.path().join(".blob.bin.part").exists());

    let data = client.pasv().await;
    assert_eq!(code(&client.cmd("RETR blob.bin").await), 150);
    assert_eq!(read_all(data).await, payload);
    assert_eq!(code(&client.reply().await), 226);
    assert_eq!(
        wait_for(&mut rx, |k| matches!(k, EventKind::FileSent { .. })).await,
        EventKind::FileSent {
            path: dir.path().join("blob.bin")
        }
    );

    // The channel was consumed by RETR.
    assert_eq!(code(&client.cmd("RETR blob.bin").await), 425);
    server.stop().await;
}

#[tokio::test]
async fn active_mode_download() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello over PORT").unwrap();
    let (server, _rx) = start(test_config(dir.path(), 42060)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reply = client
        .cmd(&format!("PORT 127,0,0,1,{},{}", port >> 8, port & 0xff))
        .await;
    assert_eq!(code(&reply), 200);
    assert_eq!(code(&client.cmd("PORT 10,9,8,7,200,10").await), 501);
    assert_eq!(code(&client.cmd("PORT 127,0,0,1,0,21").await), 501);

    client.send("RETR hello.txt").await;
    let (data, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(code(&client.reply().await), 150);
    assert_eq!(read_all(data).await, b"hello over PORT");
    assert_eq!(code(&client.reply().await), 226);
    server.stop().await;
}

#[tokio::test]
async fn listing_and_directory_commands() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"abc").unwrap();
    let (server, _rx) = start(test_config(dir.path(), 42080)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    assert_eq!(code(&client.cmd("MKD docs").await), 257);
    assert_eq!(code(&client.cmd("MKD docs").await), 550);

    let data = client.pasv().await;
    assert_eq!(code(&client.cmd("LIST").await), 150);
    let listing = String::from_utf8(read_all(data).await).unwrap();
    assert_eq!(code(&client.reply().await), 226);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('d') && lines[0].ends_with(" docs"));
    assert!(lines[1].ends_with(" notes.txt"));

    assert_eq!(code(&client.cmd("RNTO other.txt").await), 503);
    assert_eq!(code(&client.cmd("RNFR notes.txt").await), 350);
    assert_eq!(code(&client.cmd("RNTO docs/notes.txt").await), 250);
    assert!(dir.path().join("docs/notes.txt").exists());

    assert_eq!(code(&client.cmd("DELE docs/notes.txt").await), 250);
    assert_eq!(code(&client.cmd("DELE docs/notes.txt").await), 550);
    assert_eq!(code(&client.cmd("RMD docs").await), 250);
    assert!(!dir.path().join("docs").exists());
    server.stop().await;
}

#[tokio::test]
async fn cwd_is_clamped_to_home() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let (server, _rx) = start(test_config(dir.path(), 42100)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    assert_eq!(code(&client.cmd("CWD sub").await), 250);
    assert_eq!(client.cmd("PWD").await.trim_end(), "257 \"/sub\" is the current directory");
    assert_eq!(code(&client.cmd("CWD ../../../..").await), 250);
    let first = client.cmd("PWD").await;
    assert!(first.starts_with("257 \"/\""));
    assert_eq!(client.cmd("PWD").await, first);

    assert_eq!(code(&client.cmd("CWD missing").await), 550);
    assert_eq!(code(&client.cmd("CDUP").await), 250);
    assert!(client.cmd("PWD").await.starts_with("257 \"/\""));
    server.stop().await;
}

#[tokio::test]
async fn anonymous_is_read_only_by_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pub.txt"), b"public").unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42120)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("anonymous", "guest@example.com").await;

    let _data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR upload.txt").await), 550);
    assert_eq!(code(&client.cmd("MKD newdir").await), 550);
    assert_eq!(code(&client.cmd("DELE pub.txt").await), 550);
    assert!(!dir.path().join("upload.txt").exists());

    let data = client.pasv().await;
    assert_eq!(code(&client.cmd("RETR pub.txt").await), 150);
    assert_eq!(read_all(data).await, b"public");
    assert_eq!(code(&client.reply().await), 226);

    client.cmd("QUIT").await;
    wait_for(&mut rx, |k| *k == EventKind::Disconnect).await;
    let seen = drain(&mut rx);
    assert!(!seen.iter().any(|k| matches!(
        k,
        EventKind::FileReceived { .. } | EventKind::IncompleteReceived { .. }
    )));
    server.stop().await;
}

#[tokio::test]
async fn per_address_limit_refuses_extra_clients() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        max_connections_per_ip: 2,
        ..test_config(dir.path(), 42140)
    };
    let (server, mut rx) = start(config).await;

    let (_a, greeting) = Client::connect(server.local_addr()).await;
    assert!(greeting.starts_with("220"));
    let (_b, greeting) = Client::connect(server.local_addr()).await;
    assert!(greeting.starts_with("220"));

    let (mut refused, reply) = Client::connect(server.local_addr()).await;
    assert!(reply.starts_with("421"), "{reply}");
    assert!(refused.at_eof().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let connects = drain(&mut rx)
        .into_iter()
        .filter(|k| *k == EventKind::Connect)
        .count();
    assert_eq!(connects, 2);
    assert_eq!(server.connections().active(), 2);
    server.stop().await;
}

#[tokio::test]
async fn global_limit_frees_slot_on_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        max_connections: 2,
        max_connections_per_ip: 0,
        ..test_config(dir.path(), 42160)
    };
    let (server, mut rx) = start(config).await;

    let (mut a, _) = Client::connect(server.local_addr()).await;
    let (_b, _) = Client::connect(server.local_addr()).await;
    let (_, reply) = Client::connect(server.local_addr()).await;
    assert!(reply.starts_with("421"));

    a.cmd("QUIT").await;
    wait_for(&mut rx, |k| *k == EventKind::Disconnect).await;

    let (_c, greeting) = Client::connect(server.local_addr()).await;
    assert!(greeting.starts_with("220"));
    server.stop().await;
}

#[tokio::test]
async fn control_drop_mid_upload_reports_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42180)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let mut data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR big.bin").await), 150);
    data.write_all(&[7u8; 4096]).await.unwrap();
    drop(client);

    let kind = wait_for(&mut rx, |k| {
        matches!(
            k,
            EventKind::IncompleteReceived { .. } | EventKind::FileReceived { .. }
        )
    })
    .await;
    assert_eq!(
        kind,
        EventKind::IncompleteReceived {
            path: dir.path().join("big.bin")
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        EventKind::Logout {
            username: "user".into()
        }
    );
    assert_eq!(next_event(&mut rx).await, EventKind::Disconnect);

    assert!(!dir.path().join("big.bin").exists());
    assert!(!dir.path().join(".big.bin.part").exists());
    drop(data);
    server.stop().await;
}

#[tokio::test]
async fn stop_closes_sessions_and_listener() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42200)).await;
    let addr = server.local_addr();
    let (mut client, _) = Client::connect(addr).await;
    client.login("user", "12345").await;

    timeout(WAIT, server.stop()).await.unwrap();
    assert!(client.reply().await.starts_with("421"));
    assert!(client.at_eof().await);

    let events = drain(&mut rx);
    assert_eq!(
        &events[events.len() - 2..],
        &[
            EventKind::Logout {
                username: "user".into()
            },
            EventKind::Disconnect
        ]
    );
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn idle_sessions_are_closed() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..test_config(dir.path(), 42220)
    };
    let (server, mut rx) = start(config).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;

    assert!(client.reply().await.starts_with("421"));
    assert!(client.at_eof().await);
    wait_for(&mut rx, |k| *k == EventKind::Disconnect).await;
    server.stop().await;
}

#[tokio::test]
async fn command_sent_during_upload_is_answered_afterwards() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _rx) = start(test_config(dir.path(), 42240)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let mut data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR notes.txt").await), 150);
    data.write_all(b"first half, ").await.unwrap();
    client.send("NOOP").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    data.write_all(b"second half").await.unwrap();
    drop(data);

    assert_eq!(code(&client.reply().await), 226);
    assert_eq!(code(&client.reply().await), 200);
    assert_eq!(
        std::fs::read(dir.path().join("notes.txt")).unwrap(),
        b"first half, second half"
    );
    server.stop().await;
}

#[tokio::test]
async fn control_close_after_pipelined_command_aborts_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42260)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let mut data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR f.bin").await), 150);
    data.write_all(&[1u8; 1000]).await.unwrap();
    client.send("NOOP").await;
    drop(client);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let _ = data.write_all(&[2u8; 1000]).await;
    drop(data);

    let events = events_until_disconnect(&mut rx).await;
    assert_eq!(
        count(&events, |k| matches!(k, EventKind::IncompleteReceived { .. })),
        1
    );
    assert_eq!(count(&events, |k| matches!(k, EventKind::FileReceived { .. })), 0);
    assert!(!dir.path().join("f.bin").exists());
    assert!(!dir.path().join(".f.bin.part").exists());
    server.stop().await;
}

#[tokio::test]
async fn stop_is_not_held_up_by_a_client_that_never_reads() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42280)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;

    flood_noops(&mut client.writer).await;

    timeout(Duration::from_secs(10), server.stop())
        .await
        .expect("stop blocked on a session");
    let events = events_until_disconnect(&mut rx).await;
    assert_eq!(events.first(), Some(&EventKind::Connect));
}

#[tokio::test]
async fn client_that_never_reads_is_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..test_config(dir.path(), 42300)
    };
    let (server, mut rx) = start(config).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;

    flood_noops(&mut client.writer).await;

    let disconnected = timeout(Duration::from_secs(15), async {
        while let Some(event) = rx.recv().await {
            if event.kind == EventKind::Disconnect {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(disconnected.ok(), Some(true));
    server.stop().await;
}

#[tokio::test]
async fn control_close_during_download_reports_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("large.bin"), vec![0u8; 32 << 20]).unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42320)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let data = client.pasv().await;
    assert_eq!(code(&client.cmd("RETR large.bin").await), 150);
    drop(client);

    let events = events_until_disconnect(&mut rx).await;
    assert_eq!(
        count(&events, |k| *k
            == EventKind::IncompleteSent {
                path: dir.path().join("large.bin")
            }),
        1
    );
    assert_eq!(count(&events, |k| matches!(k, EventKind::FileSent { .. })), 0);
    drop(data);
    server.stop().await;
}

#[tokio::test]
async fn passive_channel_nobody_connects_to_fails_the_download() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
    let config = ServerConfig {
        data_timeout_secs: 1,
        ..test_config(dir.path(), 42340)
    };
    let (server, mut rx) = start(config).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    assert_eq!(code(&client.cmd("PASV").await), 227);
    let opening = client.cmd("TYPE A").await;
    assert_eq!(code(&opening), 200);
    let opening = client.cmd("RETR hello.txt").await;
    assert_eq!(code(&opening), 150);
    assert!(opening.contains("ASCII"), "{opening}");
    assert_eq!(code(&client.reply().await), 425);
    assert_eq!(code(&client.cmd("QUIT").await), 221);

    let events = events_until_disconnect(&mut rx).await;
    assert_eq!(count(&events, |k| matches!(k, EventKind::IncompleteSent { .. })), 1);
    assert_eq!(count(&events, |k| matches!(k, EventKind::FileSent { .. })), 0);
    server.stop().await;
}

#[tokio::test]
async fn stop_during_upload_reports_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let (server, mut rx) = start(test_config(dir.path(), 42360)).await;
    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("user", "12345").await;

    let mut data = client.pasv().await;
    assert_eq!(code(&client.cmd("STOR upload.bin").await), 150);
    data.write_all(&[5u8; 2048]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    timeout(WAIT, server.stop()).await.unwrap();
    assert!(client.reply().await.starts_with("421"));

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |k| matches!(k, EventKind::IncompleteReceived { .. })),
        1
    );
    assert_eq!(events.last(), Some(&EventKind::Disconnect));
    assert!(!dir.path().join("upload.bin").exists());
    assert!(!dir.path().join(".upload.bin.part").exists());
}

#[tokio::test]
async fn configured_homes_are_created_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let alice_home = dir.path().join("homes/alice");
    let public = dir.path().join("pub");
    let config = ServerConfig {
        anonymous: AnonymousConfig {
            home: Some(public.clone()),
            ..AnonymousConfig::default()
        },
        users: vec![UserConfig {
            username: "alice".into(),
            password: "wonderland".into(),
            home: Some(alice_home.clone()),
            permissions: Permissions::all(),
        }],
        ..test_config(dir.path(), 42380)
    };
    let (server, _rx) = start(config).await;
    assert!(alice_home.is_dir());
    assert!(public.is_dir());

    let (mut client, _) = Client::connect(server.local_addr()).await;
    client.login("alice", "wonderland").await;
    assert!(client.cmd("PWD").await.starts_with("257 \"/\""));
    assert_eq!(code(&client.cmd("MKD inbox").await), 257);
    assert!(alice_home.join("inbox").is_dir());

    let data = client.pasv().await;
    assert_eq!(code(&client.cmd("LIST").await), 150);
    let listing = String::from_utf8(read_all(data).await).unwrap();
    assert_eq!(code(&client.reply().await), 226);
    assert!(listing.trim_end().ends_with(" inbox"));
    server.stop().await;
}

#[tokio::test]
async fn staging_files_are_hidden_from_clients() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _rx) = start(test_config(dir.path(), 42400)).await;
    let (mut uploader, _) = Client::connect(server.local_addr()).await;
    uploader.login("user", "12345").await;

    let mut data = uploader.pasv().await;
    assert_eq!(code(&uploader.cmd("STOR a.bin").await), 150);
    data.write_all(b"in flight").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dir.path().join(".a.bin.part").exists());

    let (mut other, _) = Client::connect(server.local_addr()).await;
    other.login("user", "12345").await;
    assert_eq!(code(&other.cmd("RETR .a.bin.part").await), 550);
    assert_eq!(code(&other.cmd("DELE .a.bin.part").await), 550);
    assert_eq!(code(&other.cmd("RNFR .a.bin.part").await), 550);

    let listing = other.pasv().await;
    assert_eq!(code(&other.cmd("LIST").await), 150);
    let listing = String::from_utf8(read_all(listing).await).unwrap();
    assert_eq!(code(&other.reply().await), 226);
    assert!(!listing.contains(".part"), "{listing}");

    // A name ending in .part is still an ordinary file.
    let mut plain = other.pasv().await;
    assert_eq!(code(&other.cmd("STOR a.bin.part").await), 150);
    plain.write_all(b"plain").await.unwrap();
    drop(plain);
    assert_eq!(code(&other.reply().await), 226);

    drop(data);
    assert_eq!(code(&uploader.reply().await), 226);
    assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"in flight");
    assert_eq!(std::fs::read(dir.path().join("a.bin.part")).unwrap(), b"plain");
    server.stop().await;
}
