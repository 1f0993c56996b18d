/// A running instance driven the way the binary drives it: profile file,
/// first relay, control socket, then `list` and `stop` against it
use sshtunnel_cli::commands::{list, stop};
use sshtunnel_cli::{Instance, ProfileFile, RelaySpec};
use sshtunnel_control::RelayKind;
use sshtunnel_transport::loopback::LoopbackDialer;
use sshtunnel_transport::TransportHandle;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const PROFILES: &str = r#"
defaults:
  user: ops
  identity_file: /keys/ops
options:
  keepalive_interval: 1
profiles:
  - env_name: test
    hops:
      - host_name: bastion
      - host_name: app
"#;

async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

fn profile() -> sshtunnel_cli::ResolvedProfile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PROFILES.as_bytes()).unwrap();
    ProfileFile::load(file.path()).unwrap().resolve("test").unwrap()
}

#[tokio::test]
async fn test_instance_list_and_stop() {
    let echo = echo_server().await;
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "app:22"]);

    let instance = Instance::start(
        Arc::new(dialer.clone()),
        profile(),
        RelaySpec {
            kind: RelayKind::Forward,
            local: "127.0.0.1:0".to_string(),
            remote: echo.clone(),
        },
        Some("127.0.0.1:0"),
    )
    .await
    .unwrap();

    let dials = dialer.dials();
    assert_eq!(dials.len(), 2);
    assert_eq!(dials[0].user, "ops");
    assert_eq!(dials[1].address, "app:22");

    let relays = instance.service().list().await;
    assert_eq!(relays.len(), 1);
    let mut client = TcpStream::connect(&relays[0].listen).await.unwrap();
    client.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hi");
    drop(client);

    let control = instance.control_addr().unwrap().to_string();
    let table = list(&control).await.unwrap();
    assert!(table.contains("Tunnel-Type"), "{table}");
    assert!(table.contains(&relays[0].id.to_string()), "{table}");
    assert!(table.contains("forward"), "{table}");

    let message = stop(&control, relays[0].id).await.unwrap();
    assert!(message.contains(&echo), "{message}");
    assert!(instance.service().list().await.is_empty());

    tokio::time::timeout(Duration::from_secs(5), instance.shutdown())
        .await
        .unwrap();
    assert!(dialer.handles().iter().all(|h| h.is_closed()));
}
