/// Keepalive-driven reconnection, driven by paused tokio time and the
/// loopback dialer
use sshtunnel_client::{SupervisorState, Tunnel, TunnelError, TunnelOptions};
use sshtunnel_transport::loopback::LoopbackDialer;
use sshtunnel_transport::{HopConfig, TransportHandle};
use std::sync::Arc;
use std::time::Duration;

fn hops() -> Vec<HopConfig> {
    vec![
        HopConfig::new("bastion:22")
            .with_user("ops")
            .with_identity_file("/keys/ops"),
        HopConfig::new("target:22")
            .with_user("ops")
            .with_identity_file("/keys/ops"),
    ]
}

fn same(a: &Arc<dyn TransportHandle>, b: &Arc<dyn TransportHandle>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

async fn connect(dialer: &LoopbackDialer) -> Tunnel {
    Tunnel::connect(hops(), Arc::new(dialer.clone()), TunnelOptions::default())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_healthy_probes_keep_the_transport() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;
    let original = tunnel.transport().unwrap();

    tokio::time::sleep(Duration::from_secs(46)).await;

    assert_eq!(dialer.last_handle().unwrap().keepalive_count(), 3);
    assert!(same(&tunnel.transport().unwrap(), &original));
    assert_eq!(tunnel.state(), SupervisorState::Healthy);
    assert_eq!(dialer.attempts(), 2);

    tunnel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_replaces_transport() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;
    let original = tunnel.transport().unwrap();
    let outer = dialer.last_handle().unwrap();
    outer.fail_keepalives();

    // First probe fires at 15s and fails; the redial succeeds immediately.
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert!(original.is_closed());
    assert!(dialer.handles().iter().take(2).all(|h| h.is_closed()));
    assert_eq!(dialer.attempts(), 4);

    let current = tunnel.transport().unwrap();
    assert!(!same(&current, &original));
    assert!(!current.is_closed());
    assert_eq!(current.peer(), "target:22");
    assert_eq!(tunnel.state(), SupervisorState::Healthy);
    assert_eq!(
        tunnel.dial_chain_log(),
        vec!["bastion:22", "target:22", "bastion:22", "target:22"]
    );

    tunnel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_keepalive_replaces_transport() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;
    let original = tunnel.transport().unwrap();
    dialer.last_handle().unwrap().stall_keepalives();

    // Probe sent at 15s, given up at 30s, redialed right away.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(dialer.attempts(), 2);
    assert!(same(&tunnel.transport().unwrap(), &original));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(dialer.attempts(), 4);
    assert!(original.is_closed());
    assert!(!same(&tunnel.transport().unwrap(), &original));
    assert_eq!(tunnel.state(), SupervisorState::Healthy);

    tunnel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_redial_never_gives_up() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;
    let mut states = tunnel.subscribe_state();
    dialer.last_handle().unwrap().fail_keepalives();
    dialer.fail_next(5);

    // Probe fails at 15s; redials fail at 15, 18, 21, 24 and 27s.
    tokio::time::sleep(Duration::from_secs(28)).await;
    assert_eq!(dialer.attempts(), 2 + 5);
    assert!(tunnel.transport().is_none());
    assert!(matches!(
        *states.borrow_and_update(),
        SupervisorState::Reconnecting { attempt: 5 }
    ));

    // The sixth redial at 30s succeeds.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(tunnel.state(), SupervisorState::Healthy);
    let current = tunnel.transport().unwrap();
    assert!(!current.is_closed());
    assert_eq!(dialer.attempts(), 2 + 5 + 2);

    tunnel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_credential_errors_are_retried_after_connect() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;
    dialer.last_handle().unwrap().fail_keepalives();
    dialer.push_failure(sshtunnel_transport::TransportError::Credential {
        path: "/keys/ops".to_string(),
        reason: "permission denied".to_string(),
    });

    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(tunnel.state(), SupervisorState::Healthy);
    assert!(tunnel.transport().is_some());

    tunnel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_supervisor_and_closes_transport() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    let tunnel = connect(&dialer).await;

    tunnel.close().await;
    tunnel.close().await;

    assert!(tunnel.is_closed());
    assert!(tunnel.transport().is_none());
    assert!(dialer.handles().iter().all(|h| h.is_closed()));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(dialer.attempts(), 2);

    tokio::time::timeout(Duration::from_secs(1), tunnel.wait())
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    assert!(matches!(
        tunnel.forward(&cancel, "127.0.0.1:0", "127.0.0.1:1").await,
        Err(TunnelError::Closed)
    ));
}

#[tokio::test]
async fn test_initial_dial_failure_is_fatal() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22", "target:22"]);
    dialer.push_failure(sshtunnel_transport::TransportError::Credential {
        path: "/keys/ops".to_string(),
        reason: "unreadable".to_string(),
    });

    let result = Tunnel::connect(hops(), Arc::new(dialer), TunnelOptions::default()).await;
    assert!(matches!(
        result,
        Err(TunnelError::Transport(ref e)) if e.is_credential()
    ));
}

#[tokio::test]
async fn test_empty_host_rejected_before_dialing() {
    let dialer = LoopbackDialer::with_hosts(["bastion:22"]);
    let hops = vec![HopConfig::new("").with_user("ops")];

    let result = Tunnel::connect(hops, Arc::new(dialer.clone()), TunnelOptions::default()).await;
    assert!(matches!(result, Err(TunnelError::Config(_))));
    assert_eq!(dialer.attempts(), 0);

    let result = Tunnel::connect(Vec::new(), Arc::new(dialer.clone()), TunnelOptions::default()).await;
    assert!(matches!(result, Err(TunnelError::Config(_))));
}
