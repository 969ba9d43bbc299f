use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use periscope::agent::{
    AgentConfig, AttachServer, HookFn, HookSpec, InstallSpec, Namespace, ProbeCatalog,
    SessionStats,
};
use periscope::client::AttachClient;
use periscope::proto::{read_frame, write_frame, Request, Response, Status};
use periscope::Error;

const CONNECT: Duration = Duration::from_secs(2);

fn config() -> AgentConfig {
    AgentConfig {
        accept_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        module_path: vec!["/opt/app/modules".into(), "/opt/app/site".into()],
    }
}

fn counter_catalog() -> Arc<ProbeCatalog> {
    let mut catalog = ProbeCatalog::new();
    catalog.register("counter", |_args| {
        Ok(Box::new(|ns: &mut Namespace, _data: Option<&Value>| {
            let next = ns.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
            ns.set("count", json!(next));
            Ok(json!(next))
        }) as HookFn)
    });
    catalog.register("has_data", |_args| {
        Ok(Box::new(|_ns: &mut Namespace, data: Option<&Value>| {
            Ok(json!(data.is_some()))
        }) as HookFn)
    });
    Arc::new(catalog)
}

async fn start_server(
    dir: &Path,
    config: AgentConfig,
    catalog: Arc<ProbeCatalog>,
) -> (PathBuf, Arc<SessionStats>, JoinHandle<periscope::Result<()>>) {
    let path = dir.join("agent.sock");
    let stats = Arc::new(SessionStats::new());
    let server = AttachServer::at_path(path.clone(), catalog, Arc::clone(&stats), config);
    let handle = tokio::spawn(server.serve());
    for _ in 0..200 {
        if path.exists() {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(path.exists(), "server never bound its socket");
    (path, stats, handle)
}

#[tokio::test]
async fn test_health_check_answers_ok_with_empty_payload() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    // Raw connection so the exact wire bytes are visible.
    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    write_frame(&mut stream, &Request::new("test").encode().unwrap())
        .await
        .unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(frame, vec![0x00]);

    write_frame(&mut stream, &Request::new("bye").encode().unwrap())
        .await
        .unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_command_is_not_found() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    let response = client.call("frobnicate", None).await.unwrap();
    assert_eq!(response.status, Status::NotFound);

    // Server keeps serving after an unknown command.
    client.ping().await.unwrap();
    client.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_path_reports_module_search_path() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    let module_path = client.module_path().await.unwrap();
    assert_eq!(module_path, vec!["/opt/app/modules", "/opt/app/site"]);

    client.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_extension_state_persists_across_invocations() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    client
        .install_extension(InstallSpec::new("probe1").invoke(HookSpec::new("counter")))
        .await
        .unwrap();

    let first = client.call("probe1", None).await.unwrap();
    let second = client.call("probe1", None).await.unwrap();
    assert_eq!(first.status, Status::Ok);
    assert_eq!(first.payload, Some(json!(1)));
    assert_eq!(second.payload, Some(json!(2)));

    client.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_install_reports_failed_and_server_survives() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    let err = client
        .install_extension(InstallSpec::new("probe1").invoke(HookSpec::new("no_such_probe")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExtensionInstall { .. }));

    // Extension was never registered; the session is still healthy.
    let response = client.call("probe1", None).await.unwrap();
    assert_eq!(response.status, Status::NotFound);
    client.ping().await.unwrap();

    client.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_command_data_decodes_as_none() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    let install = Request::with_data(
        "install",
        serde_json::to_value(InstallSpec::new("echo").invoke(HookSpec::new("has_data"))).unwrap(),
    );
    write_frame(&mut stream, &install.encode().unwrap()).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(Response::decode(&frame).unwrap().status, Status::Ok);

    // Garbage after the separator: the command still runs, with no data.
    let mut payload = b"echo".to_vec();
    payload.push(0xFF);
    payload.extend(b"{not json");
    write_frame(&mut stream, &payload).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    let response = Response::decode(&frame).unwrap();
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.payload, Some(json!(false)));

    // Well-formed data arrives as Some.
    write_frame(
        &mut stream,
        &Request::with_data("echo", json!({"x": 1})).encode().unwrap(),
    )
    .await
    .unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(Response::decode(&frame).unwrap().payload, Some(json!(true)));

    write_frame(&mut stream, &Request::new("bye").encode().unwrap())
        .await
        .unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bye_removes_rendezvous_socket() {
    let dir = tempdir().unwrap();
    let (path, stats, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    client.ping().await.unwrap();
    assert_eq!(stats.live(), 1);

    client.bye().await;
    handle.await.unwrap().unwrap();

    assert!(!path.exists());
    assert_eq!(stats.live(), 0);
    let err = AttachClient::connect_path(&path, CONNECT).await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }));
}

#[tokio::test]
async fn test_unloaders_run_at_session_end() {
    let dir = tempdir().unwrap();
    let unloads = Arc::new(AtomicUsize::new(0));

    let mut catalog = ProbeCatalog::new();
    let seen = Arc::clone(&unloads);
    catalog.register("mark_unload", move |_args| {
        let seen = Arc::clone(&seen);
        Ok(Box::new(move |_ns: &mut Namespace, _data: Option<&Value>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }) as HookFn)
    });

    let (path, _, handle) = start_server(dir.path(), config(), Arc::new(catalog)).await;
    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    client
        .install_extension(InstallSpec::new("probe1").unload(HookSpec::new("mark_unload")))
        .await
        .unwrap();
    assert_eq!(unloads.load(Ordering::SeqCst), 0);

    client.bye().await;
    handle.await.unwrap().unwrap();
    assert_eq!(unloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accept_timeout_terminates_and_cleans_up() {
    let dir = tempdir().unwrap();
    let mut cfg = config();
    cfg.accept_timeout = Duration::from_millis(100);

    let (path, stats, handle) = start_server(dir.path(), cfg, counter_catalog()).await;
    // No peer ever connects: zero-extension cleanup still runs in full.
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert!(!path.exists());
    assert_eq!(stats.live(), 0);
}

#[tokio::test]
async fn test_idle_timeout_ends_the_session() {
    let dir = tempdir().unwrap();
    let mut cfg = config();
    cfg.idle_timeout = Duration::from_millis(100);

    let (path, stats, handle) = start_server(dir.path(), cfg, counter_catalog()).await;
    let mut client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    client.ping().await.unwrap();

    sleep(Duration::from_millis(300)).await;
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert!(!path.exists());
    assert_eq!(stats.live(), 0);

    // The abandoned client surfaces the dead channel as a disconnect.
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::Disconnected));
}

#[tokio::test]
async fn test_second_peer_is_refused_at_transport_level() {
    let dir = tempdir().unwrap();
    let (path, _, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let mut first = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    // Round trip proves the accept happened and the listener is gone.
    first.ping().await.unwrap();

    let err = AttachClient::connect_path(&path, CONNECT).await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }));

    // The first session is unaffected.
    first.ping().await.unwrap();
    first.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stale_socket_is_reclaimed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agent.sock");
    // Leftover from a crashed session: a plain file nobody listens on.
    std::fs::write(&path, b"stale").unwrap();

    let (bound, _, handle) =
        start_server(dir.path(), config(), counter_catalog()).await;
    assert_eq!(bound, path);

    // The pre-existing file defeats the bind wait in start_server, so
    // connecting may race the bind; retry until the listener is up.
    let mut client = None;
    for _ in 0..200 {
        match AttachClient::connect_path(&path, CONNECT).await {
            Ok(c) => {
                client = Some(c);
                break;
            }
            Err(_) => sleep(Duration::from_millis(5)).await,
        }
    }
    let mut client = client.expect("listener never came up");
    client.ping().await.unwrap();
    client.bye().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stale_socket_error_names_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agent.sock");
    // A plain file nobody listens on: connect is refused.
    std::fs::write(&path, b"stale").unwrap();

    let err = AttachClient::connect_path(&path, CONNECT).await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }));
    let message = err.to_string();
    assert!(message.contains(path.to_str().unwrap()), "{message}");
    assert!(message.contains("stale"), "{message}");
}

#[tokio::test]
async fn test_peer_disconnect_terminates_cleanly() {
    let dir = tempdir().unwrap();
    let (path, stats, handle) = start_server(dir.path(), config(), counter_catalog()).await;

    let client = AttachClient::connect_path(&path, CONNECT).await.unwrap();
    drop(client);

    let result = handle.await.unwrap();
    assert!(result.is_ok());
    assert!(!path.exists());
    assert_eq!(stats.live(), 0);
}
