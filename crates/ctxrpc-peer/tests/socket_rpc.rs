#![cfg(unix)]

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use ctxrpc_core::{CallInfo, CallOptions, Env, NamespaceSet, Rpc, RpcConfig, RpcError};
use ctxrpc_peer::{connect, Connection, RpcListener};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

fn sock_path(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ctxrpc-socket-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("rpc.sock")
}

fn rpc(env: Env, config: RpcConfig) -> Rpc {
    let rpc = Rpc::builder(env)
        .namespaces(NamespaceSet::new())
        .config(config)
        .build();
    rpc.init("game").expect("init inside a runtime");
    rpc
}

/// A server and one client process talking over a real socket.
struct Pair {
    server: Rpc,
    client: Rpc,
    connection: Connection,
    path: PathBuf,
}

fn pair(rt: &Runtime, tag: &str, config: RpcConfig) -> Pair {
    let _guard = rt.enter();
    let path = sock_path(tag);
    let server = rpc(Env::Server, config.clone());
    let client = rpc(Env::Client, config);

    let listener = RpcListener::bind(&path).expect("listener should bind");
    let attach_to = server.clone();
    let accept = thread::spawn(move || {
        listener
            .accept()
            .expect("accept")
            .attach(&attach_to)
            .expect("attach")
    });

    let connection = connect(&path).expect("client should connect");
    connection.attach(&client).expect("client attach");
    let peer = accept.join().expect("accept thread");
    assert_eq!(&peer, connection.peer_id());

    Pair {
        server,
        client,
        connection,
        path,
    }
}

fn cleanup(path: &PathBuf) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn calls_cross_the_socket_both_ways() {
    let rt = Runtime::new().unwrap();
    let p = pair(&rt, "both", RpcConfig::default());

    p.server
        .register("getTime", |_args: Value, _info: CallInfo| async { Ok(json!(42)) })
        .unwrap();
    p.client
        .register("whoami", |_args: Value, info: CallInfo| async move {
            Ok(json!(info.origin))
        })
        .unwrap();

    let time = rt
        .block_on(p.client.call_server("getTime", None, CallOptions::default()))
        .unwrap();
    assert_eq!(time, json!(42));

    let peer = p.connection.peer_id().clone();
    let origin = rt
        .block_on(
            p.server
                .call_client(Some(&peer), "whoami", None, CallOptions::default()),
        )
        .unwrap();
    assert_eq!(origin, json!("server"));
    assert_eq!(p.server.clients(), vec![peer]);

    cleanup(&p.path);
}

#[test]
fn chunked_arguments_survive_the_stream() {
    let rt = Runtime::new().unwrap();
    let config = RpcConfig {
        chunk_size: 256,
        ..RpcConfig::default()
    };
    let p = pair(&rt, "chunks", config);

    p.server
        .register("echo", |args: Value, _info: CallInfo| async move { Ok(args) })
        .unwrap();

    let blob = "ü".repeat(5_000);
    let echoed = rt
        .block_on(p.client.call_server(
            "echo",
            Some(json!({ "blob": blob.clone() })),
            CallOptions::default(),
        ))
        .unwrap();
    assert_eq!(echoed, json!({ "blob": blob }));
    assert_eq!(p.server.partial_messages(), 0);

    cleanup(&p.path);
}

#[test]
fn closing_the_client_detaches_it() {
    let rt = Runtime::new().unwrap();
    let p = pair(&rt, "close", RpcConfig::default());
    assert_eq!(p.server.clients().len(), 1);

    p.connection.close();
    wait_until("server to detach the client", || p.server.clients().is_empty());

    cleanup(&p.path);
}

#[test]
fn server_dropping_the_client_fails_its_pending_call() {
    let rt = Runtime::new().unwrap();
    let p = pair(&rt, "drop", RpcConfig::default());

    p.server
        .register("slow", |_args: Value, _info: CallInfo| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        })
        .unwrap();

    let client = p.client.clone();
    let call = rt.spawn(async move {
        client
            .call_server("slow", None, CallOptions::default())
            .await
    });
    wait_until("request to be in flight", || p.client.pending_calls() == 1);

    assert!(p.server.detach_client(p.connection.peer_id()));
    let outcome = rt.block_on(call).expect("call task");
    assert!(matches!(outcome, Err(RpcError::Disconnected(_))));
    assert_eq!(p.client.pending_calls(), 0);

    cleanup(&p.path);
}
