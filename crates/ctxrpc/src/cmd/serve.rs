use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use ctxrpc_core::{CallInfo, Env, Fault, Rpc};
use ctxrpc_peer::{ListenerConfig, PeerError, RpcListener};
use serde_json::{json, Value};
use tracing::info;

use crate::cmd::{runtime, ServeArgs};
use crate::exit::{peer_error, rpc_error, CliError, CliResult, INTERNAL, SUCCESS};

enum Stop {
    Signal,
    Failed(PeerError),
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let rt = runtime()?;
    let _guard = rt.enter();

    let rpc = Rpc::builder(Env::Server).config(args.rpc.config()).build();
    rpc.init(&args.rpc.namespace)
        .map_err(|err| rpc_error("init failed", err))?;
    register_demo(&rpc).map_err(|err| rpc_error("register failed", err))?;

    let listener = RpcListener::bind(&args.path)
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(ListenerConfig {
            require_same_uid: !args.allow_other_users,
            ..ListenerConfig::default()
        });

    let (stop_tx, stop_rx) = mpsc::channel();
    install_ctrlc_handler(stop_tx.clone())?;

    let serving = rpc.clone();
    thread::Builder::new()
        .name("ctxrpc-accept".to_string())
        .spawn(move || {
            if let Err(err) = listener.serve(&serving) {
                let _ = stop_tx.send(Stop::Failed(err));
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("accept thread failed: {err}")))?;

    match stop_rx.recv() {
        Ok(Stop::Failed(err)) => Err(peer_error("serve failed", err)),
        Ok(Stop::Signal) | Err(_) => {
            info!(clients = rpc.clients().len(), "shutting down");
            let _ = std::fs::remove_file(&args.path);
            Ok(SUCCESS)
        }
    }
}

/// `echo`, `getTime` and `procedures`, plus a `log` event.
fn register_demo(rpc: &Rpc) -> ctxrpc_core::Result<()> {
    rpc.register("echo", |args: Value, _info: CallInfo| async move { Ok(args) })?;

    rpc.register("getTime", |_args: Value, _info: CallInfo| async {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| json!(since.as_millis() as u64))
            .map_err(|err| Fault::reject(err.to_string()))
    })?;

    let weak = rpc.downgrade();
    rpc.register("procedures", move |_args: Value, _info: CallInfo| {
        let names = weak.upgrade().map(|rpc| rpc.procedures()).unwrap_or_default();
        async move { Ok(json!(names)) }
    })?;

    rpc.on("log", |args: &Value, info: &CallInfo| {
        let from = info
            .peer
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "local".to_string());
        info!(from = %from, origin = %info.origin, message = %args, "log event");
    });
    Ok(())
}

fn install_ctrlc_handler(stop: mpsc::Sender<Stop>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = stop.send(Stop::Signal);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
