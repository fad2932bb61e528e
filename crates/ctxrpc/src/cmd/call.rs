use std::time::Instant;

use ctxrpc_core::CallOptions;
use tracing::debug;

use crate::cmd::{client, parse_args, parse_duration, runtime, CallArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_result, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = parse_args(args.json.as_deref())?;

    let rt = runtime()?;
    let _guard = rt.enter();
    let (rpc, connection) = client(&args.path, &args.rpc)?;
    debug!(peer = %connection.peer_id(), procedure = %args.name, "calling server");

    let started = Instant::now();
    let result = rt
        .block_on(rpc.call_server(&args.name, call_args, CallOptions::timeout(timeout)))
        .map_err(|err| rpc_error(&format!("call {} failed", args.name), err))?;

    print_result(
        &args.name,
        connection.peer_id().as_str(),
        started.elapsed(),
        &result,
        format,
    );
    connection.close();
    Ok(SUCCESS)
}
