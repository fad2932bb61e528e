use tracing::debug;

use crate::cmd::{client, parse_args, runtime, TriggerArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};

/// Events are fire-and-forget: success means the server link accepted the
/// envelopes, not that any handler ran.
pub fn run(args: TriggerArgs) -> CliResult<i32> {
    let event_args = parse_args(args.json.as_deref())?;

    let rt = runtime()?;
    let _guard = rt.enter();
    let (rpc, connection) = client(&args.path, &args.rpc)?;

    rpc.trigger_server(&args.name, event_args)
        .map_err(|err| rpc_error(&format!("trigger {} failed", args.name), err))?;
    debug!(peer = %connection.peer_id(), event = %args.name, "event sent");

    connection.close();
    Ok(SUCCESS)
}
