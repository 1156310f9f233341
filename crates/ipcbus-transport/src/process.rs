//! Parent side of a worker process connected over its stdin/stdout.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use ipcbus_core::{TransportError, TransportResult};

use crate::stream::StreamTransport;

/// Spawns `command` and connects a [`StreamTransport`] to its pipes.
///
/// The child's stdin and stdout carry the protocol; its stderr is inherited
/// so the worker can log. The child is killed when the returned [`Child`] is
/// dropped.
///
/// The worker side uses [`StreamTransport::stdio`].
pub fn spawn(mut command: Command) -> TransportResult<(StreamTransport, Child)> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| TransportError::Spawn(e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::Spawn("child stdin was not captured".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Spawn("child stdout was not captured".into()))?;

    info!(pid = ?child.id(), "Worker process spawned");

    Ok((StreamTransport::new(stdout, stdin), child))
}
