//! Reading and checking the plugin's first line.

use std::time::Duration;

use tokio::io::AsyncBufRead;
use tracing::debug;

use drover_core::{HandshakeConfig, Hello};

use crate::error::{PluginError, PluginResult};
use crate::rpc::{LineRead, read_line_capped};

/// Longest handshake line echoed back in an error message.
const ECHO_LIMIT: usize = 120;

/// Longest handshake line accepted.
pub const MAX_HELLO_BYTES: usize = 64 * 1024;

/// Read the `Hello` line from `reader` and check it against `config`.
///
/// # Errors
///
/// [`PluginError::Launch`] if nothing arrives within `timeout` or the
/// plugin closes stdout first. [`PluginError::Handshake`] if the line is
/// longer than [`MAX_HELLO_BYTES`], is not a hello, or disagrees with
/// `config`.
pub async fn read_hello<R>(
    reader: &mut R,
    config: &HandshakeConfig,
    timeout: Duration,
    plugin: &str,
) -> PluginResult<Hello>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = tokio::time::timeout(timeout, read_line_capped(reader, &mut buf, MAX_HELLO_BYTES))
        .await
        .map_err(|_| PluginError::Launch {
            plugin: plugin.to_string(),
            message: format!("no handshake within {}s", timeout.as_secs_f64()),
        })?;

    match read {
        Ok(LineRead::Eof) => {
            return Err(PluginError::Launch {
                plugin: plugin.to_string(),
                message: "process exited before completing the handshake".into(),
            });
        },
        Ok(LineRead::Line) => {},
        Ok(LineRead::TooLong) => {
            return Err(PluginError::Handshake {
                plugin: plugin.to_string(),
                message: format!(
                    "handshake line exceeds {MAX_HELLO_BYTES} bytes, starting {:?}",
                    echo(&String::from_utf8_lossy(&buf))
                ),
            });
        },
        Err(e) => {
            return Err(PluginError::Launch {
                plugin: plugin.to_string(),
                message: format!("failed to read handshake: {e}"),
            });
        },
    }
    let line = String::from_utf8_lossy(&buf);

    let hello: Hello = serde_json::from_str(line.trim()).map_err(|e| PluginError::Handshake {
        plugin: plugin.to_string(),
        message: format!("malformed handshake line {:?}: {e}", echo(&line)),
    })?;

    config.verify(&hello).map_err(|e| PluginError::Handshake {
        plugin: plugin.to_string(),
        message: e.to_string(),
    })?;

    debug!(
        plugin,
        protocol_version = hello.protocol_version,
        sdk_version = %hello.sdk_version,
        "handshake accepted"
    );
    Ok(hello)
}

fn echo(line: &str) -> &str {
    let line = line.trim();
    match line.char_indices().nth(ECHO_LIMIT) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
