//! Newline-delimited request loop.

use std::future::Future;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use warden_rpc::errors::PARSE_ERROR;
use warden_rpc::{MethodRegistry, RpcContext, RpcRequest, RpcResponse};

/// Answer one JSON request per line until EOF or `shutdown` resolves.
///
/// Requests are handled one at a time and every response is flushed as its
/// own line. Blank lines are skipped; unparseable lines get a `PARSE_ERROR`
/// response with an empty id. Returns how many responses were written.
pub(crate) async fn serve<R, W, S>(
    reader: R,
    mut writer: W,
    registry: &MethodRegistry,
    ctx: &RpcContext,
    shutdown: S,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = BufReader::new(reader).lines();
    tokio::pin!(shutdown);
    let mut served = 0;

    loop {
        let next = tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            debug!("input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => registry.dispatch(request, ctx).await,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                RpcResponse::error(String::new(), PARSE_ERROR, format!("Invalid request: {e}"))
            }
        };

        let mut out = serde_json::to_vec(&response).map_err(io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
        served += 1;
    }

    Ok(served)
}
