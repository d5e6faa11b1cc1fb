//! Newline-delimited JSON-RPC over stdin/stdout.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::handler::ProtocolHandler;
use super::message::{JsonRpcMessage, McpError, McpResult, RequestId};

pub fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    serde_json::from_str(line.trim()).map_err(|e| McpError::ParseError(e.to_string()))
}

/// Serve requests from stdin until EOF.
pub async fn run(handler: &ProtocolHandler) -> McpResult<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tracing::info!("MCP stdio transport started");
    serve_lines(handler, stdin, tokio::io::stdout()).await
}

/// One reply line per request line; notifications get none. Unparseable
/// lines are answered with a parse error carrying a null id.
pub async fn serve_lines<R, W>(handler: &ProtocolHandler, reader: R, mut writer: W) -> McpResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_message(&line) {
            Ok(msg) => handler.handle_message(msg).await,
            Err(e) => {
                tracing::warn!("{e}");
                Some(serde_json::to_value(e.to_json_rpc_error(RequestId::Null))?)
            }
        };

        if let Some(reply) = reply {
            let mut framed = serde_json::to_string(&reply)?;
            framed.push('\n');
            writer.write_all(framed.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    tracing::info!("EOF on stdin, shutting down");
    Ok(())
}
