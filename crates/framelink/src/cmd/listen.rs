use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use framelink::frame::Frame;

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(args, format))
}

/// Serve one peer at a time until `--count` frames were printed or ctrl-c.
async fn serve(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = TcpListener::bind(&args.addr)
        .await
        .map_err(|err| io_error(&format!("bind {} failed", args.addr), err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("local address unavailable", err))?;
    info!(addr = %local, "listening");

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut printed = 0usize;

    loop {
        let (tcp, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted.map_err(|err| io_error("accept failed", err))?,
            _ = &mut interrupted => return Ok(SUCCESS),
        };
        let peer = peer_addr.to_string();

        let mut ws = match tokio_tungstenite::accept_async(tcp).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!(peer, error = %err, "websocket handshake failed");
                continue;
            }
        };
        info!(peer, "peer connected");

        while let Some(incoming) = ws.next().await {
            let bytes = match incoming {
                Ok(WsMessage::Binary(bytes)) => bytes,
                Ok(WsMessage::Close(_)) => break,
                Ok(other) => {
                    debug!(peer, kind = ?other, "ignoring non-binary message");
                    continue;
                }
                Err(err) => {
                    warn!(peer, error = %err, "receive failed");
                    break;
                }
            };

            let frame = match Frame::parse(&bytes) {
                Ok(frame) => frame,
                Err(err) if args.strict => return Err(frame_error(&peer, err)),
                Err(err) => {
                    warn!(peer, error = %err, "skipping malformed frame");
                    continue;
                }
            };

            printed = printed.saturating_add(1);
            print_frame(&frame, &peer, format);

            let ack = json!({
                "type": "ack",
                "sequence": printed,
                "confidence": frame.confidence_ratio(),
                "payload_size": frame.payload.len(),
            });
            if let Err(err) = ws.send(WsMessage::Text(ack.to_string().into())).await {
                warn!(peer, error = %err, "ack failed");
                break;
            }

            if args.count.is_some_and(|count| printed >= count) {
                let _ = ws.close(None).await;
                return Ok(SUCCESS);
            }
        }

        info!(peer, "peer disconnected");
    }
}
