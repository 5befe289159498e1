// WebSocket server: one task and one session per connected client.

use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use snakebid_app::EngineNotice;
use snakebid_core::store::{EventMask, Subscription, SubscriptionError};

use crate::protocol::{self, ServerMessage};
use crate::session::{ServerContext, Session};

/// Run the WebSocket server on the given port.
///
/// Binds a TCP listener on `127.0.0.1:{port}` and spawns a task per accepted
/// connection. The server runs until the task is cancelled or the process
/// exits.
pub async fn run(port: u16, ctx: ServerContext) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr.to_string(), ctx).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, addr: String, ctx: ServerContext) {
    info!("Accepted TCP connection from {addr}");

    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    // Subscribe before the session loads any snapshot so no change can fall
    // between the two.
    let changes = ctx.store.subscribe(None, EventMask::ALL);
    let notices = ctx.engine.subscribe_notices();
    let (write, read) = ws_stream.split();
    serve(read, write, Session::new(ctx), changes, notices, &addr).await;

    info!("Client {addr} disconnected");
}

/// Drive one session: answer client frames, and once logged in stream store
/// changes and engine notices to it.
///
/// Generic over the stream and sink so it can be tested with in-memory
/// messages without opening TCP ports.
pub async fn serve<St, Si>(
    mut read: St,
    mut write: Si,
    mut session: Session,
    mut changes: Subscription,
    mut notices: broadcast::Receiver<EngineNotice>,
    addr: &str,
) where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: std::fmt::Display,
{
    let mut changes_open = true;
    let mut notices_open = true;

    loop {
        let outgoing: Vec<ServerMessage> = tokio::select! {
            // --- Client frames ---
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {addr} sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {
                        // Ignore Binary, Ping, Pong, Frame variants.
                        continue;
                    }
                }
            }

            // --- Store changes ---
            event = changes.recv(), if changes_open => {
                match event {
                    Ok(event) => session.apply_change(event).into_iter().collect(),
                    Err(SubscriptionError::Lagged(n)) => session.resync_after_lag(n).await,
                    Err(SubscriptionError::Closed) => {
                        info!("Change feed closed for {addr}");
                        changes_open = false;
                        Vec::new()
                    }
                }
            }

            // --- Engine notices ---
            notice = notices.recv(), if notices_open => {
                match notice {
                    Ok(notice) => session.forward_notice(notice).into_iter().collect(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Client {addr} missed {n} engine notices");
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Engine notices closed for {addr}");
                        notices_open = false;
                        Vec::new()
                    }
                }
            }
        };

        for message in outgoing {
            let text = match protocol::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode message for {addr}: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("Failed to send to {addr}: {e}");
                return;
            }
        }
    }

    let _ = write.close().await;
}
