use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::caller::CallerContext;
use crate::realtime::hub::Envelope;
use crate::realtime::session::Session;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Result<impl IntoResponse, AppError> {
    let (sink, outbound) = mpsc::channel(state.config.connection_buffer);
    let session = Session::open(state, caller, sink)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, outbound)))
}

async fn handle_socket(socket: WebSocket, mut session: Session, outbound: mpsc::Receiver<Envelope>) {
    let (mut sender, mut receiver) = socket.split();
    let caller = session.caller();

    info!(caller_id = %caller.id, role = %caller.role, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        let mut events = ReceiverStream::new(outbound);
        while let Some(envelope) = events.next().await {
            let json = match serde_json::to_string(&envelope.event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize realtime event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    session.close();
    send_task.abort();

    info!(caller_id = %caller.id, "websocket client disconnected");
}
