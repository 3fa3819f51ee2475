use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionView,
        sse::{ErrorEvent, NotFoundEvent, RemovedEvent, ServerEvent, WizzEvent},
    },
    services::{
        client::{ClientEvent, SessionClient},
        session_service,
    },
};

/// Translate one client event into its SSE payload.
async fn to_server_event(
    client: &SessionClient,
    event: ClientEvent,
) -> serde_json::Result<ServerEvent> {
    let session_id = client.session_id();
    let participant_id = client.participant_id();

    match event {
        ClientEvent::Snapshot(session) => {
            let controls = session_service::viewer_controls(client.controls()).await;
            let view = SessionView::for_viewer(&session, participant_id, &controls);
            ServerEvent::json(Some("snapshot".to_string()), &view)
        }
        ClientEvent::Notified => ServerEvent::json(
            Some("wizz".to_string()),
            &WizzEvent {
                session_id,
                participant_id,
            },
        ),
        ClientEvent::Removed => ServerEvent::json(
            Some("removed".to_string()),
            &RemovedEvent {
                session_id,
                participant_id,
            },
        ),
        ClientEvent::NotFound => {
            ServerEvent::json(Some("not_found".to_string()), &NotFoundEvent { session_id })
        }
        ClientEvent::Failed(message) => {
            ServerEvent::json(Some("error".to_string()), &ErrorEvent { message })
        }
    }
}

fn to_sse_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Bridge a [`SessionClient`] to an SSE response.
///
/// The forwarder task holds the only strong handle on the client, so its
/// subscription is torn down as soon as the HTTP client disconnects.
pub fn to_sse_stream(
    client: Arc<SessionClient>,
    mut events: mpsc::Receiver<ClientEvent>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let session_id: Uuid = client.session_id();
    let participant_id: Uuid = client.participant_id();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.recv() => {
                    let Some(event) = next else { break };
                    match to_server_event(&client, event).await {
                        Ok(payload) => {
                            if tx.send(Ok(to_sse_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to serialise session event"),
                    }
                }
            }
        }

        drop(client);
        info!(
            session_id = %session_id,
            participant_id = %participant_id,
            "session SSE stream disconnected"
        );
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}
