//! Live connection loop: one writer task draining the connection's queue, and
//! inbound frames dispatched to the services in arrival order.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::{
    constants::is_valid_user_id,
    error::{CoreError, Result},
    models::{ClientEvent, ServerEvent, UserId},
    services::{CallSignal, ConnectionHandle, RelayTarget},
    state::AppState,
};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (handle, mut rx) = ConnectionHandle::channel();
    info!("WebSocket connection {} established", handle.id());

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {} event: {}", event.name(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(state, handle);
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
                    Some(Ok(Message::Close(_))) => {
                        debug!("Connection {} closed by client", connection.id());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", connection.id(), e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => break,
        }
    }

    connection.close();
    send_task.abort();
}

fn report(handle: &ConnectionHandle, e: CoreError) {
    handle.send(ServerEvent::Error {
        code: e.code().to_string(),
        message: e.to_string(),
    });
}

/// Per-connection state: who registered on it, and where its events go.
pub struct Connection {
    state: AppState,
    handle: ConnectionHandle,
    user_id: Option<UserId>,
}

impl Connection {
    pub fn new(state: AppState, handle: ConnectionHandle) -> Self {
        Self {
            state,
            handle,
            user_id: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.handle.id()
    }

    /// Parses and dispatches one frame. Failures go back to this connection as an `error` event.
    pub async fn handle_text(&mut self, text: &str) {
        let result = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => Err(CoreError::validation(format!("Invalid message format: {}", e))),
        };

        if let Err(e) = result {
            debug!("Rejected frame on {}: {}", self.id(), e);
            report(&self.handle, e);
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> Result<()> {
        if let ClientEvent::Register { user_id } = event {
            return self.register(user_id);
        }

        let user = self
            .user_id
            .clone()
            .ok_or_else(|| CoreError::validation("register before sending events"))?;
        let state = &self.state;

        match event {
            ClientEvent::Register { .. } => Ok(()),

            ClientEvent::JoinRoom { room_id } => state.router.join_room(&user, &room_id).map(|_| ()),
            ClientEvent::LeaveRoom { room_id } => {
                state.router.leave_room(&user, &room_id);
                Ok(())
            }

            ClientEvent::Typing { room_id, to, is_typing } => {
                let target = RelayTarget::from_parts(room_id, to)?;
                state.router.typing(&user, &target, is_typing).map(|_| ())
            }
            ClientEvent::MessageSeen { room_id, to, message_ids } => {
                let target = RelayTarget::from_parts(room_id, to)?;
                state.router.message_seen(&user, &target, message_ids).map(|_| ())
            }
            ClientEvent::SendMessage { room_id, to, message_id, payload } => {
                let target = RelayTarget::from_parts(room_id, to)?;
                state.router.send_message(&user, &target, &message_id, payload).map(|_| ())
            }

            ClientEvent::MeetRequest { to, coords } => state.meet.request(&user, &to, coords).await.map(|_| ()),
            // These wait on a venue search, so they run beside the read loop
            ClientEvent::MeetAccept { with, coords } => {
                let state = state.clone();
                self.detach(async move { state.meet.accept(&user, &with, coords).await });
                Ok(())
            }
            ClientEvent::MeetLocation { with, coords } => {
                let state = state.clone();
                self.detach(async move { state.meet.share_location(&user, &with, coords).await });
                Ok(())
            }
            ClientEvent::MeetExpand { with } => {
                let state = state.clone();
                self.detach(async move { state.meet.expand(&user, &with).await });
                Ok(())
            }
            ClientEvent::MeetPlaceSelected { with, venue } => state.meet.propose_place(&user, &with, venue).await,
            ClientEvent::MeetPlaceAccepted { with } => state.meet.accept_place(&user, &with).await.map(|_| ()),
            ClientEvent::MeetPlaceRejected { with } => state.meet.reject_place(&user, &with).await,
            ClientEvent::MeetDecline { with } => state.meet.decline(&user, &with).await,

            ClientEvent::CallOffer { room_id, to, payload } => self.call(&user, room_id, to, CallSignal::Offer, payload),
            ClientEvent::CallAnswer { room_id, to, payload } => self.call(&user, room_id, to, CallSignal::Answer, payload),
            ClientEvent::CallSignal { room_id, to, payload } => self.call(&user, room_id, to, CallSignal::Signal, payload),
            ClientEvent::CallEnd { room_id, to, payload } => self.call(&user, room_id, to, CallSignal::End, payload),
        }
    }

    fn detach(&self, task: impl Future<Output = Result<()>> + Send + 'static) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                report(&handle, e);
            }
        });
    }

    fn call(
        &self,
        user: &str,
        room_id: Option<String>,
        to: Option<UserId>,
        signal: CallSignal,
        payload: serde_json::Value,
    ) -> Result<()> {
        let target = RelayTarget::from_parts(room_id, to)?;
        self.state.calls.forward(user, &target, signal, payload).map(|_| ())
    }

    fn register(&mut self, user_id: UserId) -> Result<()> {
        if !is_valid_user_id(&user_id) {
            return Err(CoreError::validation(format!("invalid user id '{}'", user_id)));
        }
        if let Some(previous) = self.user_id.as_deref() {
            if previous != user_id {
                // Switching identity on the same socket
                self.state.router.leave_all(previous);
                self.state.presence.unregister(self.handle.id());
            }
        }

        self.state.presence.register(&user_id, self.handle.clone());
        self.handle.send(ServerEvent::Registered { user_id: user_id.clone() });
        self.user_id = Some(user_id);
        Ok(())
    }

    /// Offline broadcast and room cleanup, unless a newer connection already took over
    pub fn close(self) {
        if let Some(user) = self.state.presence.unregister(self.handle.id()) {
            self.state.router.leave_all(&user);
        }
        info!("WebSocket connection {} closed", self.handle.id());
    }
}
