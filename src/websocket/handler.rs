use actix::{Actor, ActorContext, AsyncContext, Handler, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Action, ActionEnvelope, Delivery, Event, OutboundText, Recipient};
use crate::state::AppState;

/// WebSocket actor carrying one player's connection. The actor is a thin
/// transport shim: it parses inbound actions, hands them to the dispatcher
/// and delivers the resulting events.
pub struct ChessWebSocket {
    pub conn_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub app_state: web::Data<AppState>,
}

impl ChessWebSocket {
    fn envelope(&self, action: Action) -> ActionEnvelope {
        ActionEnvelope {
            user_id: self.user_id,
            username: self.username.clone(),
            conn: self.conn_id.clone(),
            action,
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery>, ctx: &mut ws::WebsocketContext<Self>) {
        // snapshot the registry so delivery never holds the lock
        let registry = self.app_state.connections.lock().unwrap().clone();
        for delivery in deliveries {
            let text = match serde_json::to_string(&delivery.event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize event: {}", e);
                    continue;
                }
            };
            match delivery.to {
                Recipient::Caller => ctx.text(text),
                Recipient::Connection(id) if id == self.conn_id => ctx.text(text),
                Recipient::Connection(id) => match registry.get(&id) {
                    Some(addr) => addr.do_send(OutboundText(text)),
                    None => info!("connection {} is gone, dropping event", id),
                },
                Recipient::Everyone => {
                    for (id, addr) in &registry {
                        if *id == self.conn_id {
                            ctx.text(text.clone());
                        } else {
                            addr.do_send(OutboundText(text.clone()));
                        }
                    }
                }
            }
        }
    }
}

impl Actor for ChessWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let mut connections = self.app_state.connections.lock().unwrap();
        connections.insert(self.conn_id.clone(), ctx.address());
        info!(
            "WebSocket connection started: {} ({} active)",
            self.conn_id,
            connections.len()
        );
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        self.app_state
            .connections
            .lock()
            .unwrap()
            .remove(&self.conn_id);
        // a vanished socket is an implicit disconnect action
        let deliveries = self
            .app_state
            .dispatcher
            .dispatch(self.envelope(Action::Disconnect));
        self.deliver(deliveries, ctx);
        info!("WebSocket connection closed: {}", self.conn_id);
        Running::Stop
    }
}

impl Handler<OutboundText> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChessWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                match serde_json::from_str::<Action>(text.as_ref()) {
                    Ok(Action::Disconnect) => {
                        // disconnects belong to the transport, not the client
                        warn!("client {} sent an explicit disconnect", self.conn_id);
                        ctx.stop();
                    }
                    Ok(action) => {
                        info!("{} -> {:?}", self.conn_id, action);
                        let deliveries =
                            self.app_state.dispatcher.dispatch(self.envelope(action));
                        self.deliver(deliveries, ctx);
                    }
                    Err(e) => {
                        warn!("error parsing client action: {}", e);
                        let event = Event::Error {
                            kind: "validation".to_string(),
                            message: format!("invalid message format: {}", e),
                        };
                        if let Ok(text) = serde_json::to_string(&event) {
                            ctx.text(text);
                        }
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("binary messages are not supported");
                let event = Event::Error {
                    kind: "validation".to_string(),
                    message: "binary messages are not supported".to_string(),
                };
                if let Ok(text) = serde_json::to_string(&event) {
                    ctx.text(text);
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!("connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            _ => {
                ctx.stop();
            }
        }
    }
}

/// Verified identity handed over by the authentication collaborator; the
/// handshake query string stands in for it here.
#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub user: Option<Uuid>,
    pub name: Option<String>,
}

/// WebSocket connection handler
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<IdentityQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let conn_id = Uuid::new_v4().to_string();
    let user_id = query.user.unwrap_or_else(Uuid::new_v4);
    let username = query
        .name
        .clone()
        .unwrap_or_else(|| format!("guest-{}", &conn_id[..8]));
    info!("New WebSocket connection {} for {}", conn_id, username);

    let socket = ChessWebSocket {
        conn_id,
        user_id,
        username,
        app_state: app_state.clone(),
    };
    ws::start(socket, &req, stream)
}
