use super::gateway::RealtimeGateway;
use super::registry::ConnectionId;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use event_schema::ClientEvent;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One WebSocket connection bridged onto the gateway.
///
/// Inbound frames are queued and handled one at a time so a client's
/// events are processed in the order it sent them. Outbound frames come
/// from the registry channel created at connect time.
pub struct WsSession {
    conn: ConnectionId,
    gateway: RealtimeGateway,
    hb: Instant,
    outbound: Option<UnboundedReceiver<String>>,
    inbound: Option<UnboundedSender<String>>,
    token: Option<String>,
}

impl WsSession {
    pub fn new(
        conn: ConnectionId,
        outbound: UnboundedReceiver<String>,
        gateway: RealtimeGateway,
        token: Option<String>,
    ) -> Self {
        Self {
            conn,
            gateway,
            hb: Instant::now(),
            outbound: Some(outbound),
            inbound: None,
            token,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(connection_id = %act.conn, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_inbound_worker(&mut self) {
        let (tx, mut rx) = unbounded_channel::<String>();
        self.inbound = Some(tx);

        let gateway = self.gateway.clone();
        let conn = self.conn;
        let token = self.token.take();
        actix::spawn(async move {
            if let Some(token) = token {
                gateway
                    .handle_event(conn, ClientEvent::Authenticate { token })
                    .await;
            }
            while let Some(text) = rx.recv().await {
                gateway.handle_text(conn, &text).await;
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.conn, "websocket session started");
        self.hb(ctx);
        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }
        self.start_inbound_worker();
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.conn, "websocket session stopped");
        // closing the queue ends the worker once queued frames drain
        self.inbound.take();

        let gateway = self.gateway.clone();
        let conn = self.conn;
        actix::spawn(async move {
            gateway.disconnect(conn).await;
        });
    }
}

// Frames fanned out by the registry
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let queued = self
                    .inbound
                    .as_ref()
                    .map(|tx| tx.send(text.to_string()).is_ok())
                    .unwrap_or(false);
                if !queued {
                    tracing::warn!(connection_id = %self.conn, "inbound worker gone, closing");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.conn, "binary websocket frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.conn, ?reason, "websocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.conn, error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
