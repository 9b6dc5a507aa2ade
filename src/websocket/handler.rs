use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response, ErrorResponse};
use tokio_tungstenite::tungstenite::http::StatusCode;
use log::{debug, info, warn, error};

use crate::config::SESSION_REPLY_BUFFER_SIZE;
use crate::data::hub::{SessionId, Subscription};
use crate::data::service::WatchlistService;
use crate::websocket::protocol::{sorted_stocks, ClientCommand, ServerReply};

pub const WS_PATH: &str = "/ws";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Accepts WebSocket clients until the listener fails for good.
pub async fn serve(listener: TcpListener, service: WatchlistService) {
    info!("🔗 Ready to accept WebSocket connections on {}", WS_PATH);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let session = ClientSession::new(service.clone(), addr.to_string());
                tokio::spawn(session.handle_connection(stream));
            }
            Err(e) => {
                error!("Failed to accept WebSocket connection: {:?}", e);
            }
        }
    }
}

/// One connected client: a read task turning commands into service calls and
/// a write task forwarding hub notifications plus direct replies.
pub struct ClientSession {
    service: WatchlistService,
    peer_addr: String,
}

impl ClientSession {
    pub fn new(service: WatchlistService, peer_addr: String) -> Self {
        Self { service, peer_addr }
    }

    pub async fn handle_connection(self, stream: TcpStream) {
        let ws_stream = match accept_hdr_async(stream, |req: &Request, response: Response| {
            route_request(req, response, &self.peer_addr)
        })
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                error!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
        };

        self.run(ws_stream).await;
    }

    async fn run(&self, ws_stream: WebSocketStream<TcpStream>) {
        let (mut write, read) = ws_stream.split();

        // Subscribe before taking the snapshot so nothing published in between is lost.
        let subscription = self.service.connect();
        let session_id = subscription.session_id();
        info!("WebSocket session {} established from {}", session_id, self.peer_addr);

        let initial = ServerReply::InitialData {
            session_id,
            stocks: sorted_stocks(self.service.list_stocks()),
            client_count: self.service.client_count(),
        };
        if let Err(e) = send_json(&mut write, &initial).await {
            error!("Failed to send initial data to session {}: {:?}", session_id, e);
            self.service.disconnect(subscription);
            return;
        }

        let (reply_tx, reply_rx) = mpsc::channel::<ServerReply>(SESSION_REPLY_BUFFER_SIZE);
        let (close_tx, close_rx) = mpsc::channel::<()>(1);

        let mut write_task = spawn_write_task(write, subscription, reply_rx, close_rx);
        let mut read_task =
            spawn_read_task(read, close_tx, reply_tx, self.service.clone(), session_id);

        let write_finished = tokio::select! {
            _ = &mut write_task => {
                info!("Write task completed for session {}", session_id);
                true
            }
            _ = &mut read_task => {
                info!("Read task completed for session {}", session_id);
                false
            }
        };

        // The subscription lives in the write task; once that task is gone the
        // session is off the hub and the new count can go out.
        if write_finished {
            read_task.abort();
            let _ = read_task.await;
        } else {
            write_task.abort();
            let _ = write_task.await;
        }
        self.service.publish_client_count();

        info!("WebSocket session {} closed from {}", session_id, self.peer_addr);
    }
}

fn route_request(
    req: &Request,
    response: Response,
    peer_addr: &str,
) -> Result<Response, ErrorResponse> {
    let path = req.uri().path();
    if path == WS_PATH {
        info!("WebSocket connection request for {} from {}", path, peer_addr);
        Ok(response)
    } else {
        warn!("Unknown WebSocket path '{}' from {}", path, peer_addr);
        Err(error_response(StatusCode::NOT_FOUND, "Invalid WebSocket path"))
    }
}

fn error_response(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

async fn send_json<T: Serialize>(write: &mut WsSink, payload: &T) -> Result<(), BoxError> {
    let text = serde_json::to_string(payload)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}

/// Runs one client command. Successful mutations reply through the hub
/// (the caller's own `Local` copy), so they return `None` here.
pub fn dispatch(
    service: &WatchlistService,
    session_id: SessionId,
    command: ClientCommand,
) -> Option<ServerReply> {
    let source = Some(session_id);
    let symbol = command.symbol().map(str::to_string);
    let days = command.history_days();
    let fail = |e: crate::error::WatchlistError| {
        Some(ServerReply::error(e.to_string(), symbol.as_deref()))
    };

    match command {
        ClientCommand::AddStock { symbol } => {
            service.add_stock(source, &symbol).err().and_then(fail)
        }
        ClientCommand::RemoveStock { symbol } => {
            service.remove_stock(source, &symbol).err().and_then(fail)
        }
        ClientCommand::ListStocks => Some(ServerReply::StockList {
            stocks: sorted_stocks(service.list_stocks()),
        }),
        ClientCommand::GetStock { symbol } => match service.get_stock(&symbol) {
            Ok(stock) => Some(ServerReply::Stock { stock }),
            Err(e) => fail(e),
        },
        ClientCommand::GetHistory { symbol, .. } => {
            match service.get_history(&symbol, days) {
                Ok(data) => Some(ServerReply::HistoryData {
                    symbol: symbol.trim().to_uppercase(),
                    data,
                }),
                Err(e) => fail(e),
            }
        }
    }
}

fn spawn_write_task(
    mut write: WsSink,
    mut subscription: Subscription,
    mut reply_rx: mpsc::Receiver<ServerReply>,
    mut close_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = subscription.session_id();

        loop {
            tokio::select! {
                notification = subscription.recv() => {
                    let Some(notification) = notification else {
                        info!("Hub closed, ending session {}", session_id);
                        break;
                    };
                    if let Err(e) = send_json(&mut write, &notification).await {
                        error!("Error sending notification to session {}: {:?}", session_id, e);
                        break;
                    }
                }
                Some(reply) = reply_rx.recv() => {
                    if let Err(e) = send_json(&mut write, &reply).await {
                        error!("Error sending reply to session {}: {:?}", session_id, e);
                        break;
                    }
                }
                _ = close_rx.recv() => {
                    info!("Received close signal for session {}", session_id);
                    break;
                }
            }
        }

        if subscription.dropped() > 0 {
            warn!(
                "Session {} dropped {} notifications in total",
                session_id,
                subscription.dropped()
            );
        }
        let _ = write.close().await;
    })
}

fn spawn_read_task(
    mut read: WsSource,
    close_tx: mpsc::Sender<()>,
    reply_tx: mpsc::Sender<ServerReply>,
    service: WatchlistService,
    session_id: SessionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            let reply = match msg_result {
                Ok(Message::Text(text)) => {
                    debug!("Received command from session {}: {}", session_id, text);
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(command) => dispatch(&service, session_id, command),
                        Err(e) => {
                            warn!("Unrecognized command from session {}: {}", session_id, e);
                            Some(ServerReply::error(format!("Unrecognized command: {}", e), None))
                        }
                    }
                }
                Ok(Message::Binary(data)) => {
                    warn!("Received {} binary bytes from session {}", data.len(), session_id);
                    Some(ServerReply::error("Binary messages are not supported", None))
                }
                Ok(Message::Close(close_frame)) => {
                    info!("Received close frame from session {}: {:?}", session_id, close_frame);
                    break;
                }
                Ok(_) => None,
                Err(e) => {
                    error!("Error reading message from session {}: {:?}", session_id, e);
                    break;
                }
            };

            if let Some(reply) = reply {
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }

        if close_tx.send(()).await.is_err() {
            debug!("Write task for session {} already gone", session_id);
        }
    })
}
