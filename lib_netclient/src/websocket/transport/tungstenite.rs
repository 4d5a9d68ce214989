//! # Tungstenite Transport Adapter
//!
//! Concrete [`WebSocketTransport`](super::WebSocketTransport) backed by
//! `tokio-tungstenite`. `init` validates the configuration and spawns one
//! connection task onto the worker runtime; that task performs the
//! (optionally proxied) TLS handshake and then services the socket with a
//! single select loop over three sources:
//!
//! 1. the command channel carrying queued sends and closes,
//! 2. the inbound message stream,
//! 3. a once-per-second watchdog tick enforcing the idle timeout.
//!
//! Teardown is a cancellation token: `deinit` cancels it and the task
//! drops the connection on its way out.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::time::{Duration, Instant};

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, connect_async_tls_with_config, Connector};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ErrorCode, TransportError, WebSocketError};
use crate::websocket::config::WebSocketConfig;
use crate::websocket::send_info::WebSocketSendInfo;

use super::{TransportEvent, TransportLink, WebSocketTransport};

enum Command {
    Send(WebSocketSendInfo),
    Close(WebSocketSendInfo),
}

/// WebSocket transport running on the worker runtime.
pub struct TungsteniteTransport {
    handle: tokio::runtime::Handle,
    cancel: Option<CancellationToken>,
    commands: Option<UnboundedSender<Command>>,
    link: Option<TransportLink>,
}

impl TungsteniteTransport {
    /// Creates a transport spawning its connection task onto `handle`.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            cancel: None,
            commands: None,
            link: None,
        }
    }

    fn dispatch(&mut self, command: Command) {
        let refused = match &self.commands {
            Some(commands) => commands.send(command).err().map(|e| match e.0 {
                Command::Send(info) | Command::Close(info) => info,
            }),
            None => Some(match command {
                Command::Send(info) | Command::Close(info) => info,
            }),
        };
        // The connection task is gone; fail the callback instead of
        // dropping it silently.
        if let Some(info) = refused {
            if let Some(link) = &self.link {
                link.push_send_callback(
                    ErrorCode::Client(ClientError::NotConnected),
                    info.callback,
                );
            }
        }
    }
}

impl WebSocketTransport for TungsteniteTransport {
    fn init(&mut self, config: &WebSocketConfig, link: TransportLink) -> Result<(), ErrorCode> {
        let url = url::Url::parse(&config.url)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ErrorCode::Client(ClientError::InvalidConfiguration));
        }

        self.deinit();

        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task_config = config.clone();
        let task_link = link.clone();
        let task_cancel = cancel.clone();
        self.handle.spawn(async move {
            run_connection(task_config, task_link, task_cancel, command_rx).await;
        });

        self.cancel = Some(cancel);
        self.commands = Some(command_tx);
        self.link = Some(link);
        Ok(())
    }

    fn deinit(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.commands = None;
    }

    fn send_message(&mut self, info: WebSocketSendInfo) {
        self.dispatch(Command::Send(info));
    }

    fn send_close(&mut self, info: WebSocketSendInfo) {
        self.dispatch(Command::Close(info));
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        self.deinit();
    }
}

async fn run_connection(
    config: WebSocketConfig,
    link: TransportLink,
    cancel: CancellationToken,
    mut commands: UnboundedReceiver<Command>,
) {
    // --- Phase 1: Handshake, bounded by the request timeout ---
    // A teardown during the handshake ends the task before it can report
    // anything for a connection nobody wants anymore.
    let handshake = async {
        if config.request_timeout > 0 {
            let deadline = Duration::from_secs(config.request_timeout);
            match tokio::time::timeout(deadline, establish(&config)).await {
                Ok(result) => result,
                Err(_) => Err(ErrorCode::Transport(TransportError::Timeout)),
            }
        } else {
            establish(&config).await
        }
    };
    let established = tokio::select! {
        _ = cancel.cancelled() => return,
        result = handshake => result,
    };

    let (stream, status) = match established {
        Ok(ok) => ok,
        Err(error) => {
            log::warn!("WebSocket connect to {} failed: {error}", config.url);
            link.send_event(TransportEvent::Error(error));
            return;
        }
    };
    log::info!("WebSocket connected to {} (status {status})", config.url);
    link.send_event(TransportEvent::Opened { status });

    let (mut sink, mut reader) = stream.split();
    let mut last_activity = Instant::now();

    // --- Phase 2: Session select loop ---
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Send(info)) => {
                        let result = sink.send(Message::Text(info.message.into())).await;
                        let code = match &result {
                            Ok(()) => ErrorCode::Ok,
                            Err(e) => map_ws_error(e),
                        };
                        link.push_send_callback(code.clone(), info.callback);
                        if let Err(e) = result {
                            log::warn!("WebSocket send failed: {e}");
                            link.send_event(TransportEvent::Error(code));
                            return;
                        }
                    }
                    Some(Command::Close(info)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(info.status),
                            reason: info.message.into(),
                        };
                        let result = sink.send(Message::Close(Some(frame))).await;
                        let code = match &result {
                            Ok(()) => ErrorCode::Ok,
                            Err(e) => map_ws_error(e),
                        };
                        link.push_send_callback(code, info.callback);
                        // Keep reading: the session ends when the peer
                        // echoes the close frame.
                    }
                    None => return,
                }
            }
            message = reader.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        link.send_event(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        last_activity = Instant::now();
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        link.send_event(TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // The peer is alive; tungstenite answers pings on
                        // the next write.
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (status, reason) = match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                            None => (1005, String::new()),
                        };
                        link.send_event(TransportEvent::Closed { status, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket read failed: {e}");
                        link.send_event(TransportEvent::Error(map_ws_error(&e)));
                        return;
                    }
                    None => {
                        log::warn!("WebSocket stream ended without a close frame");
                        link.send_event(TransportEvent::Error(
                            ErrorCode::WebSocket(WebSocketError::UnexpectedClose),
                        ));
                        return;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(1)), if config.idle_timeout > 0 => {
                if last_activity.elapsed() >= Duration::from_secs(config.idle_timeout) {
                    log::warn!(
                        "WebSocket idle for {}s; tearing the connection down",
                        config.idle_timeout
                    );
                    let _ = sink.close().await;
                    link.send_event(TransportEvent::Error(
                        ErrorCode::Transport(TransportError::Timeout),
                    ));
                    return;
                }
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn establish(config: &WebSocketConfig) -> Result<(WsStream, u16), ErrorCode> {
    let request = build_request(config)?;
    let connector = build_connector(config)?;

    let (stream, response) = if config.proxy_server.is_empty() {
        connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| map_ws_error(&e))?
    } else {
        let tunneled = connect_via_proxy(config).await?;
        client_async_tls_with_config(request, tunneled, None, connector)
            .await
            .map_err(|e| map_ws_error(&e))?
    };
    Ok((stream, response.status().as_u16()))
}

fn build_request(
    config: &WebSocketConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ErrorCode> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;

    let headers = request.headers_mut();
    for (name, value) in config.headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        headers.append(name, value);
    }
    if !config.user_agent.is_empty() && !config.headers.contains_key("User-Agent") {
        let value = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        headers.insert("User-Agent", value);
    }
    if !config.cookie.is_empty() && !config.headers.contains_key("Cookie") {
        let value = HeaderValue::from_str(&config.cookie)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        headers.insert("Cookie", value);
    }
    if !config.protocols.is_empty() {
        let value = HeaderValue::from_str(&config.protocols.join(", "))
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        headers.insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

fn build_connector(config: &WebSocketConfig) -> Result<Option<Connector>, ErrorCode> {
    let is_tls = config.url.starts_with("wss://");
    if !is_tls {
        return Ok(None);
    }

    let mut builder = native_tls::TlsConnector::builder();
    if !config.verify_cert {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    if !config.ca_file.is_empty() {
        let pem = std::fs::read(&config.ca_file)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        let certificate = native_tls::Certificate::from_pem(&pem)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        builder.add_root_certificate(certificate);
    }
    if !config.cert_file.is_empty() && !config.key_file.is_empty() {
        let cert = std::fs::read(&config.cert_file)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        let key = std::fs::read(&config.key_file)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        let identity = native_tls::Identity::from_pkcs8(&cert, &key)
            .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
        builder.identity(identity);
    }
    let connector = builder
        .build()
        .map_err(|_| ErrorCode::Transport(TransportError::Tls))?;
    Ok(Some(Connector::NativeTls(connector)))
}

/// Opens a TCP connection through an HTTP CONNECT proxy and returns the
/// tunneled stream, ready for the TLS/WebSocket handshake.
async fn connect_via_proxy(config: &WebSocketConfig) -> Result<TcpStream, ErrorCode> {
    let url = url::Url::parse(&config.url)
        .map_err(|_| ErrorCode::Client(ClientError::InvalidConfiguration))?;
    let host = url
        .host_str()
        .ok_or(ErrorCode::Client(ClientError::InvalidConfiguration))?;
    let port = url
        .port_or_known_default()
        .ok_or(ErrorCode::Client(ClientError::InvalidConfiguration))?;

    let mut stream = TcpStream::connect(config.proxy_server.as_str())
        .await
        .map_err(|_| ErrorCode::Transport(TransportError::Connect))?;

    let mut connect = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if !config.proxy_auth.is_empty() {
        let token = base64::engine::general_purpose::STANDARD.encode(&config.proxy_auth);
        connect.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    connect.push_str("\r\n");
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(|_| ErrorCode::Transport(TransportError::Connect))?;

    // Read the proxy's response head.
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let read = stream
            .read(&mut byte)
            .await
            .map_err(|_| ErrorCode::Transport(TransportError::Connect))?;
        if read == 0 || head.len() > 8192 {
            return Err(ErrorCode::Transport(TransportError::Connect));
        }
        head.push(byte[0]);
    }
    let status_line = String::from_utf8_lossy(&head);
    let established = status_line
        .lines()
        .next()
        .is_some_and(|line| line.contains(" 200"));
    if !established {
        log::warn!("proxy refused CONNECT: {}", status_line.lines().next().unwrap_or(""));
        return Err(ErrorCode::Transport(TransportError::Connect));
    }
    Ok(stream)
}

fn map_ws_error(error: &tokio_tungstenite::tungstenite::Error) -> ErrorCode {
    use tokio_tungstenite::tungstenite::Error;
    match error {
        Error::ConnectionClosed | Error::AlreadyClosed => {
            ErrorCode::WebSocket(WebSocketError::UnexpectedClose)
        }
        Error::Io(_) => ErrorCode::Transport(TransportError::Connect),
        Error::Tls(_) => ErrorCode::Transport(TransportError::Tls),
        Error::Protocol(_) => ErrorCode::WebSocket(WebSocketError::ProtocolViolation),
        Error::Capacity(_) => ErrorCode::WebSocket(WebSocketError::ProtocolViolation),
        Error::Http(_) => ErrorCode::WebSocket(WebSocketError::ConnectionFailed),
        _ => ErrorCode::WebSocket(WebSocketError::ConnectionFailed),
    }
}
