//! [`Connector`] speaking STOMP 1.2 to a broker over TCP.
//!
//! Logical destinations (`workspace/{id}/location`) are prefixed with the
//! configured destination prefix on the wire and stripped again on
//! delivery. The private reply queue is used verbatim.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::frame::{decode, Frame};
use crate::error::RealtimeError;
use crate::realtime::link::{Command, Connector, Delivery, Headers, Link};
use crate::storage::BrokerConfig;

/// Headers the transport owns; not forwarded to message handlers.
const TRANSPORT_HEADERS: &[&str] = &["subscription", "message-id", "destination", "content-length", "ack"];

#[derive(Debug, Clone)]
pub struct StompConnector {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub passcode: String,
    pub virtual_host: String,
    pub destination_prefix: String,
    pub connect_timeout: Duration,
    pub heartbeat: Duration,
}

impl StompConnector {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            login: config.login.clone(),
            passcode: config.passcode.clone(),
            virtual_host: config.virtual_host.clone(),
            destination_prefix: config.destination_prefix.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            heartbeat: Duration::from_millis(config.heartbeat_ms),
        }
    }

    fn wire_destination(&self, logical: &str, reply_to: &str) -> String {
        if logical == reply_to {
            logical.to_string()
        } else {
            format!("{}{}", self.destination_prefix, logical)
        }
    }

    fn connect_frame(&self) -> Frame {
        let beat = self.heartbeat.as_millis();
        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", self.virtual_host.clone())
            .header("login", self.login.clone())
            .header("passcode", self.passcode.clone())
            .header("heart-beat", format!("{beat},{beat}"))
    }

    async fn handshake(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        buf: &mut Vec<u8>,
    ) -> Result<Frame, RealtimeError> {
        writer
            .write_all(&self.connect_frame().encode())
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        loop {
            if let Some(frame) = decode(buf)? {
                return match frame.command.as_str() {
                    "CONNECTED" => Ok(frame),
                    "ERROR" => Err(RealtimeError::Connection(
                        frame.get("message").unwrap_or("broker refused connection").to_string(),
                    )),
                    other => Err(RealtimeError::Protocol(format!("unexpected {other} during handshake"))),
                };
            }
            if !read_more(reader, buf).await? {
                return Err(RealtimeError::Connection("broker closed during handshake".into()));
            }
        }
    }

    /// Outgoing heart-beat period negotiated per STOMP 1.2: the larger of
    /// what we offer and what the server wants, or none if either is zero.
    fn outgoing_heartbeat(&self, connected: &Frame) -> Option<Duration> {
        let ours = self.heartbeat.as_millis() as u64;
        let theirs = connected
            .get("heart-beat")
            .and_then(|v| v.split(',').nth(1))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)))
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn open(&self) -> Result<Link, RealtimeError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RealtimeError::Connection(format!("connect to {addr} timed out")))?
            .map_err(|e| RealtimeError::Connection(format!("{addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let mut buf = Vec::new();
        let connected = tokio::time::timeout(
            self.connect_timeout,
            self.handshake(&mut reader, &mut writer, &mut buf),
        )
        .await
        .map_err(|_| RealtimeError::Connection(format!("STOMP handshake with {addr} timed out")))??;
        tracing::debug!(server = connected.get("server").unwrap_or("unknown"), "STOMP session established");

        let reply_to = format!("/queue/locshare-reply-{}", Uuid::new_v4());
        let (outbound, commands) = mpsc::unbounded_channel();
        let (deliver, inbound) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            self.clone(),
            reply_to.clone(),
            writer,
            commands,
            self.outgoing_heartbeat(&connected),
        ));
        tokio::spawn(read_loop(self.destination_prefix.clone(), reader, buf, deliver));

        Ok(Link {
            reply_to,
            outbound,
            inbound,
        })
    }
}

/// Returns `false` on EOF.
async fn read_more(reader: &mut OwnedReadHalf, buf: &mut Vec<u8>) -> Result<bool, RealtimeError> {
    let mut chunk = [0u8; 4096];
    let n = reader
        .read(&mut chunk)
        .await
        .map_err(|e| RealtimeError::Connection(e.to_string()))?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n > 0)
}

async fn write_loop(
    connector: StompConnector,
    reply_to: String,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Command>,
    heartbeat: Option<Duration>,
) {
    let mut beat = heartbeat.map(|period| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        let bytes = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Disconnect) | None => {
                    let _ = writer.write_all(&Frame::new("DISCONNECT").encode()).await;
                    let _ = writer.shutdown().await;
                    return;
                }
                Some(command) => encode_command(&connector, &reply_to, command).encode(),
            },
            _ = next_heartbeat(&mut beat) => b"\n".to_vec(),
        };

        if let Err(e) = writer.write_all(&bytes).await {
            tracing::warn!(error = %e, "STOMP write failed");
            return;
        }
        if let Some(interval) = beat.as_mut() {
            interval.reset();
        }
    }
}

async fn next_heartbeat(beat: &mut Option<tokio::time::Interval>) {
    match beat.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn encode_command(connector: &StompConnector, reply_to: &str, command: Command) -> Frame {
    match command {
        Command::Subscribe { id, destination } => Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", connector.wire_destination(&destination, reply_to))
            .header("ack", "auto"),
        Command::Unsubscribe { id } => Frame::new("UNSUBSCRIBE").header("id", id),
        Command::Send {
            destination,
            headers,
            body,
        } => {
            let mut frame = Frame::new("SEND")
                .header("destination", connector.wire_destination(&destination, reply_to));
            for (name, value) in headers {
                frame = frame.header(name, value);
            }
            frame.body(body)
        }
        Command::Disconnect => Frame::new("DISCONNECT"),
    }
}

async fn read_loop(
    prefix: String,
    mut reader: OwnedReadHalf,
    mut buf: Vec<u8>,
    deliver: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        loop {
            let frame = match decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping STOMP connection");
                    return;
                }
            };
            match frame.command.as_str() {
                "MESSAGE" => {
                    if deliver.send(to_delivery(&prefix, frame)).is_err() {
                        return;
                    }
                }
                "ERROR" => {
                    tracing::warn!(
                        message = frame.get("message").unwrap_or(""),
                        "broker sent ERROR"
                    );
                    return;
                }
                _ => {}
            }
        }

        match read_more(&mut reader, &mut buf).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("broker closed the connection");
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "STOMP read failed");
                return;
            }
        }
    }
}

fn to_delivery(prefix: &str, frame: Frame) -> Delivery {
    let destination = frame.get("destination").unwrap_or_default();
    let destination = destination
        .strip_prefix(prefix)
        .unwrap_or(destination)
        .to_string();
    let subscription = frame.get("subscription").unwrap_or_default().to_string();

    let mut headers = Headers::new();
    for (name, value) in &frame.headers {
        if !TRANSPORT_HEADERS.contains(&name.as_str()) {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    Delivery {
        subscription,
        destination,
        headers,
        body: String::from_utf8_lossy(&frame.body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn connector(port: u16) -> StompConnector {
        StompConnector {
            port,
            host: "127.0.0.1".into(),
            heartbeat: Duration::ZERO,
            ..StompConnector::from_config(&BrokerConfig::default())
        }
    }

    async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Frame {
        loop {
            if let Some(frame) = decode(buf).unwrap() {
                return frame;
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed early");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn handshake_subscribe_send_and_deliver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();

            let connect = read_frame(&mut stream, &mut buf).await;
            assert_eq!(connect.command, "CONNECT");
            assert_eq!(connect.get("accept-version"), Some("1.2"));
            stream
                .write_all(&Frame::new("CONNECTED").header("version", "1.2").encode())
                .await
                .unwrap();

            let subscribe = read_frame(&mut stream, &mut buf).await;
            assert_eq!(subscribe.command, "SUBSCRIBE");
            assert_eq!(subscribe.get("destination"), Some("/topic/workspace/ws-1/locations"));
            let sub_id = subscribe.get("id").unwrap().to_string();

            let send = read_frame(&mut stream, &mut buf).await;
            assert_eq!(send.command, "SEND");
            assert_eq!(send.get("destination"), Some("/topic/workspace/ws-1/location"));
            assert_eq!(send.body, br#"{"latitude":1.5}"#);

            let message = Frame::new("MESSAGE")
                .header("subscription", sub_id)
                .header("message-id", "m-1")
                .header("destination", "/topic/workspace/ws-1/locations")
                .header("correlation-id", "c-1")
                .body("[]");
            stream.write_all(&message.encode()).await.unwrap();

            let disconnect = read_frame(&mut stream, &mut buf).await;
            assert_eq!(disconnect.command, "DISCONNECT");
        });

        let mut link = connector(port).open().await.unwrap();
        assert!(link.reply_to.starts_with("/queue/locshare-reply-"));

        link.outbound
            .send(Command::Subscribe {
                id: "sub-1".into(),
                destination: "workspace/ws-1/locations".into(),
            })
            .unwrap();
        link.outbound
            .send(Command::Send {
                destination: "workspace/ws-1/location".into(),
                headers: Headers::new(),
                body: r#"{"latitude":1.5}"#.into(),
            })
            .unwrap();

        let delivery = link.inbound.recv().await.unwrap();
        assert_eq!(delivery.subscription, "sub-1");
        assert_eq!(delivery.destination, "workspace/ws-1/locations");
        assert_eq!(delivery.headers.get("correlation-id").map(String::as_str), Some("c-1"));
        assert!(!delivery.headers.contains_key("message-id"));
        assert_eq!(delivery.body, "[]");

        link.outbound.send(Command::Disconnect).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_frame_fails_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            read_frame(&mut stream, &mut buf).await;
            let error = Frame::new("ERROR").header("message", "access refused");
            stream.write_all(&error.encode()).await.unwrap();
        });

        let err = connector(port).open().await.unwrap_err();
        assert!(matches!(err, RealtimeError::Connection(msg) if msg == "access refused"));
    }

    #[tokio::test]
    async fn unreachable_broker_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(matches!(
            connector(port).open().await,
            Err(RealtimeError::Connection(_))
        ));
    }

    #[test]
    fn heartbeat_negotiation() {
        let mut c = connector(1);
        c.heartbeat = Duration::from_millis(10_000);
        let connected = Frame::new("CONNECTED").header("heart-beat", "0,20000");
        assert_eq!(c.outgoing_heartbeat(&connected), Some(Duration::from_millis(20_000)));

        let connected = Frame::new("CONNECTED").header("heart-beat", "5000,0");
        assert_eq!(c.outgoing_heartbeat(&connected), None);
    }

    #[test]
    fn reply_destination_is_not_prefixed() {
        let c = connector(1);
        assert_eq!(c.wire_destination("/queue/r-1", "/queue/r-1"), "/queue/r-1");
        assert_eq!(c.wire_destination("workspace/a/location", "/queue/r-1"), "/topic/workspace/a/location");
    }
}
