//! Connection lifecycle of the XMPP session: connect, log in, serve,
//! reconnect with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{stanza, CommandResponder, JabberConfig, JabberError, OutgoingMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on each step of the login exchange.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Run until `cancel` fires. `connected` is true only while a logged-in
/// session is being served.
pub async fn run(
    config: JabberConfig,
    reconnect: ReconnectConfig,
    responder: Arc<dyn CommandResponder>,
    mut outgoing: mpsc::Receiver<OutgoingMessage>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut delay = reconnect.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect(&config) => result,
        };

        match result {
            Ok((ws, bound_jid)) => {
                tracing::info!(jid = %bound_jid, attempt, "Jabber session established");
                attempt = 0;
                delay = reconnect.initial_delay;

                connected.store(true, Ordering::Release);
                let end = serve(ws, responder.as_ref(), &mut outgoing, &cancel).await;
                connected.store(false, Ordering::Release);

                match end {
                    Ok(()) => {
                        tracing::info!("Jabber session closed");
                        return;
                    }
                    Err(e) => tracing::warn!(error = %e, "Jabber session dropped"),
                }
            }
            Err(e) => tracing::error!(attempt, error = %e, "Jabber connection failed"),
        }

        tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to jabber server");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &reconnect);
    }
}

/// Open the WebSocket and log in. Returns the stream and the bound JID.
async fn connect(config: &JabberConfig) -> Result<(WsStream, String), JabberError> {
    let mut request = config.ws_url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("xmpp"));

    let (mut ws, _response) = connect_async(request).await?;
    let bound = login(&mut ws, config).await?;
    Ok((ws, bound))
}

async fn login(ws: &mut WsStream, config: &JabberConfig) -> Result<String, JabberError> {
    let domain = &config.jid.domain;

    ws.send(Message::Text(stanza::open(domain))).await?;
    let features = wait_for(ws, "stream features", |f| stanza::is_features(f).then(|| f.to_string())).await?;
    if !stanza::offers_plain(&features) {
        return Err(JabberError::Protocol("server does not offer SASL PLAIN".into()));
    }

    ws.send(Message::Text(stanza::auth_plain(&config.jid.local, &config.password)))
        .await?;
    if !wait_for(ws, "SASL outcome", stanza::sasl_outcome).await? {
        return Err(JabberError::AuthFailed(config.jid.bare()));
    }

    // The stream restarts after authentication.
    ws.send(Message::Text(stanza::open(domain))).await?;
    let features = wait_for(ws, "stream features", |f| stanza::is_features(f).then(|| f.to_string())).await?;
    if !stanza::offers_bind(&features) {
        return Err(JabberError::Protocol("server does not offer resource binding".into()));
    }

    ws.send(Message::Text(stanza::bind(config.resource()))).await?;
    let bound = wait_for(ws, "resource binding", stanza::bind_result)
        .await?
        .map_err(JabberError::Protocol)?;

    ws.send(Message::Text(stanza::presence())).await?;
    Ok(bound)
}

/// Read frames until `pick` accepts one.
async fn wait_for<T>(
    ws: &mut WsStream,
    what: &'static str,
    mut pick: impl FnMut(&str) -> Option<T>,
) -> Result<T, JabberError> {
    let deadline = tokio::time::Instant::now() + LOGIN_TIMEOUT;
    loop {
        let frame = match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return Err(JabberError::Timeout(what)),
            Ok(None) => return Err(JabberError::Closed),
            Ok(Some(frame)) => frame?,
        };
        match frame {
            Message::Text(text) => {
                if stanza::is_close(&text) {
                    return Err(JabberError::Closed);
                }
                if let Some(value) = pick(&text) {
                    return Ok(value);
                }
            }
            Message::Close(_) => return Err(JabberError::Closed),
            _ => {}
        }
    }
}

/// Serve a logged-in session. `Ok` means it was closed on request.
async fn serve(
    ws: WsStream,
    responder: &dyn CommandResponder,
    outgoing: &mut mpsc::Receiver<OutgoingMessage>,
    cancel: &CancellationToken,
) -> Result<(), JabberError> {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Alerts already queued count as handed over; write them before closing.
                let mut flushed = 0usize;
                while let Ok(msg) = outgoing.try_recv() {
                    if let Err(e) = sink.send(Message::Text(stanza::chat_message(&msg.to, &msg.body))).await {
                        tracing::warn!(to = %msg.to, error = %e, "Failed to flush queued Jabber message");
                        break;
                    }
                    flushed += 1;
                }
                if flushed > 0 {
                    tracing::info!(flushed, "Flushed queued Jabber messages before closing");
                }

                if let Err(e) = sink.send(Message::Text(stanza::close())).await {
                    tracing::debug!(error = %e, "Failed to send stream close");
                }
                if let Err(e) = sink.close().await {
                    tracing::debug!(error = %e, "Failed to close WebSocket");
                }
                return Ok(());
            }
            Some(msg) = outgoing.recv() => {
                sink.send(Message::Text(stanza::chat_message(&msg.to, &msg.body))).await?;
                tracing::debug!(to = %msg.to, "Jabber message written");
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if stanza::is_close(&text) {
                            return Err(JabberError::Closed);
                        }
                        if let Some(reply) = handle_frame(&text, responder) {
                            sink.send(Message::Text(reply)).await?;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Server closed WebSocket");
                        return Err(JabberError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(JabberError::Closed),
                }
            }
        }
    }
}

/// Stanza to write in answer to an inbound frame, if any.
fn handle_frame(frame: &str, responder: &dyn CommandResponder) -> Option<String> {
    if let Some(pong) = stanza::ping_reply(frame) {
        return Some(pong);
    }
    let msg = stanza::parse_message(frame)?;
    if !msg.is_conversational() {
        return None;
    }
    tracing::info!(from = %msg.from, body = %msg.body, "Jabber message received");
    let reply = responder.respond(&msg.from, &msg.body)?;
    Some(stanza::chat_message(&msg.from, &reply))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jabber::{spawn, Jid};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    struct Echo;

    impl CommandResponder for Echo {
        fn respond(&self, from: &str, body: &str) -> Option<String> {
            (stanza::bare_jid(from) == "alice@example.com").then(|| format!("echo: {body}"))
        }
    }

    #[test]
    fn next_delay_doubles_and_clamps() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(40), &config), Duration::from_secs(60));
    }

    #[test]
    fn ping_is_answered_before_messages() {
        let frame = r#"<iq from="example.com" id="p9" type="get"><ping xmlns="urn:xmpp:ping"/></iq>"#;
        assert_eq!(
            handle_frame(frame, &Echo).as_deref(),
            Some(r#"<iq type="result" id="p9" to="example.com"/>"#)
        );
    }

    #[test]
    fn chat_message_gets_reply_to_sender() {
        let frame = r#"<message from="alice@example.com/phone" type="chat"><body>status</body></message>"#;
        let reply = handle_frame(frame, &Echo).unwrap();
        assert!(reply.contains(r#"to="alice@example.com/phone""#));
        assert!(reply.contains("<body>echo: status</body>"));
    }

    #[test]
    fn silent_responder_and_groupchat_produce_nothing() {
        let stranger = r#"<message from="mallory@example.com" type="chat"><body>status</body></message>"#;
        assert!(handle_frame(stranger, &Echo).is_none());
        let group = r#"<message from="alice@example.com" type="groupchat"><body>status</body></message>"#;
        assert!(handle_frame(group, &Echo).is_none());
    }

    async fn read(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return Some(t),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    /// Minimal RFC 7395 server: accepts PLAIN, binds, then sends one chat
    /// message and returns every frame the client writes afterwards.
    async fn fake_server(listener: TcpListener) -> Vec<String> {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = |_req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            resp.headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("xmpp"));
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();

        assert!(read(&mut ws).await.unwrap().starts_with("<open"));
        ws.send(Message::Text(r#"<open xmlns="urn:ietf:params:xml:ns:xmpp-framing" from="example.com" version="1.0"/>"#.into())).await.unwrap();
        ws.send(Message::Text(r#"<stream:features xmlns:stream="http://etherx.jabber.org/streams"><mechanisms xmlns="urn:ietf:params:xml:ns:xmpp-sasl"><mechanism>PLAIN</mechanism></mechanisms></stream:features>"#.into())).await.unwrap();

        assert!(read(&mut ws).await.unwrap().contains(r#"mechanism="PLAIN""#));
        ws.send(Message::Text(r#"<success xmlns="urn:ietf:params:xml:ns:xmpp-sasl"/>"#.into())).await.unwrap();

        assert!(read(&mut ws).await.unwrap().starts_with("<open"));
        ws.send(Message::Text(r#"<stream:features xmlns:stream="http://etherx.jabber.org/streams"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/></stream:features>"#.into())).await.unwrap();

        assert!(read(&mut ws).await.unwrap().contains("<resource>pi</resource>"));
        ws.send(Message::Text(r#"<iq type="result" id="bind_1"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><jid>garage@example.com/pi</jid></bind></iq>"#.into())).await.unwrap();

        assert_eq!(read(&mut ws).await.unwrap(), "<presence/>");
        ws.send(Message::Text(r#"<message from="alice@example.com/phone" type="chat"><body>status</body></message>"#.into())).await.unwrap();

        let mut written = Vec::new();
        while let Some(frame) = read(&mut ws).await {
            let done = stanza::is_close(&frame);
            written.push(frame);
            if done {
                break;
            }
        }
        written
    }

    #[tokio::test]
    async fn session_logs_in_answers_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_server(listener));

        let config = JabberConfig {
            jid: Jid::parse("garage@example.com/pi").unwrap(),
            password: "secret".into(),
            ws_url: format!("ws://{addr}/ws"),
            authorized_ids: vec!["alice@example.com".into()],
        };
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(config, Arc::new(Echo), cancel.clone());

        // Wait for login, then push one alert through the handle.
        for _ in 0..200 {
            if handle.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_connected());
        handle.send("bob@example.com", "Garage is now open").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        let written = server.await.unwrap();
        assert!(written.iter().any(|f| f.contains("<body>echo: status</body>")));
        assert!(written.iter().any(|f| f.contains(r#"to="bob@example.com""#)));
        assert!(written.last().is_some_and(|f| stanza::is_close(f)));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn queued_messages_are_flushed_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_server(listener));

        let config = JabberConfig {
            jid: Jid::parse("garage@example.com/pi").unwrap(),
            password: "secret".into(),
            ws_url: format!("ws://{addr}/ws"),
            authorized_ids: vec!["alice@example.com".into()],
        };
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(config, Arc::new(Echo), cancel.clone());

        for _ in 0..200 {
            if handle.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_connected());

        // Queue and cancel without yielding to the session in between.
        for door in ["Left", "Right", "Side"] {
            handle.send("bob@example.com", &format!("{door} is now open")).await.unwrap();
        }
        cancel.cancel();
        task.await.unwrap();

        let written = server.await.unwrap();
        for door in ["Left", "Right", "Side"] {
            assert!(
                written.iter().any(|f| f.contains(&format!("<body>{door} is now open</body>"))),
                "{door} alert missing from {written:?}"
            );
        }
        assert!(written.last().is_some_and(|f| stanza::is_close(f)));
    }
}
