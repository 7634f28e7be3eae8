//! Connection manager: the connect entrypoint, the single event loop and
//! reconnection.
//!
//! Every [`AppEvent`] produced by session I/O tasks, reconnect tasks and
//! [`ClientHandle`]s is processed here one at a time. Events published by a
//! [`Network`] are delivered to bus subscribers before the next `AppEvent`
//! is taken.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::bus::Bus;
use crate::app::event::{AppEvent, Command, Event, NetId, SessionId};
use crate::config::model::{ReconnectConfig, ServerConfig};
use crate::error::ClientError;
use crate::irc::connection::{establish, Established, Session};
use crate::irc::network::Network;

/// How long `run` waits for closed sockets to flush their last lines.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Cloneable sender for commands from outside the event loop.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl ClientHandle {
    /// Returns false once the manager has stopped.
    pub fn send(&self, net_id: &NetId, command: Command) -> bool {
        self.event_tx
            .send(AppEvent::Command {
                net_id: net_id.clone(),
                command,
            })
            .is_ok()
    }
}

pub struct IrcManager {
    networks: HashMap<NetId, Network>,
    reconnects: HashMap<NetId, JoinHandle<()>>,
    /// Writer tasks of removed connections, awaited before `run` returns.
    flushing: Vec<JoinHandle<()>>,
    bus: Bus,
    reconnect: ReconnectConfig,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,
    next_serial: u64,
    /// First non-terminal failure, reported when the loop ends.
    failure: Option<ClientError>,
}

impl IrcManager {
    pub fn new(reconnect: ReconnectConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            networks: HashMap::new(),
            reconnects: HashMap::new(),
            flushing: Vec::new(),
            bus: Bus::new(),
            reconnect,
            event_tx,
            event_rx,
            next_serial: 0,
            failure: None,
        }
    }

    /// Register a bus handler for events named `name`.
    pub fn subscribe<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&mut Network, &Event) + Send + 'static,
    {
        self.bus.subscribe(name, handler);
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            event_tx: self.event_tx.clone(),
        }
    }

    pub fn network(&self, net_id: &NetId) -> Option<&Network> {
        self.networks.get(net_id)
    }

    pub fn network_mut(&mut self, net_id: &NetId) -> Option<&mut Network> {
        self.networks.get_mut(net_id)
    }

    pub fn net_ids(&self) -> Vec<NetId> {
        self.networks.keys().cloned().collect()
    }

    /// Connect to `config` and start registration. Returns once the socket
    /// (and TLS, if configured) is up.
    pub async fn connect(&mut self, config: ServerConfig) -> Result<NetId, ClientError> {
        let stream = establish(&config).await?;
        let net_id = NetId::new(self.next_serial, &config.host, config.port, config.tls);
        self.next_serial += 1;
        info!(%net_id, name = %config.name, "connected");

        let mut network = Network::new(net_id.clone(), config);
        self.start_session(&mut network, stream);
        network.publish(Event::NetidAvailable);
        deliver(&mut self.bus, &mut network);
        self.networks.insert(net_id.clone(), network);
        Ok(net_id)
    }

    fn start_session(&self, network: &mut Network, stream: Established) {
        let id = network.next_session_id();
        let session = Session::start(
            stream,
            network.net_id().clone(),
            id,
            network.config().send_interval(),
            self.event_tx.clone(),
        );
        network.install_session(session);
    }

    /// Process events until every connection has ended.
    ///
    /// Returns an error when a connection is lost for good (reconnect
    /// disabled or exhausted), or when the last connections ended with a
    /// failure such as rejected authentication.
    ///
    /// Before returning, waits (bounded) until every closed connection has
    /// flushed what was written to it, so a final `QUIT` reaches the server.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let result = self.process_events().await;
        self.flush().await;
        result
    }

    async fn process_events(&mut self) -> Result<(), ClientError> {
        while !self.networks.is_empty() {
            let Some(event) = self.event_rx.recv().await else {
                break;
            };
            self.handle_event(event)?;
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn flush(&mut self) {
        let writers = std::mem::take(&mut self.flushing);
        if writers.is_empty() {
            return;
        }
        let pending = futures::future::join_all(writers);
        if tokio::time::timeout(FLUSH_TIMEOUT, pending).await.is_err() {
            warn!("timed out flushing closed connections");
        }
    }

    fn handle_event(&mut self, event: AppEvent) -> Result<(), ClientError> {
        match event {
            AppEvent::Line {
                net_id,
                session,
                line,
            } => {
                let Some(network) = self.networks.get_mut(&net_id) else {
                    return Ok(());
                };
                if !network.is_current(session) {
                    return Ok(());
                }
                network.receive(&line);
                deliver(&mut self.bus, network);
                self.settle(&net_id);
            }
            AppEvent::Tick { net_id, session } => {
                if let Some(network) = self.networks.get_mut(&net_id) {
                    network.tick(session);
                    deliver(&mut self.bus, network);
                }
            }
            AppEvent::Closed {
                net_id,
                session,
                reason,
            } => return self.on_closed(net_id, session, reason),
            AppEvent::Reconnected {
                net_id,
                attempt,
                stream,
            } => {
                self.reconnects.remove(&net_id);
                let Some(mut network) = self.networks.remove(&net_id) else {
                    return Ok(());
                };
                info!(%net_id, attempt, "reconnected");
                self.start_session(&mut network, stream);
                network.publish(Event::NetidAvailable);
                network.publish(Event::Reconnected);
                deliver(&mut self.bus, &mut network);
                self.networks.insert(net_id, network);
            }
            AppEvent::ReconnectFailed { net_id, attempts } => {
                self.reconnects.remove(&net_id);
                let err = ClientError::ReconnectExhausted {
                    net_id: net_id.clone(),
                    attempts,
                };
                error!(%err, "giving up on connection");
                self.remove(&net_id, Some(&err));
                return Err(err);
            }
            AppEvent::Command { net_id, command } => {
                let Some(network) = self.networks.get_mut(&net_id) else {
                    warn!(%net_id, ?command, "command for unknown connection");
                    return Ok(());
                };
                apply(network, command);
                deliver(&mut self.bus, network);
                self.settle(&net_id);
            }
        }
        Ok(())
    }

    fn on_closed(&mut self, net_id: NetId, session: SessionId, reason: String) -> Result<(), ClientError> {
        let Some(network) = self.networks.get_mut(&net_id) else {
            return Ok(());
        };
        if !network.mark_lost(session, &reason) {
            return Ok(());
        }
        deliver(&mut self.bus, network);

        if network.is_quitting() {
            self.remove(&net_id, None);
            return Ok(());
        }
        if !self.reconnect.enabled {
            let err = ClientError::ConnectionLost {
                net_id: net_id.clone(),
                reason,
            };
            error!(%err, "connection lost");
            self.remove(&net_id, Some(&err));
            return Err(err);
        }
        let config = network.config().clone();
        self.spawn_reconnect(net_id, config);
        Ok(())
    }

    /// Follow up on state a handler or command may have left behind.
    fn settle(&mut self, net_id: &NetId) {
        let Some(network) = self.networks.get(net_id) else {
            return;
        };
        if let Some((numeric, reason)) = network.auth_failure() {
            let err = ClientError::AuthenticationFailed {
                net_id: net_id.clone(),
                numeric: numeric.to_string(),
                reason: reason.to_string(),
            };
            error!(%err, "closing connection");
            self.remove(net_id, Some(&err));
            self.failure.get_or_insert(err);
        } else if network.is_quitting() {
            info!(%net_id, "quit");
            self.remove(net_id, None);
        }
    }

    /// Close and forget a connection, publishing its final events. A
    /// `disconnected` event is published by the network itself when a live
    /// session ends.
    fn remove(&mut self, net_id: &NetId, failure: Option<&ClientError>) {
        if let Some(task) = self.reconnects.remove(net_id) {
            task.abort();
        }
        let Some(mut network) = self.networks.remove(net_id) else {
            return;
        };
        if let Some(err) = failure {
            network.publish(Event::ConnectionFailed {
                error: err.to_string(),
            });
        }
        network.close();
        self.flushing.extend(network.take_flushing());
        deliver(&mut self.bus, &mut network);
    }

    fn spawn_reconnect(&mut self, net_id: NetId, config: ServerConfig) {
        let policy = self.reconnect.clone();
        let event_tx = self.event_tx.clone();
        let key = net_id.clone();
        let task = tokio::spawn(async move {
            for attempt in 1..=policy.max_attempts {
                let delay = policy.delay_for(attempt);
                info!(%net_id, attempt, ?delay, "reconnecting");
                tokio::time::sleep(delay).await;
                match establish(&config).await {
                    Ok(stream) => {
                        let _ = event_tx.send(AppEvent::Reconnected {
                            net_id,
                            attempt,
                            stream,
                        });
                        return;
                    }
                    Err(e) => warn!(%net_id, attempt, error = %e, "reconnect attempt failed"),
                }
            }
            let _ = event_tx.send(AppEvent::ReconnectFailed {
                net_id,
                attempts: policy.max_attempts,
            });
        });
        self.reconnects.insert(key, task);
    }
}

/// Hand every pending event of `network` to the bus, including events
/// published by subscribers along the way.
fn deliver(bus: &mut Bus, network: &mut Network) {
    loop {
        let events = network.take_events();
        if events.is_empty() {
            break;
        }
        for event in &events {
            bus.publish(network, event);
        }
    }
}

fn apply(network: &mut Network, command: Command) {
    match command {
        Command::Join(channels) => network.join(channels),
        Command::Part(channels) => network.part(channels),
        Command::Say { target, text } => network.say(&target, &text),
        Command::Action { target, text } => {
            if let Err(e) = network.action(&target, &text) {
                warn!(error = %e, %target, "action not sent");
            }
        }
        Command::Nick(nick) => network.change_nick(&nick),
        Command::Raw(line) => network.send_raw(&line),
        Command::Quit(message) => network.quit(message.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    type ServerLines = tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>;

    async fn listener() -> (TcpListener, ServerConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ServerConfig {
            nickname: "botnick".into(),
            send_interval_ms: 5,
            ..ServerConfig::new("127.0.0.1", port, false)
        };
        (listener, config)
    }

    async fn accept(listener: &TcpListener) -> (ServerLines, tokio::net::tcp::OwnedWriteHalf) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        (BufReader::new(read).lines(), write)
    }

    async fn next_line(lines: &mut ServerLines) -> String {
        tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    fn quick_reconnect(enabled: bool) -> ReconnectConfig {
        ReconnectConfig {
            enabled,
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_connect_registers_and_joins_after_welcome() {
        let (listener, mut config) = listener().await;
        config.channels = vec!["#example".into()];
        let mut manager = IrcManager::new(quick_reconnect(false));
        let net_id = manager.connect(config).await.unwrap();
        assert_eq!(net_id.as_str(), format!("0:127.0.0.1:{}-", listener.local_addr().unwrap().port()));
        let handle = manager.handle();
        let run = tokio::spawn(async move { manager.run().await });

        let (mut lines, mut write) = accept(&listener).await;
        assert_eq!(next_line(&mut lines).await, "CAP LS 302");
        assert!(next_line(&mut lines).await.starts_with("USER botnick 8 * "));
        assert_eq!(next_line(&mut lines).await, "NICK botnick");

        write.write_all(b":srv CAP * LS :multi-prefix\r\n").await.unwrap();
        assert_eq!(next_line(&mut lines).await, "CAP END");
        write.write_all(b":srv 001 botnick :Welcome\r\n").await.unwrap();
        assert_eq!(next_line(&mut lines).await, "JOIN #example");

        write.write_all(b"PING :abc\r\n").await.unwrap();
        assert_eq!(next_line(&mut lines).await, "PONG abc");

        handle.send(&net_id, Command::Quit(Some("bye".into())));
        assert_eq!(next_line(&mut lines).await, "QUIT bye");
        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_lost_connection_without_reconnect_is_terminal() {
        let (listener, config) = listener().await;
        let mut manager = IrcManager::new(quick_reconnect(false));
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lost);
        manager.subscribe("connection-lost", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.connect(config).await.unwrap();
        let run = tokio::spawn(async move { manager.run().await });

        let (lines, write) = accept(&listener).await;
        drop(lines);
        drop(write);

        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost { .. }));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_netid_and_replays_registration() {
        let (listener, mut config) = listener().await;
        config.channels = vec!["#example".into()];
        let mut manager = IrcManager::new(quick_reconnect(true));
        let reconnected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reconnected);
        manager.subscribe("reconnected", move |network, _| {
            assert!(network.net_id().as_str().starts_with("0:127.0.0.1:"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let disconnected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnected);
        manager.subscribe("disconnected", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let net_id = manager.connect(config).await.unwrap();
        let handle = manager.handle();
        let run = tokio::spawn(async move { manager.run().await });

        let (mut lines, write) = accept(&listener).await;
        assert_eq!(next_line(&mut lines).await, "CAP LS 302");
        drop(lines);
        drop(write);

        let (mut lines, mut write) = accept(&listener).await;
        assert_eq!(next_line(&mut lines).await, "CAP LS 302");
        next_line(&mut lines).await;
        assert_eq!(next_line(&mut lines).await, "NICK botnick");
        write.write_all(b":srv CAP * LS :\r\n:srv 001 botnick :Welcome\r\n").await.unwrap();
        assert_eq!(next_line(&mut lines).await, "CAP END");
        assert_eq!(next_line(&mut lines).await, "JOIN #example");
        assert_eq!(reconnected.load(Ordering::SeqCst), 1);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);

        handle.send(&net_id, Command::Quit(None));
        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(disconnected.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_authentication_closes_connection() {
        let (listener, mut config) = listener().await;
        config.sasl = Some(crate::config::model::SaslConfig {
            account: "bot".into(),
            password: "wrong".into(),
        });
        let mut manager = IrcManager::new(quick_reconnect(true));
        manager.connect(config).await.unwrap();
        let run = tokio::spawn(async move { manager.run().await });

        let (mut lines, mut write) = accept(&listener).await;
        assert_eq!(next_line(&mut lines).await, "CAP LS 302");
        write.write_all(b":srv CAP * LS :sasl\r\n").await.unwrap();
        write.write_all(b":srv CAP * ACK :sasl\r\n").await.unwrap();
        write.write_all(b"AUTHENTICATE +\r\n").await.unwrap();
        write.write_all(b":srv 904 botnick :SASL authentication failed\r\n").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(ClientError::AuthenticationFailed { ref numeric, .. }) if numeric == "904"
        ));
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let (listener, config) = listener().await;
        let mut manager = IrcManager::new(quick_reconnect(true));
        manager.connect(config).await.unwrap();
        let run = tokio::spawn(async move { manager.run().await });

        let (lines, write) = accept(&listener).await;
        // Nothing listens any more, so every attempt is refused.
        drop(listener);
        drop(lines);
        drop(write);

        let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::ReconnectExhausted { attempts: 3, .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_quit_is_flushed_before_run_returns() {
        let (listener, config) = listener().await;
        // The client runs on its own runtime, which is dropped as soon as
        // `run` returns.
        let client = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let mut manager = IrcManager::new(quick_reconnect(false));
                let net_id = manager.connect(config).await.unwrap();
                manager.handle().send(&net_id, Command::Quit(Some("bye".into())));
                manager.run().await
            })
        });

        let (mut lines, _write) = accept(&listener).await;
        let mut received = Vec::new();
        while let Ok(Ok(Some(line))) =
            tokio::time::timeout(Duration::from_secs(5), lines.next_line()).await
        {
            received.push(line);
        }
        assert!(client.join().unwrap().is_ok());
        assert_eq!(received, vec!["QUIT bye"]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut manager = IrcManager::new(ReconnectConfig::default());
        let err = manager
            .connect(ServerConfig::new("127.0.0.1", port, false))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
