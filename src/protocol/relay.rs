//! Full-duplex relay between the game client and the upstream server.
//!
//! One listener per role (login / game), at most one active session per
//! listener. A session runs three cooperative subtasks: client→server
//! (with login interception), server→client (feeding the packet scanner),
//! and the injection queue. The relay is a pipe first: observers and
//! scanners are best-effort consumers that never block forwarding.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::codec::PacketReader;
use crate::crypto::{RsaKey, XteaKey};
use crate::error::{Error, Result};
use crate::protocol::frame::{read_frame, write_frame};
use crate::protocol::login;
use crate::protocol::session::{Session, SessionRole};

/// Hard cap on how long session teardown may take.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Session-level timeout for XTEA key capture.
const LOGIN_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where an injected payload is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectTarget {
    Server,
    Client,
}

type Injection = (InjectTarget, Vec<u8>);

/// Observer over decrypted client packets: `(opcode, cursor over the rest)`.
/// Observers run synchronously in registration order; an error is logged
/// and does not affect peers.
pub type ClientPacketObserver = Box<dyn FnMut(u8, &mut PacketReader) -> Result<()> + Send>;

/// Hook fed the full decrypted server payload (the scanner entry point).
pub type ServerPayloadHook = Box<dyn FnMut(&[u8]) + Send>;

/// Session life-cycle hook.
pub type SessionHook = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub role: SessionRole,
    pub listen_addr: SocketAddr,
    pub server_host: String,
    pub server_port: u16,
    /// Address rewritten to loopback in character-list replies.
    pub server_ip: Ipv4Addr,
}

/// State shared between the relay task and its handles.
struct RelayShared {
    session: Mutex<Session>,
    observers: Mutex<Vec<(u64, ClientPacketObserver)>>,
    next_observer_id: AtomicU64,
    server_payload_hook: Mutex<Option<ServerPayloadHook>>,
    on_login_success: Mutex<Option<SessionHook>>,
    on_disconnected: Mutex<Option<SessionHook>>,
    connected: AtomicBool,
    packets_from_client: AtomicU64,
    packets_from_server: AtomicU64,
}

impl RelayShared {
    fn logged_in(&self) -> bool {
        self.session.lock().unwrap().logged_in()
    }

    fn notify_client_observers(&self, inner: &[u8]) {
        let mut observers = self.observers.lock().unwrap();
        for (id, observer) in observers.iter_mut() {
            let mut reader = PacketReader::new(inner);
            let Ok(opcode) = reader.read_u8() else {
                return;
            };
            if let Err(e) = observer(opcode, &mut reader) {
                debug!(observer = id, error = %e, "client packet observer failed");
            }
        }
    }
}

/// Cloneable control surface for a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<RelayShared>,
    inject_tx: mpsc::UnboundedSender<Injection>,
}

impl RelayHandle {
    /// Queue a payload for injection into the server-bound stream.
    /// Payloads are sealed with the session key and delivered FIFO.
    pub fn inject_to_server(&self, payload: Vec<u8>) -> Result<()> {
        self.inject(InjectTarget::Server, payload)
    }

    pub fn inject_to_client(&self, payload: Vec<u8>) -> Result<()> {
        self.inject(InjectTarget::Client, payload)
    }

    fn inject(&self, target: InjectTarget, payload: Vec<u8>) -> Result<()> {
        if !self.logged_in() {
            warn!("cannot inject: not logged in yet");
            return Err(Error::NotConnected);
        }
        self.inject_tx
            .send((target, payload))
            .map_err(|_| Error::NotConnected)
    }

    pub fn register_client_observer(&self, observer: ClientPacketObserver) -> u64 {
        let id = self
            .shared
            .next_observer_id
            .fetch_add(1, Ordering::Relaxed);
        self.shared.observers.lock().unwrap().push((id, observer));
        id
    }

    pub fn unregister_client_observer(&self, id: u64) {
        self.shared
            .observers
            .lock()
            .unwrap()
            .retain(|(observer_id, _)| *observer_id != id);
    }

    pub fn set_server_payload_hook(&self, hook: ServerPayloadHook) {
        *self.shared.server_payload_hook.lock().unwrap() = Some(hook);
    }

    pub fn set_on_login_success(&self, hook: SessionHook) {
        *self.shared.on_login_success.lock().unwrap() = Some(hook);
    }

    pub fn set_on_disconnected(&self, hook: SessionHook) {
        *self.shared.on_disconnected.lock().unwrap() = Some(hook);
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn logged_in(&self) -> bool {
        self.shared.logged_in()
    }

    pub fn key(&self) -> Option<XteaKey> {
        self.shared.session.lock().unwrap().key()
    }

    pub fn packets_from_client(&self) -> u64 {
        self.shared.packets_from_client.load(Ordering::Relaxed)
    }

    pub fn packets_from_server(&self) -> u64 {
        self.shared.packets_from_server.load(Ordering::Relaxed)
    }
}

/// The relay itself. Constructed once per listener, consumed by `run`.
pub struct Relay {
    config: RelayConfig,
    shared: Arc<RelayShared>,
    rsa_keys: Vec<RsaKey>,
    inject_tx: mpsc::UnboundedSender<Injection>,
    inject_rx: mpsc::UnboundedReceiver<Injection>,
}

impl Relay {
    /// Build a relay. Fails fast if the default RSA key constants are
    /// unusable (fatal setup, per the error policy).
    pub fn new(config: RelayConfig) -> Result<Self> {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(RelayShared {
            session: Mutex::new(Session::new(config.role)),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            server_payload_hook: Mutex::new(None),
            on_login_success: Mutex::new(None),
            on_disconnected: Mutex::new(None),
            connected: AtomicBool::new(false),
            packets_from_client: AtomicU64::new(0),
            packets_from_server: AtomicU64::new(0),
        });
        let rsa_keys = vec![RsaKey::default_client_key()?];
        Ok(Self {
            config,
            shared,
            rsa_keys,
            inject_tx,
            inject_rx,
        })
    }

    /// Add a fallback RSA key tried after the default one.
    pub fn add_fallback_rsa_key(&mut self, key: RsaKey) {
        self.rsa_keys.push(key);
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shared: self.shared.clone(),
            inject_tx: self.inject_tx.clone(),
        }
    }

    /// Accept loop. One active session at a time; a new connection
    /// preempts the running one (both sockets close within the grace
    /// period).
    pub async fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await.map_err(|e| {
            Error::Setup(format!("cannot bind {}: {e}", self.config.listen_addr))
        })?;
        let mode = match self.config.role {
            SessionRole::Login => "login",
            SessionRole::Game => "game",
        };
        info!(
            mode,
            listen = %self.config.listen_addr,
            upstream = format!("{}:{}", self.config.server_host, self.config.server_port),
            "relay listening"
        );

        let mut pending: Option<TcpStream> = None;
        loop {
            let client = match pending.take() {
                Some(stream) => stream,
                None => {
                    let (stream, peer) = listener.accept().await?;
                    info!(mode, %peer, "client connected");
                    stream
                }
            };

            let server = match TcpStream::connect((
                self.config.server_host.as_str(),
                self.config.server_port,
            ))
            .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    error!(mode, error = %e, "failed to connect to upstream server");
                    continue;
                }
            };

            {
                let mut session = self.shared.session.lock().unwrap();
                session.reset();
                session.ts_server_connected = Some(Instant::now());
            }
            self.shared.connected.store(true, Ordering::Relaxed);
            // Drain injections queued while no session was live.
            while self.inject_rx.try_recv().is_ok() {}

            tokio::select! {
                result = self.run_session(client, server) => {
                    if let Err(e) = result {
                        warn!(mode, error = %e, "session ended with error");
                    }
                }
                accepted = listener.accept() => {
                    if let Ok((stream, peer)) = accepted {
                        warn!(mode, %peer, "new connection while session active, preempting");
                        pending = Some(stream);
                    }
                }
            }

            self.shared.connected.store(false, Ordering::Relaxed);
            info!(mode, "session closed");
            if let Some(hook) = self.shared.on_disconnected.lock().unwrap().as_mut() {
                hook();
            }
        }
    }

    async fn run_session(&mut self, client: TcpStream, server: TcpStream) -> Result<()> {
        match self.config.role {
            SessionRole::Login => self.run_login_session(client, server).await,
            SessionRole::Game => self.run_game_session(client, server).await,
        }
    }

    /// A login session is a single request/response exchange: capture the
    /// XTEA key from the client frame, forward it, rewrite the server
    /// address in the reply, forward that.
    async fn run_login_session(&self, mut client: TcpStream, mut server: TcpStream) -> Result<()> {
        let Some(request) = read_frame(&mut client).await? else {
            warn!("no login frame received");
            return Ok(());
        };
        self.shared.packets_from_client.fetch_add(1, Ordering::Relaxed);

        let keys: Vec<&RsaKey> = self.rsa_keys.iter().collect();
        if let Some(key) = login::capture_xtea_key(&request, &keys) {
            self.shared.session.lock().unwrap().set_key(key);
        }
        write_frame(&mut server, &request).await?;

        let Some(reply) = read_frame(&mut server).await? else {
            warn!("no login reply from server");
            return Ok(());
        };
        self.shared.packets_from_server.fetch_add(1, Ordering::Relaxed);

        let key = self.shared.session.lock().unwrap().key();
        let outgoing = match key {
            Some(key) => login::rewrite_character_list(&reply, &key, self.config.server_ip)
                .unwrap_or_else(|| reply.to_vec()),
            None => reply.to_vec(),
        };
        write_frame(&mut client, &outgoing).await?;
        Ok(())
    }

    async fn run_game_session(&mut self, client: TcpStream, server: TcpStream) -> Result<()> {
        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();
        let client_write = Arc::new(tokio::sync::Mutex::new(client_write));
        let server_write = Arc::new(tokio::sync::Mutex::new(server_write));

        let mut subtasks: JoinSet<Result<()>> = JoinSet::new();
        {
            let shared = self.shared.clone();
            let keys = Arc::new(self.rsa_keys.clone());
            let writer = server_write.clone();
            subtasks.spawn(client_to_server(shared, keys, client_read, writer));
        }
        {
            let shared = self.shared.clone();
            let writer = client_write.clone();
            subtasks.spawn(server_to_client(shared, server_read, writer));
        }

        let login_deadline = tokio::time::sleep(LOGIN_WAIT_TIMEOUT);
        tokio::pin!(login_deadline);

        let result = loop {
            tokio::select! {
                finished = subtasks.join_next() => {
                    // Either direction ending ends the session.
                    break match finished {
                        Some(Ok(result)) => result,
                        _ => Ok(()),
                    };
                }
                queued = self.inject_rx.recv() => {
                    if let Some((target, payload)) = queued {
                        if let Err(e) = self
                            .deliver_injection(target, &payload, &client_write, &server_write)
                            .await
                        {
                            warn!(error = %e, "injection failed");
                        }
                    }
                }
                _ = &mut login_deadline, if !self.shared.logged_in() => {
                    break Err(Error::LoginStall);
                }
            }
        };

        subtasks.abort_all();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while subtasks.join_next().await.is_some() {}
        })
        .await;
        result
    }

    async fn deliver_injection(
        &self,
        target: InjectTarget,
        payload: &[u8],
        client_write: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
        server_write: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    ) -> Result<()> {
        let frame = {
            let session = self.shared.session.lock().unwrap();
            if !session.logged_in() {
                return Err(Error::NotConnected);
            }
            session.encrypt_payload(payload)?
        };
        match target {
            InjectTarget::Server => write_frame(&mut *server_write.lock().await, &frame).await?,
            InjectTarget::Client => write_frame(&mut *client_write.lock().await, &frame).await?,
        }
        debug!(
            opcode = format!("0x{:02X}", payload.first().copied().unwrap_or(0)),
            len = payload.len(),
            ?target,
            "injected payload"
        );
        Ok(())
    }
}

/// Client→server subtask: capture the XTEA key off the first frames, then
/// mirror decrypted client packets to the observer list; always forward
/// the original frame untouched.
async fn client_to_server(
    shared: Arc<RelayShared>,
    keys: Arc<Vec<RsaKey>>,
    mut reader: OwnedReadHalf,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
) -> Result<()> {
    loop {
        let Some(frame) = read_frame(&mut reader).await? else {
            info!("client disconnected");
            return Ok(());
        };
        shared.packets_from_client.fetch_add(1, Ordering::Relaxed);

        if !shared.logged_in() {
            let has_key = shared.session.lock().unwrap().has_key();
            if !has_key {
                let key_refs: Vec<&RsaKey> = keys.iter().collect();
                if let Some(key) = login::capture_xtea_key(&frame, &key_refs) {
                    shared.session.lock().unwrap().set_key(key);
                }
            }
        } else {
            let decrypted = shared.session.lock().unwrap().decrypt_frame(&frame);
            match decrypted {
                Ok(Some(inner)) => shared.notify_client_observers(&inner),
                Ok(None) => debug!(len = frame.len(), "undecryptable client frame"),
                Err(e) => debug!(error = %e, "client frame decrypt error"),
            }
        }

        write_frame(&mut *writer.lock().await, &frame).await?;
    }
}

/// Server→client subtask: flips the session to logged-in on the first
/// reply after key capture, feeds the scanner hook with decrypted
/// payloads, forwards the original frame.
async fn server_to_client(
    shared: Arc<RelayShared>,
    mut reader: OwnedReadHalf,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
) -> Result<()> {
    loop {
        let Some(frame) = read_frame(&mut reader).await? else {
            info!("server disconnected");
            return Ok(());
        };
        shared.packets_from_server.fetch_add(1, Ordering::Relaxed);

        let just_logged_in = {
            let mut session = shared.session.lock().unwrap();
            if !session.logged_in() && session.has_key() {
                session.mark_logged_in();
                true
            } else {
                false
            }
        };
        if just_logged_in {
            let key = shared.session.lock().unwrap().key();
            if let Some(key) = key {
                let words = key.words();
                info!(
                    key = format!(
                        "{:08X} {:08X} {:08X} {:08X}",
                        words[0], words[1], words[2], words[3]
                    ),
                    "game session established"
                );
            }
            if let Some(hook) = shared.on_login_success.lock().unwrap().as_mut() {
                hook();
            }
        }

        if shared.logged_in() {
            let decrypted = shared.session.lock().unwrap().decrypt_frame(&frame);
            match decrypted {
                Ok(Some(inner)) => {
                    if let Some(hook) = shared.server_payload_hook.lock().unwrap().as_mut() {
                        hook(&inner);
                    }
                }
                Ok(None) => debug!(len = frame.len(), "undecryptable server frame"),
                Err(e) => debug!(error = %e, "server frame decrypt error"),
            }
        }

        write_frame(&mut *writer.lock().await, &frame).await?;
    }
}
