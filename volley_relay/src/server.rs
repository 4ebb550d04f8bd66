// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): wait for the `join` frame, hand
//   the connection over with `InternalEvent::Joined`, then call
//   `framing::read_frame()` in a loop and send `InternalEvent::FrameFrom` to
//   the main thread. On error, EOF or `goodbye`, send
//   `InternalEvent::Disconnected`.
// - **Main thread**: owns the `RoomRegistry`, receives events from the
//   channel and dispatches them. `recv_timeout` bounds how long a stop
//   request can go unnoticed.
//
// The main thread is the only writer to client TCP streams. Reader threads
// only read from streams.
//
// A connection's first frame must be `join`; the reader thread reads it
// with a timeout, so a slow or idle client never holds up the main loop.
// `Joined` is sent before any `FrameFrom` from the same thread, so the
// connection is registered by the time its frames are dispatched.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use volley_protocol::{ChatMessage, ClientMessage, Frame, read_frame};

use crate::rooms::{ConnectionId, RoomRegistry, reject};

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection { stream: TcpStream },
    Joined { id: ConnectionId, room: String, stream: TcpStream },
    FrameFrom { id: ConnectionId, frame: Frame },
    Disconnected { id: ConnectionId },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay exits.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    /// 0 lets the OS pick a free port.
    pub port: u16,
    pub max_watchers_per_room: usize,
    /// How long a new connection may take to send `join`.
    pub join_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 7878,
            max_watchers_per_room: 64,
            join_timeout_ms: 5000,
        }
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address.
pub fn start_relay(config: RelayConfig) -> io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    info!(%addr, "relay listening");
    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let mut registry = RoomRegistry::new(config.max_watchers_per_room);
    let join_timeout = Duration::from_millis(config.join_timeout_ms);
    let mut next_id = 0u64;

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    stream.set_nonblocking(false).ok();
                    stream.set_nodelay(true).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, listener stopping");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(InternalEvent::NewConnection { stream }) => {
                let id = ConnectionId(next_id);
                next_id += 1;
                spawn_reader(id, stream, join_timeout, &tx, &keep_running);
            }
            Ok(InternalEvent::Joined { id, room, stream }) => {
                handle_join(&mut registry, id, room, stream)
            }
            Ok(InternalEvent::FrameFrom { id, frame }) => handle_frame(&mut registry, id, frame),
            Ok(InternalEvent::Disconnected { id }) => registry.leave(id),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    registry.disconnect_all();
    info!("relay stopped");
}

/// Spawn the thread that owns the read half of a new connection.
fn spawn_reader(
    id: ConnectionId,
    stream: TcpStream,
    join_timeout: Duration,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    let tx = tx.clone();
    let keep_running = keep_running.clone();
    thread::spawn(move || {
        if let Some(reader) = await_join(id, stream, join_timeout, &tx) {
            reader_loop(reader, id, tx, keep_running);
        }
    });
}

/// Read the `join` frame and hand the connection to the main thread.
/// Returns the read half when the connection joined.
fn await_join(
    id: ConnectionId,
    stream: TcpStream,
    join_timeout: Duration,
    tx: &Sender<InternalEvent>,
) -> Option<BufReader<TcpStream>> {
    stream.set_read_timeout(Some(join_timeout)).ok();
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let room = match read_frame(&mut reader).map(|f| f.parse_json::<ClientMessage>()) {
        Ok(Some(Ok(ClientMessage::Join { room }))) => room,
        Ok(_) => {
            let _ = reject(stream, "first message must be join".into());
            return None;
        }
        Err(e) => {
            debug!(?id, error = %e, "connection dropped before join");
            return None;
        }
    };
    stream.set_read_timeout(None).ok();
    tx.send(InternalEvent::Joined { id, room, stream }).ok()?;
    Some(reader)
}

/// Register a connection that sent `join`. On refusal the socket is closed,
/// which ends its reader thread.
fn handle_join(registry: &mut RoomRegistry, id: ConnectionId, room: String, stream: TcpStream) {
    let write_stream = match stream.try_clone() {
        Ok(write_stream) => write_stream,
        Err(e) => {
            warn!(?id, error = %e, "could not clone stream");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };
    if let Err(reason) = registry.join(id, room, write_stream) {
        warn!(?id, %reason, "join rejected");
        let _ = reject(stream, reason);
    }
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    id: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_frame(&mut reader) {
            Ok(frame) => {
                if let Some(Ok(ClientMessage::Goodbye)) = frame.parse_json::<ClientMessage>() {
                    break;
                }
                if tx.send(InternalEvent::FrameFrom { id, frame }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    debug!(?id, error = %e, "read failed");
                }
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { id });
}

fn handle_frame(registry: &mut RoomRegistry, id: ConnectionId, frame: Frame) {
    let text = match frame {
        Frame::Binary(bytes) => {
            registry.record_run(id, bytes);
            return;
        }
        Frame::Text(text) => text,
    };
    let msg = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(?id, error = %e, "unparseable client message");
            return;
        }
    };
    match msg {
        ClientMessage::Watch => registry.watch(id),
        ClientMessage::Options { options } => registry.record_options(id, options),
        ClientMessage::Chat {
            which_player_side,
            chat_message,
        } => registry.record_chat(
            id,
            ChatMessage {
                which_player_side,
                chat_message,
            },
        ),
        ClientMessage::Join { .. } => warn!(?id, "duplicate join ignored"),
        // Handled in the reader loop.
        ClientMessage::Goodbye => {}
    }
}
