// Transport adapters: the relay client and the direct peer channel.
//
// Both are owned values handed to a session; nothing here is global. Each
// adapter only moves bytes. Parsing wire runs and applying them to queues is
// the driver's job, so a reader thread never touches session state.
//
// `RelayClient` architecture:
// - `open()` performs the TCP connect and sends `join` on the calling
//   thread, then spawns a background reader thread.
// - The reader thread calls `read_frame()` in a loop and pushes each frame
//   into an `mpsc` channel. On EOF or a read error it pushes one `Closed`
//   event and exits.
// - The owner holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox without blocking.
//
// `PeerChannel` stands in for the players' direct data channel. An
// in-memory pair (`PeerChannel::pair()`) connects two players in one
// process, which is how local play and the end-to-end tests run. Like a data
// channel it delivers binary input runs and text control messages (option
// changes, chat lines), in order, and reports closure once.
//
// See also: `session.rs` (the consumers), `volley_protocol::framing` (the
// byte layout on the relay stream).

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};
use volley_protocol::{
    ChatMessage, ClientMessage, Frame, GameOptions, WireError, WireRun, read_frame, write_frame,
};

/// Something that arrived on a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Frame),
    /// The other end went away. Emitted once; `reason` is set when the close
    /// was caused by an error.
    Closed { reason: Option<String> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode control message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not build wire run: {0}")]
    Wire(#[from] WireError),
    #[error("transport is closed")]
    Closed,
}

/// A channel that carries wire runs and control messages. Sessions are
/// generic over it.
pub trait InputTransport {
    fn send_run(&mut self, run: &WireRun) -> Result<(), TransportError>;

    /// Send a JSON control message as a text frame.
    fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError>;

    /// Drain everything received since the last call. Never blocks.
    fn poll(&mut self) -> Vec<TransportEvent>;

    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Relay client
// ---------------------------------------------------------------------------

/// TCP client for the relay.
pub struct RelayClient {
    writer: Option<BufWriter<TcpStream>>,
    inbox: Receiver<TransportEvent>,
    _reader_thread: JoinHandle<()>,
    room: String,
}

impl RelayClient {
    /// Connect to the relay at `addr` and join `room`.
    pub fn open(addr: &str, room: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);
        send_msg(&mut writer, &ClientMessage::Join { room: room.into() })?;
        debug!(addr, room, "joined relay room");

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader, tx));

        Ok(Self {
            writer: Some(writer),
            inbox: rx,
            _reader_thread: reader_thread,
            room: room.into(),
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Subscribe as a spectator. The relay answers with `history`.
    pub fn watch(&mut self) -> Result<(), TransportError> {
        self.send_message(&ClientMessage::Watch)
    }

    pub fn send_options(&mut self, options: GameOptions) -> Result<(), TransportError> {
        self.send_message(&ClientMessage::Options { options })
    }

    pub fn send_chat(&mut self, chat: &ChatMessage) -> Result<(), TransportError> {
        self.send_message(&ClientMessage::from(chat.clone()))
    }
}

impl InputTransport for RelayClient {
    fn send_run(&mut self, run: &WireRun) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        write_frame(writer, &Frame::Binary(run.to_bytes()))?;
        Ok(())
    }

    fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        send_msg(writer, msg)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.inbox.try_iter().collect()
    }

    /// Send `goodbye` and shut the socket down. The reader thread then sees
    /// EOF and reports `Closed`.
    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = send_msg(&mut writer, &ClientMessage::Goodbye);
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_msg(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) -> Result<(), TransportError> {
    write_frame(writer, &Frame::json(msg)?)?;
    Ok(())
}

fn reader_loop(mut reader: BufReader<TcpStream>, tx: Sender<TransportEvent>) {
    let reason = loop {
        match read_frame(&mut reader) {
            Ok(frame) => {
                if tx.send(TransportEvent::Frame(frame)).is_err() {
                    return; // Owner dropped the receiver
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break None,
            Err(e) => {
                warn!(error = %e, "relay stream failed");
                break Some(e.to_string());
            }
        }
    };
    let _ = tx.send(TransportEvent::Closed { reason });
}

// ---------------------------------------------------------------------------
// Peer channel
// ---------------------------------------------------------------------------

/// One end of a direct player-to-player channel.
pub struct PeerChannel {
    outgoing: Option<Sender<Frame>>,
    incoming: Receiver<Frame>,
    closed_reported: bool,
}

impl PeerChannel {
    /// Two connected in-memory ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        let a = Self {
            outgoing: Some(a_tx),
            incoming: a_rx,
            closed_reported: false,
        };
        let b = Self {
            outgoing: Some(b_tx),
            incoming: b_rx,
            closed_reported: false,
        };
        (a, b)
    }
}

impl PeerChannel {
    fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        outgoing.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl InputTransport for PeerChannel {
    fn send_run(&mut self, run: &WireRun) -> Result<(), TransportError> {
        self.send_frame(Frame::Binary(run.to_bytes()))
    }

    fn send_message(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        self.send_frame(Frame::json(msg)?)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        loop {
            match self.incoming.try_recv() {
                Ok(frame) => events.push(TransportEvent::Frame(frame)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed_reported {
                        self.closed_reported = true;
                        events.push(TransportEvent::Closed { reason: None });
                    }
                    break;
                }
            }
        }
        events
    }

    fn close(&mut self) {
        self.outgoing = None;
    }
}

#[cfg(test)]
mod tests {
    use volley_protocol::{DiscreteInput, PlayerId, SyncCounter};

    use super::*;

    fn run(start: u8) -> WireRun {
        let inputs = vec![DiscreteInput::NEUTRAL; 2];
        WireRun::new(PlayerId::ONE, SyncCounter::new(start), inputs).unwrap()
    }

    #[test]
    fn peer_pair_delivers_in_both_directions() {
        let (mut a, mut b) = PeerChannel::pair();
        a.send_run(&run(0)).unwrap();
        a.send_run(&run(2)).unwrap();
        b.send_run(&run(9)).unwrap();

        let at_b = b.poll();
        assert_eq!(
            at_b,
            vec![
                TransportEvent::Frame(Frame::Binary(run(0).to_bytes())),
                TransportEvent::Frame(Frame::Binary(run(2).to_bytes())),
            ]
        );
        assert_eq!(a.poll().len(), 1);
        assert!(a.poll().is_empty());
    }

    #[test]
    fn peer_control_messages_keep_their_place_among_runs() {
        let (mut a, mut b) = PeerChannel::pair();
        let chat = ChatMessage {
            which_player_side: 1,
            chat_message: "hi".into(),
        };
        a.send_run(&run(0)).unwrap();
        a.send_message(&ClientMessage::from(chat.clone())).unwrap();
        a.send_run(&run(2)).unwrap();

        let events = b.poll();
        assert_eq!(events.len(), 3);
        match &events[1] {
            TransportEvent::Frame(frame) => {
                let msg: ClientMessage = frame.parse_json().unwrap().unwrap();
                assert_eq!(msg, ClientMessage::from(chat));
            }
            other => panic!("expected a text frame, got {other:?}"),
        }
        assert_eq!(events[2], TransportEvent::Frame(Frame::Binary(run(2).to_bytes())));
    }

    #[test]
    fn peer_close_is_reported_once() {
        let (mut a, mut b) = PeerChannel::pair();
        a.send_run(&run(0)).unwrap();
        a.close();
        assert!(matches!(a.send_run(&run(2)), Err(TransportError::Closed)));

        let events = b.poll();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], TransportEvent::Closed { reason: None });
        assert!(b.poll().is_empty());
    }

    #[test]
    fn peer_drop_closes_the_other_end() {
        let (a, mut b) = PeerChannel::pair();
        drop(a);
        assert_eq!(b.poll(), vec![TransportEvent::Closed { reason: None }]);
        assert!(matches!(b.send_run(&run(0)), Err(TransportError::Closed)));
    }
}
