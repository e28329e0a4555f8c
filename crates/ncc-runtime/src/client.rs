//! Three-thread blocking client
//!
//! No multiplexer. One blocking socket shared by:
//!
//! - **reader**: recv, decode, ack, until the peer hangs up
//! - **writer**: parked on the session serializer, sends whatever is queued
//! - **input**: turns local lines into VariableLength frames
//!
//! Whichever of reader or writer sees the peer go away invalidates the
//! session, closes the serializer and shuts the socket down, which releases
//! the other one. No thread is killed. The descriptor is closed once, after
//! all three have been joined.

use std::io::BufRead;
use std::net::{Shutdown, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread;

use ncc_core::frame::encode_variable_length;
use ncc_core::io::IoStatus;
use ncc_core::log::LogLevel;
use ncc_core::{log_debug, log_errno, log_error, log_info};

use crate::config::ClientConfig;
use crate::console::run_input_loop;
use crate::error::{NetError, NetResult};
use crate::session::{Session, SessionStats};
use crate::socket;

/// A connected client. Drive it with [`TcpClient::run`].
pub struct TcpClient {
    config: ClientConfig,
    fd: RawFd,
    peer: SocketAddrV4,
    session: Arc<Session>,
}

impl TcpClient {
    /// Connect to the configured host and port with Nagle disabled.
    pub fn connect(config: ClientConfig) -> NetResult<TcpClient> {
        config.validate()?;
        let (fd, peer) = socket::connect(&config.hostname, config.remote_port)?;
        if let Err(errno) = socket::set_nodelay(fd) {
            let _ = socket::close(fd);
            return Err(NetError::Socket { op: "setsockopt(TCP_NODELAY)", errno });
        }

        let session = Arc::new(Session::new());
        session.activate(fd, peer.to_string());
        log_info!("{}|Connected|{}", fd, peer);

        Ok(TcpClient { config, fd, peer, session })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            session: Arc::clone(&self.session),
        }
    }

    /// Run reader, writer and input threads until the peer hangs up and
    /// `input` is exhausted, then close the socket.
    ///
    /// The input thread only notices a hangup when its next line arrives
    /// or at end of input.
    pub fn run<R>(mut self, input: R) -> NetResult<()>
    where
        R: BufRead + Send,
    {
        let fd = self.fd;
        let session: &Session = &self.session;
        let read_max = self.config.read_threshold;
        let write_max = self.config.write_threshold;

        let spawned = thread::scope(|scope| {
            let started = thread::Builder::new()
                .name("ncc-reader".into())
                .spawn_scoped(scope, move || read_loop(fd, session, read_max))
                .and_then(|_| {
                    thread::Builder::new()
                        .name("ncc-writer".into())
                        .spawn_scoped(scope, move || write_loop(fd, session, write_max))
                })
                .and_then(|_| {
                    thread::Builder::new()
                        .name("ncc-input".into())
                        .spawn_scoped(scope, move || input_loop(fd, session, input))
                });
            if let Err(e) = &started {
                log_error!("{}|Failed to start client threads: {}", fd, e);
                stop(fd, session);
            }
            started.map(drop)
        });

        if let Err(errno) = socket::close(fd) {
            log_errno!(LogLevel::Error, errno, "{}|Failed to close", fd);
        } else {
            log_info!("{}|Closed|{}", fd, self.peer);
        }
        self.fd = -1;
        spawned.map_err(NetError::Thread)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if self.fd >= 0 {
            let _ = socket::close(self.fd);
            self.fd = -1;
        }
    }
}

/// Invalidate the session and release both blocking threads.
fn stop(fd: RawFd, session: &Session) {
    session.deactivate();
    session.serializer().close();
    if let Err(errno) = socket::shutdown(fd, Shutdown::Both) {
        log_debug!("{}|shutdown: {}", fd, errno.desc());
    }
}

fn read_loop(fd: RawFd, session: &Session, max_bytes: usize) {
    let peer = session.peer().unwrap_or_default();
    loop {
        let (_, status) = session.pull(fd, max_bytes);
        session.handle_frames(fd);
        if status == IoStatus::PeerHungUp {
            break;
        }
    }
    log_info!("{}|Hangup|{}", fd, peer);
    stop(fd, session);
}

fn write_loop(fd: RawFd, session: &Session, max_bytes: usize) {
    while let Some((_, status)) = session.wait_and_push(fd, max_bytes) {
        if status == IoStatus::PeerHungUp {
            let record = session.last_write();
            log_info!("{}|Write failed|errno={}", fd, record.errno_code());
            stop(fd, session);
            break;
        }
    }
    log_debug!("{}|Writer done", fd);
}

fn input_loop<R: BufRead>(fd: RawFd, session: &Session, input: R) {
    let result = run_input_loop(input, |line| {
        session
            .enqueue_then(&encode_variable_length(line), |_| ())
            .is_some()
    });
    match result {
        Ok(n) => log_debug!("{}|Input done|{} lines", fd, n),
        Err(e) => log_error!("{}|Input failed: {}", fd, e),
    }
}

/// Cross-thread handle to a running [`TcpClient`].
#[derive(Clone)]
pub struct ClientHandle {
    session: Arc<Session>,
}

impl ClientHandle {
    /// Queue `text` as one VariableLength frame. `false` once disconnected.
    pub fn send(&self, text: &[u8]) -> bool {
        self.session
            .enqueue_then(&encode_variable_length(text), |_| ())
            .is_some()
    }

    /// Shut the socket down; the reader observes a hangup and the client
    /// winds down on its own.
    pub fn shutdown(&self) {
        self.session.with_active_fd(|fd| {
            if let Err(errno) = socket::shutdown(fd, Shutdown::Both) {
                log_debug!("{}|shutdown: {}", fd, errno.desc());
            }
        });
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_active()
    }

    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncc_core::frame::{encode_ack, Header, Message, MsgType, ACK_FRAME_SIZE, HEADER_SIZE};
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;

    #[test]
    fn test_client_sends_line_and_times_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut frame = vec![0u8; HEADER_SIZE + 5];
            conn.read_exact(&mut frame).unwrap();

            let header = Header::decode(&frame).unwrap();
            conn.write_all(&encode_ack(&header)).unwrap();

            // Expect nothing back for the Ack; the client closes first
            let mut rest = Vec::new();
            conn.read_to_end(&mut rest).unwrap();
            (frame, rest)
        });

        let client = TcpClient::connect(ClientConfig::new("127.0.0.1", port)).unwrap();
        let handle = client.handle();
        let runner = std::thread::spawn(move || client.run(Cursor::new(b"hello\n".to_vec())));

        for _ in 0..500 {
            if handle.stats().acks_received() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(handle.stats().acks_received(), 1);
        assert!(handle.stats().last_round_trip_us().is_some());

        handle.shutdown();
        runner.join().unwrap().unwrap();
        assert!(!handle.is_connected());
        assert!(!handle.send(b"too late"));

        let (frame, rest) = peer.join().unwrap();
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::VariableLength { text: b"hello" }
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_client_acks_server_frames_and_ends_on_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(&encode_variable_length(b"from server")).unwrap();
            let mut ack = vec![0u8; ACK_FRAME_SIZE];
            conn.read_exact(&mut ack).unwrap();
            ack
            // conn dropped: client reader sees the hangup
        });

        let client = TcpClient::connect(ClientConfig::new("127.0.0.1", port)).unwrap();
        let session = Arc::clone(client.session());
        client.run(Cursor::new(Vec::new())).unwrap();

        let ack = peer.join().unwrap();
        assert_eq!(
            Message::decode(&ack).unwrap(),
            Message::Ack {
                original: Header::new(HEADER_SIZE + 11, MsgType::VariableLength.tag())
            }
        );
        assert_eq!(session.stats().acks_sent(), 1);
        assert!(!session.is_active());
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        match TcpClient::connect(ClientConfig::new("127.0.0.1", port)) {
            Err(NetError::Socket { op: "connect", .. }) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
