//! TCP result listener

use std::io::{ErrorKind, Read};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Listener, ListenerError, Utf8Chunker};
use crate::cancel::ConnectionSignal;
use crate::logs::SharedLog;
use crate::timeout::Deadline;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_millis(200);
/// How long a stopped listener keeps draining a peer that is still writing.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Accepts a single connection from the app and copies it into the test log.
pub struct TcpResultListener {
    bind: IpAddr,
    main_log: SharedLog,
    test_log: SharedLog,
    socket: Option<TcpListener>,
    connection: ConnectionSignal,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TcpResultListener {
    pub fn new(bind: IpAddr, main_log: SharedLog, test_log: SharedLog) -> Self {
        Self {
            bind,
            main_log,
            test_log,
            socket: None,
            connection: ConnectionSignal::new(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

fn accept_loop(
    socket: TcpListener,
    stop: Arc<AtomicBool>,
    connection: ConnectionSignal,
    main_log: SharedLog,
    test_log: SharedLog,
) {
    let stream = loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match socket.accept() {
            Ok((stream, peer)) => {
                main_log.write_line(&format!("Test log server: connection from {}", peer));
                tracing::info!(%peer, "app connected to result listener");
                break stream;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                main_log.write_line(&format!("Test log server: accept failed: {}", e));
                return;
            }
        }
    };

    connection.mark_connected();
    copy_stream(stream, &stop, &main_log, &test_log);
}

/// Copy until EOF. Once stopped, copy until the socket goes quiet or the
/// drain grace runs out, whichever comes first.
fn copy_stream(
    mut stream: TcpStream,
    stop: &AtomicBool,
    main_log: &SharedLog,
    test_log: &SharedLog,
) {
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(READ_TIMEOUT)))
    {
        main_log.write_line(&format!("Test log server: could not configure stream: {}", e));
    }

    let mut chunker = Utf8Chunker::default();
    let mut buf = [0u8; 8192];
    let mut total = 0usize;
    let mut drain: Option<Deadline> = None;
    loop {
        if drain.is_none() && stop.load(Ordering::SeqCst) {
            drain = Some(Deadline::after(DRAIN_GRACE));
        }
        if drain.as_ref().is_some_and(Deadline::is_expired) {
            main_log.write_line("Test log server: peer still writing after stop, closing");
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                test_log.write(&chunker.push(&buf[..n]));
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if drain.is_some() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                main_log.write_line(&format!("Test log server: read failed: {}", e));
                break;
            }
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
    test_log.write(&chunker.finish());
    test_log.flush();
    main_log.write_line(&format!("Test log server: received {} bytes", total));
}

impl Listener for TcpResultListener {
    fn initialize(&mut self) -> Result<u16, ListenerError> {
        let socket = TcpListener::bind((self.bind, 0)).map_err(ListenerError::Bind)?;
        socket.set_nonblocking(true)?;
        let port = socket.local_addr()?.port();
        self.main_log
            .write_line(&format!("Test log server listening on {}:{}", self.bind, port));
        self.socket = Some(socket);
        Ok(port)
    }

    fn start(&mut self) -> Result<(), ListenerError> {
        if self.worker.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or(ListenerError::NotInitialized)?
            .try_clone()?;

        let stop = Arc::clone(&self.stop);
        let connection = self.connection.clone();
        let main_log = self.main_log.clone();
        let test_log = self.test_log.clone();
        self.worker = Some(thread::spawn(move || {
            accept_loop(socket, stop, connection, main_log, test_log)
        }));
        Ok(())
    }

    fn connection(&self) -> ConnectionSignal {
        self.connection.clone()
    }

    fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn dispose(&mut self) {
        self.socket = None;
    }
}
