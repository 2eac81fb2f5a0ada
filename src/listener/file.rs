//! Shared-file result listener

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Listener, ListenerError, Utf8Chunker};
use crate::cancel::ConnectionSignal;
use crate::logs::SharedLog;

const TAIL_POLL: Duration = Duration::from_millis(100);

/// Tails a file the app appends its results to.
///
/// The first byte to appear counts as the app connecting.
pub struct FileResultListener {
    path: PathBuf,
    main_log: SharedLog,
    test_log: SharedLog,
    initialized: bool,
    connection: ConnectionSignal,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileResultListener {
    pub fn new(path: impl Into<PathBuf>, main_log: SharedLog, test_log: SharedLog) -> Self {
        Self {
            path: path.into(),
            main_log,
            test_log,
            initialized: false,
            connection: ConnectionSignal::new(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Tail {
    offset: u64,
    chunker: Utf8Chunker,
}

impl Tail {
    /// Copy bytes appended since the last read. Returns how many were copied.
    fn read_new(&mut self, path: &Path, test_log: &SharedLog) -> std::io::Result<u64> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            // Truncated underneath us; start over
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;
        test_log.write(&self.chunker.push(&buf));
        Ok(buf.len() as u64)
    }
}

fn tail_loop(
    path: PathBuf,
    stop: Arc<AtomicBool>,
    connection: ConnectionSignal,
    main_log: SharedLog,
    test_log: SharedLog,
) {
    let mut tail = Tail {
        offset: 0,
        chunker: Utf8Chunker::default(),
    };
    loop {
        // Read once more after a stop request so nothing written before it is lost
        let stopping = stop.load(Ordering::SeqCst);
        match tail.read_new(&path, &test_log) {
            Ok(n) if n > 0 && !connection.is_connected() => {
                main_log.write_line(&format!(
                    "Test log file {} received first results",
                    path.display()
                ));
                connection.mark_connected();
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                main_log.write_line(&format!("Test log file {}: {}", path.display(), e));
            }
        }
        if stopping {
            break;
        }
        thread::sleep(TAIL_POLL);
    }
    test_log.write(&tail.chunker.finish());
    test_log.flush();
    main_log.write_line(&format!("Test log file: copied {} bytes", tail.offset));
}

impl Listener for FileResultListener {
    fn initialize(&mut self) -> Result<u16, ListenerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&self.path)?;
        self.main_log
            .write_line(&format!("Test log file: {}", self.path.display()));
        self.initialized = true;
        Ok(0)
    }

    fn start(&mut self) -> Result<(), ListenerError> {
        if !self.initialized {
            return Err(ListenerError::NotInitialized);
        }
        if self.worker.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }

        let path = self.path.clone();
        let stop = Arc::clone(&self.stop);
        let connection = self.connection.clone();
        let main_log = self.main_log.clone();
        let test_log = self.test_log.clone();
        self.worker = Some(thread::spawn(move || {
            tail_loop(path, stop, connection, main_log, test_log)
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
        if self.initialized {
            let _ = fs::remove_file(&self.path);
            self.initialized = false;
        }
    }
}
