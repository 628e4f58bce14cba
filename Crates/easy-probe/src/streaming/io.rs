// easy-probe/Crates/easy-probe/src/streaming/io.rs

//! Executing read plans, either on the calling thread or on a worker pool.

use crate::streaming::plan::StreamingRequest;
use crate::streaming::StreamingError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use threadpool::ThreadPool;

pub type SharedFile = Arc<Mutex<File>>;

/// Open file handles, keyed by path. A path is opened at most once.
#[derive(Default)]
pub struct FileCache {
    handles: HashMap<PathBuf, SharedFile>,
}

/// The state of an asynchronous read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReadStatus {
    InProgress,
    Complete,
    Failed,
    Canceled,
}

/// What a finished read hands back: the staging buffer it filled, and
/// whether every request succeeded.
pub struct CompletedRead {
    pub buffer: Vec<u8>,
    pub result: Result<(), StreamingError>,
}

/// A batch of requests running on a worker thread.
///
/// The handle owns the staging buffer until the read finishes, and hands it
/// back through [ReadHandle::wait].
pub struct ReadHandle {
    path: PathBuf,
    receiver: Receiver<CompletedRead>,
    canceled: Arc<AtomicBool>,
    finished: Option<CompletedRead>,
}

impl FileCache {
    pub fn new() -> FileCache {
        FileCache::default()
    }

    /// Returns the handle for `path`, opening it on first use.
    pub fn get(&mut self, path: &Path) -> Result<SharedFile, StreamingError> {
        if let Some(file) = self.handles.get(path) {
            return Ok(file.clone());
        }
        let file = File::open(path).map_err(|source| StreamingError::Io {
            path: path.to_owned(),
            source,
        })?;
        let file = Arc::new(Mutex::new(file));
        self.handles.insert(path.to_owned(), file.clone());
        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Closes every handle that isn't in use by a pending read.
    pub fn clear(&mut self) {
        self.handles.clear();
    }
}

/// Checks that every request fits in a buffer of `capacity` bytes.
pub fn validate_requests(
    requests: &[StreamingRequest],
    capacity: usize,
) -> Result<(), StreamingError> {
    match requests.iter().find(|request| request.buffer_end() > capacity) {
        Some(request) => Err(StreamingError::RequestOverflow {
            end: request.buffer_end(),
            capacity,
        }),
        None => Ok(()),
    }
}

/// Runs `requests` against `file` in order, filling `buffer`.
///
/// Stops early, with [StreamingError::Canceled], if `canceled` gets set.
pub fn execute_requests(
    path: &Path,
    file: &Mutex<File>,
    requests: &[StreamingRequest],
    buffer: &mut [u8],
    canceled: Option<&AtomicBool>,
) -> Result<(), StreamingError> {
    validate_requests(requests, buffer.len())?;

    let io_error = |source| StreamingError::Io {
        path: path.to_owned(),
        source,
    };
    let mut file = file.lock().map_err(|_| StreamingError::Poisoned(path.to_owned()))?;
    for request in requests {
        if canceled.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(StreamingError::Canceled);
        }
        file.seek(SeekFrom::Start(request.file_offset))
            .map_err(io_error)?;
        file.read_exact(&mut buffer[request.buffer_offset..request.buffer_end()])
            .map_err(io_error)?;
    }
    Ok(())
}

impl ReadHandle {
    /// Queues `requests` on `pool`. The job fills `buffer` and returns it.
    pub fn issue(
        pool: &ThreadPool,
        path: PathBuf,
        file: SharedFile,
        requests: Vec<StreamingRequest>,
        mut buffer: Vec<u8>,
    ) -> ReadHandle {
        let (sender, receiver) = mpsc::channel();
        let canceled = Arc::new(AtomicBool::new(false));

        let job_path = path.clone();
        let job_canceled = canceled.clone();
        pool.execute(move || {
            let result = execute_requests(
                &job_path,
                &file,
                &requests,
                &mut buffer,
                Some(&job_canceled),
            );
            // The handle may have been dropped; there's nobody left to tell.
            let _ = sender.send(CompletedRead { buffer, result });
        });

        ReadHandle {
            path,
            receiver,
            canceled,
            finished: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Polls the read without blocking.
    pub fn status(&mut self) -> ReadStatus {
        if self.finished.is_none() {
            match self.receiver.try_recv() {
                Ok(completed) => self.finished = Some(completed),
                Err(TryRecvError::Empty) => return ReadStatus::InProgress,
                Err(TryRecvError::Disconnected) => return ReadStatus::Failed,
            }
        }
        match self.finished.as_ref().map(|completed| &completed.result) {
            Some(Ok(())) => ReadStatus::Complete,
            Some(Err(StreamingError::Canceled)) => ReadStatus::Canceled,
            _ => ReadStatus::Failed,
        }
    }

    /// Asks the worker to stop between requests. The buffer contents are
    /// undefined afterwards.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Blocks until the read finishes.
    pub fn wait(self) -> CompletedRead {
        if let Some(completed) = self.finished {
            return completed;
        }
        match self.receiver.recv() {
            Ok(mut completed) => {
                if self.canceled.load(Ordering::Relaxed) && completed.result.is_ok() {
                    completed.result = Err(StreamingError::Canceled);
                }
                completed
            }
            Err(_) => CompletedRead {
                buffer: vec![],
                result: Err(StreamingError::WorkerLost(self.path)),
            },
        }
    }
}
