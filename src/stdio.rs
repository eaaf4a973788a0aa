//! Stream plumbing for container IO
//!
//! A container's stdout and stderr fan out to any number of sinks (log
//! files, attached clients) through a [`Broadcaster`]. Stdin rides an
//! in-memory [`pipe`]: the read half feeds the supervised process, the
//! write half is handed to clients.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

struct Sink {
    writer: Box<dyn Write + Send>,
    persistent: bool,
}

/// Write fan-out over a dynamic set of sinks.
///
/// Writers that fail are dropped from the set; a broadcast itself never
/// fails. Cloning shares the underlying sink set.
#[derive(Clone, Default)]
pub struct Broadcaster {
    writers: Arc<Mutex<Vec<Sink>>>,
}

impl Broadcaster {
    /// Create an empty broadcaster
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink for the current run; dropped again on
    /// [`close`](Self::close)
    pub fn add_writer(&self, writer: Box<dyn Write + Send>) {
        self.attach(writer, false);
    }

    /// Attach a sink that survives [`close`](Self::close), such as a
    /// log file that must keep collecting output across restarts
    pub fn tee(&self, writer: Box<dyn Write + Send>) {
        self.attach(writer, true);
    }

    fn attach(&self, writer: Box<dyn Write + Send>, persistent: bool) {
        if let Ok(mut writers) = self.writers.lock() {
            writers.push(Sink { writer, persistent });
        }
    }

    /// Flush every sink and detach the per-run ones. Teed sinks stay
    /// attached for the next run.
    pub fn close(&self) {
        if let Ok(mut writers) = self.writers.lock() {
            for sink in writers.iter_mut() {
                let _ = sink.writer.flush();
            }
            writers.retain(|sink| sink.persistent);
        }
    }
}

impl Write for Broadcaster {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| io::Error::other("broadcaster lock poisoned"))?;
        writers.retain_mut(|sink| match sink.writer.write_all(buf) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("dropping broadcast sink after write failure: {}", e);
                false
            }
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| io::Error::other("broadcaster lock poisoned"))?;
        for sink in writers.iter_mut() {
            let _ = sink.writer.flush();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.writers.lock().map(|w| w.len()).unwrap_or(0);
        f.debug_struct("Broadcaster").field("writers", &count).finish()
    }
}

struct PipeState {
    buf: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
}

struct PipeShared {
    state: Mutex<PipeState>,
    cond: Condvar,
}

/// Read half of an in-memory pipe
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Write half of an in-memory pipe
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Create a synchronous in-memory pipe pair.
///
/// Reads block until data arrives or the writer is dropped, which reads
/// as EOF. Writes after the reader is dropped fail with `BrokenPipe`.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            buf: VecDeque::new(),
            writer_closed: false,
            reader_closed: false,
        }),
        cond: Condvar::new(),
    });
    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        while state.buf.is_empty() && !state.writer_closed {
            state = self
                .shared
                .cond
                .wait(state)
                .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        }
        if state.buf.is_empty() {
            return Ok(0); // EOF
        }
        let n = buf.len().min(state.buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.reader_closed = true;
        }
        self.shared.cond.notify_all();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        if state.reader_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
        }
        state.buf.extend(buf);
        self.shared.cond.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.writer_closed = true;
        }
        self.shared.cond.notify_all();
    }
}
