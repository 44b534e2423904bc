//! Batched asynchronous file writer.
//!
//! Producers hand small writes to a bounded in-memory queue; a dedicated
//! worker thread drains the queue into a `BufWriter` and flushes it
//! periodically, on request, and on close. This is the backend behind the
//! async segment durability mode: appends cost a queue send instead of a
//! syscall.
//!
//! Ordering: each producer's writes reach the queue in call order; across
//! producers the order is queue-send order (first come, first served). A
//! `flush` that returns `Ok` covers every write previously acknowledged to
//! the same caller.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Pending-buffer queue depth.
const QUEUE_CAPACITY: usize = 10;

/// Worker flushes the buffered writer at this cadence even when idle.
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Initial capacity of pooled buffers.
const POOL_BUFFER_CAPACITY: usize = 4096;

/// Free-list depth; excess returned buffers are dropped.
const POOL_SLOTS: usize = 16;

/// Bounded free-list of reusable write buffers.
///
/// `get` prefers a recycled buffer and falls back to a fresh allocation;
/// `put` recycles until the list is full and drops the rest.
#[derive(Debug)]
struct BufferPool {
    free_tx: Sender<BytesMut>,
    free_rx: Receiver<BytesMut>,
}

impl BufferPool {
    fn new() -> Self {
        let (free_tx, free_rx) = bounded(POOL_SLOTS);
        Self { free_tx, free_rx }
    }

    fn get(&self) -> BytesMut {
        match self.free_rx.try_recv() {
            Ok(mut buf) => {
                buf.clear();
                buf
            }
            Err(_) => BytesMut::with_capacity(POOL_BUFFER_CAPACITY),
        }
    }

    fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.free_tx.try_send(buf);
    }
}

struct Shutdown {
    done_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct AsyncWriter {
    queue_tx: Sender<BytesMut>,
    flush_tx: Sender<Sender<io::Result<()>>>,
    done_rx: Receiver<()>,
    pool: Arc<BufferPool>,
    shutdown: Mutex<Option<Shutdown>>,
}

impl AsyncWriter {
    /// Spawn the worker over `file` with a buffered writer of
    /// `buffer_size` bytes.
    pub fn new(file: File, buffer_size: usize) -> Result<Self> {
        let (queue_tx, queue_rx) = bounded::<BytesMut>(QUEUE_CAPACITY);
        let (flush_tx, flush_rx) = bounded::<Sender<io::Result<()>>>(0);
        let (done_tx, done_rx) = bounded::<()>(0);

        let pool = Arc::new(BufferPool::new());
        let worker_pool = Arc::clone(&pool);
        let worker_done = done_rx.clone();
        let writer = BufWriter::with_capacity(buffer_size, file);

        let handle = thread::Builder::new()
            .name("rill-async-writer".into())
            .spawn(move || worker_loop(writer, queue_rx, flush_rx, worker_done, worker_pool))
            .map_err(Error::Io)?;

        Ok(Self {
            queue_tx,
            flush_tx,
            done_rx,
            pool,
            shutdown: Mutex::new(Some(Shutdown { done_tx, handle })),
        })
    }

    /// Copy `data` into a pooled buffer and enqueue it for the worker.
    ///
    /// Returns the number of bytes accepted. Blocks while the queue is full;
    /// fails with `WriteAfterClose` once the writer has been closed.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::WriteAfterClose);
        }

        let mut buf = self.pool.get();
        buf.extend_from_slice(data);

        select! {
            send(self.queue_tx, buf) -> res => match res {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    self.pool.put(e.into_inner());
                    Err(Error::WriteAfterClose)
                }
            },
            recv(self.done_rx) -> _ => Err(Error::WriteAfterClose),
        }
    }

    /// Ask the worker to flush its buffered writer and wait for the result.
    pub fn flush(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::WriteAfterClose);
        }

        let (reply_tx, reply_rx) = bounded(1);

        select! {
            send(self.flush_tx, reply_tx) -> res => match res {
                Ok(()) => match reply_rx.recv() {
                    Ok(flushed) => flushed.map_err(Error::Io),
                    Err(_) => Err(Error::WriteAfterClose),
                },
                Err(_) => Err(Error::WriteAfterClose),
            },
            recv(self.done_rx) -> _ => Err(Error::WriteAfterClose),
        }
    }

    /// Signal the worker, drain outstanding work, and join it. Idempotent.
    pub fn close(&self) -> Result<()> {
        let shutdown = self.shutdown.lock().take();
        if let Some(Shutdown { done_tx, handle }) = shutdown {
            drop(done_tx);
            if handle.join().is_err() {
                tracing::error!("async writer worker panicked during close");
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

fn worker_loop(
    mut writer: BufWriter<File>,
    queue_rx: Receiver<BytesMut>,
    flush_rx: Receiver<Sender<io::Result<()>>>,
    done_rx: Receiver<()>,
    pool: Arc<BufferPool>,
) {
    let ticker = tick(FLUSH_INTERVAL);

    loop {
        select! {
            recv(queue_rx) -> msg => match msg {
                Ok(buf) => {
                    write_buffer(&mut writer, &buf);
                    pool.put(buf);
                }
                Err(_) => {
                    // All producers gone without an explicit close.
                    drain(&mut writer, &queue_rx, &flush_rx, &pool);
                    return;
                }
            },
            recv(ticker) -> _ => {
                if let Err(e) = writer.flush() {
                    tracing::error!("async writer periodic flush failed: {e}");
                }
            },
            recv(flush_rx) -> req => {
                if let Ok(reply) = req {
                    // Writes enqueued before this request was sent must be
                    // covered by the flush, so empty the queue first.
                    while let Ok(buf) = queue_rx.try_recv() {
                        write_buffer(&mut writer, &buf);
                        pool.put(buf);
                    }
                    let _ = reply.send(writer.flush());
                }
            },
            recv(done_rx) -> _ => {
                drain(&mut writer, &queue_rx, &flush_rx, &pool);
                return;
            },
        }
    }
}

/// Consume whatever is still queued, answer pending flush requests, then
/// flush one final time.
fn drain(
    writer: &mut BufWriter<File>,
    queue_rx: &Receiver<BytesMut>,
    flush_rx: &Receiver<Sender<io::Result<()>>>,
    pool: &BufferPool,
) {
    loop {
        if let Ok(buf) = queue_rx.try_recv() {
            write_buffer(writer, &buf);
            pool.put(buf);
            continue;
        }
        if let Ok(reply) = flush_rx.try_recv() {
            let _ = reply.send(writer.flush());
            continue;
        }
        if let Err(e) = writer.flush() {
            tracing::error!("async writer final flush failed: {e}");
        }
        return;
    }
}

fn write_buffer(writer: &mut BufWriter<File>, buf: &BytesMut) {
    // Write errors are swallowed here after logging: the producer has
    // already been acknowledged and there is no completion channel to
    // carry the failure back.
    if let Err(e) = writer.write_all(buf) {
        tracing::error!("async writer lost a {} byte write: {e}", buf.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn new_writer(dir: &tempfile::TempDir) -> (AsyncWriter, std::path::PathBuf) {
        let path = dir.path().join("out.log");
        let file = File::create(&path).unwrap();
        (AsyncWriter::new(file, 8192).unwrap(), path)
    }

    #[test]
    fn write_then_flush_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, path) = new_writer(&dir);

        assert_eq!(writer.write(b"hello ").unwrap(), 6);
        assert_eq!(writer.write(b"world").unwrap(), 5);
        writer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        writer.close().unwrap();
    }

    #[test]
    fn close_drains_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, path) = new_writer(&dir);

        for i in 0..10u8 {
            writer.write(&[i]).unwrap();
        }
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), (0..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn periodic_flush_runs_without_explicit_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, path) = new_writer(&dir);

        writer.write(b"tick").unwrap();
        thread::sleep(FLUSH_INTERVAL * 3);

        assert_eq!(std::fs::read(&path).unwrap(), b"tick");
        writer.close().unwrap();
    }

    #[test]
    fn operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _path) = new_writer(&dir);

        writer.close().unwrap();
        assert!(matches!(writer.write(b"x"), Err(Error::WriteAfterClose)));
        assert!(matches!(writer.flush(), Err(Error::WriteAfterClose)));
        // Close stays idempotent.
        writer.close().unwrap();
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, path) = new_writer(&dir);

        for i in 0..100u8 {
            writer.write(&[i]).unwrap();
        }
        writer.close().unwrap();

        assert_eq!(
            std::fs::read(&path).unwrap(),
            (0..100u8).collect::<Vec<_>>()
        );
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, path) = new_writer(&dir);
        let writer = Arc::new(writer);

        let mut handles = Vec::new();
        for tag in 0..8u8 {
            let writer = Arc::clone(&writer);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    writer.write(&[tag; 8]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        writer.close().unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 8 * 100 * 8);
        let mut counts = [0usize; 8];
        for byte in contents {
            counts[byte as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c == 100 * 8));
    }
}
