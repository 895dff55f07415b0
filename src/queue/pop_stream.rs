use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use tokio::sync::oneshot;

use super::header::{Header, Value};
use super::Queue;
use crate::error::{Error, Result};
use crate::mutex::Mutex;

/// Reader side of a two-phase pop. Owns at most one reserved item at a
/// time; chunks stream out one read per call. Dropping the stream before
/// `close` returns the item to the queue.
pub struct PopStream {
    queue: Option<Arc<Mutex<Queue>>>,
    id: u64,
    header: Header,
    chunk_pos: u64,
    tell: u64,
    /// First-read buffer for an inline single-chunk item.
    stashed: Option<Bytes>,
}

/// Outcome of a reserve attempt that is willing to wait.
pub(crate) enum PopAttempt {
    Opened(PopStream),
    /// Nothing to pop; resolves when a push or return arrives.
    MustWait(oneshot::Receiver<()>),
}

impl PopStream {
    /// Reserves the next item, or `None` if the queue has nothing to pop.
    pub fn open(queue: &Arc<Mutex<Queue>>) -> Result<Option<PopStream>> {
        let mut q = queue.lock();
        Self::open_locked(queue, &mut q)
    }

    /// Like [`PopStream::open`], but on an empty queue registers a waiter
    /// under the same lock, so a push can never slip between the check and
    /// the registration.
    pub(crate) fn open_or_wait(queue: &Arc<Mutex<Queue>>) -> Result<PopAttempt> {
        let mut q = queue.lock();
        match Self::open_locked(queue, &mut q)? {
            Some(stream) => Ok(PopAttempt::Opened(stream)),
            None => Ok(PopAttempt::MustWait(q.wait())),
        }
    }

    fn open_locked(queue: &Arc<Mutex<Queue>>, q: &mut Queue) -> Result<Option<PopStream>> {
        let id = match q.pop_begin() {
            Some(id) => id,
            None => return Ok(None),
        };
        let (header, stashed) = match q.pop_read(id) {
            Ok(Value::Spilled(header)) => (header, None),
            Ok(Value::Item(payload)) => {
                let header = Header {
                    beg: 0,
                    end: 1,
                    size: payload.len() as u64,
                };
                (header, Some(payload))
            }
            Err(e) => {
                // hand the reservation back before surfacing the error
                if let Err(close_err) = q.pop_end(id, &Header::default(), false) {
                    warn!("returning item {id} after failed read: {close_err}");
                }
                return Err(e);
            }
        };
        Ok(Some(PopStream {
            queue: Some(queue.clone()),
            id,
            header,
            chunk_pos: header.beg,
            tell: 0,
            stashed,
        }))
    }

    /// Reads the next chunk. Fails with `ErrEof` once the whole item has
    /// been read, or after `close`.
    pub fn read(&mut self) -> Result<Bytes> {
        let queue = self.queue.as_ref().ok_or(Error::ErrEof)?;
        if self.chunk_pos >= self.header.end {
            return Err(Error::ErrEof);
        }
        let chunk = match self.stashed.take() {
            Some(payload) => payload,
            None => queue.lock().read_chunk(self.chunk_pos)?,
        };
        self.chunk_pos += 1;
        self.tell += chunk.len() as u64;
        Ok(chunk)
    }

    /// Completes the pop: erasing deletes the item for good, otherwise it
    /// goes back to the front of the queue. A second close is a no-op.
    pub fn close(&mut self, erase: bool) -> Result<()> {
        let queue = match self.queue.take() {
            Some(queue) => queue,
            None => return Ok(()),
        };
        queue.lock().pop_end(self.id, &self.header, erase)
    }

    /// Total size of the item in bytes.
    pub fn size(&self) -> u64 {
        self.header.size
    }

    /// Bytes read so far.
    pub fn tell(&self) -> u64 {
        self.tell
    }
}

impl Drop for PopStream {
    fn drop(&mut self) {
        if self.queue.is_some() {
            if let Err(e) = self.close(false) {
                warn!("returning open item {} on drop: {}", self.id, e);
            }
        }
    }
}
