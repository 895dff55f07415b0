
pub(crate) mod header;
pub(crate) mod key;
mod pop_stream;
mod push_stream;

pub use pop_stream::PopStream;
pub(crate) use pop_stream::PopAttempt;
pub use push_stream::PushStream;

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::iter::once;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{info, warn};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::journal::Journal;
use header::{decode_value, encode_item, Header, Value};
use key::{Key, KeyType};

/// A durable FIFO over an ordered key-value journal. It boasts these
/// features:
///
/// - an evented wait semantic for queue poppers
/// - items are first reserved, then later deleted or returned to the queue
/// - large items are streamed in a chunk at a time
///
/// The journal holds item keys and chunk keys. Layout of item keys:
///
/// --- < reserved/returned > --- | TAIL | --- < enqueued > --- | HEAD |
///
/// Items are pushed to head and popped from tail. Reserved items are held by
/// a reader and not finished yet; returned items were released by a reader
/// without being deleted, and behave like enqueued items with priority.
/// Chunk keys form a second range: --- < stored > --- | HEAD |
///
/// The engine is not thread-safe; share it behind a lock and call it
/// serially.
pub struct Queue {
    journal: Option<Journal>,
    path: PathBuf,
    sync: bool,
    compact_threshold: u64,

    /// Next id to assign on push.
    queue_head: u64,
    /// Smallest unreserved id. Ids below it are reserved or returned.
    queue_tail: u64,
    /// Next chunk id to reserve.
    chunks_head: u64,

    /// Ids below the tail that were reserved but later returned.
    returned: BTreeSet<u64>,
    /// Ids reserved and not yet closed out.
    items_open: u64,
    /// Bytes deleted since the last compaction.
    bytes_evicted: u64,
    total_flushes: u64,

    waiters: VecDeque<oneshot::Sender<()>>,

    destroy_on_drop: bool,
}

impl Queue {
    /// Opens or creates the queue at `path`, scanning the journal to recover
    /// the head, tail and chunk-range positions.
    pub fn open(path: &Path, sync: bool, compact_threshold: u64) -> Result<Queue> {
        let journal = Journal::open(path, sync)?;

        let mut queue_head = 0;
        let mut queue_tail = 0;
        let mut chunks_head = 0;
        match journal.first_key_at_or_after(Key::item(0))? {
            Some(first) if first.typ == KeyType::Item => {
                queue_tail = first.id;
                match journal.first_key_at_or_after(Key::chunk(0))? {
                    Some(first_chunk) if first_chunk.typ == KeyType::Chunk => {
                        // the last item key sits just before the first chunk key
                        if let Some(last_item) = journal.last_key_before(Key::chunk(0))? {
                            queue_head = last_item.id + 1;
                        }
                        if let Some(last) = journal.last_key()? {
                            chunks_head = last.id + 1;
                        }
                    }
                    _ => {
                        if let Some(last) = journal.last_key()? {
                            queue_head = last.id + 1;
                        }
                    }
                }
            }
            Some(_) => {
                // only chunk keys remain (a streamed push never committed)
                if let Some(last) = journal.last_key()? {
                    chunks_head = last.id + 1;
                }
            }
            None => {}
        }

        Ok(Queue {
            journal: Some(journal),
            path: path.to_path_buf(),
            sync,
            compact_threshold,
            queue_head,
            queue_tail,
            chunks_head,
            returned: BTreeSet::new(),
            items_open: 0,
            bytes_evicted: 0,
            total_flushes: 0,
            waiters: VecDeque::new(),
            destroy_on_drop: false,
        })
    }

    /// Appends an inline item and wakes a waiter.
    pub(crate) fn push(&mut self, payload: &[u8]) -> Result<u64> {
        let value = encode_item(payload);
        self.journal()?.put(Key::item(self.queue_head), &value)?;
        let id = self.queue_head;
        self.queue_head += 1; // move the head only once the write has stuck
        self.wake();
        Ok(id)
    }

    /// Appends a multi-chunk item's header and wakes a waiter.
    pub(crate) fn push_header(&mut self, header: &Header) -> Result<u64> {
        let value = header.marshal();
        self.journal()?.put(Key::item(self.queue_head), &value)?;
        let id = self.queue_head;
        self.queue_head += 1;
        self.wake();
        Ok(id)
    }

    /// Reserves the next item: returned items first (they carry the smallest
    /// ids), then the tail of the enqueued range.
    pub(crate) fn pop_begin(&mut self) -> Option<u64> {
        let id = if let Some(id) = self.returned.pop_first() {
            id
        } else if self.queue_tail < self.queue_head {
            let id = self.queue_tail;
            self.queue_tail += 1;
            id
        } else {
            return None;
        };
        self.items_open += 1;
        Some(id)
    }

    /// Reads a reserved item's value.
    pub(crate) fn pop_read(&self, id: u64) -> Result<Value> {
        let raw = self.journal()?.get(Key::item(id))?.ok_or(Error::ErrNotFound)?;
        decode_value(raw)
    }

    /// Closes out a reservation. Erasing deletes the item key and any chunks
    /// in one atomic batch; otherwise the id goes to the returned set and a
    /// waiter is woken for it.
    pub(crate) fn pop_end(&mut self, id: u64, header: &Header, erase: bool) -> Result<()> {
        self.items_open = self.items_open.saturating_sub(1);

        if erase {
            let chunks = if header.is_multi_chunk() {
                header.beg..header.end
            } else {
                0..0
            };
            self.journal()?
                .delete_atomic(once(Key::item(id)).chain(chunks.map(Key::chunk)))?;

            self.bytes_evicted += header.size;
            if self.bytes_evicted > self.compact_threshold {
                self.compact()?;
                self.bytes_evicted = 0;
            }
        } else {
            self.returned.insert(id);
            self.wake();
        }
        Ok(())
    }

    /// Reserves a contiguous range of chunk ids for one writer.
    pub(crate) fn reserve_chunks(&mut self, count: u64) -> Header {
        let header = Header {
            beg: self.chunks_head,
            end: self.chunks_head + count,
            size: 0,
        };
        self.chunks_head += count;
        header
    }

    pub(crate) fn write_chunk(&self, id: u64, chunk: &[u8]) -> Result<()> {
        self.journal()?.put(Key::chunk(id), chunk)
    }

    pub(crate) fn read_chunk(&self, id: u64) -> Result<Bytes> {
        let raw = self.journal()?.get(Key::chunk(id))?.ok_or(Error::ErrNotFound)?;
        Ok(Bytes::from(raw))
    }

    /// Removes every chunk a header refers to, atomically.
    pub(crate) fn erase_chunks(&mut self, header: &Header) -> Result<()> {
        self.journal()?
            .delete_atomic((header.beg..header.end).map(Key::chunk))
    }

    /// Registers a blocking-pop waiter. The caller arms its own deadline and
    /// retries the pop when the receiver resolves; a receiver dropped at its
    /// deadline is skipped over by the next wake.
    pub(crate) fn wait(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Wakes the first waiter still listening, in arrival order.
    fn wake(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                break;
            }
        }
    }

    /// Number of items available to pop.
    pub fn count(&self) -> u64 {
        (self.queue_head - self.queue_tail) + self.returned.len() as u64
    }

    pub(crate) fn open_transactions(&self) -> u64 {
        self.items_open
    }

    pub(crate) fn total_flushes(&self) -> u64 {
        self.total_flushes
    }

    pub(crate) fn waiter_count(&mut self) -> usize {
        self.waiters.retain(|waiter| !waiter.is_closed());
        self.waiters.len()
    }

    /// Frees the queue's name right away by renaming its directory to a
    /// vacant `<name>.<n>` sibling; the directory itself is removed when the
    /// last holder drops the queue. The store is reopened at the new path so
    /// in-flight reservations can still finish.
    pub(crate) fn destroy(&mut self) -> Result<()> {
        self.journal.take(); // close the store before moving its directory
        let renamed = vacant_sibling(&self.path)?;
        fs::rename(&self.path, &renamed)?;
        info!(
            "destroying queue: {} moved to {}",
            self.path.display(),
            renamed.display()
        );
        self.path = renamed;
        self.journal = Some(Journal::open(&self.path, self.sync)?);
        self.destroy_on_drop = true;
        Ok(())
    }

    /// Discards all contents, leaving an empty journal at the same path.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.journal.take();
        fs::remove_dir_all(&self.path)?;
        self.journal = Some(Journal::open(&self.path, self.sync)?);

        self.queue_head = 0;
        self.queue_tail = 0;
        self.chunks_head = 0;
        self.returned.clear();
        self.items_open = 0;
        self.bytes_evicted = 0;
        self.total_flushes += 1;
        Ok(())
    }

    /// Asks the store to reclaim the deleted span of each range, from its
    /// current low end up to its head.
    fn compact(&mut self) -> Result<()> {
        let journal = self.journal()?;
        if let Some(low) = journal.first_key_at_or_after(Key::item(0))? {
            if low.typ == KeyType::Item {
                journal.compact_range(low, Key::item(self.queue_head));
            }
        }
        if let Some(low) = journal.first_key_at_or_after(Key::chunk(0))? {
            if low.typ == KeyType::Chunk {
                journal.compact_range(low, Key::chunk(self.chunks_head));
            }
        }
        Ok(())
    }

    fn journal(&self) -> Result<&Journal> {
        // empty only if a flush or destroy failed to reopen the store
        self.journal
            .as_ref()
            .ok_or_else(|| Error::ErrIo("journal closed".to_owned()))
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.destroy_on_drop {
            self.journal.take();
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("removing destroyed queue {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Smallest-n `<path>.<n>` sibling that doesn't exist yet.
fn vacant_sibling(path: &Path) -> Result<PathBuf> {
    for n in 0u64.. {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    unreachable!("u64 sibling namespace exhausted")
}
