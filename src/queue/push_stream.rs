use std::sync::Arc;

use log::warn;

use super::header::Header;
use super::Queue;
use crate::error::{Error, Result};
use crate::mutex::Mutex;

/// Writer side of a push. A single-chunk item commits on its one write; a
/// multi-chunk item streams into a reserved chunk range and commits its
/// header on the last write, so a partial push is never visible. Dropping
/// the stream before the commit cancels it.
pub struct PushStream {
    queue: Option<Arc<Mutex<Queue>>>,
    header: Header,
    chunk_pos: u64,
    id: Option<u64>,
}

impl PushStream {
    /// Starts a push of `chunk_count` chunks, reserving a chunk range when
    /// the item spills past a single chunk.
    pub fn open(queue: &Arc<Mutex<Queue>>, chunk_count: u64) -> PushStream {
        let header = if chunk_count > 1 {
            queue.lock().reserve_chunks(chunk_count)
        } else {
            Header::default()
        };
        PushStream {
            queue: Some(queue.clone()),
            header,
            chunk_pos: header.beg,
            id: None,
        }
    }

    /// Writes one chunk. The write that fills the reserved range commits
    /// the item; any write past it fails with `ErrEof`.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let queue = self.queue.clone().ok_or(Error::ErrEof)?;
        if self.chunk_pos == self.header.end {
            return Err(Error::ErrEof);
        }

        if self.header.is_multi_chunk() {
            queue.lock().write_chunk(self.chunk_pos, chunk)?;
            self.header.size += chunk.len() as u64;
            self.chunk_pos += 1;
            if self.chunk_pos == self.header.end {
                self.id = Some(queue.lock().push_header(&self.header)?);
                self.queue = None;
            }
        } else {
            self.id = Some(queue.lock().push(chunk)?);
            self.header.size += chunk.len() as u64;
            self.chunk_pos += 1;
            self.queue = None;
        }
        Ok(())
    }

    /// Abandons the push, reclaiming any reserved chunks. Only valid while
    /// the stream is still open.
    pub fn cancel(&mut self) -> Result<()> {
        let queue = self.queue.take().ok_or(Error::ErrEof)?;
        if self.header.is_multi_chunk() {
            queue.lock().erase_chunks(&self.header)?;
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn tell(&self) -> u64 {
        self.header.size
    }

    /// Id the item committed under, once the last chunk has been written.
    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        if self.queue.is_some() {
            if let Err(e) = self.cancel() {
                warn!("canceling open push on drop: {}", e);
            }
        }
    }
}
