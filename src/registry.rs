use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::error::Result;
use crate::mutex::Mutex;
use crate::queue::Queue;

/// Maps queue names to live queues. Loads whatever the data directory
/// already holds at construction and creates queues on first reference.
/// Not thread-safe on its own; callers serialize access behind a lock.
pub struct QueueMap {
    data_path: PathBuf,
    sync: bool,
    compact_threshold: u64,
    queues: HashMap<String, Arc<Mutex<Queue>>>,
}

impl QueueMap {
    pub fn new(data_path: &Path, sync: bool, compact_threshold: u64) -> Result<QueueMap> {
        let mut queues = HashMap::new();
        for entry in fs::read_dir(data_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let queue = Queue::open(&entry.path(), sync, compact_threshold)?;
            info!("reloaded queue {} ({} items)", name, queue.count());
            queues.insert(name, Arc::new(Mutex::new(queue)));
        }
        Ok(QueueMap {
            data_path: data_path.to_path_buf(),
            sync,
            compact_threshold,
            queues,
        })
    }

    /// Returns the named queue, creating it on first reference.
    pub fn get(&mut self, name: &str) -> Result<Arc<Mutex<Queue>>> {
        if let Some(queue) = self.queues.get(name) {
            return Ok(queue.clone());
        }
        let queue = Queue::open(&self.data_path.join(name), self.sync, self.compact_threshold)?;
        let queue = Arc::new(Mutex::new(queue));
        self.queues.insert(name.to_owned(), queue.clone());
        Ok(queue)
    }

    /// Destroys the named queue's storage, freeing the name immediately;
    /// holders of the old queue can still finish their transactions. With
    /// `recreate`, a fresh empty queue takes the name's place.
    pub fn erase(&mut self, name: &str, recreate: bool) -> Result<()> {
        if let Some(queue) = self.queues.remove(name) {
            queue.lock().destroy()?;
        }
        if recreate {
            self.get(name)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Mutex<Queue>>)> {
        self.queues.iter()
    }
}
