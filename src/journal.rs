use std::path::{Path, PathBuf};

use rocksdb::{DBRawIterator, Options, WriteBatch, WriteOptions, DB};

use crate::error::Result;
use crate::queue::key::{compare_keys, Key, COMPARATOR_NAME};

/// The ordered key-value store backing one queue, one directory per queue.
///
/// Confines the store API to this module: typed-key point ops, atomic
/// batched deletes, raw-iterator seeks for the recovery scan, and range
/// compaction. With `sync` set, every commit also syncs the WAL.
pub(crate) struct Journal {
    db: DB,
    path: PathBuf,
    sync: bool,
}

impl Journal {
    pub(crate) fn open(path: &Path, sync: bool) -> Result<Journal> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_comparator(COMPARATOR_NAME, Box::new(|a: &[u8], b: &[u8]| compare_keys(a, b)));

        let db = DB::open(&opts, path)?;
        Ok(Journal {
            db,
            path: path.to_path_buf(),
            sync,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get(&self, key: Key) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.marshal())?)
    }

    pub(crate) fn put(&self, key: Key, value: &[u8]) -> Result<()> {
        Ok(self.db.put_opt(key.marshal(), value, &self.write_opts())?)
    }

    /// Deletes every key in one atomic batch.
    pub(crate) fn delete_atomic(&self, keys: impl IntoIterator<Item = Key>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for key in keys {
            batch.delete(key.marshal());
        }
        Ok(self.db.write_opt(batch, &self.write_opts())?)
    }

    /// First key at or after `key` in comparator order.
    pub(crate) fn first_key_at_or_after(&self, key: Key) -> Result<Option<Key>> {
        let mut it = self.db.raw_iterator();
        it.seek(key.marshal());
        current_key(&it)
    }

    /// Greatest key overall.
    pub(crate) fn last_key(&self) -> Result<Option<Key>> {
        let mut it = self.db.raw_iterator();
        it.seek_to_last();
        current_key(&it)
    }

    /// Greatest key strictly before `key`.
    pub(crate) fn last_key_before(&self, key: Key) -> Result<Option<Key>> {
        let mut it = self.db.raw_iterator();
        it.seek(key.marshal());
        if it.valid() {
            it.prev();
        } else {
            it.seek_to_last();
        }
        current_key(&it)
    }

    /// Asks the store to reclaim space from `[from, to]`.
    pub(crate) fn compact_range(&self, from: Key, to: Key) {
        self.db.compact_range(Some(from.marshal()), Some(to.marshal()));
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync);
        opts
    }
}

fn current_key(it: &DBRawIterator<'_>) -> Result<Option<Key>> {
    if !it.valid() {
        it.status()?;
        return Ok(None);
    }
    match it.key() {
        Some(raw) => Ok(Some(Key::unmarshal(raw)?)),
        None => Ok(None),
    }
}
