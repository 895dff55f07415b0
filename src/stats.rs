use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Process-wide counters, accumulated for the life of the process. Every
/// component bumps these through a shared handle; reads are only for the
/// STATS command.
#[derive(Debug)]
pub struct Stats {
    alive_since: Instant,
    items_enqueued: AtomicU64,
    items_dequeued: AtomicU64,
    conns_opened: AtomicU64,
    conns_closed: AtomicU64,
    cmd_gets: AtomicU64,
    cmd_sets: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            alive_since: Instant::now(),
            items_enqueued: AtomicU64::new(0),
            items_dequeued: AtomicU64::new(0),
            conns_opened: AtomicU64::new(0),
            conns_closed: AtomicU64::new(0),
            cmd_gets: AtomicU64::new(0),
            cmd_sets: AtomicU64::new(0),
        }
    }

    pub(crate) fn inc_items_enqueued(&self) {
        self.items_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_items_dequeued(&self) {
        self.items_dequeued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_conns_opened(&self) {
        self.conns_opened.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_conns_closed(&self) {
        self.conns_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_cmd_gets(&self) {
        self.cmd_gets.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_cmd_sets(&self) {
        self.cmd_sets.fetch_add(1, Ordering::SeqCst);
    }

    /// Formats the process counters as memcache `STAT` lines. Per-queue
    /// lines and the closing `END` are the caller's business.
    pub(crate) fn write(&self, out: &mut String) {
        let uptime = self.alive_since.elapsed().as_secs();
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let enqueued = self.items_enqueued.load(Ordering::SeqCst);
        let dequeued = self.items_dequeued.load(Ordering::SeqCst);
        let opened = self.conns_opened.load(Ordering::SeqCst);
        let closed = self.conns_closed.load(Ordering::SeqCst);

        let _ = write!(out, "STAT uptime {uptime}\r\n");
        let _ = write!(out, "STAT time {time}\r\n");
        let _ = write!(out, "STAT version {}\r\n", env!("CARGO_PKG_VERSION"));
        let _ = write!(out, "STAT curr_items {}\r\n", enqueued.saturating_sub(dequeued));
        let _ = write!(out, "STAT total_items {enqueued}\r\n");
        let _ = write!(out, "STAT curr_connections {}\r\n", opened.saturating_sub(closed));
        let _ = write!(out, "STAT total_connections {opened}\r\n");
        let _ = write!(out, "STAT cmd_get {}\r\n", self.cmd_gets.load(Ordering::SeqCst));
        let _ = write!(out, "STAT cmd_set {}\r\n", self.cmd_sets.load(Ordering::SeqCst));
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new()
    }
}
