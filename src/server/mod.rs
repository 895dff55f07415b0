mod conn;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::net::TcpListener;
use waitgroup::WaitGroup;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mutex::Mutex;
use crate::registry::QueueMap;
use crate::stats::Stats;

use conn::Connection;

/// Loads the queues, then accepts and serves connections until told to
/// shut down.
pub struct Server {
    listener: TcpListener,
    queues: Arc<Mutex<QueueMap>>,
    stats: Arc<Stats>,
    chunk_size: usize,
}

impl Server {
    /// Reloads queues from the data directory and binds the listener.
    pub async fn bind(config: &Config) -> Result<Server> {
        let queues = QueueMap::new(&config.data, config.sync, config.compact_threshold)?;
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|e| Error::Other(format!("can't listen on port {}: {}", config.port, e)))?;
        Ok(Server {
            listener,
            queues: Arc::new(Mutex::new(queues)),
            stats: Arc::new(Stats::new()),
            chunk_size: config.chunk_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, then stops accepting
    /// and drains the connections still being served.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Server {
            listener,
            queues,
            stats,
            chunk_size,
        } = self;

        let wg = WaitGroup::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!("accepted {peer}");
                        let conn = Connection::new(socket, queues.clone(), stats.clone(), chunk_size);
                        let worker = wg.worker();
                        tokio::spawn(async move {
                            conn.run().await;
                            drop(worker);
                        });
                    }
                    Err(e) => error!("accept: {e}"),
                },
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        info!("draining connections");
        wg.wait().await;
        Ok(())
    }
}
