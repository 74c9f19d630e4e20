//! Senders for data centers other than the home one.
//!
//! Each DC gets at most one [`MtpSender`], created on first use and closed
//! once it has sat idle for the release delay.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::errors::ConnectionError;
use crate::sender::MtpSender;

struct Entry {
    sender: MtpSender,
    release: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<i32, Entry>>>;

pub(crate) struct ExportedPool {
    entries: Entries,
    release_after: Duration,
}

impl ExportedPool {
    pub fn new(release_after: Duration) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), release_after }
    }

    /// The sender for `dc_id`, connecting a new one with `connect` if there
    /// is none. Restarts the idle timer.
    pub async fn borrow<F, Fut>(&self, dc_id: i32, connect: F) -> Result<MtpSender, ConnectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MtpSender, ConnectionError>>,
    {
        let mut entries = self.entries.lock().await;
        let sender = match entries.remove(&dc_id) {
            Some(entry) => {
                entry.release.abort();
                entry.sender
            }
            None => {
                tracing::info!("[client] opening exported sender for DC{dc_id}");
                connect().await?
            }
        };
        let release = self.schedule_release(dc_id);
        entries.insert(dc_id, Entry { sender: sender.clone(), release });
        Ok(sender)
    }

    /// Restart the idle timer of `dc_id`, if it still has a sender.
    pub async fn touch(&self, dc_id: i32) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&dc_id) {
            entry.release.abort();
            entry.release = self.schedule_release(dc_id);
        }
    }

    /// Forget and close the sender for `dc_id`.
    pub async fn drop_sender(&self, dc_id: i32) {
        let entry = self.entries.lock().await.remove(&dc_id);
        if let Some(entry) = entry {
            entry.release.abort();
            entry.sender.disconnect().await;
        }
    }

    /// Close every sender.
    pub async fn clear(&self) {
        let entries: Vec<Entry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.release.abort();
            entry.sender.disconnect().await;
        }
    }

    pub async fn contains(&self, dc_id: i32) -> bool {
        self.entries.lock().await.contains_key(&dc_id)
    }

    fn schedule_release(&self, dc_id: i32) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let after = self.release_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let entry = entries.lock().await.remove(&dc_id);
            if let Some(entry) = entry {
                tracing::info!("[client] releasing idle sender for DC{dc_id}");
                entry.sender.disconnect().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{SenderConfig, SenderHooks};

    fn idle_sender(dc_id: i32) -> MtpSender {
        MtpSender::new(None, SenderConfig { dc_id, is_main: false, ..Default::default() }, SenderHooks::default())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_senders_are_released() {
        let pool = ExportedPool::new(Duration::from_secs(30));
        pool.borrow(4, || async { Ok(idle_sender(4)) }).await.unwrap();
        assert!(pool.contains(4).await);

        tokio::time::sleep(Duration::from_secs(20)).await;
        pool.touch(4).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(pool.contains(4).await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!pool.contains(4).await);
    }

    #[tokio::test]
    async fn second_borrow_reuses_the_sender() {
        let pool = ExportedPool::new(Duration::from_secs(30));
        let first = pool.borrow(3, || async { Ok(idle_sender(3)) }).await.unwrap();
        let second = pool
            .borrow(3, || async { Err(ConnectionError::NotConnected) })
            .await
            .unwrap();
        assert_eq!(first.dc_id(), second.dc_id());
        pool.clear().await;
        assert!(!pool.contains(3).await);
    }
}
