//! Inter-process coordinator (spec §4.A): a file-lock-based global slot
//! pool capping the number of simultaneous browser-driven searches across
//! every process sharing the lock directory.
//!
//! Slot files are named `slot_<i>.lock` and each holds one JSON
//! [`GlobalSlotRecord`]. Mutual exclusion comes from exclusive-create
//! (`O_CREAT|O_EXCL`), not `flock`, because a crashed holder must be
//! reclaimable without that holder ever calling `close()` — the heartbeat
//! timestamp plus a pid-liveness probe is what detects that.

mod pid;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalSlotRecord {
    pub pid: u32,
    pub owner_id: String,
    pub acquired_at: i64,
    pub heartbeat_at: i64,
    pub cwd: String,
}

impl GlobalSlotRecord {
    fn new(owner_id: String) -> Self {
        let now = now_ms();
        Self {
            pid: std::process::id(),
            owner_id,
            acquired_at: now,
            heartbeat_at: now,
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    fn is_stale(&self, lease_window: Duration) -> bool {
        let age_ms = now_ms().saturating_sub(self.heartbeat_at).max(0) as u128;
        age_ms > lease_window.as_millis() || !pid::is_pid_alive(self.pid)
    }
}

/// A held global slot. Dropping it aborts the heartbeat task; callers
/// should still call [`Coordinator::release`] on the happy path so the
/// lock file is unlinked promptly rather than on next reclaim.
pub struct Lease {
    pub slot: usize,
    path: PathBuf,
    owner_id: String,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(h) = self.heartbeat.take() {
            h.abort();
        }
        // Best-effort synchronous unlink for the process-exit path, where
        // there may be no running executor left to drive an async release.
        if let Ok(data) = std::fs::read_to_string(&self.path) {
            if let Ok(record) = serde_json::from_str::<GlobalSlotRecord>(&data) {
                if record.owner_id == self.owner_id {
                    let _ = std::fs::remove_file(&self.path);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    dir: PathBuf,
    slots: usize,
    heartbeat_interval: Duration,
    lease_window: Duration,
}

impl Coordinator {
    /// Sweeps the directory once, unlinking any stale slot so a crashed
    /// predecessor can't permanently block capacity.
    pub async fn new(
        dir: PathBuf,
        slots: usize,
        heartbeat_interval: Duration,
        lease_window: Duration,
    ) -> Self {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("coordinator: failed to create slot dir {:?}: {}", dir, e);
        }

        let coordinator = Self {
            dir,
            slots,
            heartbeat_interval,
            lease_window,
        };
        coordinator.sweep_stale().await;
        coordinator
    }

    async fn sweep_stale(&self) {
        for slot in 1..=self.slots {
            let path = self.slot_path(slot);
            if let Ok(data) = tokio::fs::read_to_string(&path).await {
                match serde_json::from_str::<GlobalSlotRecord>(&data) {
                    Ok(record) if record.is_stale(self.lease_window) => {
                        debug!("coordinator: reclaiming stale slot {}", slot);
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        warn!("coordinator: unparseable lock file {:?}; removing", path);
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }
        }
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("slot_{}.lock", slot))
    }

    /// Try to claim `slot` for `owner_id`. Returns `Ok(true)` if claimed,
    /// `Ok(false)` if held by a live owner, and reclaims (unlinking) a
    /// stale record before returning `Ok(false)` — the caller retries the
    /// same slot once more after that.
    async fn try_claim(&self, path: &Path, owner_id: &str) -> std::io::Result<bool> {
        let record = GlobalSlotRecord::new(owner_id.to_string());
        let body = serde_json::to_vec(&record).unwrap_or_default();

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&body).await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Ok(data) = tokio::fs::read_to_string(path).await {
                    match serde_json::from_str::<GlobalSlotRecord>(&data) {
                        Ok(existing) if existing.is_stale(self.lease_window) => {
                            let _ = tokio::fs::remove_file(path).await;
                        }
                        Ok(_) => {}
                        Err(_) => {
                            let _ = tokio::fs::remove_file(path).await;
                        }
                    }
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn acquire(&self, wait_budget: Duration) -> Option<Lease> {
        let owner_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        let deadline = Instant::now() + wait_budget;

        loop {
            for slot in 1..=self.slots {
                let path = self.slot_path(slot);

                let claimed = match self.try_claim(&path, &owner_id).await {
                    Ok(true) => true,
                    Ok(false) => {
                        // Slot may have just been vacated by the stale-reclaim
                        // above; retry exactly once at this index.
                        matches!(self.try_claim(&path, &owner_id).await, Ok(true))
                    }
                    Err(e) => {
                        warn!("coordinator: slot {} claim error: {}", slot, e);
                        false
                    }
                };

                if claimed {
                    let heartbeat = tokio::spawn(heartbeat_loop(
                        path.clone(),
                        owner_id.clone(),
                        self.heartbeat_interval,
                    ));
                    return Some(Lease {
                        slot,
                        path,
                        owner_id,
                        heartbeat: Some(heartbeat),
                    });
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            let jitter_ms = rand::rng().random_range(50..=200);
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(Duration::from_millis(jitter_ms).min(remaining)).await;
            if remaining.is_zero() {
                return None;
            }
        }
    }

    /// Stops the heartbeat then unlinks the file with a short retry loop
    /// to tolerate transient `EBUSY`/`EPERM`. Idempotent.
    pub async fn release(&self, mut lease: Lease) {
        if let Some(h) = lease.heartbeat.take() {
            h.abort();
        }
        for attempt in 0..5 {
            match tokio::fs::remove_file(&lease.path).await {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    debug!(
                        "coordinator: release retry {} for slot {} ({})",
                        attempt, lease.slot, e
                    );
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn heartbeat_loop(path: PathBuf, owner_id: String, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let Ok(data) = tokio::fs::read_to_string(&path).await else {
            debug!("coordinator: heartbeat target {:?} gone, giving up", path);
            return;
        };
        let Ok(mut record) = serde_json::from_str::<GlobalSlotRecord>(&data) else {
            return;
        };
        if record.owner_id != owner_id {
            debug!("coordinator: slot {:?} taken over by another owner", path);
            return;
        }

        record.heartbeat_at = now_ms();
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_vec(&record).unwrap_or_default();
        if tokio::fs::write(&tmp, &body).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn coordinator(dir: &Path, slots: usize) -> Coordinator {
        Coordinator::new(
            dir.to_path_buf(),
            slots,
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .await
    }

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let c = coordinator(tmp.path(), 2).await;

        let lease = c.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(lease.slot, 1);
        c.release(lease).await;
        assert!(!tmp.path().join("slot_1.lock").exists());
    }

    #[tokio::test]
    async fn exhaustion_returns_none_within_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let c = coordinator(tmp.path(), 1).await;

        let lease = c.acquire(Duration::from_millis(100)).await.unwrap();
        let start = Instant::now();
        let second = c.acquire(Duration::from_millis(150)).await;
        assert!(second.is_none());
        assert!(start.elapsed() >= Duration::from_millis(140));

        c.release(lease).await;
    }

    #[tokio::test]
    async fn releasing_missing_file_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let c = coordinator(tmp.path(), 1).await;
        let lease = c.acquire(Duration::from_millis(100)).await.unwrap();
        tokio::fs::remove_file(tmp.path().join("slot_1.lock"))
            .await
            .unwrap();
        c.release(lease).await; // must not panic
    }

    #[tokio::test]
    async fn stale_record_is_reclaimed_on_construction() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = GlobalSlotRecord {
            pid: u32::MAX - 1, // implausible, treated as dead
            owner_id: "ghost".to_string(),
            acquired_at: 0,
            heartbeat_at: 0,
            cwd: String::new(),
        };
        tokio::fs::create_dir_all(tmp.path()).await.unwrap();
        tokio::fs::write(
            tmp.path().join("slot_1.lock"),
            serde_json::to_vec(&stale).unwrap(),
        )
        .await
        .unwrap();

        let c = coordinator(tmp.path(), 1).await;
        let lease = c.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(lease.slot, 1);
        c.release(lease).await;
    }
}
