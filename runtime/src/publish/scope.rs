//! Structured concurrency for a run's pushes.
//!
//! Every push task of a run is spawned into one [`PublishScope`]. The first
//! task that fails is kept as the run's error, the failure is broadcast so
//! the build workflow can stop early, and joining the scope cancels every
//! sibling still in flight.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rosforge_core::error::{ForgeError, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// What a push task published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    /// A single-platform image under its architecture tag.
    Arch,
    /// A multi-architecture manifest list.
    Manifest,
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushKind::Arch => f.write_str("arch"),
            PushKind::Manifest => f.write_str("manifest"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRecord {
    pub kind: PushKind,
    pub registry: String,
    pub reference: String,
}

/// Outcome of a run whose every scheduled push completed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub builds: usize,
    pub pushes: Vec<PushRecord>,
}

impl RunReport {
    pub fn arch_pushes(&self) -> usize {
        self.count(PushKind::Arch)
    }

    pub fn manifest_pushes(&self) -> usize {
        self.count(PushKind::Manifest)
    }

    fn count(&self, kind: PushKind) -> usize {
        self.pushes.iter().filter(|p| p.kind == kind).count()
    }
}

/// Task group joining all pushes of a run.
pub struct PublishScope {
    tasks: Mutex<JoinSet<Option<PushRecord>>>,
    first_failure: Arc<Mutex<Option<ForgeError>>>,
    failed_tx: Arc<watch::Sender<bool>>,
    failed_rx: watch::Receiver<bool>,
}

impl PublishScope {
    pub fn new() -> Self {
        let (failed_tx, failed_rx) = watch::channel(false);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            first_failure: Arc::new(Mutex::new(None)),
            failed_tx: Arc::new(failed_tx),
            failed_rx,
        }
    }

    /// Spawn a push task into the scope. Must be called inside a runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<PushRecord>> + Send + 'static,
    {
        let first_failure = self.first_failure.clone();
        let failed_tx = self.failed_tx.clone();
        self.tasks.lock().spawn(async move {
            match task.await {
                Ok(record) => Some(record),
                Err(e) => {
                    let mut slot = first_failure.lock();
                    if slot.is_none() {
                        tracing::error!(error = %e, "Push failed, cancelling remaining pushes");
                        *slot = Some(e);
                    }
                    drop(slot);
                    failed_tx.send_replace(true);
                    None
                }
            }
        });
    }

    /// Resolves once any task in the scope has failed.
    pub async fn failed(&self) {
        let mut rx = self.failed_rx.clone();
        // The sender lives as long as the scope, so this only returns on failure.
        let _ = rx.wait_for(|failed| *failed).await;
    }

    pub fn has_failed(&self) -> bool {
        *self.failed_rx.borrow()
    }

    /// Cancel every task still in flight.
    pub fn abort(&self) {
        self.tasks.lock().abort_all();
    }

    /// Wait for all tasks, including ones spawned while waiting.
    ///
    /// On the first failure the remaining tasks are aborted and that
    /// failure is returned.
    pub async fn join(&self) -> Result<Vec<PushRecord>> {
        let mut records = Vec::new();
        loop {
            let mut set = std::mem::take(&mut *self.tasks.lock());
            if set.is_empty() {
                break;
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {
                        set.abort_all();
                        self.abort();
                        return Err(self.take_failure());
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        set.abort_all();
                        self.abort();
                        return Err(ForgeError::Other(format!("push task panicked: {}", e)));
                    }
                }
            }
        }

        if self.has_failed() {
            return Err(self.take_failure());
        }
        Ok(records)
    }

    fn take_failure(&self) -> ForgeError {
        self.first_failure
            .lock()
            .take()
            .unwrap_or_else(|| ForgeError::Cancelled("publish scope failed".to_string()))
    }
}

impl Default for PublishScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(reference: &str) -> PushRecord {
        PushRecord {
            kind: PushKind::Arch,
            registry: "docker.io".to_string(),
            reference: reference.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_collects_records() {
        let scope = PublishScope::new();
        scope.spawn(async { Ok(record("a")) });
        scope.spawn(async { Ok(record("b")) });

        let mut refs: Vec<String> = scope
            .join()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.reference)
            .collect();
        refs.sort();
        assert_eq!(refs, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_scope_joins() {
        assert!(PublishScope::new().join().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_cancels_siblings() {
        let scope = PublishScope::new();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = finished.clone();
        scope.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(record("slow"))
        });
        scope.spawn(async {
            Err(ForgeError::FatalPublish {
                registry: "docker.io".to_string(),
                reference: "docker.io/sshawn/noetic:latest".to_string(),
                attempts: 3,
                message: "denied".to_string(),
            })
        });

        let err = scope.join().await.unwrap_err();
        assert!(matches!(err, ForgeError::FatalPublish { attempts: 3, .. }));
        assert!(scope.has_failed());
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_resolves_on_failure() {
        let scope = PublishScope::new();
        scope.spawn(async { Err(ForgeError::Other("boom".to_string())) });

        tokio::time::timeout(Duration::from_secs(5), scope.failed())
            .await
            .unwrap();
        assert!(matches!(scope.join().await, Err(ForgeError::Other(_))));
    }

    #[test]
    fn test_report_counts() {
        let report = RunReport {
            builds: 2,
            pushes: vec![
                record("a"),
                PushRecord {
                    kind: PushKind::Manifest,
                    registry: "docker.io".to_string(),
                    reference: "m".to_string(),
                },
            ],
        };
        assert_eq!(report.arch_pushes(), 1);
        assert_eq!(report.manifest_pushes(), 1);
    }
}
