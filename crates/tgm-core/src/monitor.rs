//! Process lifecycle: lock, load, run, then tear down in a fixed order.

use tokio_util::sync::CancellationToken;

use crate::{
    lock::InstanceLock,
    messaging::port::{DestinationSender, MessageSource},
    pipeline::{DeliveryPipeline, PipelineStats},
    Result,
};

pub struct Monitor<S, D> {
    lock: InstanceLock,
    pipeline: DeliveryPipeline<S, D>,
}

impl<S: MessageSource, D: DestinationSender> Monitor<S, D> {
    pub fn new(lock: InstanceLock, pipeline: DeliveryPipeline<S, D>) -> Self {
        Self { lock, pipeline }
    }

    /// Run until cancelled or a fatal error.
    ///
    /// The lock is taken before anything connects. On the way out the
    /// transports are disconnected, the lock is released and the dedup store
    /// is flushed, whatever the outcome of the run.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<PipelineStats> {
        self.lock.acquire()?;

        let report = self.pipeline.load_store();
        if report.degraded {
            tracing::warn!("dedup history lost; recently forwarded content may repeat");
        }

        let outcome = self.pipeline.run(cancel).await;

        self.pipeline.disconnect().await;
        self.lock.release();
        self.pipeline.flush_store();

        let stats = self.pipeline.stats();
        tracing::info!(
            received = stats.received,
            forwarded = stats.forwarded,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            send_failures = stats.send_failures,
            "monitor shut down"
        );
        outcome.map(|()| stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        dedup::{MemoryStorage, RecordMap},
        errors::Error,
        fingerprint::fingerprint,
        lock::ProcessProbe,
        pipeline::tests::{
            filter, pipeline_cfg, store, text_msg, FakeSender, FakeSession, FakeSource,
        },
    };
    use std::{fs, path::Path, sync::Arc, time::Duration};

    struct AlwaysAlive;

    impl ProcessProbe for AlwaysAlive {
        fn is_process_alive(&self, _pid: u32) -> Option<bool> {
            Some(true)
        }
    }

    fn lock_at(path: &Path) -> InstanceLock {
        InstanceLock::new(
            path,
            Arc::new(AlwaysAlive),
            Arc::new(SystemClock),
            Duration::from_secs(300),
        )
    }

    fn monitor(
        lock: InstanceLock,
        storage: &MemoryStorage,
        sessions: Vec<FakeSession>,
        cancel: &CancellationToken,
    ) -> (Monitor<FakeSource, FakeSender>, FakeSender) {
        let sender = FakeSender::default();
        let pipeline = DeliveryPipeline::new(
            pipeline_cfg(1),
            filter(&[]),
            store(storage),
            FakeSource::new(sessions, cancel.clone()),
            sender.clone(),
        );
        (Monitor::new(lock, pipeline), sender)
    }

    #[tokio::test]
    async fn second_instance_exits_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.lock");
        fs::write(&path, "4242").unwrap();

        let cancel = CancellationToken::new();
        let storage = MemoryStorage::new();
        let sender = FakeSender::default();
        let source = FakeSource::new(vec![FakeSession::ok(vec![])], cancel.clone());
        let connects = source.counters.clone();
        let pipeline = DeliveryPipeline::new(
            pipeline_cfg(1),
            filter(&[]),
            store(&storage),
            source,
            sender.clone(),
        );

        let err = Monitor::new(lock_at(&path), pipeline)
            .run(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { pid: 4242 }));
        assert_eq!(connects.connects(), 0);
        assert_eq!(sender.counters.connects(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242");
    }

    #[tokio::test]
    async fn clean_shutdown_releases_lock_and_flushes_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.lock");
        let cancel = CancellationToken::new();
        let storage = MemoryStorage::new();

        let (m, sender) = monitor(
            lock_at(&path),
            &storage,
            vec![FakeSession::ok(vec![text_msg(10, 1, "open.kakao.com/o/abc")])],
            &cancel,
        );
        let stats = m.run(&cancel).await.unwrap();

        assert_eq!(stats.forwarded, 1);
        assert_eq!(sender.sent().len(), 1);
        assert!(!path.exists());
        assert_eq!(storage.snapshot().unwrap().len(), 1);
        assert!(sender.counters.disconnects() >= 1);
    }

    #[tokio::test]
    async fn fatal_error_still_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.lock");
        let cancel = CancellationToken::new();
        let storage = MemoryStorage::new();

        let (m, _sender) = monitor(
            lock_at(&path),
            &storage,
            vec![FakeSession::refused(Error::Auth("bad token".into()))],
            &cancel,
        );
        let err = m.run(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn content_forwarded_before_a_restart_is_not_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.lock");
        let cancel = CancellationToken::new();

        let mut records = RecordMap::new();
        records.insert(
            fingerprint("open.kakao.com/o/seen").as_str().to_string(),
            "2026-03-31T23:00:00.000000Z".to_string(),
        );
        let storage = MemoryStorage::with_records(records);

        let (m, sender) = monitor(
            lock_at(&path),
            &storage,
            vec![FakeSession::ok(vec![
                text_msg(10, 1, "open.kakao.com/o/seen"),
                text_msg(10, 2, "open.kakao.com/o/new"),
            ])],
            &cancel,
        );
        let stats = m.run(&cancel).await.unwrap();

        assert_eq!(stats.duplicates, 1);
        assert_eq!(sender.sent(), vec!["open.kakao.com/o/new".to_string()]);
        assert_eq!(storage.snapshot().unwrap().len(), 2);
    }
}
