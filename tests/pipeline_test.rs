//! Upload pipeline integration tests
//!
//! Runs the full pipeline (enumeration, worker pool, retries, accounting)
//! against an in-memory object store that can be told to fail.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use funnel::config::UploadConfig;
    use funnel::enumerate::EnumerateError;
    use funnel::pipeline::{
        run_pipeline, JobOutcome, MemorySink, Pipeline, PipelineError, RunSummary,
    };
    use funnel::s3::{ObjectStore, TransportError};
    use funnel::upload::FileUploader;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::fs::File;
    use tokio_util::sync::CancellationToken;

    const BUCKET: &str = "test-bucket";

    /// Object store that fails the first `failures` puts of every key.
    ///
    /// `put_delay` slows every put down. With `replace_with_dir` set, a
    /// successful put swaps the local file (the key is its path) for a
    /// directory so that removing it afterwards fails.
    #[derive(Default)]
    struct ScriptedStore {
        failures: usize,
        put_delay: Duration,
        replace_with_dir: bool,
        calls: Mutex<HashMap<String, usize>>,
        stored: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                ..Default::default()
            })
        }

        fn ok() -> Arc<Self> {
            Self::failing(0)
        }

        fn always_failing() -> Arc<Self> {
            Self::failing(usize::MAX)
        }

        fn slow(put_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                put_delay,
                ..Default::default()
            })
        }

        fn undeletable() -> Arc<Self> {
            Arc::new(Self {
                replace_with_dir: true,
                ..Default::default()
            })
        }

        fn calls_for(&self, key: &str) -> usize {
            self.calls.lock().get(key).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().values().sum()
        }

        fn stored(&self) -> Vec<String> {
            let mut keys = self.stored.lock().clone();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            _body: File,
        ) -> Result<(), TransportError> {
            assert_eq!(bucket, BUCKET);
            let call = {
                let mut calls = self.calls.lock();
                let n = calls.entry(key.to_string()).or_default();
                *n += 1;
                *n
            };
            if !self.put_delay.is_zero() {
                tokio::time::sleep(self.put_delay).await;
            }
            if call <= self.failures {
                return Err(TransportError::Request(format!(
                    "injected failure {call} for {key}"
                )));
            }
            if self.replace_with_dir {
                std::fs::remove_file(key).unwrap();
                std::fs::create_dir(key).unwrap();
            }
            self.stored.lock().push(key.to_string());
            Ok(())
        }
    }

    fn config(concurrency: i64) -> UploadConfig {
        UploadConfig {
            concurrency,
            key_template: "uploads/{{ fileName }}".to_string(),
            poll_interval_ms: 20,
            ..Default::default()
        }
    }

    fn pipeline(
        config: UploadConfig,
        store: Arc<ScriptedStore>,
    ) -> (Pipeline, Arc<MemorySink>) {
        let uploader = Arc::new(FileUploader::new(store, BUCKET));
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(config, uploader)
            .unwrap()
            .with_sink(sink.clone());
        (pipeline, sink)
    }

    fn write_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    async fn run(
        pipeline: &Pipeline,
        paths: &[PathBuf],
    ) -> Result<RunSummary, PipelineError> {
        tokio::time::timeout(
            Duration::from_secs(10),
            pipeline.run(paths, CancellationToken::new()),
        )
        .await
        .expect("pipeline should finish")
    }

    // ========================================================================
    // TEST: Happy paths
    // ========================================================================

    #[tokio::test]
    async fn test_single_file_upload() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::ok();
        let (pipeline, sink) = pipeline(config(4), store.clone());

        let summary = run(&pipeline, &[file.clone()]).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                enqueued: 1,
                completed: 1,
                failed: 0
            }
        );
        let events = sink.with_outcome(JobOutcome::Completed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key.as_deref(), Some("uploads/a.txt"));
        assert!(events[0].errors.is_empty());
        assert_eq!(store.stored(), vec!["uploads/a.txt"]);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_directory_upload_skips_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt");
        write_file(dir.path(), "b.txt");
        let store = ScriptedStore::ok();
        let (pipeline, sink) = pipeline(config(2), store.clone());

        let summary = run(&pipeline, &[dir.path().to_path_buf()]).await.unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(sink.events().len(), 2);
        assert_eq!(store.stored(), vec!["uploads/a.txt", "uploads/b.txt"]);
    }

    #[tokio::test]
    async fn test_nested_directories_and_multiple_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        write_file(&nested, "deep.txt");
        let single = write_file(dir.path(), "top.txt");

        let store = ScriptedStore::ok();
        let mut cfg = config(3);
        cfg.key_template = "{{ filePath }}".to_string();
        let (pipeline, _) = pipeline(cfg, store.clone());

        let summary = run(&pipeline, &[nested.clone(), single.clone()])
            .await
            .unwrap();

        assert_eq!(summary.completed, 2);
        let mut expected = vec![
            nested.join("deep.txt").display().to_string(),
            single.display().to_string(),
        ];
        expected.sort();
        assert_eq!(store.stored(), expected);
    }

    #[tokio::test]
    async fn test_many_files_are_all_accounted() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..25 {
            write_file(dir.path(), &format!("file-{i:02}.bin"));
        }
        let store = ScriptedStore::failing(1);
        let (pipeline, sink) = pipeline(config(8), store.clone());

        let summary = run(&pipeline, &[dir.path().to_path_buf()]).await.unwrap();

        assert_eq!(summary.enqueued, 25);
        assert_eq!(summary.completed + summary.failed, summary.enqueued);
        assert_eq!(summary.completed, 25);
        for event in sink.events() {
            assert_eq!(event.errors.len(), 1);
        }
        assert_eq!(store.total_calls(), 50);
    }

    // ========================================================================
    // TEST: Retries
    // ========================================================================

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::always_failing();
        let (pipeline, sink) = pipeline(config(2), store.clone());

        let summary = run(&pipeline, &[file]).await.unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 1);
        assert!(sink.with_outcome(JobOutcome::Completed).is_empty());

        let failed = sink.with_outcome(JobOutcome::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].errors.len(), 5);
        assert!(failed[0].errors[0].contains("injected failure 1"));
        assert!(failed[0].errors[4].contains("injected failure 5"));
        assert_eq!(store.calls_for("uploads/a.txt"), 5);
    }

    #[tokio::test]
    async fn test_retry_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::failing(2);
        let (pipeline, sink) = pipeline(config(2), store.clone());

        let summary = run(&pipeline, &[file]).await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        let completed = sink.with_outcome(JobOutcome::Completed);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].errors.len(), 2);
        assert_eq!(store.calls_for("uploads/a.txt"), 3);
    }

    #[tokio::test]
    async fn test_configured_attempt_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::always_failing();
        let mut cfg = config(1);
        cfg.retry.max_attempts = 2;
        let (pipeline, sink) = pipeline(cfg, store.clone());

        run(&pipeline, &[file]).await.unwrap();

        assert_eq!(sink.with_outcome(JobOutcome::Failed)[0].errors.len(), 2);
        assert_eq!(store.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_backoff_delays_retries() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::always_failing();
        let mut cfg = config(1);
        cfg.retry.max_attempts = 3;
        cfg.retry.base_delay_ms = 20;
        cfg.retry.jitter = false;
        let (pipeline, _) = pipeline(cfg, store.clone());

        let started = Instant::now();
        let summary = run(&pipeline, &[file]).await.unwrap();

        assert_eq!(summary.failed, 1);
        // 20ms before the second attempt, 40ms before the third
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    // ========================================================================
    // TEST: Delete after upload
    // ========================================================================

    #[tokio::test]
    async fn test_delete_after_upload() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.txt");
        let b = write_file(dir.path(), "b.txt");
        let store = ScriptedStore::ok();
        let mut cfg = config(2);
        cfg.delete_after_upload = true;
        let (pipeline, _) = pipeline(cfg, store.clone());

        let summary = run(&pipeline, &[dir.path().to_path_buf()]).await.unwrap();

        assert_eq!(summary.completed, 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let mut cfg = config(1);
        cfg.delete_after_upload = true;
        let (pipeline, _) = pipeline(cfg, ScriptedStore::always_failing());

        run(&pipeline, &[file.clone()]).await.unwrap();
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_delete_failure_fails_job_without_reupload() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::undeletable();
        let mut cfg = config(1);
        cfg.delete_after_upload = true;
        cfg.key_template = "{{ absoluteFilePath }}".to_string();
        let (pipeline, sink) = pipeline(cfg, store.clone());

        let summary = run(&pipeline, &[file.clone()]).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                enqueued: 1,
                completed: 0,
                failed: 1
            }
        );
        assert_eq!(store.total_calls(), 1);
        let failed = sink.with_outcome(JobOutcome::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].errors.len(), 1);
        assert!(failed[0].errors[0].contains("failed to delete file after upload"));
    }

    // ========================================================================
    // TEST: Validation
    // ========================================================================

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let store = ScriptedStore::ok();
        let (pipeline, sink) = pipeline(config(1), store.clone());

        let err = run(&pipeline, &[]).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoPathsProvided));
        assert_eq!(store.total_calls(), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_bounds() {
        for bad in [0, -1, 101] {
            let uploader = Arc::new(FileUploader::new(ScriptedStore::ok(), BUCKET));
            let err = Pipeline::new(config(bad), uploader).err().unwrap();
            assert!(matches!(err, PipelineError::InvalidConcurrency(n) if n == bad));
        }

        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        for good in [1, 100] {
            let (pipeline, _) = pipeline(config(good), ScriptedStore::ok());
            let summary = run(&pipeline, &[file.clone()]).await.unwrap();
            assert_eq!(summary.completed, 1);
        }
    }

    #[tokio::test]
    async fn test_run_pipeline_validates_before_compiling() {
        let uploader = Arc::new(FileUploader::new(ScriptedStore::ok(), BUCKET));
        let mut cfg = config(0);
        cfg.key_template = "{{ nope }}".to_string();

        let err = run_pipeline(&[], &cfg, uploader.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoPathsProvided));

        let err = run_pipeline(&["x".into()], &cfg, uploader.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConcurrency(0)));

        cfg.concurrency = 1;
        let err = run_pipeline(&["x".into()], &cfg, uploader, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Template(_)));
    }

    #[tokio::test]
    async fn test_multi_path_watch_is_rejected() {
        let mut cfg = config(1);
        cfg.watch = true;
        let store = ScriptedStore::ok();
        let (pipeline, _) = pipeline(cfg, store.clone());

        let err = run(&pipeline, &["a".into(), "b".into()]).await.unwrap_err();

        assert!(matches!(err, PipelineError::MultiPathWatchUnsupported));
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_path_is_enumeration_error() {
        let (pipeline, _) = pipeline(config(1), ScriptedStore::ok());
        let err = run(&pipeline, &["/definitely/not/here".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Enumerate(EnumerateError::Stat { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_on_job_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let mut cfg = config(1);
        cfg.fail_on_job_failure = true;
        let (pipeline, _) = pipeline(cfg, ScriptedStore::always_failing());

        let err = run(&pipeline, &[file]).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::JobsFailed {
                failed: 1,
                total: 1
            }
        ));
    }

    // ========================================================================
    // TEST: Watch mode and cancellation
    // ========================================================================

    #[tokio::test]
    async fn test_watch_reuploads_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt");
        let mut cfg = config(2);
        cfg.watch = true;
        let store = ScriptedStore::ok();
        let (pipeline, _) = pipeline(cfg, store.clone());

        let cancel = CancellationToken::new();
        let paths = vec![dir.path().to_path_buf()];
        let run = pipeline.run(&paths, cancel.clone());
        tokio::pin!(run);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.total_calls() < 3 {
            assert!(Instant::now() < deadline, "watch mode did not re-upload");
            tokio::select! {
                _ = &mut run => panic!("watch run returned before cancel"),
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancelled run should return");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let mut cfg = config(1);
        cfg.retry.base_delay_ms = 60_000;
        let store = ScriptedStore::always_failing();
        let (pipeline, _) = pipeline(cfg, store.clone());

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run(&[file], cancel))
            .await
            .expect("cancelled run should return");

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(store.total_calls(), 1);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_directory_walk() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write_file(dir.path(), &format!("{i}.txt"));
        }
        let store = ScriptedStore::slow(Duration::from_millis(300));
        let (pipeline, _) = pipeline(config(1), store.clone());

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(&[dir.path().to_path_buf()], cancel),
        )
        .await
        .expect("cancelled run should return");

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(store.total_calls() < 10);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_pipeline_can_run_twice() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.txt");
        let store = ScriptedStore::ok();
        let (pipeline, sink) = pipeline(config(2), store.clone());

        run(&pipeline, &[file.clone()]).await.unwrap();
        run(&pipeline, &[file]).await.unwrap();

        assert_eq!(sink.events().len(), 2);
        assert_eq!(store.total_calls(), 2);
    }
}
