pub mod scheduler;
pub mod watcher;

use crate::build::changeset::ChangeSet;
use crate::build::pipeline::BuildRunner;
use crate::build::report::BuildReport;
use crate::error::DinoError;
use crate::server::live_reload::LiveReload;
use scheduler::ChangeScheduler;
use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use watcher::FsEvent;

type BuildTask = JoinHandle<Result<BuildReport, DinoError>>;

/// watch 主循环：接收文件事件，防抖后在阻塞线程池上执行增量构建，构建完成后通知刷新
///
/// 事件通道关闭后返回（会等待正在执行的构建结束）。
pub async fn run(
    mut events: mpsc::UnboundedReceiver<FsEvent>,
    runner: Arc<dyn BuildRunner>,
    reload: LiveReload,
    window: Duration,
) {
    let mut scheduler = ChangeScheduler::new(window);
    let mut in_flight: Option<BuildTask> = None;

    loop {
        let deadline = scheduler.next_deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    tracing::debug!("文件变更 {:?}：{:?}", event.kind, event.paths);
                    scheduler.record(event.paths, Instant::now());
                }
                None => break,
            },
            _ = wait_until(deadline) => {}
            joined = wait_build(&mut in_flight) => {
                in_flight = None;
                scheduler.complete();
                finish_round(joined, &reload);
            }
        }

        if in_flight.is_none()
            && let Some(changes) = scheduler.poll(Instant::now())
        {
            in_flight = Some(dispatch(Arc::clone(&runner), changes));
        }
    }

    if let Some(task) = in_flight {
        finish_round(task.await, &reload);
    }
    tracing::debug!("文件监听已结束");
}

fn dispatch(runner: Arc<dyn BuildRunner>, changes: ChangeSet) -> BuildTask {
    tracing::info!("🔁 检测到变更（{}），开始重建", changes.summary());
    tokio::task::spawn_blocking(move || runner.build(&changes))
}

fn finish_round(joined: Result<Result<BuildReport, DinoError>, JoinError>, reload: &LiveReload) {
    match joined {
        Ok(outcome) => {
            reload.after_build(&outcome);
        }
        Err(e) => tracing::error!("构建任务异常退出：{e}"),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => pending().await,
    }
}

async fn wait_build(task: &mut Option<BuildTask>) -> Result<Result<BuildReport, DinoError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::report::MirrorReport;
    use crate::server::live_reload::RELOAD_TOKEN;
    use crate::server::registry::ChannelRegistry;
    use crate::watch::watcher::FsEventKind;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const WINDOW: Duration = Duration::from_millis(50);

    /// 记录每一批变更的假构建器
    struct FakeRunner {
        batches: Mutex<Vec<ChangeSet>>,
        build_time: Duration,
        fail: bool,
    }

    impl FakeRunner {
        fn new(build_time: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                build_time,
                fail,
            })
        }

        fn batches(&self) -> Vec<ChangeSet> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl BuildRunner for FakeRunner {
        fn build(&self, changes: &ChangeSet) -> Result<BuildReport, DinoError> {
            self.batches.lock().unwrap().push(changes.clone());
            std::thread::sleep(self.build_time);
            if self.fail {
                return Err(DinoError::SourceRootMissing(PathBuf::from("/gone")));
            }
            Ok(BuildReport {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                duration_ms: 0,
                changes: changes.summary(),
                mirror: MirrorReport::default(),
                stages: Vec::new(),
            })
        }
    }

    fn modify(path: &str) -> FsEvent {
        FsEvent {
            kind: FsEventKind::Modify,
            paths: vec![PathBuf::from(path)],
        }
    }

    fn partial(paths: &[&str]) -> ChangeSet {
        ChangeSet::partial(paths.iter().map(PathBuf::from)).unwrap()
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn burst_of_events_builds_once_and_reloads() {
        let runner = FakeRunner::new(Duration::ZERO, false);
        let registry = ChannelRegistry::new();
        let (_, mut browser) = registry.register();
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(
            rx,
            runner.clone(),
            LiveReload::new(registry, true),
            WINDOW,
        ));

        tx.send(modify("/src/a.html")).unwrap();
        tx.send(modify("/src/b.html")).unwrap();
        tx.send(modify("/src/a.html")).unwrap();
        sleep_ms(400).await;
        drop(tx);
        driver.await.unwrap();

        assert_eq!(runner.batches(), vec![partial(&["/src/a.html", "/src/b.html"])]);
        assert_eq!(browser.try_recv().unwrap(), RELOAD_TOKEN);
        assert!(browser.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_during_build_wait_for_next_round() {
        let runner = FakeRunner::new(Duration::from_millis(300), false);
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(
            rx,
            runner.clone(),
            LiveReload::new(ChannelRegistry::new(), true),
            WINDOW,
        ));

        tx.send(modify("/src/a.html")).unwrap();
        sleep_ms(150).await;
        assert_eq!(runner.batches().len(), 1);
        tx.send(modify("/src/b.html")).unwrap();
        tx.send(modify("/src/c.html")).unwrap();
        sleep_ms(900).await;
        drop(tx);
        driver.await.unwrap();

        assert_eq!(
            runner.batches(),
            vec![partial(&["/src/a.html"]), partial(&["/src/b.html", "/src/c.html"])]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coordinator_error_does_not_reload() {
        let runner = FakeRunner::new(Duration::ZERO, true);
        let registry = ChannelRegistry::new();
        let (_, mut browser) = registry.register();
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(run(
            rx,
            runner.clone(),
            LiveReload::new(registry, true),
            WINDOW,
        ));

        tx.send(modify("/src/a.html")).unwrap();
        sleep_ms(300).await;
        drop(tx);
        driver.await.unwrap();

        assert_eq!(runner.batches().len(), 1);
        assert!(browser.try_recv().is_err());
    }
}
