//! 生命周期端到端场景测试：Mock 插件 + 临时目录中的真实事件日志、元数据与信箱

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apiary::config::{AppConfig, ProjectConfig, ReactionRule};
use apiary::core::error::EventLogError;
use apiary::core::{LifecycleBuilder, LifecycleManager, ShutdownManager, ShutdownReason};
use apiary::events::{event_types, EventLog, EventPriority, JsonlEventLog, OrchestratorEvent};
use apiary::mailbox::{Mailbox, Message, MessageType, ReceiveOptions};
use apiary::plugins::mock::{MockPr, MockRuntime, MockScm, RecordingNotifier};
use apiary::plugins::{CiCheck, CiStatus, Mergeability, PluginRegistry, PrState, ReviewDecision};
use apiary::session::{ActivityState, RuntimeHandle, Session, SessionStatus};
use apiary::storage::{FileMetadataStore, MetadataStore};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    scm: Arc<MockScm>,
    runtime: Arc<MockRuntime>,
    notifier: Arc<RecordingNotifier>,
    manager: LifecycleManager,
}

fn app_config(dir: &TempDir, reactions: HashMap<String, ReactionRule>) -> AppConfig {
    let mut config = AppConfig::default();
    config.app.data_dir = Some(dir.path().to_path_buf());
    config.reactions = reactions;
    config.projects.insert("app".into(), ProjectConfig::new("acme/app"));
    config
}

fn build(dir: TempDir, config: AppConfig) -> Harness {
    build_with(dir, config, |builder| builder)
}

fn build_with<F>(dir: TempDir, config: AppConfig, customize: F) -> Harness
where
    F: FnOnce(LifecycleBuilder) -> LifecycleBuilder,
{
    let scm = Arc::new(MockScm::new());
    let runtime = Arc::new(MockRuntime::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let mut registry = PluginRegistry::new();
    registry.register_scm(scm.clone()).unwrap();
    registry.register_runtime(runtime.clone()).unwrap();
    registry.register_notifier(notifier.clone()).unwrap();

    let manager = customize(LifecycleBuilder::new(config).with_registry(registry))
        .build()
        .unwrap();
    Harness {
        dir,
        scm,
        runtime,
        notifier,
        manager,
    }
}

fn harness_with_timeout(secs: u64) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = app_config(&dir, HashMap::new());
    config.lifecycle.session_timeout_secs = secs;
    build(dir, config)
}

fn harness(reactions: HashMap<String, ReactionRule>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = app_config(&dir, reactions);
    build(dir, config)
}

fn session(id: &str) -> Session {
    Session::new(id, "app")
        .with_branch(format!("feat/{id}"))
        .with_runtime_handle(RuntimeHandle {
            id: format!("tmux-{id}"),
            runtime: "mock".into(),
        })
}

impl Harness {
    async fn events(&self) -> Vec<OrchestratorEvent> {
        JsonlEventLog::new(self.dir.path().join("events.jsonl"))
            .read_recent(1000)
            .await
    }

    async fn transitions(&self, session_id: &str) -> Vec<(String, String)> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .filter_map(|e| {
                let old = e.data.get("oldStatus")?.as_str()?.to_string();
                let new = e.data.get("newStatus")?.as_str()?.to_string();
                Some((old, new))
            })
            .collect()
    }

    async fn events_of(&self, event_type: &str) -> Vec<OrchestratorEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    fn inbox(&self, session_id: &str) -> Mailbox {
        Mailbox::new(self.dir.path().join("mailbox"), session_id)
    }

    async fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.manager.session(session_id).await.map(|s| s.status)
    }
}

fn approved_pr() -> MockPr {
    MockPr::open(1, "feat/app-1")
        .with_ci(CiStatus::Passing)
        .with_review(ReviewDecision::Approved)
        .with_mergeability(Mergeability::clean())
}

fn fail_ci(pr: &mut MockPr) {
    pr.ci = CiStatus::Failing;
    pr.checks = vec![
        CiCheck::new("build", CiStatus::Passing),
        CiCheck::new("lint", CiStatus::Failing),
    ];
}

#[tokio::test]
async fn approved_then_ci_failure_delivers_fix_message() {
    let h = harness(HashMap::from([(
        event_types::CI_FAILING.to_string(),
        ReactionRule::send_to_agent(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();

    // 场景 1：CI 通过 + 已批准
    h.scm.set_pr("app-1", approved_pr()).await;
    let report = h.manager.tick().await;
    assert_eq!(report.transitions, 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Approved));
    assert_eq!(
        h.transitions("app-1").await,
        vec![("spawning".to_string(), "approved".to_string())]
    );

    // 场景 2：CI 转为失败
    h.scm.update_pr("app-1", fail_ci).await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::CiFailed));
    assert_eq!(
        h.transitions("app-1").await.last(),
        Some(&("approved".to_string(), "ci_failed".to_string()))
    );

    let inbox = h
        .inbox("app-1")
        .receive(&ReceiveOptions::of_type(MessageType::FixCiFailure))
        .await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from, "orchestrator");
    assert_eq!(inbox[0].payload["failedChecks"][0]["name"], "lint");
    assert_eq!(inbox[0].payload["pr"]["number"], 1);

    // 投递后提醒会话查看信箱
    let nudges = h.runtime.sent().await;
    assert_eq!(nudges.len(), 1);
    assert_eq!(nudges[0].0, "tmux-app-1");
    assert!(nudges[0].1.contains(&inbox[0].id));

    assert_eq!(h.events_of(event_types::REACTION_TRIGGERED).await.len(), 1);

    // 状态已持久化
    let store = FileMetadataStore::new(h.dir.path().join("sessions"));
    let meta = store.read("app-1").await.unwrap().unwrap();
    assert_eq!(meta["status"], "ci_failed");
}

#[tokio::test]
async fn unchanged_signals_produce_no_new_events() {
    let h = harness(HashMap::from([(
        event_types::CI_FAILING.to_string(),
        ReactionRule::send_to_agent(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_pr("app-1", approved_pr()).await;
    h.scm.update_pr("app-1", fail_ci).await;

    h.manager.tick().await;
    let after_first = h.events().await.len();
    for _ in 0..3 {
        let report = h.manager.tick().await;
        assert_eq!(report.transitions, 0);
        assert_eq!(report.reactions, 0);
    }
    assert_eq!(h.events().await.len(), after_first);
    assert_eq!(h.inbox("app-1").receive(&ReceiveOptions::default()).await.len(), 1);
}

#[tokio::test]
async fn persistent_ci_failure_escalates_once_after_retries() {
    let retries = 2;
    let h = harness(HashMap::from([(
        event_types::CI_FAILING.to_string(),
        ReactionRule::send_to_agent().with_retries(retries),
    )]));
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_pr("app-1", approved_pr()).await;
    h.manager.tick().await;
    h.scm.update_pr("app-1", fail_ci).await;

    // retries 次投递给 Agent
    for _ in 0..retries {
        h.manager.tick().await;
    }
    let fixes = ReceiveOptions::of_type(MessageType::FixCiFailure);
    assert_eq!(h.inbox("app-1").receive(&fixes).await.len(), retries as usize);
    assert!(h.notifier.events().await.is_empty());

    // 第 retries+1 次改为通知人类
    let report = h.manager.tick().await;
    assert_eq!(report.escalations, 1);
    let notified = h.notifier.events().await;
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].event_type, event_types::CI_FAILING);
    assert_eq!(notified[0].priority, EventPriority::Urgent);
    assert_eq!(h.inbox("app-1").receive(&fixes).await.len(), retries as usize);
    assert_eq!(h.events_of(event_types::REACTION_ESCALATED).await.len(), 1);

    // 升级只发生一次
    for _ in 0..3 {
        h.manager.tick().await;
    }
    assert_eq!(h.notifier.events().await.len(), 1);

    // 状况解除后再次失败，计数重新开始
    h.scm.update_pr("app-1", |pr| pr.ci = CiStatus::Passing).await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Approved));
    h.scm.update_pr("app-1", fail_ci).await;
    h.manager.tick().await;
    assert_eq!(
        h.inbox("app-1").receive(&fixes).await.len(),
        retries as usize + 1
    );
    assert_eq!(h.notifier.events().await.len(), 1);
}

#[tokio::test]
async fn default_branch_advance_is_reported_after_first_observation() {
    let h = harness(HashMap::from([(
        event_types::BRANCH_ADVANCED.to_string(),
        ReactionRule::send_to_agent(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();

    h.scm.set_branch_sha("acme/app", "main", "abc123").await;
    let report = h.manager.tick().await;
    assert_eq!(report.branch_advances, 0);
    assert!(h.events_of(event_types::BRANCH_ADVANCED).await.is_empty());

    h.scm.set_branch_sha("acme/app", "main", "def456").await;
    let report = h.manager.tick().await;
    assert_eq!(report.branch_advances, 1);

    let advanced = h.events_of(event_types::BRANCH_ADVANCED).await;
    assert_eq!(advanced.len(), 1);
    assert_eq!(advanced[0].project_id, "app");
    assert_eq!(advanced[0].data["oldSha"], "abc123");
    assert_eq!(advanced[0].data["newSha"], "def456");

    let custom = h
        .inbox("app-1")
        .receive(&ReceiveOptions::of_type(MessageType::Custom))
        .await;
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].payload["data"]["newSha"], "def456");

    // SHA 不变时不再报告
    h.manager.tick().await;
    assert_eq!(h.events_of(event_types::BRANCH_ADVANCED).await.len(), 1);
}

#[tokio::test]
async fn connector_error_is_isolated_to_its_session() {
    let h = harness(HashMap::new());
    h.manager.track(session("app-1")).await.unwrap();
    h.manager.track(session("app-2")).await.unwrap();
    h.scm.fail_session("app-1", true).await;
    h.scm
        .set_pr("app-2", MockPr::open(2, "feat/app-2").with_ci(CiStatus::Pending))
        .await;

    let report = h.manager.tick().await;
    assert_eq!(report.sessions_checked, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Spawning));
    assert_eq!(h.status("app-2").await, Some(SessionStatus::PrOpen));

    h.scm.fail_session("app-1", false).await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Working));
}

#[tokio::test]
async fn unresponsive_connector_times_out_without_change() {
    let dir = TempDir::new().unwrap();
    let mut config = app_config(&dir, HashMap::new());
    config.lifecycle.session_timeout_secs = 1;
    let h = build(dir, config);
    h.manager.track(session("app-1")).await.unwrap();

    h.scm.set_delay(Some(Duration::from_secs(3))).await;
    let report = h.manager.tick().await;
    assert_eq!(report.timeouts, 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Spawning));
    assert!(h.transitions("app-1").await.is_empty());

    h.scm.set_delay(None).await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Working));
}

#[tokio::test]
async fn failed_delivery_is_reported_not_dropped() {
    let h = harness(HashMap::from([(
        event_types::CI_FAILING.to_string(),
        ReactionRule::send_to_agent(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_pr("app-1", approved_pr()).await;
    h.scm.update_pr("app-1", fail_ci).await;

    // 收件人目录被一个普通文件占住，写入必然失败
    let mailbox_dir = h.dir.path().join("mailbox");
    std::fs::create_dir_all(&mailbox_dir).unwrap();
    std::fs::write(mailbox_dir.join("app-1"), b"not a directory").unwrap();

    let report = h.manager.tick().await;
    assert_eq!(report.delivery_failures, 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::CiFailed));
    assert_eq!(
        h.events_of(event_types::REACTION_DELIVERY_FAILED).await.len(),
        1
    );
    assert!(h.runtime.sent().await.is_empty());
}

#[tokio::test]
async fn idle_session_is_reported_stuck_once() {
    let dir = TempDir::new().unwrap();
    let mut config = app_config(
        &dir,
        HashMap::from([(event_types::SESSION_STUCK.to_string(), ReactionRule::notify())]),
    );
    config.lifecycle.stuck_threshold_secs = 0;
    let h = build(dir, config);
    h.manager.track(session("app-1")).await.unwrap();
    h.runtime.set_activity("app-1", ActivityState::Idle).await;

    h.manager.tick().await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Idle));
    assert_eq!(h.events_of(event_types::SESSION_STUCK).await.len(), 1);
    assert_eq!(h.notifier.events().await.len(), 1);

    // 恢复工作后再次空闲，重新计为一次卡住
    h.runtime.set_activity("app-1", ActivityState::Active).await;
    h.manager.tick().await;
    h.runtime.set_activity("app-1", ActivityState::Idle).await;
    h.manager.tick().await;
    assert_eq!(h.events_of(event_types::SESSION_STUCK).await.len(), 2);
}

#[tokio::test]
async fn waiting_session_needs_input_and_dead_session_is_killed() {
    let h = harness(HashMap::new());
    h.manager.track(session("app-1")).await.unwrap();
    h.manager.track(session("app-2")).await.unwrap();
    h.runtime.set_activity("app-1", ActivityState::WaitingInput).await;
    h.runtime.set_alive("tmux-app-2", false).await;

    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::NeedsInput));
    assert_eq!(h.status("app-2").await, Some(SessionStatus::Killed));

    let needs_input = h.events_of(event_types::SESSION_NEEDS_INPUT).await;
    assert_eq!(needs_input.len(), 1);
    assert_eq!(needs_input[0].priority, EventPriority::Urgent);

    // 终态会话不再轮询
    let calls = h.scm.detect_calls();
    h.manager.tick().await;
    assert_eq!(h.scm.detect_calls(), calls + 1);
}

#[tokio::test]
async fn all_complete_summary_is_logged_once() {
    let h = harness(HashMap::from([(
        event_types::SUMMARY_ALL_COMPLETE.to_string(),
        ReactionRule::notify(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();
    h.scm
        .set_pr("app-1", approved_pr().with_state(PrState::Merged))
        .await;

    h.manager.tick().await;
    h.manager.tick().await;
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Merged));
    assert_eq!(h.events_of(event_types::PR_MERGED).await.len(), 1);

    let summary = h.events_of(event_types::SUMMARY_ALL_COMPLETE).await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].session_id, "");
    assert_eq!(h.notifier.events().await.len(), 1);
}

#[tokio::test]
async fn sessions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = app_config(&dir, HashMap::new());
    let h = build(dir, config.clone());
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_pr("app-1", approved_pr()).await;
    h.manager.tick().await;

    let restarted = build(h.dir, config);
    assert_eq!(restarted.manager.load_sessions().await, 1);
    let loaded = restarted.manager.session("app-1").await.unwrap();
    assert_eq!(loaded.status, SessionStatus::Approved);
    assert_eq!(loaded.pr.map(|pr| pr.number), Some(1));

    // 已知状态不会被重复记录为转换
    restarted.scm.set_pr("app-1", approved_pr()).await;
    let report = restarted.manager.tick().await;
    assert_eq!(report.transitions, 0);

    restarted.manager.untrack("app-1").await.unwrap();
    assert!(restarted.manager.sessions().await.is_empty());
    let store = FileMetadataStore::new(restarted.dir.path().join("sessions"));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_session_times_out_while_others_finish_in_the_same_tick() {
    let h = harness_with_timeout(1);
    h.manager.track(session("app-1")).await.unwrap();
    h.manager.track(session("app-2")).await.unwrap();
    h.manager.track(session("app-3")).await.unwrap();
    h.scm
        .set_session_delay("app-1", Some(Duration::from_secs(3)))
        .await;

    let started = Instant::now();
    let report = h.manager.tick().await;
    assert!(started.elapsed() < Duration::from_millis(2500));

    assert_eq!(report.sessions_checked, 3);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.transitions, 2);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Spawning));
    assert_eq!(h.status("app-2").await, Some(SessionStatus::Working));
    assert_eq!(h.status("app-3").await, Some(SessionStatus::Working));
}

#[tokio::test]
async fn concurrent_ticks_detect_a_transition_once() {
    let h = harness(HashMap::from([(
        event_types::CI_FAILING.to_string(),
        ReactionRule::send_to_agent(),
    )]));
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_pr("app-1", approved_pr()).await;
    h.scm.update_pr("app-1", fail_ci).await;

    let (first, second) = tokio::join!(h.manager.tick(), h.manager.tick());
    assert_eq!(first.transitions + second.transitions, 1);
    assert_eq!(first.reactions + second.reactions, 1);
    assert_eq!(h.transitions("app-1").await.len(), 1);
    assert_eq!(
        h.inbox("app-1")
            .receive(&ReceiveOptions::of_type(MessageType::FixCiFailure))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn unresponsive_branch_fetch_does_not_stall_the_tick() {
    let h = harness_with_timeout(1);
    h.manager.track(session("app-1")).await.unwrap();
    h.scm.set_branch_sha("acme/app", "main", "abc123").await;
    h.manager.tick().await;

    h.scm.set_branch_sha("acme/app", "main", "def456").await;
    h.scm.set_branch_delay(Some(Duration::from_secs(30))).await;
    let started = Instant::now();
    let report = h.manager.tick().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.branch_advances, 0);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Working));

    // 缓存未动，连接器恢复后照常报告推进
    h.scm.set_branch_delay(None).await;
    let report = h.manager.tick().await;
    assert_eq!(report.branch_advances, 1);
}

struct StalledEventLog;

#[async_trait::async_trait]
impl EventLog for StalledEventLog {
    async fn append(&self, _event: &OrchestratorEvent) -> Result<(), EventLogError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn read_recent(&self, _limit: usize) -> Vec<OrchestratorEvent> {
        Vec::new()
    }
}

#[tokio::test]
async fn stalled_event_log_does_not_stall_the_tick() {
    let dir = TempDir::new().unwrap();
    let mut config = app_config(&dir, HashMap::new());
    config.lifecycle.session_timeout_secs = 1;
    let h = build_with(dir, config, |builder| {
        builder.with_event_log(Arc::new(StalledEventLog))
    });
    h.manager.track(session("app-1")).await.unwrap();

    let started = Instant::now();
    let report = h.manager.tick().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.transitions, 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Working));
}

#[tokio::test]
async fn run_finishes_the_in_flight_tick_before_stopping() {
    let dir = TempDir::new().unwrap();
    let mut config = app_config(&dir, HashMap::new());
    config.lifecycle.poll_interval_secs = 60;
    let h = build(dir, config);
    h.manager.track(session("app-1")).await.unwrap();
    h.scm
        .set_session_delay("app-1", Some(Duration::from_millis(300)))
        .await;

    let shutdown = ShutdownManager::new();
    let started = Instant::now();
    tokio::join!(h.manager.run(&shutdown), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.shutdown(ShutdownReason::UserInitiated);
    });

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(h.scm.detect_calls(), 1);
    assert_eq!(h.status("app-1").await, Some(SessionStatus::Working));
}

#[tokio::test]
async fn serve_loads_sessions_and_purges_processed_mail_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = app_config(&dir, HashMap::new());
    let first = build(dir, config.clone());
    first.manager.track(session("app-1")).await.unwrap();

    let sent = first
        .manager
        .mailbox()
        .send("app-1", Message::new("orchestrator", "", MessageType::Custom))
        .await
        .unwrap();
    let inbox = first.inbox("app-1");
    inbox.ack(&sent.id).await.unwrap();
    assert_eq!(inbox.processed().await.len(), 1);

    let restarted = build(first.dir, config);
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.shutdown(ShutdownReason::Signal);
    restarted.manager.serve(shutdown, Duration::ZERO).await;

    assert_eq!(restarted.manager.sessions().await.len(), 1);
    assert!(restarted.inbox("app-1").processed().await.is_empty());
}
