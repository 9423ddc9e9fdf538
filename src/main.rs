//! Apiary 命令行：运行主控循环，或读取事件日志、会话元数据与信箱
//!
//! 用法：
//! ```bash
//! apiary run                       # 运行主控循环，Ctrl+C / SIGTERM 优雅退出
//! apiary events [limit]            # 最近的事件（默认 20 条）
//! apiary sessions                  # 所有会话及状态
//! apiary inbox <session> [--unread]
//! apiary ack <session> <message-id>
//! apiary purge [max-age-hours]     # 清理过期的已处理消息
//! ```
//!
//! 配置文件路径可用环境变量 APIARY_CONFIG 指定。
//! 二进制本身不带 SCM 连接器；需要连接器的项目由嵌入方通过 `PluginRegistry` 注册后调用
//! `LifecycleManager::serve`。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use apiary::config::{load_config, AppConfig};
use apiary::core::dispatch::ORCHESTRATOR;
use apiary::core::{LifecycleBuilder, ShutdownManager};
use apiary::events::{EventLog, JsonlEventLog};
use apiary::mailbox::{Mailbox, ReceiveOptions};
use apiary::plugins::PluginRegistry;
use apiary::session::Session;
use apiary::storage::{FileMetadataStore, MetadataStore};

const USAGE: &str = "usage: apiary <run | events [limit] | sessions | inbox <session> [--unread] | ack <session> <id> | purge [hours]>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    apiary::observability::init();

    let config_path = std::env::var("APIARY_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    match command.as_str() {
        "run" => run_loop(cfg).await,
        "events" => {
            let limit = match args.get(1) {
                Some(s) => s.parse().with_context(|| format!("invalid limit: {s}"))?,
                None => 20,
            };
            show_events(&cfg, limit).await
        }
        "sessions" => show_sessions(&cfg).await,
        "inbox" => {
            let session = args.get(1).context(USAGE)?;
            let unread = args.iter().any(|a| a == "--unread");
            show_inbox(&cfg, session, unread).await
        }
        "ack" => {
            let session = args.get(1).context(USAGE)?;
            let id = args.get(2).context(USAGE)?;
            ack_message(&cfg, session, id).await
        }
        "purge" => {
            let hours = match args.get(1) {
                Some(s) => s.parse().with_context(|| format!("invalid hours: {s}"))?,
                None => cfg.mailbox.processed_max_age_hours,
            };
            purge(&cfg, hours).await
        }
        other => bail!("unknown command: {other}\n{USAGE}"),
    }
}

async fn run_loop(cfg: AppConfig) -> anyhow::Result<()> {
    let max_age = Duration::from_secs(cfg.mailbox.processed_max_age_hours * 3600);
    let manager = LifecycleBuilder::new(cfg)
        .with_registry(PluginRegistry::new())
        .build()
        .context("Failed to build lifecycle manager (projects need an SCM connector registered by the embedding application)")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    manager.serve(shutdown, max_age).await;
    Ok(())
}

async fn show_events(cfg: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let log = JsonlEventLog::new(cfg.event_log_path());
    for event in log.read_recent(limit).await {
        let session = if event.session_id.is_empty() {
            "-"
        } else {
            event.session_id.as_str()
        };
        println!(
            "{} [{:<7}] {:<28} {:<16} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.priority.as_str(),
            event.event_type,
            session,
            event.message
        );
    }
    Ok(())
}

async fn show_sessions(cfg: &AppConfig) -> anyhow::Result<()> {
    let store = FileMetadataStore::new(cfg.sessions_dir());
    let ids = store.list().await.context("Failed to list sessions")?;
    for id in ids {
        let Some(map) = store.read(&id).await? else {
            continue;
        };
        let Some(session) = Session::from_metadata(&id, &map) else {
            continue;
        };
        let pr = session
            .pr
            .as_ref()
            .map(|pr| format!("#{}", pr.number))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<12} {:<18} {:<10} {:<6} {}",
            session.id,
            session.project_id,
            session.status.as_str(),
            session.activity.as_str(),
            pr,
            session.last_activity_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn show_inbox(cfg: &AppConfig, session: &str, unread: bool) -> anyhow::Result<()> {
    let mailbox = Mailbox::new(cfg.mailbox_dir(), session);
    let opts = if unread {
        ReceiveOptions::unread()
    } else {
        ReceiveOptions::default()
    };
    for message in mailbox.receive(&opts).await {
        let ts = message
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{} {} {:<20} from={} ack={}",
            ts,
            message.id,
            message.message_type.as_str(),
            message.from,
            if message.requires_ack { "required" } else { "no" }
        );
        if let Some(instruction) = message.payload.get("instruction").and_then(|v| v.as_str()) {
            println!("    {instruction}");
        }
    }
    Ok(())
}

async fn ack_message(cfg: &AppConfig, session: &str, id: &str) -> anyhow::Result<()> {
    let mailbox = Mailbox::new(cfg.mailbox_dir(), session);
    match mailbox.ack(id).await.context("Failed to acknowledge message")? {
        Some(message) => println!("acknowledged {} ({})", message.id, message.message_type),
        None => bail!("message {id} not found in {session}'s inbox"),
    }
    Ok(())
}

async fn purge(cfg: &AppConfig, hours: u64) -> anyhow::Result<()> {
    let base = cfg.mailbox_dir();
    let mut owners = vec![ORCHESTRATOR.to_string()];
    if let Ok(mut entries) = tokio::fs::read_dir(&base).await {
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !owners.contains(&name) {
                    owners.push(name);
                }
            }
        }
    }

    let max_age = Duration::from_secs(hours * 3600);
    let mut removed = 0;
    for owner in owners {
        removed += Mailbox::new(&base, owner).clear_old_messages(max_age).await;
    }
    println!("purged {removed} message(s) older than {hours}h");
    Ok(())
}
