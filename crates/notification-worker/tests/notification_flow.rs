//! 通知流程集成测试
//!
//! 通过 `handle_trigger` 走完整链路：触发事件 → 读取文档 → 解析令牌 → 推送。

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use kiekje_shared::config::AppConfig;
use notification_worker::deferred::{DeferredQueue, deliver_due};
use notification_worker::models::entry_date_key;
use notification_worker::notifier::{EventOutcome, SkipReason};
use notification_worker::scheduler::DeferredFlushWorker;
use notification_worker::store::MemoryDocumentStore;
use notification_worker::test_utils::{TestDataGenerator, TransportCall, test_context};
use notification_worker::trigger::{TriggerEvent, TriggerOutcome, handle_trigger, parse_trigger};

const SNAPSHOT: &str = r#"{
  "profiles": {
    "p-1": {
      "ownerId": "owner",
      "followers": ["owner", "f-1", "f-2"],
      "name": "Lotte"
    }
  },
  "users": {
    "owner": { "fcmToken": "tok-owner", "displayName": "Sanne" },
    "f-1": { "fcmToken": "tok-f1", "displayName": "Oma Joke" },
    "f-2": { "displayName": "Opa Kees" },
    "c": { "fcmToken": "tok-c", "displayName": "Tante Ria" }
  },
  "entries": {
    "p-1": {
      "2024-03-06": { "userId": "owner", "likes": ["f-1"] }
    }
  }
}"#;

fn snapshot_store() -> Arc<MemoryDocumentStore> {
    Arc::new(MemoryDocumentStore::from_snapshot(SNAPSHOT).expect("快照格式有误"))
}

#[tokio::test]
async fn new_entry_reaches_only_followers_with_tokens() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let event = parse_trigger(
        r#"{"trigger":"entry_created","profileId":"p-1","entryId":"2024-03-07","entry":{"userId":"owner"}}"#,
    )
    .expect("解析触发事件失败");
    let outcome = handle_trigger(&ctx, event).await;

    assert!(matches!(outcome, TriggerOutcome::Event(EventOutcome::Delivered(_))));
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let TransportCall::Batch { tokens, message } = &calls[0] else {
        panic!("新条目通知应为一次批量发送");
    };
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].as_str(), "tok-f1");
    assert_eq!(message.title, "Nieuwe foto!");
    assert_eq!(
        message.body,
        "Sanne heeft een nieuwe foto geplaatst voor Lotte."
    );
}

#[tokio::test]
async fn owner_commenting_own_entry_sends_nothing() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let event = TriggerEvent::CommentCreated {
        profile_id: "p-1".to_string(),
        entry_id: "2024-03-06".to_string(),
        comment_id: "c-1".to_string(),
        comment: TestDataGenerator::comment("owner", Some("Sanne")),
    };
    let outcome = handle_trigger(&ctx, event).await;

    assert_eq!(
        outcome,
        TriggerOutcome::Event(EventOutcome::Skipped(SkipReason::SelfAction))
    );
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn comment_by_follower_notifies_owner() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let event = TriggerEvent::CommentCreated {
        profile_id: "p-1".to_string(),
        entry_id: "2024-03-06".to_string(),
        comment_id: "c-2".to_string(),
        comment: TestDataGenerator::comment("f-1", Some("Oma Joke")),
    };
    handle_trigger(&ctx, event).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tokens()[0].as_str(), "tok-owner");
    assert_eq!(
        calls[0].message().body,
        "Oma Joke heeft gereageerd op je foto."
    );
}

#[tokio::test]
async fn new_like_notifies_owner_with_liker_name() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let event = parse_trigger(
        r#"{"trigger":"entry_updated","profileId":"p-1","entryId":"2024-03-06",
            "before":{"likes":["f-1","f-2"]},"after":{"likes":["f-1","f-2","c"]}}"#,
    )
    .expect("解析触发事件失败");
    handle_trigger(&ctx, event).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let TransportCall::Single { token, message } = &calls[0] else {
        panic!("点赞通知应为单条发送");
    };
    assert_eq!(token.as_str(), "tok-owner");
    assert_eq!(message.body, "Tante Ria vindt je foto leuk.");
    assert_eq!(message.data.get("type").map(String::as_str), Some("like"));
}

#[tokio::test]
async fn unlike_sends_nothing() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let event = TriggerEvent::EntryUpdated {
        profile_id: "p-1".to_string(),
        entry_id: "2024-03-06".to_string(),
        before: TestDataGenerator::entry("2024-03-06", "owner", &["f-1", "c"]),
        after: TestDataGenerator::entry("2024-03-06", "owner", &["f-1"]),
    };
    let outcome = handle_trigger(&ctx, event).await;

    assert_eq!(
        outcome,
        TriggerOutcome::Event(EventOutcome::Skipped(SkipReason::NoNewLike))
    );
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn reminder_goes_to_owner_without_entry_today() {
    let store = snapshot_store();
    let (ctx, transport, _) = test_context(AppConfig::default(), store.clone());
    let now = Utc
        .with_ymd_and_hms(2024, 3, 7, 9, 0, 0)
        .single()
        .expect("有效时间");

    let report = ctx.reminder_scanner().run_at(now).await;

    assert_eq!(report.candidates, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(transport.single_calls(), 1);
    let calls = transport.calls();
    assert_eq!(calls[0].tokens()[0].as_str(), "tok-owner");
    assert_eq!(calls[0].message().title, "Tijd voor een kiekje!");

    // 今天已有条目后不再提醒
    store.insert_entry(
        "p-1",
        TestDataGenerator::entry(&entry_date_key(now.date_naive()), "owner", &[]),
    );
    let report = ctx.reminder_scanner().run_at(now).await;
    assert_eq!(report.candidates, 0);
    assert_eq!(transport.single_calls(), 1);
}

#[tokio::test]
async fn spread_reminders_are_delivered_from_deferred_queue() {
    let mut config = AppConfig::default();
    config.reminder.max_spread_minutes = 30;
    let (ctx, transport, deferred) = test_context(config, snapshot_store());
    let now = Utc
        .with_ymd_and_hms(2024, 3, 7, 9, 0, 0)
        .single()
        .expect("有效时间");

    let report = ctx.reminder_scanner().run_at(now).await;

    assert_eq!(report.deferred, 1);
    assert!(transport.calls().is_empty());
    assert_eq!(deferred.pending().await.expect("读取队列失败"), 1);

    let report = deliver_due(
        deferred.as_ref(),
        &ctx.dispatcher,
        now + chrono::Duration::minutes(31),
    )
    .await;

    assert_eq!(report.success_count(), 1);
    assert_eq!(transport.single_calls(), 1);
    assert_eq!(deferred.pending().await.expect("读取队列失败"), 0);
}

#[tokio::test]
async fn repeated_daily_trigger_reminds_once() {
    let (ctx, transport, _) = test_context(AppConfig::default(), snapshot_store());

    let first = handle_trigger(&ctx, TriggerEvent::DailyReminder).await;
    let second = handle_trigger(&ctx, TriggerEvent::DailyReminder).await;

    let TriggerOutcome::Reminder(first) = first else {
        panic!("应路由到提醒扫描");
    };
    let TriggerOutcome::Reminder(second) = second else {
        panic!("应路由到提醒扫描");
    };
    assert_eq!(first.sent, 1);
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped_already_reminded, 1);
    assert_eq!(transport.single_calls(), 1);
}

#[tokio::test]
async fn spread_reminder_is_not_lost_on_shutdown() {
    let mut config = AppConfig::default();
    config.reminder.max_spread_minutes = 30;
    let (ctx, transport, deferred) = test_context(config, snapshot_store());

    let outcome = handle_trigger(&ctx, TriggerEvent::DailyReminder).await;
    assert!(matches!(outcome, TriggerOutcome::Reminder(ref r) if r.deferred == 1));
    assert!(transport.calls().is_empty());

    let worker = DeferredFlushWorker::with_interval(ctx.clone(), Duration::from_secs(3600));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));
    shutdown_tx.send(true).expect("发送 shutdown 失败");
    handle.await.expect("任务不应 panic");

    assert_eq!(transport.single_calls(), 1);
    assert_eq!(deferred.pending().await.expect("读取队列失败"), 0);
}
