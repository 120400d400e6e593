//! 通知上下文
//!
//! 进程启动时构造一次，持有存储、推送、延迟队列与配置，显式传给各组件。

use std::sync::Arc;

use kiekje_shared::config::AppConfig;

use crate::deferred::DeferredQueue;
use crate::dispatcher::Dispatcher;
use crate::notifier::EventNotifier;
use crate::reminder::{ReminderLedger, ReminderScanner};
use crate::resolver::RecipientResolver;
use crate::sender::PushTransport;
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct NotificationContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub dispatcher: Dispatcher,
    pub deferred: Arc<dyn DeferredQueue>,
    /// 跨扫描共享，保证同一用户每天只提醒一次
    pub reminder_ledger: Arc<ReminderLedger>,
}

impl NotificationContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn PushTransport>,
        deferred: Arc<dyn DeferredQueue>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            dispatcher: Dispatcher::new(transport),
            deferred,
            reminder_ledger: Arc::new(ReminderLedger::new()),
        }
    }

    pub fn resolver(&self) -> RecipientResolver {
        RecipientResolver::new(self.store.clone())
    }

    pub fn reminder_scanner(&self) -> ReminderScanner {
        ReminderScanner::new(
            self.store.clone(),
            self.resolver(),
            self.dispatcher.clone(),
            self.deferred.clone(),
            self.reminder_ledger.clone(),
            self.config.reminder.clone(),
        )
    }

    pub fn event_notifier(&self) -> EventNotifier {
        EventNotifier::new(self.store.clone(), self.resolver(), self.dispatcher.clone())
    }
}
