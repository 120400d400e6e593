//! 家庭相册通知工作者
//!
//! 接收定时触发与文档变更触发，解析收件人并通过推送网关投递通知：
//! 每日提醒、新条目通知、评论通知与点赞通知。
//! 单个收件人投递失败不影响同一批次的其他收件人。

pub mod context;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod notifier;
pub mod reminder;
pub mod resolver;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod templates;
pub mod test_utils;
pub mod trigger;
