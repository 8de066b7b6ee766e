use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::error::{HangarError, Result};
use crate::models::{Notification, Severity};

/// 最多保留的通知数量
pub const MAX_NOTIFICATIONS: usize = 50;

/// 通知记录（仅内存，超出上限时丢弃最早的）
#[derive(Default)]
pub struct NotificationLog {
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条通知
    pub fn record(&self, title: &str, message: &str, severity: Severity) -> Notification {
        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            severity,
            timestamp: Utc::now().timestamp(),
            is_read: false,
        };

        match severity {
            Severity::Error => log::warn!("[notification] {}: {}", title, message),
            _ => log::info!("[notification] {}: {}", title, message),
        }

        let mut entries = self.lock();
        entries.push_back(notification.clone());
        while entries.len() > MAX_NOTIFICATIONS {
            entries.pop_front();
        }
        notification
    }

    /// 所有通知，最新的在前
    pub fn list(&self) -> Vec<Notification> {
        self.lock().iter().rev().cloned().collect()
    }

    /// 标记为已读
    pub fn mark_read(&self, id: &str) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| HangarError::not_found("notification", id))?;
        entry.is_read = true;
        Ok(())
    }

    /// 清空
    pub fn clear_all(&self) {
        self.lock().clear();
    }

    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|n| !n.is_read).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
