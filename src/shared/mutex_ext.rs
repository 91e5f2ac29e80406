//! Usage: Mutex 扩展 trait，poisoned 时恢复数据而不是 panic

use std::sync::{Mutex, MutexGuard};

/// 缓存表、凭据状态等共享 Mutex 统一走这里加锁
pub(crate) trait MutexExt<T> {
    /// 获取锁；上一个持有者 panic 时恢复内部数据并记录日志
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    mutex_type = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    "Mutex poisoned (持有者 panic)，已恢复数据但状态可能不一致"
                );
                poisoned.into_inner()
            }
        }
    }
}
