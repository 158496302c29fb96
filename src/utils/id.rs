//! ID 生成工具
//!
//! - 订阅 ID：10 位 62 进制字符串（0-9, a-z, A-Z）
//! - 事件 ID：UUID v4
//! - 通知 ID：毫秒时间戳，进程内严格递增

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数组合。
///
/// # Example
///
/// ```
/// use automation_core::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let timestamp = Utc::now().timestamp_millis() as u64;
    let random: u64 = rand::thread_rng().gen();
    let mut value = timestamp ^ random;

    let mut result = String::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        result.push(BASE62_CHARS[(value % 62) as usize] as char);
        value /= 62;
    }
    result.chars().rev().collect()
}

/// 生成 UUID v4 格式的 ID
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 基于时间戳的递增 ID 生成器
///
/// 返回当前毫秒时间戳；同一毫秒内的多次调用依次加一，
/// 保证结果严格递增且不与已存在的 ID 冲突。
#[derive(Debug, Default)]
pub struct TimestampIdGenerator {
    last: AtomicI64,
}

impl TimestampIdGenerator {
    /// 创建生成器
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续生成的 ID 都大于 `floor`（用于从持久化数据恢复）
    pub fn observe(&self, floor: i64) {
        self.last.fetch_max(floor, Ordering::SeqCst);
    }

    /// 生成下一个 ID
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_format() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(generate_id()), "ID collision detected");
        }
    }

    #[test]
    fn test_generate_uuid() {
        let uuid = generate_uuid();
        assert_eq!(uuid.len(), 36);
    }

    #[test]
    fn test_timestamp_ids_strictly_increase() {
        let generator = TimestampIdGenerator::new();
        let mut previous = generator.next_id();
        for _ in 0..500 {
            let next = generator.next_id();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_timestamp_ids_respect_observed_floor() {
        let generator = TimestampIdGenerator::new();
        let far_future = Utc::now().timestamp_millis() + 1_000_000;
        generator.observe(far_future);
        assert_eq!(generator.next_id(), far_future + 1);
    }
}
