/// 事件时间戳
///
/// 领域事件只需要毫秒精度；批次的先后顺序由批次序号保证，而不是时间戳。

use std::time::{SystemTime, UNIX_EPOCH};

/// 当前 Unix 时间（毫秒）
#[inline]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 当前 Unix 时间（秒），用于健康检查
#[inline]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_are_consistent() {
        let secs = now_secs();
        let millis = now_millis();
        assert!(millis / 1000 >= secs);
        assert!(millis > 0);
    }
}
