//! TTL缓存组件
//!
//! 读多写少的映射缓存：写入方必须整体失效（而非原地更新），
//! 读取方在TTL到期或失效后从存储重建。时钟可注入，测试可控。

use std::collections::HashMap;
use std::hash::Hash;

use time::{Duration, OffsetDateTime};

/// 时钟接口（测试中替换为固定时钟）
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// 系统时钟
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// TTL失效的键值缓存
pub struct TtlCache<K, V> {
    entries: HashMap<K, V>,
    loaded_at: Option<OffsetDateTime>,
    ttl: Duration,
    clock: Box<dyn Clock>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// 创建缓存，TTL单位为秒
    pub fn new(ttl_seconds: i64) -> Self {
        Self::with_clock(ttl_seconds, Box::new(SystemClock))
    }

    /// 使用注入时钟创建缓存
    pub fn with_clock(ttl_seconds: i64, clock: Box<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            loaded_at: None,
            ttl: Duration::seconds(ttl_seconds),
            clock,
        }
    }

    /// 缓存是否仍然新鲜（已加载且未过TTL）
    pub fn is_fresh(&self) -> bool {
        match self.loaded_at {
            Some(at) => self.clock.now() - at < self.ttl,
            None => false,
        }
    }

    /// 读取缓存值；缓存过期时返回None，由调用方重建
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_fresh() {
            return None;
        }
        self.entries.get(key).cloned()
    }

    /// 整体重建缓存内容
    pub fn rebuild(&mut self, entries: HashMap<K, V>) {
        self.entries = entries;
        self.loaded_at = Some(self.clock.now());
    }

    /// 失效：写入方在底层写提交后调用
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.loaded_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    /// 手动推进的测试时钟
    struct TestClock {
        seconds: Arc<AtomicI64>,
    }

    impl Clock for TestClock {
        fn now(&self) -> OffsetDateTime {
            OffsetDateTime::UNIX_EPOCH + Duration::seconds(self.seconds.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let seconds = Arc::new(AtomicI64::new(0));
        let clock = TestClock { seconds: seconds.clone() };
        let mut cache: TtlCache<String, i32> = TtlCache::with_clock(10, Box::new(clock));

        let mut entries = HashMap::new();
        entries.insert("a".to_string(), 1);
        cache.rebuild(entries);

        assert_eq!(cache.get(&"a".to_string()), Some(1));

        seconds.store(11, Ordering::SeqCst);
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_invalidate_clears_entries() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(3600);
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), 1);
        cache.rebuild(entries);
        assert!(cache.is_fresh());

        cache.invalidate();
        assert!(!cache.is_fresh());
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}
