use super::PartitionStrategy;
use crate::core::error::Result;
use crate::core::{KeyLayout, KvEngine};

/// Uniformly-random pick over the live partition set. Stateless and the
/// cheapest per call; makes no starvation guarantee.
pub struct RandomStrategy;

impl PartitionStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, kv: &KvEngine, keys: &KeyLayout, queue: &str) -> Result<Option<String>> {
        kv.srandmember(&keys.partitions(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_selects_nothing() {
        let kv = KvEngine::new();
        let keys = KeyLayout::new("bq");
        assert_eq!(RandomStrategy.select(&kv, &keys, "q").unwrap(), None);
    }

    #[test]
    fn test_selects_a_member() {
        let kv = KvEngine::new();
        let keys = KeyLayout::new("bq");
        kv.atomic(|ks| {
            ks.sadd(&keys.partitions("q"), "a")?;
            ks.sadd(&keys.partitions("q"), "b")
        })
        .unwrap();

        for _ in 0..16 {
            let pick = RandomStrategy.select(&kv, &keys, "q").unwrap().unwrap();
            assert!(pick == "a" || pick == "b");
        }
    }
}
