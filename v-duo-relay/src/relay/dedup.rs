use std::collections::{HashSet, VecDeque};

/// 有界去重集合，超出容量淘汰最旧 id / Bounded dedup set evicting the oldest id past capacity
#[derive(Debug)]
pub struct DedupSet {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// 首次出现返回 true；已存在则刷新为最近使用
    /// True on first sight; an existing id is refreshed as most recent
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            if let Some(pos) = self.order.iter().position(|x| x == id) {
                if let Some(existing) = self.order.remove(pos) {
                    self.order.push_back(existing);
                }
            }
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_id_is_rejected() {
        let mut set = DedupSet::new(4);
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut set = DedupSet::new(2);
        set.insert("a");
        set.insert("b");
        set.insert("a");
        set.insert("c");
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
        assert_eq!(set.len(), 2);
    }
}
