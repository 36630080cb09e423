//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了容量受限的键值映射，超出容量时淘汰最旧的条目。
//!
//! 内部是一个槽位数组（arena）加双向链表维护键顺序，再配合哈希索引，
//! 插入、读取、删除和淘汰都是 O(1) 摊还复杂度。

use ahash::RandomState;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

/// 淘汰顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionOrder {
    /// 按插入顺序淘汰，读取不影响顺序
    #[default]
    Insertion,
    /// 按访问顺序淘汰，读取和覆盖写入会把条目移到最新位置
    Access,
}

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// 容量受限的映射
///
/// 插入导致条目数超过容量时立即淘汰恰好一个最旧的条目
pub struct BoundedMap<K, V> {
    capacity: usize,
    order: EvictionOrder,
    index: HashMap<K, usize, RandomState>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    // 最旧
    head: usize,
    // 最新
    tail: usize,
}

impl<K: Hash + Eq + Clone, V> BoundedMap<K, V> {
    /// 创建新的映射
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数，至少为1
    /// * `order` - 淘汰顺序
    pub fn new(capacity: usize, order: EvictionOrder) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order,
            index: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn order(&self) -> EvictionOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// 写入条目
    ///
    /// # 返回值
    ///
    /// 返回因超出容量被淘汰的条目（如有）
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            if self.order == EvictionOrder::Access {
                self.move_to_tail(idx);
            }
            return None;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: self.tail,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_tail(idx);
        self.index.insert(key, idx);

        if self.index.len() > self.capacity {
            self.pop_oldest()
        } else {
            None
        }
    }

    /// 读取条目，访问顺序模式下会刷新该条目的位置
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        if self.order == EvictionOrder::Access {
            self.move_to_tail(idx);
        }
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// 读取条目但不影响淘汰顺序
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|slot| slot.value)
    }

    /// 淘汰最旧的条目
    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.unlink(idx);
        self.free.push(idx);
        let slot = self.slots[idx].take()?;
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    /// 从最旧到最新遍历键
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            map: self,
            cursor: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn link_tail(&mut self, idx: usize) {
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = self.tail;
            slot.next = NIL;
        }
        if self.tail != NIL {
            if let Some(prev) = self.slots[self.tail].as_mut() {
                prev.next = idx;
            }
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        if prev != NIL {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.unlink(idx);
        self.link_tail(idx);
    }
}

impl<K, V> std::fmt::Debug for BoundedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedMap")
            .field("capacity", &self.capacity)
            .field("order", &self.order)
            .field("len", &self.index.len())
            .finish()
    }
}

/// 键迭代器，从最旧到最新
pub struct Keys<'a, K, V> {
    map: &'a BoundedMap<K, V>,
    cursor: usize,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let slot = self.map.slots[self.cursor].as_ref()?;
        self.cursor = slot.next;
        Some(&slot.key)
    }
}
