//! InMemoryKvEngine - ヒープ上のパーティション付きテーブル
//!
//! # 学習ポイント
//! - 正引き（partition -> key -> value）と逆引き（key -> partition）の二重インデックス
//! - 1 つの Mutex で両インデックスの整合を保つ
//! - `BTreeMap` によるキー順の列挙

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{ReckonError, Result};
use crate::ports::kv_engine::{KvEngine, PartitionedTable, TableValue, Values};

/// Engine handing out `InMemoryTable`s.
#[derive(Debug, Default)]
pub struct InMemoryKvEngine {
    names: Mutex<HashSet<String>>,
}

impl InMemoryKvEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvEngine for InMemoryKvEngine {
    fn create_table<V: TableValue>(&self, name: &str) -> Result<Box<dyn PartitionedTable<V>>> {
        let mut names = self
            .names
            .lock()
            .map_err(|_| ReckonError::poisoned("create_table"))?;
        if !names.insert(name.to_string()) {
            return Err(ReckonError::InvalidArgument(format!(
                "table {name:?} already exists"
            )));
        }
        Ok(Box::new(InMemoryTable::<V>::new()))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let names = self
            .names
            .lock()
            .map_err(|_| ReckonError::poisoned("table_names"))?;
        let mut names: Vec<String> = names.iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Rows live in the table handle and go away with it; only the name is
    /// released here.
    fn drop_table(&self, name: &str) -> Result<()> {
        self.names
            .lock()
            .map_err(|_| ReckonError::poisoned("drop_table"))?
            .remove(name);
        Ok(())
    }
}

struct TableState<V> {
    partitions: HashMap<String, BTreeMap<String, V>>,
    index: HashMap<String, String>,
}

impl<V> TableState<V> {
    fn remove_key(&mut self, key: &str) {
        let Some(partition) = self.index.remove(key) else {
            return;
        };
        if let Some(entries) = self.partitions.get_mut(&partition) {
            entries.remove(key);
            if entries.is_empty() {
                self.partitions.remove(&partition);
            }
        }
    }
}

/// A partitioned table living entirely in process memory.
///
/// # 実装詳細
/// - `partitions: HashMap<String, BTreeMap<String, V>>` が正引き
/// - `index: HashMap<String, String>` が key から現在のパーティションへの逆引き
/// - 別パーティションへの `put` は古い位置から値を取り除いてから書く
pub struct InMemoryTable<V> {
    state: Mutex<TableState<V>>,
}

impl<V> InMemoryTable<V> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                partitions: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }
}

impl<V> Default for InMemoryTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TableValue> PartitionedTable<V> for InMemoryTable<V> {
    fn put(&self, partition: &str, key: &str, value: V) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| ReckonError::poisoned("put"))?;
        if state.index.get(key).is_some_and(|p| p != partition) {
            state.remove_key(key);
        }
        state
            .partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value);
        state.index.insert(key.to_string(), partition.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<V>> {
        let state = self.state.lock().map_err(|_| ReckonError::poisoned("get"))?;
        let value = state
            .index
            .get(key)
            .and_then(|partition| state.partitions.get(partition))
            .and_then(|entries| entries.get(key))
            .cloned();
        Ok(value)
    }

    fn values_in_partition(&self, partition: &str) -> Result<Vec<V>> {
        let state = self
            .state
            .lock()
            .map_err(|_| ReckonError::poisoned("values_in_partition"))?;
        Ok(state
            .partitions
            .get(partition)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear_partition(&self, partition: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ReckonError::poisoned("clear_partition"))?;
        if let Some(entries) = state.partitions.remove(partition) {
            for key in entries.keys() {
                state.index.remove(key);
            }
        }
        Ok(())
    }

    fn all_values(&self) -> Values<'_, V> {
        // Snapshot under the lock; the iterator itself holds no lock.
        match self.state.lock() {
            Ok(state) => {
                let snapshot: Vec<V> = state
                    .partitions
                    .values()
                    .flat_map(|entries| entries.values().cloned())
                    .collect();
                Box::new(snapshot.into_iter().map(Ok))
            }
            Err(_) => Box::new(std::iter::once(Err(ReckonError::poisoned("all_values")))),
        }
    }

    fn clear_all(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ReckonError::poisoned("clear_all"))?;
        state.partitions.clear();
        state.index.clear();
        Ok(())
    }
}
