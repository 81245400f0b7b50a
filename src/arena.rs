use std::ops::{Index, IndexMut};

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArenaIndex {
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Arena<T> {
    nodes: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::default(),
        }
    }
}

impl<T> Arena<T> {
    pub fn allocate(&mut self, node: T) -> ArenaIndex {
        self.nodes.push(node);
        ArenaIndex {
            index: self.nodes.len() - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (ArenaIndex { index }, node))
    }

    pub fn indices(&self) -> impl Iterator<Item = ArenaIndex> + use<T> {
        (0..self.nodes.len()).map(|index| ArenaIndex { index })
    }
}

impl<T> Index<ArenaIndex> for Arena<T> {
    type Output = T;

    fn index(&self, index: ArenaIndex) -> &Self::Output {
        &self.nodes[index.index]
    }
}

impl<T> IndexMut<ArenaIndex> for Arena<T> {
    fn index_mut(&mut self, index: ArenaIndex) -> &mut Self::Output {
        &mut self.nodes[index.index]
    }
}

impl<'a, T> IntoIterator for &'a Arena<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// An arena whose entries are also reachable by a unique string key.
///
/// Entities reference each other through `ArenaIndex` values, never through
/// pointers, so parent/child and group/member links cannot form ownership cycles.
#[derive(Debug, Clone)]
pub struct KeyedArena<T> {
    arena: Arena<T>,
    keys: IndexMap<String, ArenaIndex>,
}

impl<T> Default for KeyedArena<T> {
    fn default() -> Self {
        Self {
            arena: Arena::default(),
            keys: IndexMap::new(),
        }
    }
}

impl<T> KeyedArena<T> {
    /// Allocates `node` under `key`. Returns `None` if the key is taken.
    pub fn insert(&mut self, key: &str, node: T) -> Option<ArenaIndex> {
        if self.keys.contains_key(key) {
            return None;
        }
        let idx = self.arena.allocate(node);
        self.keys.insert(key.to_owned(), idx);
        Some(idx)
    }

    pub fn get_or_insert_with(&mut self, key: &str, node: impl FnOnce() -> T) -> ArenaIndex {
        if let Some(idx) = self.lookup(key) {
            return idx;
        }
        let idx = self.arena.allocate(node());
        self.keys.insert(key.to_owned(), idx);
        idx
    }

    pub fn lookup(&self, key: &str) -> Option<ArenaIndex> {
        self.keys.get(key).copied()
    }

    pub fn by_key(&self, key: &str) -> Option<&T> {
        self.lookup(key).map(|idx| &self.arena[idx])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.arena.iter()
    }

    pub fn indices(&self) -> impl Iterator<Item = ArenaIndex> + use<T> {
        self.arena.indices()
    }
}

impl<T> Index<ArenaIndex> for KeyedArena<T> {
    type Output = T;

    fn index(&self, index: ArenaIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl<T> IndexMut<ArenaIndex> for KeyedArena<T> {
    fn index_mut(&mut self, index: ArenaIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}
