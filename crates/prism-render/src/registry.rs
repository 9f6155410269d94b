// SPDX-License-Identifier: CEPL-1.0
//! Name-keyed arena used for meshes and materials.
//!
//! Entries are never removed, so a [`Handle`] stays valid for the life of the
//! registry even when more entries are added later.
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: PhantomData,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

struct Entry<T> {
    name: String,
    value: T,
}

pub struct Registry<T> {
    entries: Vec<Entry<T>>,
    by_name: HashMap<String, Handle<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`. Re-registering a name overwrites the
    /// existing slot, so handles already given out see the new value.
    pub fn register(&mut self, name: impl Into<String>, value: T) -> Handle<T> {
        let name = name.into();
        if let Some(&handle) = self.by_name.get(&name) {
            self.entries[handle.index()].value = value;
            return handle;
        }
        let handle = Handle::new(self.entries.len());
        self.entries.push(Entry {
            name: name.clone(),
            value,
        });
        self.by_name.insert(name, handle);
        handle
    }

    pub fn lookup(&self, name: &str) -> Option<Handle<T>> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.entries.get(handle.index()).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.entries.get_mut(handle.index()).map(|e| &mut e.value)
    }

    pub fn find(&self, name: &str) -> Option<&T> {
        self.lookup(name).and_then(|h| self.get(h))
    }

    pub fn name(&self, handle: Handle<T>) -> Option<&str> {
        self.entries.get(handle.index()).map(|e| e.name.as_str())
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + '_ {
        (0..self.entries.len()).map(Handle::new)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: fmt::Debug> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, &e.value)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_absent() {
        let mut reg: Registry<u32> = Registry::new();
        assert!(reg.lookup("defaultmesh").is_none());
        reg.register("defaultmesh", 7);
        assert!(reg.lookup("nonexistent").is_none());
        assert!(reg.find("nonexistent").is_none());
    }

    #[test]
    fn handles_survive_later_registrations() {
        let mut reg = Registry::new();
        let a = reg.register("a", String::from("first"));
        for i in 0..100 {
            reg.register(format!("filler{i}"), String::from("x"));
        }
        assert_eq!(reg.get(a).map(String::as_str), Some("first"));
        assert_eq!(reg.name(a), Some("a"));
        assert_eq!(reg.len(), 101);
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut reg = Registry::new();
        let first = reg.register("mat", 1);
        let second = reg.register("mat", 2);
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(first), Some(&2));
    }

    #[test]
    fn foreign_handle_out_of_range_is_absent() {
        let mut big: Registry<u8> = Registry::new();
        for i in 0..3 {
            big.register(format!("m{i}"), i);
        }
        let foreign = big.lookup("m2").unwrap();
        let small: Registry<u8> = Registry::new();
        assert!(small.get(foreign).is_none());
    }
}
