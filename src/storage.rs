/*!
 * In-Memory Storage Backend
 *
 * Each logical database is a `Backend`: a concurrent dictionary plus the
 * reader/exclusive lock that the command pipeline holds for the duration
 * of every command touching that database.
 */

use crate::error::StorageError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;

/// Value types that can be stored
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String/binary data
    Str(Bytes),
    /// 64-bit signed integer, stored when a string parses as one
    Int(i64),
    /// List of elements, head at the front
    List(VecDeque<Bytes>),
}

impl Value {
    /// Build a string value, keeping it as an integer when it parses as one
    pub fn from_bytes(v: Bytes) -> Self {
        // Fast fail: integers fit in 20 chars and start with a digit or '-'
        if v.len() <= 20 && !v.is_empty() && (v[0].is_ascii_digit() || v[0] == b'-') {
            let parsed = std::str::from_utf8(&v).ok().and_then(|s| s.parse::<i64>().ok());
            // only canonical spellings, so GET returns exactly what was SET
            if let Some(i) = parsed.filter(|i| i.to_string().as_bytes() == &v[..]) {
                return Value::Int(i);
            }
        }
        Value::Str(v)
    }
}

/// Pop-one-element access used by the blocking wake protocol
///
/// Kept as a trait so the wait registry does not depend on the concrete
/// dictionary.
pub trait ListStore {
    /// Remove and return the head of the list at `key`
    ///
    /// `StorageError::NotFound` means there is nothing left to pop.
    fn pop_front(&self, key: &[u8]) -> Result<Bytes, StorageError>;
}

/// Concurrent dictionary holding one database's keys
///
/// Per-key synchronisation comes from the sharded map, so commands holding
/// the database lock in shared mode can run side by side.
#[derive(Default)]
pub struct Dict {
    inner: DashMap<Bytes, Value, ahash::RandomState>,
}

impl Dict {
    /// Get a copy of the value at `k`
    #[inline]
    pub fn get(&self, k: &[u8]) -> Option<Value> {
        self.inner.get(k).map(|v| v.value().clone())
    }

    /// Insert or replace a value
    #[inline]
    pub fn set(&self, k: Bytes, v: Value) {
        self.inner.insert(k, v);
    }

    /// Delete a key, returning whether it existed
    #[inline]
    pub fn del(&self, k: &[u8]) -> bool {
        self.inner.remove(k).is_some()
    }

    #[inline]
    pub fn exists(&self, k: &[u8]) -> bool {
        self.inner.contains_key(k)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove every key
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Push elements onto the list at `k`, creating it if needed
    ///
    /// Elements go to the head when `front` is set (LPUSH order: the last
    /// argument ends up first) and to the tail otherwise.
    ///
    /// # Returns
    /// * The new list length
    /// * `StorageError::WrongType` if `k` holds a non-list value
    pub fn push(&self, k: Bytes, elems: &[Bytes], front: bool) -> Result<usize, StorageError> {
        let mut entry = self.inner.entry(k).or_insert_with(|| Value::List(VecDeque::new()));
        match entry.value_mut() {
            Value::List(list) => {
                for e in elems {
                    if front {
                        list.push_front(e.clone());
                    } else {
                        list.push_back(e.clone());
                    }
                }
                Ok(list.len())
            }
            _ => Err(StorageError::WrongType),
        }
    }

    /// Length of the list at `k`, 0 when missing
    pub fn list_len(&self, k: &[u8]) -> Result<usize, StorageError> {
        match self.inner.get(k).as_deref() {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(StorageError::WrongType),
        }
    }
}

impl ListStore for Dict {
    fn pop_front(&self, key: &[u8]) -> Result<Bytes, StorageError> {
        let popped = match self.inner.get_mut(key) {
            None => return Err(StorageError::NotFound),
            Some(mut entry) => match entry.value_mut() {
                Value::List(list) => (list.pop_front(), list.is_empty()),
                _ => return Err(StorageError::WrongType),
            },
        };
        match popped {
            (Some(v), drained) => {
                if drained {
                    // Re-check under the shard lock: a push may have landed in between
                    self.inner.remove_if(key, |_, v| matches!(v, Value::List(l) if l.is_empty()));
                }
                Ok(v)
            }
            (None, _) => {
                self.inner.remove_if(key, |_, v| matches!(v, Value::List(l) if l.is_empty()));
                Err(StorageError::NotFound)
            }
        }
    }
}

/// Scoped hold on a database lock
///
/// Dropping the guard releases the lock, so every exit path out of a
/// command (early return, error, unwinding panic) gives it back.
pub enum DbGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

impl DbGuard<'_> {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, DbGuard::Exclusive(_))
    }
}

/// One logical database
#[derive(Default)]
pub struct Backend {
    lock: RwLock<()>,
    dict: Dict,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the database lock in shared mode
    #[inline]
    pub fn lock_shared(&self) -> DbGuard<'_> {
        DbGuard::Shared(self.lock.read())
    }

    /// Take the database lock exclusively, waiting for all holders to drain
    #[inline]
    pub fn lock_exclusive(&self) -> DbGuard<'_> {
        DbGuard::Exclusive(self.lock.write())
    }

    #[inline]
    pub fn dict(&self) -> &Dict {
        &self.dict
    }
}
