//! The replica access table
//!
//! Maps an opaque token to the pid allowed to keep writing a replica.
//! A token is minted on a successful write-open and survives
//! close/reopen within a session. The table is process-wide; every
//! operation takes the single lock.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

/// One authorization: this pid may write this replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaAccessEntry {
    pub token: String,
    pub pid: u32,
    pub data_id: i64,
    pub replica_number: i32,
}

#[derive(Debug, Default)]
struct Inner {
    by_token: HashMap<String, ReplicaAccessEntry>,
    by_pid: HashMap<u32, HashSet<String>>,
}

/// Process-wide token ↔ pid authorization map.
#[derive(Debug, Default)]
pub struct ReplicaAccessTable {
    inner: Mutex<Inner>,
}

impl ReplicaAccessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token authorizing `pid` to write the replica.
    pub fn issue(&self, data_id: i64, replica_number: i32, pid: u32) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let entry = ReplicaAccessEntry {
            token: token.clone(),
            pid,
            data_id,
            replica_number,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.by_pid.entry(pid).or_default().insert(token.clone());
        inner.by_token.insert(token.clone(), entry);
        token
    }

    pub fn contains(&self, token: &str) -> Option<ReplicaAccessEntry> {
        self.inner.lock().unwrap().by_token.get(token).cloned()
    }

    /// Atomically remove and return the entry, if `pid` owns it.
    pub fn erase_pid(&self, token: &str, pid: u32) -> Option<ReplicaAccessEntry> {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_token.get(token) {
            Some(entry) if entry.pid == pid => {}
            _ => return None,
        }
        let entry = inner.by_token.remove(token)?;
        if let Some(tokens) = inner.by_pid.get_mut(&pid) {
            tokens.remove(token);
            if tokens.is_empty() {
                inner.by_pid.remove(&pid);
            }
        }
        Some(entry)
    }

    /// Re-insert a previously erased entry verbatim.
    pub fn restore(&self, entry: ReplicaAccessEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .by_pid
            .entry(entry.pid)
            .or_default()
            .insert(entry.token.clone());
        inner.by_token.insert(entry.token.clone(), entry);
    }

    /// All tokens held by a pid, for teardown.
    pub fn erase_all_for_pid(&self, pid: u32) -> Vec<ReplicaAccessEntry> {
        let mut inner = self.inner.lock().unwrap();
        let Some(tokens) = inner.by_pid.remove(&pid) else {
            return Vec::new();
        };
        tokens
            .into_iter()
            .filter_map(|token| inner.by_token.remove(&token))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Erases an access entry up front and restores it unless disarmed.
///
/// Close-of-write removes its entry before finalize so no other opener
/// can see the replica as writable mid-close; if finalize fails the
/// guard reinstates the entry, leaving the system in the pre-close
/// state.
#[derive(Debug)]
pub struct AccessRestoreGuard<'a> {
    table: &'a ReplicaAccessTable,
    entry: Option<ReplicaAccessEntry>,
}

impl<'a> AccessRestoreGuard<'a> {
    /// Erase `(token, pid)` now; restore on drop unless disarmed.
    pub fn erase(table: &'a ReplicaAccessTable, token: &str, pid: u32) -> Self {
        Self {
            table,
            entry: table.erase_pid(token, pid),
        }
    }

    /// Whether an entry was actually erased.
    pub fn erased(&self) -> bool {
        self.entry.is_some()
    }

    /// The close succeeded; the entry stays gone.
    pub fn disarm(&mut self) {
        self.entry = None;
    }
}

impl Drop for AccessRestoreGuard<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.table.restore(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_lookup() {
        let table = ReplicaAccessTable::new();
        let token = table.issue(7, 0, 1234);
        let entry = table.contains(&token).unwrap();
        assert_eq!(entry.data_id, 7);
        assert_eq!(entry.replica_number, 0);
        assert_eq!(entry.pid, 1234);
    }

    #[test]
    fn test_tokens_are_unique() {
        let table = ReplicaAccessTable::new();
        let a = table.issue(1, 0, 1);
        let b = table.issue(1, 0, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_erase_requires_owning_pid() {
        let table = ReplicaAccessTable::new();
        let token = table.issue(7, 0, 1234);
        assert!(table.erase_pid(&token, 9999).is_none());
        assert!(table.contains(&token).is_some());
        assert!(table.erase_pid(&token, 1234).is_some());
        assert!(table.contains(&token).is_none());
    }

    #[test]
    fn test_restore_reinstates_entry_verbatim() {
        let table = ReplicaAccessTable::new();
        let token = table.issue(7, 2, 42);
        let entry = table.erase_pid(&token, 42).unwrap();
        table.restore(entry.clone());
        assert_eq!(table.contains(&token).unwrap(), entry);
    }

    #[test]
    fn test_erase_all_for_pid() {
        let table = ReplicaAccessTable::new();
        table.issue(1, 0, 10);
        table.issue(2, 0, 10);
        let other = table.issue(3, 0, 20);
        let erased = table.erase_all_for_pid(10);
        assert_eq!(erased.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&other).is_some());
    }

    #[test]
    fn test_guard_restores_unless_disarmed() {
        let table = ReplicaAccessTable::new();
        let token = table.issue(7, 0, 1);
        {
            let guard = AccessRestoreGuard::erase(&table, &token, 1);
            assert!(guard.erased());
            assert!(table.contains(&token).is_none());
        }
        // Not disarmed: entry restored.
        assert!(table.contains(&token).is_some());

        {
            let mut guard = AccessRestoreGuard::erase(&table, &token, 1);
            guard.disarm();
        }
        // Disarmed: entry stays gone.
        assert!(table.contains(&token).is_none());
    }
}
