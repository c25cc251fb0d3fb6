//! Conditional input: the keyword/value map carried by every request
//!
//! Hints ride along with open/close/put inputs and are consumed by the
//! resolver, the locking layer and the finalize engine. Unknown keywords
//! are preserved untouched so callbacks can see them.

use std::collections::BTreeMap;

/// Recognized keywords. Values are free-form strings; several keywords
/// are flags whose value is ignored (empty string by convention).
pub mod keywords {
    /// Force a specific resource hierarchy, bypassing resolution
    pub const RESC_HIER: &str = "resc_hier";
    /// Target root resource hint
    pub const RESC_NAME: &str = "resc_name";
    /// Destination root resource hint
    pub const DEST_RESC_NAME: &str = "dest_resc_name";
    /// Default root resource hint
    pub const DEF_RESC_NAME: &str = "def_resc_name";
    /// Backup root resource hint
    pub const BACKUP_RESC_NAME: &str = "backup_resc_name";
    /// Permit overwriting an existing replica
    pub const FORCE_FLAG: &str = "force_flag";
    /// Target a specific replica number
    pub const REPL_NUM: &str = "repl_num";
    /// Compute and register a checksum without comparison
    pub const REG_CHKSUM: &str = "reg_chksum";
    /// Compute a checksum and verify it against the expected value
    pub const VERIFY_CHKSUM: &str = "verify_chksum";
    /// Recompute a checksum even if one is already registered
    pub const FORCE_CHKSUM: &str = "force_chksum";
    /// Bypass quota and permission checks
    pub const ADMIN: &str = "admin";
    /// Propagate the operation to all replicas
    pub const ALL: &str = "all";
    /// Skip size reconciliation at close
    pub const NO_CHK_COPY_LEN: &str = "no_chk_copy_len";
    /// Replica was created by a peer zone
    pub const CROSS_ZONE_CREATE: &str = "cross_zone_create";
    /// Defer the physical open for small transfers
    pub const PHYOPEN_BY_SIZE: &str = "phyopen_by_size";
    /// A single-buffer payload follows inline
    pub const DATA_INCLUDED: &str = "data_included";
    /// Request an advisory lock at open
    pub const LOCK_TYPE: &str = "lock_type";
    /// Advisory lock handle, carried to the unlock call
    pub const LOCK_FD: &str = "lock_fd";
    /// Source checksum hint for replication destinations
    pub const ORIG_CHKSUM: &str = "orig_chksum";
    /// Mark every other intermediate replica stale at finalize
    pub const STALE_ALL_INTERMEDIATE_REPLICAS: &str = "stale_all_intermediate_replicas";
    /// Register the new replica in intermediate status
    pub const REGISTER_AS_INTERMEDIATE: &str = "register_as_intermediate";
    /// Allocate the descriptor without physically opening the file
    pub const NO_OPEN: &str = "no_open";
    /// Overwrite the existing replica on the destination during replication
    pub const UPDATE_REPL: &str = "update_repl";
    /// Number of copies to keep when trimming
    pub const COPIES: &str = "copies";
    /// Open-type marker carried between open and close
    pub const OPEN_TYPE: &str = "open_type";
    /// Expected size of the incoming data
    pub const DATA_SIZE: &str = "data_size";
    /// Trim the cache replica after a successful close
    pub const PURGE_CACHE: &str = "purge_cache";
    /// Token authorizing a reopen of an intermediate replica
    pub const REPLICA_TOKEN: &str = "replica_token";
}

/// Ordered keyword/value map. Iteration order is the key order, which
/// keeps serialized forms deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CondInput {
    entries: BTreeMap<String, String>,
}

impl CondInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Set a valueless flag keyword.
    pub fn set_flag(&mut self, key: &str) {
        self.entries.insert(key.to_string(), String::new());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn erase(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First of the given keys that is present, with its value.
    pub fn first_of<'a>(&self, keys: &[&'a str]) -> Option<(&'a str, &str)> {
        keys.iter()
            .find_map(|k| self.get(k).map(|v| (*k, v)))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for CondInput {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut ci = CondInput::new();
        for (k, v) in pairs {
            ci.set(k, v);
        }
        ci
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_round_trip() {
        let mut ci = CondInput::new();
        ci.set_flag(keywords::FORCE_FLAG);
        assert!(ci.contains(keywords::FORCE_FLAG));
        assert_eq!(ci.get(keywords::FORCE_FLAG), Some(""));
        assert_eq!(ci.erase(keywords::FORCE_FLAG), Some(String::new()));
        assert!(!ci.contains(keywords::FORCE_FLAG));
    }

    #[test]
    fn test_first_of_respects_caller_order() {
        let ci = CondInput::from([
            (keywords::DEST_RESC_NAME, "archive"),
            (keywords::RESC_NAME, "fast"),
        ]);
        let (key, value) = ci
            .first_of(&[keywords::RESC_NAME, keywords::DEST_RESC_NAME])
            .unwrap();
        assert_eq!(key, keywords::RESC_NAME);
        assert_eq!(value, "fast");
    }

    #[test]
    fn test_iteration_is_sorted() {
        let ci = CondInput::from([("zeta", "1"), ("alpha", "2")]);
        let keys: Vec<_> = ci.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }
}
