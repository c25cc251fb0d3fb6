//! Local filesystem vault plugin
//!
//! Stores replicas as plain files under a vault root, mirroring the
//! logical path. Open handles are plugin-scoped descriptors starting at
//! 3 so they are never confused with well-known fd numbers.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::plugin::{ResourcePlugin, UNKNOWN_FILE_SIZE};
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::replica::{LogicalObject, ReplicaStatus};
use crate::resolve::{Operation, Vote};

/// A root resource backed by a local directory tree.
#[derive(Debug)]
pub struct FilesystemResource {
    name: String,
    hierarchy: String,
    leaf_resource_id: i64,
    vault_root: PathBuf,
    host: String,
    read_only: bool,
    archive: bool,
    quota_bytes: Option<i64>,
    used_bytes: Mutex<i64>,
    files: Mutex<HashMap<i32, File>>,
    next_fd: AtomicI32,
}

impl FilesystemResource {
    pub fn new(name: impl Into<String>, leaf_resource_id: i64, vault_root: PathBuf) -> Self {
        let name = name.into();
        Self {
            hierarchy: name.clone(),
            name,
            leaf_resource_id,
            vault_root,
            host: "localhost".to_string(),
            read_only: false,
            archive: false,
            quota_bytes: None,
            used_bytes: Mutex::new(0),
            files: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(3),
        }
    }

    /// Extend the hierarchy below the root, e.g. `cache;disk`.
    pub fn with_children(mut self, chain: &str) -> Self {
        self.hierarchy = format!("{};{}", self.name, chain);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn archive(mut self) -> Self {
        self.archive = true;
        self
    }

    pub fn with_quota(mut self, bytes: i64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    fn register(&self, file: File) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.files.lock().unwrap().insert(fd, file);
        fd
    }

    fn vote_for_existing(&self, operation: Operation, object: &LogicalObject) -> Vote {
        let Some(index) = object.index_of_root(&self.name) else {
            return Vote::ZERO;
        };
        let status = object.replicas()[index].replica_status;
        match operation {
            Operation::Open => match status {
                ReplicaStatus::Good | ReplicaStatus::ReadLockOnGood => Vote::FULL,
                ReplicaStatus::Stale | ReplicaStatus::ReadLockOnStale => Vote::new(0.5),
                // An intermediate replica is not a valid read source.
                ReplicaStatus::Intermediate | ReplicaStatus::WriteLock => Vote::ZERO,
            },
            Operation::Write => {
                if self.read_only {
                    return Vote::ZERO;
                }
                match status {
                    ReplicaStatus::Good => Vote::FULL,
                    // Resolvable; the logical-locking layer arbitrates.
                    _ => Vote::new(0.5),
                }
            }
            Operation::Unlink => {
                if self.read_only {
                    Vote::ZERO
                } else {
                    Vote::FULL
                }
            }
            Operation::Create => Vote::ZERO,
        }
    }
}

impl ResourcePlugin for FilesystemResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn hierarchy(&self) -> String {
        self.hierarchy.clone()
    }

    fn leaf_resource_id(&self) -> i64 {
        self.leaf_resource_id
    }

    fn resolve_hierarchy(
        &self,
        operation: Operation,
        object: Option<&LogicalObject>,
        local_host: &str,
    ) -> CoreResult<(String, Vote)> {
        let vote = match operation {
            Operation::Create => {
                if self.read_only || !self.quota_allows(0) {
                    Vote::ZERO
                } else if self.host == local_host {
                    Vote::FULL
                } else {
                    Vote::new(0.5)
                }
            }
            _ => match object {
                Some(object) => self.vote_for_existing(operation, object),
                None => Vote::ZERO,
            },
        };
        Ok((self.hierarchy.clone(), vote))
    }

    fn generate_physical_path(&self, logical_path: &str) -> String {
        self.vault_root
            .join(logical_path.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned()
    }

    fn create(&self, physical_path: &str) -> CoreResult<i32> {
        if let Some(parent) = PathBuf::from(physical_path).parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::with_source(
                    CoreErrorCode::PhysicalCreateFailed,
                    format!("cannot create vault directory for [{}]", physical_path),
                    e,
                )
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(physical_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    CoreError::new(
                        CoreErrorCode::PhysicalPathExists,
                        format!("vault path already occupied [{}]", physical_path),
                    )
                } else {
                    CoreError::with_source(
                        CoreErrorCode::PhysicalCreateFailed,
                        format!("create failed [{}]", physical_path),
                        e,
                    )
                }
            })?;
        Ok(self.register(file))
    }

    fn open(&self, physical_path: &str, write: bool, truncate: bool) -> CoreResult<i32> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .truncate(truncate)
            .open(physical_path)
            .map_err(|e| {
                CoreError::with_source(
                    CoreErrorCode::PhysicalOpenFailed,
                    format!("open failed [{}]", physical_path),
                    e,
                )
            })?;
        Ok(self.register(file))
    }

    fn write(&self, fd: i32, data: &[u8]) -> CoreResult<usize> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&fd).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::PhysicalIoFailed,
                format!("unknown storage descriptor [{}]", fd),
            )
        })?;
        file.write_all(data).map_err(|e| {
            CoreError::with_source(CoreErrorCode::PhysicalIoFailed, "write failed", e)
        })?;
        *self.used_bytes.lock().unwrap() += data.len() as i64;
        Ok(data.len())
    }

    fn read(&self, fd: i32, max_bytes: usize) -> CoreResult<Vec<u8>> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&fd).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::PhysicalIoFailed,
                format!("unknown storage descriptor [{}]", fd),
            )
        })?;
        let mut buf = vec![0u8; max_bytes];
        let mut filled = 0;
        while filled < max_bytes {
            let n = file.read(&mut buf[filled..]).map_err(|e| {
                CoreError::with_source(CoreErrorCode::PhysicalIoFailed, "read failed", e)
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn close(&self, fd: i32) -> CoreResult<()> {
        match self.files.lock().unwrap().remove(&fd) {
            Some(file) => {
                file.sync_all().map_err(|e| {
                    CoreError::with_source(CoreErrorCode::PhysicalCloseFailed, "sync failed", e)
                })?;
                Ok(())
            }
            None => Err(CoreError::new(
                CoreErrorCode::PhysicalCloseFailed,
                format!("unknown storage descriptor [{}]", fd),
            )),
        }
    }

    fn stat_size(&self, physical_path: &str) -> CoreResult<i64> {
        if self.archive {
            return Ok(UNKNOWN_FILE_SIZE);
        }
        let meta = fs::metadata(physical_path).map_err(|e| {
            CoreError::with_source(
                CoreErrorCode::PhysicalStatFailed,
                format!("stat failed [{}]", physical_path),
                e,
            )
        })?;
        Ok(meta.len() as i64)
    }

    fn checksum(&self, physical_path: &str) -> CoreResult<String> {
        if self.archive {
            return Err(CoreError::new(
                CoreErrorCode::DirectArchiveAccess,
                format!("archive resource cannot checksum [{}]", physical_path),
            ));
        }
        let data = fs::read(physical_path).map_err(|e| {
            CoreError::with_source(
                CoreErrorCode::PhysicalIoFailed,
                format!("checksum read failed [{}]", physical_path),
                e,
            )
        })?;
        let digest = Sha256::digest(&data);
        Ok(format!("sha2:{}", BASE64.encode(digest)))
    }

    fn unlink(&self, physical_path: &str) -> CoreResult<()> {
        fs::remove_file(physical_path).map_err(|e| {
            CoreError::with_source(
                CoreErrorCode::PhysicalUnlinkFailed,
                format!("unlink failed [{}]", physical_path),
                e,
            )
        })
    }

    fn quota_allows(&self, additional_bytes: i64) -> bool {
        match self.quota_bytes {
            Some(limit) => *self.used_bytes.lock().unwrap() + additional_bytes <= limit,
            None => true,
        }
    }

    fn is_archive(&self) -> bool {
        self.archive
    }
}
