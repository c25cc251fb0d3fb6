//! The replica record
//!
//! One physical copy of a logical object. The canonical JSON form is the
//! unit of exchange with the catalog finalize executor: every value is a
//! string, keyed by the catalog column names.

use chrono::Utc;
use serde_json::{json, Value};

use super::cond_input::CondInput;
use super::status::ReplicaStatus;
use crate::error::{CoreError, CoreErrorCode, CoreResult};

/// Current time as a zero-padded 11-digit epoch-second string, the
/// catalog's timestamp form.
pub fn now_timestamp() -> String {
    format!("{:011}", Utc::now().timestamp())
}

/// One physical copy of a logical object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    // identity
    pub data_id: i64,
    pub coll_id: i64,
    pub logical_path: String,
    pub replica_number: i32,
    pub resc_hier: String,
    pub resc_id: i64,

    // content
    pub size: i64,
    pub checksum: String,
    pub physical_path: String,
    pub mode: String,
    pub type_name: String,
    pub version: String,
    pub resc_name: String,

    // ownership
    pub owner_name: String,
    pub owner_zone: String,

    // temporal
    pub create_ts: String,
    pub modify_ts: String,
    pub expiry_ts: String,

    // status
    pub replica_status: ReplicaStatus,
    pub status_string: String,

    pub map_id: i64,
    pub comment: String,

    /// Transient hints carried into subsystems; never serialized.
    pub cond_input: CondInput,
}

impl Default for Replica {
    fn default() -> Self {
        let ts = now_timestamp();
        Self {
            data_id: 0,
            coll_id: 0,
            logical_path: String::new(),
            replica_number: 0,
            resc_hier: String::new(),
            resc_id: 0,
            size: 0,
            checksum: String::new(),
            physical_path: String::new(),
            mode: "0600".to_string(),
            type_name: "generic".to_string(),
            version: String::new(),
            resc_name: String::new(),
            owner_name: String::new(),
            owner_zone: String::new(),
            create_ts: ts.clone(),
            modify_ts: ts,
            expiry_ts: "00000000000".to_string(),
            replica_status: ReplicaStatus::Stale,
            status_string: String::new(),
            map_id: 0,
            comment: String::new(),
            cond_input: CondInput::new(),
        }
    }
}

impl Replica {
    /// Object name portion of the logical path.
    pub fn object_name(&self) -> &str {
        self.logical_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.logical_path)
    }

    /// Root resource of the hierarchy.
    pub fn root_resource(&self) -> &str {
        self.resc_hier
            .split(';')
            .next()
            .unwrap_or(&self.resc_hier)
    }

    /// Leaf resource of the hierarchy.
    pub fn leaf_resource(&self) -> &str {
        self.resc_hier
            .rsplit(';')
            .next()
            .unwrap_or(&self.resc_hier)
    }

    /// Canonical catalog-column JSON. Every value is a string.
    pub fn to_json(&self) -> Value {
        json!({
            "data_id": self.data_id.to_string(),
            "coll_id": self.coll_id.to_string(),
            "data_name": self.object_name(),
            "data_repl_num": self.replica_number.to_string(),
            "data_version": self.version,
            "data_type_name": self.type_name,
            "data_size": self.size.to_string(),
            "resc_name": self.resc_name,
            "data_path": self.physical_path,
            "data_owner_name": self.owner_name,
            "data_owner_zone": self.owner_zone,
            "data_is_dirty": self.replica_status.to_string(),
            "data_status": self.status_string,
            "data_checksum": self.checksum,
            "data_expiry_ts": self.expiry_ts,
            "data_map_id": self.map_id.to_string(),
            "data_mode": self.mode,
            "r_comment": self.comment,
            "create_ts": self.create_ts,
            "modify_ts": self.modify_ts,
            "resc_hier": self.resc_hier,
            "resc_id": self.resc_id.to_string(),
        })
    }

    /// Parse the canonical catalog-column JSON.
    ///
    /// The logical path of the result is just the object name; the
    /// collection prefix is not part of the column set.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        fn field<'a>(value: &'a Value, key: &str) -> CoreResult<&'a str> {
            value
                .get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CoreError::new(
                        CoreErrorCode::InvalidInputParam,
                        format!("replica json missing string field [{}]", key),
                    )
                })
        }

        fn int_field(value: &Value, key: &str) -> CoreResult<i64> {
            field(value, key)?.trim().parse().map_err(|_| {
                CoreError::new(
                    CoreErrorCode::InvalidInputParam,
                    format!("replica json field is not an integer [{}]", key),
                )
            })
        }

        Ok(Self {
            data_id: int_field(value, "data_id")?,
            coll_id: int_field(value, "coll_id")?,
            logical_path: field(value, "data_name")?.to_string(),
            replica_number: int_field(value, "data_repl_num")? as i32,
            version: field(value, "data_version")?.to_string(),
            type_name: field(value, "data_type_name")?.to_string(),
            size: int_field(value, "data_size")?,
            resc_name: field(value, "resc_name")?.to_string(),
            physical_path: field(value, "data_path")?.to_string(),
            owner_name: field(value, "data_owner_name")?.to_string(),
            owner_zone: field(value, "data_owner_zone")?.to_string(),
            replica_status: ReplicaStatus::parse(field(value, "data_is_dirty")?)?,
            status_string: field(value, "data_status")?.to_string(),
            checksum: field(value, "data_checksum")?.to_string(),
            expiry_ts: field(value, "data_expiry_ts")?.to_string(),
            map_id: int_field(value, "data_map_id")?,
            mode: field(value, "data_mode")?.to_string(),
            comment: field(value, "r_comment")?.to_string(),
            create_ts: field(value, "create_ts")?.to_string(),
            modify_ts: field(value, "modify_ts")?.to_string(),
            resc_hier: field(value, "resc_hier")?.to_string(),
            resc_id: int_field(value, "resc_id")?,
            cond_input: CondInput::new(),
        })
    }
}
