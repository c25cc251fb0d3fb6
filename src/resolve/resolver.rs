//! Hierarchy resolution
//!
//! One vote request per root resource that hosts (or, for a create,
//! could host) a replica. The maximum vote wins; a client resource hint
//! that voted nonzero overrides the maximum. Zero across the board means
//! no eligible replica.

use super::hierarchy::Hierarchy;
use super::voting::{Operation, Vote};
use crate::catalog::SpecialCollection;
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::observability::Logger;
use crate::replica::{keywords, CondInput, LogicalObject};
use crate::resource::{ResourcePlugin, ResourceRegistry};
use crate::rules::RuleHooks;
use crate::zone::zone_of;

/// The winning hierarchy and its vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub hierarchy: String,
    pub vote: Vote,
}

/// Outcome of resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Serve locally on the winning hierarchy. `operation` reflects any
    /// rewrite; `overwrite` marks a create rewritten onto an existing
    /// replica.
    Local {
        winner: Winner,
        operation: Operation,
        overwrite: bool,
    },
    /// The object lives in another zone; forward the operation.
    Remote { zone: String },
}

/// Everything resolution needs from the caller.
#[derive(Debug)]
pub struct ResolveRequest<'a> {
    pub operation: Operation,
    pub logical_path: &'a str,
    pub cond_input: &'a CondInput,
    pub local_zone: &'a str,
    pub local_host: &'a str,
    /// The create is a replication destination; routes the scheme hook.
    pub for_replication: bool,
}

/// Last-present resource hint wins: backup over destination over plain.
fn keyword_from_input(registry: &ResourceRegistry, cond_input: &CondInput) -> CoreResult<String> {
    let mut keyword = String::new();
    for key in [
        keywords::RESC_NAME,
        keywords::DEST_RESC_NAME,
        keywords::BACKUP_RESC_NAME,
    ] {
        if let Some(value) = cond_input.get(key) {
            if !value.is_empty() {
                keyword = value.to_string();
            }
        }
    }
    if !keyword.is_empty() {
        // Rejects hints naming a non-root resource.
        registry.resolve_root(&keyword)?;
    }
    Ok(keyword)
}

fn request_vote(
    plugin: &dyn ResourcePlugin,
    operation: Operation,
    object: Option<&LogicalObject>,
    local_host: &str,
) -> (String, Vote) {
    match plugin.resolve_hierarchy(operation, object, local_host) {
        Ok((hierarchy, vote)) => {
            Logger::trace(
                "vote_received",
                &[
                    ("root", plugin.name()),
                    ("hier", hierarchy.as_str()),
                    ("vote", &vote.to_string()),
                ],
            );
            (hierarchy, vote)
        }
        Err(e) => {
            Logger::warn(
                "vote_request_failed",
                &[("root", plugin.name()), ("reason", e.message())],
            );
            (plugin.hierarchy(), Vote::ZERO)
        }
    }
}

fn local_create(request: &ResolveRequest<'_>, winner: Winner) -> Resolution {
    Logger::info(
        "hierarchy_resolved",
        &[
            ("path", request.logical_path),
            ("winner", winner.hierarchy.as_str()),
            ("vote", &winner.vote.to_string()),
        ],
    );
    Resolution::Local {
        winner,
        operation: Operation::Create,
        overwrite: false,
    }
}

fn resolve_for_create(
    registry: &ResourceRegistry,
    target_root: &str,
    request: &ResolveRequest<'_>,
) -> CoreResult<Winner> {
    let candidates: Vec<_> = if target_root.is_empty() {
        registry.roots().collect()
    } else {
        vec![registry.resolve_root(target_root)?]
    };

    let mut best: Option<Winner> = None;
    for plugin in candidates {
        let (hierarchy, vote) = request_vote(plugin.as_ref(), Operation::Create, None, request.local_host);
        if vote.is_zero() {
            continue;
        }
        if best.as_ref().map(|w| vote > w.vote).unwrap_or(true) {
            best = Some(Winner { hierarchy, vote });
        }
    }
    best.ok_or_else(|| {
        CoreError::new(
            CoreErrorCode::HierarchyError,
            format!("no resource voted to host [{}]", request.logical_path),
        )
    })
}

fn resolve_for_open_or_write(
    registry: &ResourceRegistry,
    object: &LogicalObject,
    keyword: &str,
    operation: Operation,
    request: &ResolveRequest<'_>,
) -> CoreResult<Winner> {
    if object.is_empty() {
        return Err(CoreError::new(
            CoreErrorCode::ReplicaDoesNotExist,
            format!("[{}] has no replicas", request.logical_path),
        ));
    }

    let mut roots: Vec<&str> = object
        .replicas()
        .iter()
        .map(|r| r.root_resource())
        .collect();
    roots.sort_unstable();
    roots.dedup();

    let mut max_winner: Option<Winner> = None;
    let mut keyword_winner: Option<Winner> = None;
    for root in roots {
        let Some(plugin) = registry.get(root) else {
            Logger::warn("no_plugin_for_root", &[("root", root)]);
            continue;
        };
        let (hierarchy, vote) =
            request_vote(plugin.as_ref(), operation, Some(object), request.local_host);
        if vote.is_zero() {
            continue;
        }
        if max_winner.as_ref().map(|w| vote > w.vote).unwrap_or(true) {
            max_winner = Some(Winner {
                hierarchy: hierarchy.clone(),
                vote,
            });
        }
        if keyword_winner.is_none() && !keyword.is_empty() && root == keyword {
            keyword_winner = Some(Winner { hierarchy, vote });
        }
    }

    keyword_winner.or(max_winner).ok_or_else(|| {
        CoreError::new(
            CoreErrorCode::HierarchyError,
            format!("no valid resource found for [{}]", request.logical_path),
        )
    })
}

/// Resolve the hierarchy to serve `request` on.
///
/// `object` is the catalog's view of the logical object, when it exists;
/// `special` short-circuits resolution for mount/link collections.
pub fn resolve_resource_hierarchy(
    registry: &ResourceRegistry,
    hooks: &dyn RuleHooks,
    object: Option<&LogicalObject>,
    special: Option<&SpecialCollection>,
    request: &ResolveRequest<'_>,
) -> CoreResult<Resolution> {
    if let Some(zone) = zone_of(request.logical_path) {
        if zone != request.local_zone {
            return Ok(Resolution::Remote {
                zone: zone.to_string(),
            });
        }
    }

    if let Some(collection) = special {
        return Ok(Resolution::Local {
            winner: Winner {
                hierarchy: collection.resc_hier.clone(),
                vote: Vote::FULL,
            },
            operation: request.operation,
            overwrite: false,
        });
    }

    let mut keyword = keyword_from_input(registry, request.cond_input)?;

    // A replica-number hint targets an existing copy; the system must
    // not attempt to create one.
    let mut operation = request.operation;
    if operation == Operation::Create && request.cond_input.contains(keywords::REPL_NUM) {
        operation = Operation::Write;
    }

    if operation == Operation::Create {
        let mut target_root = if !keyword.is_empty() {
            keyword.clone()
        } else {
            request
                .cond_input
                .get(keywords::DEF_RESC_NAME)
                .unwrap_or("")
                .to_string()
        };

        let scheme = if request.for_replication {
            hooks.set_scheme_for_replicate(request.logical_path, request.cond_input)?
        } else {
            hooks.set_scheme_for_create(request.logical_path, request.cond_input)?
        };
        if let Some(root) = scheme {
            registry.resolve_root(&root)?;
            target_root = root;
        }

        if !target_root.is_empty() && !request.cond_input.contains(keywords::ADMIN) {
            let plugin = registry.resolve_root(&target_root)?;
            let incoming = request
                .cond_input
                .get(keywords::DATA_SIZE)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if !plugin.quota_allows(incoming) {
                return Err(CoreError::new(
                    CoreErrorCode::ResourceQuotaExceeded,
                    format!("resource quota exceeded on [{}]", target_root),
                ));
            }
        }

        // Overwrite semantics: a create landing on a root that already
        // holds a replica targets that copy instead.
        let occupied_root = match object.filter(|o| !o.is_empty()) {
            Some(obj) if !target_root.is_empty() => obj
                .index_of_root(&target_root)
                .map(|_| target_root.clone()),
            Some(obj) => {
                let winner = resolve_for_create(registry, &target_root, request)?;
                let root = Hierarchy::parse(&winner.hierarchy)
                    .root()
                    .unwrap_or("")
                    .to_string();
                if obj.index_of_root(&root).is_some() {
                    Some(root)
                } else {
                    return Ok(local_create(request, winner));
                }
            }
            None => {
                let winner = resolve_for_create(registry, &target_root, request)?;
                return Ok(local_create(request, winner));
            }
        };

        match occupied_root {
            Some(root) => {
                if !request.cond_input.contains(keywords::FORCE_FLAG) {
                    return Err(CoreError::new(
                        CoreErrorCode::OverwriteWithoutForceFlag,
                        format!(
                            "[{}] already has a replica on [{}]",
                            request.logical_path, root
                        ),
                    ));
                }
                operation = Operation::Write;
                keyword = root;
            }
            None => {
                let winner = resolve_for_create(registry, &target_root, request)?;
                return Ok(local_create(request, winner));
            }
        }
    }

    let object = object.ok_or_else(|| {
        CoreError::new(
            CoreErrorCode::ReplicaDoesNotExist,
            format!("[{}] does not exist", request.logical_path),
        )
    })?;

    // With force, the default resource becomes the tie-break hint.
    if keyword.is_empty()
        && request.cond_input.contains(keywords::FORCE_FLAG)
    {
        if let Some(def) = request.cond_input.get(keywords::DEF_RESC_NAME) {
            if !def.is_empty() {
                keyword = def.to_string();
            }
        }
    }

    let overwrite = operation == Operation::Write && request.operation == Operation::Create;
    let winner = resolve_for_open_or_write(registry, object, &keyword, operation, request)?;
    Logger::info(
        "hierarchy_resolved",
        &[
            ("path", request.logical_path),
            ("winner", winner.hierarchy.as_str()),
            ("vote", &winner.vote.to_string()),
        ],
    );
    Ok(Resolution::Local {
        winner,
        operation,
        overwrite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{Replica, ReplicaStatus};
    use crate::resource::FilesystemResource;
    use crate::rules::NoopHooks;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry.insert(Arc::new(FilesystemResource::new(
            "rescA",
            1,
            temp.path().join("a"),
        )));
        registry.insert(Arc::new(
            FilesystemResource::new("rescB", 2, temp.path().join("b")).with_host("peer"),
        ));
        registry
    }

    fn object(statuses: &[(&str, ReplicaStatus)]) -> LogicalObject {
        let replicas = statuses
            .iter()
            .enumerate()
            .map(|(i, (root, status))| Replica {
                data_id: 4,
                coll_id: 1,
                logical_path: "/tempZone/home/u/f".to_string(),
                replica_number: i as i32,
                resc_hier: root.to_string(),
                resc_name: root.to_string(),
                resc_id: 100 + i as i64,
                replica_status: *status,
                ..Replica::default()
            })
            .collect();
        LogicalObject::from_replicas(replicas).unwrap()
    }

    fn request<'a>(operation: Operation, cond_input: &'a CondInput) -> ResolveRequest<'a> {
        ResolveRequest {
            operation,
            logical_path: "/tempZone/home/u/f",
            cond_input,
            local_zone: "tempZone",
            local_host: "localhost",
            for_replication: false,
        }
    }

    #[test]
    fn test_create_prefers_local_root() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let ci = CondInput::new();
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            None,
            None,
            &request(Operation::Create, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { winner, operation, overwrite } => {
                assert_eq!(winner.hierarchy, "rescA");
                assert_eq!(operation, Operation::Create);
                assert!(!overwrite);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_open_votes_for_good_replica() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let obj = object(&[("rescA", ReplicaStatus::Stale), ("rescB", ReplicaStatus::Good)]);
        let ci = CondInput::new();
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Open, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { winner, .. } => assert_eq!(winner.hierarchy, "rescB"),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_keyword_overrides_max_vote() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let obj = object(&[("rescA", ReplicaStatus::Good), ("rescB", ReplicaStatus::Stale)]);
        let ci = CondInput::from([(keywords::RESC_NAME, "rescB")]);
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Open, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { winner, .. } => {
                assert_eq!(winner.hierarchy, "rescB");
                assert_eq!(winner.vote, Vote::new(0.5));
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_create_with_replica_number_becomes_write() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let obj = object(&[("rescA", ReplicaStatus::Good)]);
        let ci = CondInput::from([(keywords::REPL_NUM, "0")]);
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Create, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { operation, .. } => assert_eq!(operation, Operation::Write),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_requires_force() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let obj = object(&[("rescA", ReplicaStatus::Good)]);
        let ci = CondInput::from([(keywords::DEST_RESC_NAME, "rescA")]);
        let err = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Create, &ci),
        )
        .unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::OverwriteWithoutForceFlag);
    }

    #[test]
    fn test_forced_overwrite_rewrites_to_write() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let obj = object(&[("rescA", ReplicaStatus::Good)]);
        let mut ci = CondInput::from([(keywords::DEST_RESC_NAME, "rescA")]);
        ci.set_flag(keywords::FORCE_FLAG);
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Create, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { operation, overwrite, winner } => {
                assert_eq!(operation, Operation::Write);
                assert!(overwrite);
                assert_eq!(winner.hierarchy, "rescA");
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_open_of_nonexistent_object() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let ci = CondInput::new();
        let err = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            None,
            None,
            &request(Operation::Open, &ci),
        )
        .unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::ReplicaDoesNotExist);
    }

    #[test]
    fn test_child_resource_hint_rejected() {
        let temp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::new();
        registry.insert(Arc::new(
            FilesystemResource::new("root", 1, temp.path().join("r")).with_children("leaf"),
        ));
        let ci = CondInput::from([(keywords::RESC_NAME, "leaf")]);
        let err = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            None,
            None,
            &request(Operation::Create, &ci),
        )
        .unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::DirectChildAccess);
    }

    #[test]
    fn test_remote_zone_detected() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let ci = CondInput::new();
        let req = ResolveRequest {
            logical_path: "/otherZone/home/u/f",
            ..request(Operation::Open, &ci)
        };
        let resolution =
            resolve_resource_hierarchy(&registry, &NoopHooks, None, None, &req).unwrap();
        assert_eq!(
            resolution,
            Resolution::Remote {
                zone: "otherZone".to_string()
            }
        );
    }

    #[test]
    fn test_special_collection_short_circuits() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        let ci = CondInput::new();
        let special = SpecialCollection {
            logical_path: "/tempZone/home/u".to_string(),
            resc_hier: "mountResc;leaf".to_string(),
        };
        let resolution = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            None,
            Some(&special),
            &request(Operation::Open, &ci),
        )
        .unwrap();
        match resolution {
            Resolution::Local { winner, .. } => {
                assert_eq!(winner.hierarchy, "mountResc;leaf");
                assert_eq!(winner.vote, Vote::FULL);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_no_eligible_replica_is_hierarchy_error() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        // Only replica is intermediate: unreadable.
        let obj = object(&[("rescA", ReplicaStatus::Intermediate)]);
        let ci = CondInput::new();
        let err = resolve_resource_hierarchy(
            &registry,
            &NoopHooks,
            Some(&obj),
            None,
            &request(Operation::Open, &ci),
        )
        .unwrap_err();
        assert_eq!(err.code(), CoreErrorCode::HierarchyError);
    }
}
