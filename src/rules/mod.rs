//! Rule-engine callback seam
//!
//! The core invokes named hooks at fixed points. Pre-hooks can veto an
//! operation before any side effect; post-hooks run after the catalog
//! commit and are informational only.

use crate::error::CoreResult;
use crate::replica::{CondInput, Replica};

/// Post-processing hook points, applied after a successful close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessHook {
    Create,
    OpenRead,
    OpenWrite,
    Put,
    Copy,
    Replicate,
    Phymv,
}

impl PostProcessHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostProcessHook::Create => "postprocess_create",
            PostProcessHook::OpenRead => "postprocess_open_read",
            PostProcessHook::OpenWrite => "postprocess_open_write",
            PostProcessHook::Put => "postprocess_put",
            PostProcessHook::Copy => "postprocess_copy",
            PostProcessHook::Replicate => "postprocess_replicate",
            PostProcessHook::Phymv => "postprocess_phymv",
        }
    }
}

/// Callbacks the lifecycle core exposes to the policy layer.
///
/// Default implementations are no-ops so a hooks type only overrides
/// the points it cares about.
pub trait RuleHooks: Send + Sync + std::fmt::Debug {
    /// Name the target root for a create. `None` keeps the caller's
    /// choice. An error aborts the operation.
    fn set_scheme_for_create(
        &self,
        logical_path: &str,
        cond_input: &CondInput,
    ) -> CoreResult<Option<String>> {
        let _ = (logical_path, cond_input);
        Ok(None)
    }

    /// Name the target root for a replication destination.
    fn set_scheme_for_replicate(
        &self,
        logical_path: &str,
        cond_input: &CondInput,
    ) -> CoreResult<Option<String>> {
        let _ = (logical_path, cond_input);
        Ok(None)
    }

    /// Runs after a replica is selected for open, before any physical or
    /// catalog side effect. An error aborts the open.
    fn preprocess_open(
        &self,
        logical_path: &str,
        replica: &Replica,
        cond_input: &CondInput,
    ) -> CoreResult<()> {
        let _ = (logical_path, replica, cond_input);
        Ok(())
    }

    /// Apply metadata/ACL carried in the conditional input. Failures
    /// propagate on the put path (the caller unlinks the new object).
    fn apply_metadata_from_cond_input(
        &self,
        logical_path: &str,
        cond_input: &CondInput,
    ) -> CoreResult<()> {
        let _ = (logical_path, cond_input);
        Ok(())
    }

    /// Post-processing after close. The return code is informational.
    fn postprocess(
        &self,
        hook: PostProcessHook,
        logical_path: &str,
        replica: &Replica,
        close_status: i32,
    ) -> i32 {
        let _ = (hook, logical_path, replica, close_status);
        0
    }
}

/// Hooks that do nothing, for agents without a policy layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RuleHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::CondInput;

    #[test]
    fn test_noop_hooks_accept_everything() {
        let hooks = NoopHooks;
        let ci = CondInput::new();
        assert!(hooks.set_scheme_for_create("/z/p", &ci).unwrap().is_none());
        assert!(hooks
            .preprocess_open("/z/p", &Replica::default(), &ci)
            .is_ok());
        assert_eq!(
            hooks.postprocess(PostProcessHook::Put, "/z/p", &Replica::default(), 0),
            0
        );
    }
}
