use super::{CUSTOM_HOOK_BASE, HookPoint, HookResult};
use crate::context::ExecutionContext;
use crate::error::PipelineError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Hook callback type
pub type HookHandler = Arc<dyn Fn(&mut ExecutionContext) -> HookResult + Send + Sync>;

struct HookRegistration {
    name: Option<String>,
    handler: HookHandler,
}

/// Introspection entry returned by [`HookManager::list_hooks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDescriptor {
    /// Zero-based dispatch position at the point
    pub position: usize,
    /// Name given at registration (custom hooks only)
    pub name: Option<String>,
}

/// Registry and dispatcher for lifecycle hooks.
///
/// Handlers registered at the same point run in registration order. Dispatch
/// works on a snapshot of the handler list, so a handler may register further
/// hooks; those take effect from the next dispatch.
#[derive(Default)]
pub struct HookManager {
    hooks: RwLock<HashMap<HookPoint, Vec<Arc<HookRegistration>>>>,
}

impl HookManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook at a built-in point.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidHookPoint`] for custom points, which must
    /// be registered through [`HookManager::register_custom_hook`].
    pub fn register_hook(
        &self,
        point: HookPoint,
        handler: HookHandler,
    ) -> Result<(), PipelineError> {
        if point.is_custom() {
            return Err(PipelineError::InvalidHookPoint {
                point: point.as_raw(),
                reason: "custom points require a name",
            });
        }
        self.hooks
            .write()
            .entry(point)
            .or_default()
            .push(Arc::new(HookRegistration {
                name: None,
                handler,
            }));
        tracing::debug!(point = %point, "hook registered");
        Ok(())
    }

    /// Register a named hook at a caller-defined point.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidHookPoint`] if `raw < CUSTOM_HOOK_BASE`,
    /// or [`PipelineError::DuplicateHookName`] if `name` is already used at
    /// that point.
    pub fn register_custom_hook(
        &self,
        raw: u32,
        name: impl Into<String>,
        handler: HookHandler,
    ) -> Result<HookPoint, PipelineError> {
        if raw < CUSTOM_HOOK_BASE {
            return Err(PipelineError::InvalidHookPoint {
                point: raw,
                reason: "custom points start at CUSTOM_HOOK_BASE",
            });
        }
        let point = HookPoint::Custom(raw);
        let name = name.into();

        let mut hooks = self.hooks.write();
        let entries = hooks.entry(point).or_default();
        if entries.iter().any(|r| r.name.as_deref() == Some(name.as_str())) {
            return Err(PipelineError::DuplicateHookName { point, name });
        }
        tracing::debug!(point = %point, name = %name, "custom hook registered");
        entries.push(Arc::new(HookRegistration {
            name: Some(name),
            handler,
        }));
        Ok(point)
    }

    /// Run the hooks registered at `point` against `ctx`.
    ///
    /// Stops at the first handler that does not continue and returns its
    /// result. `OnError` is the exception: every handler runs, stops and
    /// failures are logged, and the returned result always continues.
    pub fn dispatch(&self, point: HookPoint, ctx: &mut ExecutionContext) -> HookResult {
        let snapshot = self.snapshot(point);
        if snapshot.is_empty() {
            return HookResult::proceed();
        }

        if point == HookPoint::OnError {
            for (position, reg) in snapshot.iter().enumerate() {
                let result = (reg.handler)(ctx);
                if !result.should_continue() || result.error().is_some() {
                    tracing::warn!(
                        target: "http_pipeline::hooks",
                        position,
                        name = ?reg.name,
                        method = %ctx.method(),
                        target_url = %ctx.target(),
                        error = ?result.error().map(ToString::to_string),
                        "on_error hook failed; original error preserved"
                    );
                }
            }
            return HookResult::proceed();
        }

        for (position, reg) in snapshot.iter().enumerate() {
            let result = (reg.handler)(ctx);
            if !result.should_continue() {
                tracing::debug!(
                    point = %point,
                    position,
                    name = ?reg.name,
                    "hook stopped dispatch"
                );
                return result;
            }
        }
        HookResult::proceed()
    }

    /// Dispatch a point whose outcome cannot abort the operation (`After*`,
    /// `OnError`). A stop only ends dispatch for that point.
    pub fn notify(&self, point: HookPoint, ctx: &mut ExecutionContext) {
        if let Some(error) = self.dispatch(point, ctx).into_error() {
            tracing::debug!(
                point = %point,
                error = %error,
                "hook rejected after the fact; ignored"
            );
        }
    }

    /// Registered hooks per point, in dispatch order
    #[must_use]
    pub fn list_hooks(&self) -> BTreeMap<HookPoint, Vec<HookDescriptor>> {
        self.hooks
            .read()
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(point, entries)| {
                let descriptors = entries
                    .iter()
                    .enumerate()
                    .map(|(position, reg)| HookDescriptor {
                        position,
                        name: reg.name.clone(),
                    })
                    .collect();
                (*point, descriptors)
            })
            .collect()
    }

    #[must_use]
    pub fn hook_count(&self, point: HookPoint) -> usize {
        self.hooks.read().get(&point).map_or(0, Vec::len)
    }

    /// Remove every hook registered at `point`.
    pub fn clear(&self, point: HookPoint) {
        self.hooks.write().remove(&point);
    }

    fn snapshot(&self, point: HookPoint) -> Vec<Arc<HookRegistration>> {
        self.hooks.read().get(&point).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<HookPoint, usize> = self
            .hooks
            .read()
            .iter()
            .map(|(point, entries)| (*point, entries.len()))
            .collect();
        f.debug_struct("HookManager").field("hooks", &counts).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::context::OperationKind;
    use crate::hooks::hook;
    use http::Method;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(OperationKind::Request, Method::GET, "https://hooks.test/")
    }

    fn recorder(log: &Arc<Mutex<Vec<usize>>>, id: usize, proceed: bool) -> HookHandler {
        let log = Arc::clone(log);
        hook(move |_| {
            log.lock().push(id);
            if proceed {
                HookResult::proceed()
            } else {
                HookResult::halt()
            }
        })
    }

    #[test]
    fn test_dispatch_runs_in_registration_order() {
        let manager = HookManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..4 {
            manager
                .register_hook(HookPoint::BeforeRequest, recorder(&log, id, true))
                .unwrap();
        }

        let result = manager.dispatch(HookPoint::BeforeRequest, &mut ctx());
        assert!(result.should_continue());
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_stop_at_position_skips_rest() {
        let manager = HookManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager
            .register_hook(HookPoint::BeforeRequest, recorder(&log, 0, true))
            .unwrap();
        manager
            .register_hook(HookPoint::BeforeRequest, recorder(&log, 1, false))
            .unwrap();
        manager
            .register_hook(HookPoint::BeforeRequest, recorder(&log, 2, true))
            .unwrap();

        let result = manager.dispatch(HookPoint::BeforeRequest, &mut ctx());
        assert!(!result.should_continue());
        assert_eq!(*log.lock(), vec![0, 1]);
    }

    #[test]
    fn test_context_mutation_visible_to_later_hooks() {
        let manager = HookManager::new();
        manager
            .register_hook(
                HookPoint::BeforeRequest,
                hook(|ctx| {
                    ctx.attributes_mut().insert("tenant", "acme");
                    HookResult::proceed()
                }),
            )
            .unwrap();
        manager
            .register_hook(
                HookPoint::BeforeRequest,
                hook(|ctx| {
                    if ctx.attributes().get("TENANT").is_some() {
                        HookResult::proceed()
                    } else {
                        HookResult::reject("tenant missing")
                    }
                }),
            )
            .unwrap();

        assert!(
            manager
                .dispatch(HookPoint::BeforeRequest, &mut ctx())
                .should_continue()
        );
    }

    #[test]
    fn test_custom_point_validation() {
        let manager = HookManager::new();
        let err = manager
            .register_hook(HookPoint::Custom(1500), hook(|_| HookResult::proceed()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidHookPoint { .. }));

        let err = manager
            .register_custom_hook(999, "early", hook(|_| HookResult::proceed()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidHookPoint { point: 999, .. }));

        let point = manager
            .register_custom_hook(CUSTOM_HOOK_BASE, "audit", hook(|_| HookResult::proceed()))
            .unwrap();
        assert_eq!(point, HookPoint::Custom(CUSTOM_HOOK_BASE));
    }

    #[test]
    fn test_duplicate_custom_name_rejected() {
        let manager = HookManager::new();
        manager
            .register_custom_hook(1001, "audit", hook(|_| HookResult::proceed()))
            .unwrap();
        let err = manager
            .register_custom_hook(1001, "audit", hook(|_| HookResult::proceed()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateHookName { .. }));

        // Same name at a different point is fine
        manager
            .register_custom_hook(1002, "audit", hook(|_| HookResult::proceed()))
            .unwrap();
    }

    #[test]
    fn test_list_hooks_reflects_registrations() {
        let manager = HookManager::new();
        assert!(manager.list_hooks().is_empty());

        manager
            .register_hook(HookPoint::OnError, hook(|_| HookResult::proceed()))
            .unwrap();
        manager
            .register_custom_hook(1200, "first", hook(|_| HookResult::proceed()))
            .unwrap();
        manager
            .register_custom_hook(1200, "second", hook(|_| HookResult::proceed()))
            .unwrap();

        let listed = manager.list_hooks();
        assert_eq!(listed.len(), 2);
        assert_eq!(
            listed[&HookPoint::OnError],
            vec![HookDescriptor {
                position: 0,
                name: None
            }]
        );
        let names: Vec<_> = listed[&HookPoint::Custom(1200)]
            .iter()
            .map(|d| d.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        manager.clear(HookPoint::OnError);
        assert_eq!(manager.hook_count(HookPoint::OnError), 0);
    }

    #[traced_test]
    #[test]
    fn test_on_error_runs_every_handler_and_logs_failures() {
        let manager = HookManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager
            .register_hook(HookPoint::OnError, recorder(&log, 0, true))
            .unwrap();
        manager
            .register_hook(
                HookPoint::OnError,
                hook(|_| HookResult::reject("reporter offline")),
            )
            .unwrap();
        manager
            .register_hook(HookPoint::OnError, recorder(&log, 2, true))
            .unwrap();

        let result = manager.dispatch(HookPoint::OnError, &mut ctx());
        assert!(result.should_continue());
        assert_eq!(*log.lock(), vec![0, 2]);
        assert!(logs_contain("on_error hook failed"));
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let manager = Arc::new(HookManager::new());
        let inner = Arc::clone(&manager);
        manager
            .register_hook(
                HookPoint::AfterResponse,
                hook(move |_| {
                    inner
                        .register_hook(HookPoint::AfterResponse, hook(|_| HookResult::proceed()))
                        .unwrap();
                    HookResult::proceed()
                }),
            )
            .unwrap();

        assert!(manager.dispatch(HookPoint::AfterResponse, &mut ctx()).should_continue());
        assert_eq!(manager.hook_count(HookPoint::AfterResponse), 2);
    }
}
