use crate::registry::FeatureRegistry;
use crate::ServerError;
use std::collections::HashMap;
use tracing::trace;

/// Propagate follow-enablement (`enable_with`) to a fixed point: every
/// following feature ends up mirroring its target's enablement, except that
/// force-disabled features stay off. Cycles converge because assignments are
/// idempotent once stable. A dangling target is fatal.
pub(crate) fn enable_automatic(registry: &FeatureRegistry) -> Result<(), ServerError> {
    loop {
        let mut changed = false;
        for idx in 0..registry.len() {
            let target = registry
                .cell(idx)
                .borrow()
                .info()
                .enable_with()
                .map(str::to_owned);
            let Some(target) = target else { continue };

            let Some(other) = registry.try_lookup(&target) else {
                return Err(ServerError::MissingDependency {
                    feature: registry.name_at(idx).to_owned(),
                    dependency: target,
                });
            };
            let other_enabled = other.is_enabled();

            let mut feature = registry.cell(idx).borrow_mut();
            let info = feature.info_mut();
            let before = info.is_enabled();
            info.set_enabled(other_enabled);
            if info.is_enabled() != before {
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Compute the startup order.
///
/// All features, enabled or not, are linearized by an insertion scan: each
/// feature lands immediately before the left-most already placed feature
/// that declares `starts_after` on it, otherwise at the end. In the strict
/// pass the produced order is re-checked edge by edge and `requires`
/// dependencies are validated; the soft pass suppresses every error so the
/// order is usable for help output even on an inconsistent graph. Disabled
/// features are filtered from the result last.
pub(crate) fn resolve_order(
    registry: &FeatureRegistry,
    fail_on_missing: bool,
) -> Result<Vec<usize>, ServerError> {
    if fail_on_missing {
        validate_requires(registry)?;
    }

    let mut order: Vec<usize> = Vec::with_capacity(registry.len());
    for idx in 0..registry.len() {
        let name = registry.name_at(idx);
        let mut insert_at = order.len();
        for pos in (0..order.len()).rev() {
            if registry
                .cell(order[pos])
                .borrow()
                .info()
                .starts_after()
                .contains(name)
            {
                insert_at = pos;
            }
        }
        order.insert(insert_at, idx);
    }

    trace!("ordered features:");
    for &idx in &order {
        let feature = registry.cell(idx).borrow();
        let info = feature.info();
        let after = info
            .starts_after()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        trace!(
            "  {}{}{}",
            info.name(),
            if info.is_enabled() { "" } else { " (disabled)" },
            if after.is_empty() {
                String::new()
            } else {
                format!(" [after: {after}]")
            }
        );
    }

    if fail_on_missing {
        verify_order(registry, &order)?;
    }

    Ok(order
        .into_iter()
        .filter(|&idx| registry.cell(idx).borrow().info().is_enabled())
        .collect())
}

fn validate_requires(registry: &FeatureRegistry) -> Result<(), ServerError> {
    for idx in 0..registry.len() {
        let feature = registry.cell(idx).borrow();
        let info = feature.info();
        if !info.is_enabled() {
            continue;
        }
        for dependency in info.requires() {
            if !registry.exists(dependency) {
                return Err(ServerError::MissingDependency {
                    feature: info.name().to_owned(),
                    dependency: dependency.clone(),
                });
            }
            if !registry.is_enabled(dependency)? {
                return Err(ServerError::DisabledDependency {
                    feature: info.name().to_owned(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    Ok(())
}

/// The insertion scan satisfies every `starts_after` edge of an acyclic
/// graph it can realize; any edge the produced order violates indicates a
/// cycle (or an order the single pass cannot produce) and is rejected
/// instead of silently accepted.
fn verify_order(registry: &FeatureRegistry, order: &[usize]) -> Result<(), ServerError> {
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (registry.name_at(idx), pos))
        .collect();

    for (pos, &idx) in order.iter().enumerate() {
        let feature = registry.cell(idx).borrow();
        for before in feature.info().starts_after() {
            if let Some(&before_pos) = position.get(before.as_str()) {
                if before_pos > pos {
                    return Err(ServerError::DependencyCycle(
                        feature.info().name().to_owned(),
                        before.clone(),
                    ));
                }
            }
        }
    }
    Ok(())
}
