//! The planner: resolve requested analyses into a topologically ordered item
//! list.
//!
//! Requested leaves pull in the providers of every fact they require,
//! transitively. Cycles and missing providers are configuration errors
//! detected here, before any repository work starts.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, StrataError};
use crate::pipeline::PipelineItem;

/// Resolve `requested` leaf analyses against the `feeders` pool and return
/// every needed item in topological (provides-before-requires) order.
///
/// Feeders that no requested leaf (or other needed feeder) depends on are
/// dropped. Ties are broken by registration order, which keeps the plan
/// deterministic.
///
/// # Errors
///
/// [`StrataError::Configuration`] when a required fact has no provider or
/// the provides/requires graph contains a cycle.
pub fn plan(
    requested: Vec<Box<dyn PipelineItem>>,
    feeders: Vec<Box<dyn PipelineItem>>,
) -> Result<Vec<Box<dyn PipelineItem>>> {
    if requested.is_empty() {
        return Err(StrataError::config("no analyses requested"));
    }

    // Which feeder provides which fact.
    let mut provider_of: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (idx, feeder) in feeders.iter().enumerate() {
        for fact in feeder.provides() {
            if provider_of.insert(fact, idx).is_some() {
                return Err(StrataError::config(format!(
                    "fact '{fact}' has more than one provider"
                )));
            }
        }
    }

    // Pull in feeders transitively.
    let mut needed_feeders: BTreeSet<usize> = BTreeSet::new();
    let mut queue: Vec<&'static str> = requested
        .iter()
        .flat_map(|item| item.requires().iter().copied())
        .collect();
    while let Some(fact) = queue.pop() {
        let Some(&idx) = provider_of.get(fact) else {
            return Err(StrataError::config(format!(
                "no pipeline item provides required fact '{fact}'"
            )));
        };
        if needed_feeders.insert(idx) {
            queue.extend(feeders[idx].requires().iter().copied());
        }
    }

    // Keep registration order for feeders, then append the leaves.
    let mut items: Vec<Box<dyn PipelineItem>> = Vec::new();
    for (idx, feeder) in feeders.into_iter().enumerate() {
        if needed_feeders.contains(&idx) {
            items.push(feeder);
        }
    }
    items.extend(requested);

    topo_sort(items)
}

/// Kahn's algorithm over the provides/requires edges. Stable: among ready
/// items the earliest in the input wins.
fn topo_sort(items: Vec<Box<dyn PipelineItem>>) -> Result<Vec<Box<dyn PipelineItem>>> {
    let mut provider_of: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (idx, item) in items.iter().enumerate() {
        for fact in item.provides() {
            provider_of.insert(fact, idx);
        }
    }

    let n = items.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut missing: Vec<usize> = vec![0; n];
    for (idx, item) in items.iter().enumerate() {
        for fact in item.requires() {
            if let Some(&provider) = provider_of.get(fact) {
                dependents[provider].push(idx);
                missing[idx] += 1;
            }
            // Facts with no provider in the set (commit, is_merge, …) are
            // supplied by the executor itself.
        }
    }

    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut ready: Vec<usize> = (0..n).filter(|&i| missing[i] == 0).collect();
    ready.reverse(); // pop() takes the lowest index first
    while let Some(idx) = ready.pop() {
        order.push(idx);
        let mut newly_ready = Vec::new();
        for &dep in &dependents[idx] {
            missing[dep] -= 1;
            if missing[dep] == 0 {
                newly_ready.push(dep);
            }
        }
        newly_ready.sort_unstable_by(|a, b| b.cmp(a));
        ready.extend(newly_ready);
        ready.sort_unstable_by(|a, b| b.cmp(a));
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| items[i].name())
            .collect();
        return Err(StrataError::config(format!(
            "dependency cycle among pipeline items: {}",
            stuck.join(", ")
        )));
    }

    let mut slots: Vec<Option<Box<dyn PipelineItem>>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|idx| slots[idx].take().expect("each index ordered once"))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pipeline::Deps;

    struct Stub {
        name: &'static str,
        provides: &'static [&'static str],
        requires: &'static [&'static str],
    }

    impl Stub {
        fn boxed(
            name: &'static str,
            provides: &'static [&'static str],
            requires: &'static [&'static str],
        ) -> Box<dyn PipelineItem> {
            Box::new(Self {
                name,
                provides,
                requires,
            })
        }
    }

    impl PipelineItem for Stub {
        fn name(&self) -> &'static str {
            self.name
        }
        fn provides(&self) -> &'static [&'static str] {
            self.provides
        }
        fn requires(&self) -> &'static [&'static str] {
            self.requires
        }
        fn consume(&mut self, _deps: &mut Deps) -> Result<()> {
            Ok(())
        }
        fn fork(self: Box<Self>, n: usize) -> Vec<Box<dyn PipelineItem>> {
            (0..n)
                .map(|_| Stub::boxed(self.name, self.provides, self.requires))
                .collect()
        }
        fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
            self
        }
    }


    fn expect_err(
        result: Result<Vec<Box<dyn PipelineItem>>>,
    ) -> StrataError {
        match result {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        }
    }

    fn names(items: &[Box<dyn PipelineItem>]) -> Vec<&'static str> {
        items.iter().map(|i| i.name()).collect()
    }

    // -- planning --

    #[test]
    fn pulls_in_transitive_providers() {
        let leaves = vec![Stub::boxed("leaf", &[], &["b"])];
        let feeders = vec![
            Stub::boxed("unused", &["z"], &[]),
            Stub::boxed("a", &["a"], &[]),
            Stub::boxed("b", &["b"], &["a"]),
        ];
        let planned = plan(leaves, feeders).unwrap();
        assert_eq!(names(&planned), vec!["a", "b", "leaf"]);
    }

    #[test]
    fn unused_feeders_are_dropped() {
        let leaves = vec![Stub::boxed("leaf", &[], &["a"])];
        let feeders = vec![
            Stub::boxed("a", &["a"], &[]),
            Stub::boxed("unused", &["z"], &[]),
        ];
        let planned = plan(leaves, feeders).unwrap();
        assert_eq!(names(&planned), vec!["a", "leaf"]);
    }

    #[test]
    fn missing_provider_is_config_error() {
        let leaves = vec![Stub::boxed("leaf", &[], &["ghost"])];
        let err = expect_err(plan(leaves, Vec::new()));
        assert!(matches!(err, StrataError::Configuration { .. }));
        assert!(format!("{err}").contains("ghost"));
    }

    #[test]
    fn cycle_is_config_error() {
        let leaves = vec![Stub::boxed("leaf", &[], &["a"])];
        let feeders = vec![
            Stub::boxed("a", &["a"], &["b"]),
            Stub::boxed("b", &["b"], &["a"]),
        ];
        let err = expect_err(plan(leaves, feeders));
        assert!(matches!(err, StrataError::Configuration { .. }));
        assert!(format!("{err}").contains("cycle"));
    }

    #[test]
    fn duplicate_provider_is_config_error() {
        let leaves = vec![Stub::boxed("leaf", &[], &["a"])];
        let feeders = vec![
            Stub::boxed("a1", &["a"], &[]),
            Stub::boxed("a2", &["a"], &[]),
        ];
        let err = expect_err(plan(leaves, feeders));
        assert!(format!("{err}").contains("more than one provider"));
    }

    #[test]
    fn empty_request_is_config_error() {
        let err = expect_err(plan(Vec::new(), Vec::new()));
        assert!(matches!(err, StrataError::Configuration { .. }));
    }

    #[test]
    fn executor_supplied_facts_do_not_need_providers() {
        // `commit` and `is_merge` come from the executor, not an item.
        let leaves = vec![Stub::boxed("leaf", &[], &[])];
        let planned = plan(leaves, Vec::new()).unwrap();
        assert_eq!(names(&planned), vec!["leaf"]);
    }

    #[test]
    fn diamond_dependency_orders_once() {
        let leaves = vec![Stub::boxed("leaf", &[], &["c", "b"])];
        let feeders = vec![
            Stub::boxed("a", &["a"], &[]),
            Stub::boxed("b", &["b"], &["a"]),
            Stub::boxed("c", &["c"], &["a"]),
        ];
        let planned = plan(leaves, feeders).unwrap();
        assert_eq!(names(&planned), vec!["a", "b", "c", "leaf"]);
    }
}
