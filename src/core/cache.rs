// Read-mostly, build-once cache of plans keyed by result-set shape.
// Entries are never evicted: one plan per distinct shape for the mapper's lifetime.
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::db::ColumnType;
use crate::core::error::{Error, ErrorKind};

/// A plan built from one result-set shape.
pub(crate) trait Shaped {
    fn matches(&self, columns: &[ColumnType]) -> bool;
}

/// Readers take the shared lock to find a plan; only a miss takes the
/// exclusive lock, re-checks, and builds.
pub(crate) struct ShapeCache<P> {
    plans: RwLock<Vec<Arc<P>>>,
}

impl<P> Default for ShapeCache<P> {
    fn default() -> Self {
        Self {
            plans: RwLock::new(Vec::new()),
        }
    }
}

impl<P: Shaped> ShapeCache<P> {
    pub(crate) fn get_or_build(
        &self,
        columns: &[ColumnType],
        build: impl FnOnce() -> Result<P, Error>,
    ) -> Result<Arc<P>, Error> {
        {
            let plans = self.plans.read().map_err(poisoned)?;
            if let Some(plan) = plans.iter().find(|plan| plan.matches(columns)) {
                return Ok(Arc::clone(plan));
            }
        }

        let mut plans = self.plans.write().map_err(poisoned)?;
        if let Some(plan) = plans.iter().find(|plan| plan.matches(columns)) {
            return Ok(Arc::clone(plan));
        }
        let plan = Arc::new(build()?);
        plans.push(Arc::clone(&plan));
        Ok(plan)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.plans.read().map(|plans| plans.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::new(ErrorKind::Internal).with_message("plan cache lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::{ShapeCache, Shaped};
    use crate::core::db::{ColumnType, ScanType};
    use crate::core::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct NamesPlan(Vec<String>);

    impl Shaped for NamesPlan {
        fn matches(&self, columns: &[ColumnType]) -> bool {
            self.0.len() == columns.len()
                && self.0.iter().zip(columns).all(|(n, c)| *n == c.name)
        }
    }

    fn shape(names: &[&str]) -> Vec<ColumnType> {
        names
            .iter()
            .map(|name| ColumnType::new(*name, "TEXT", ScanType::Text))
            .collect()
    }

    fn plan_for(columns: &[ColumnType]) -> NamesPlan {
        NamesPlan(columns.iter().map(|c| c.name.clone()).collect())
    }

    #[test]
    fn concurrent_first_callers_build_once() {
        let cache = Arc::new(ShapeCache::<NamesPlan>::default());
        let builds = Arc::new(AtomicUsize::new(0));
        let columns = shape(&["a", "b"]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                let columns = columns.clone();
                thread::spawn(move || {
                    cache
                        .get_or_build(&columns, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(plan_for(&columns))
                        })
                        .expect("plan");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_shapes_get_distinct_plans() {
        let cache = ShapeCache::<NamesPlan>::default();
        let ab = shape(&["a", "b"]);
        let c = shape(&["c"]);
        cache.get_or_build(&ab, || Ok(plan_for(&ab))).expect("ab");
        cache.get_or_build(&c, || Ok(plan_for(&c))).expect("c");
        cache.get_or_build(&ab, || panic!("rebuilt")).expect("ab again");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn build_errors_are_not_cached() {
        let cache = ShapeCache::<NamesPlan>::default();
        let ab = shape(&["a", "b"]);
        let err = cache
            .get_or_build(&ab, || Err(Error::config("nope")))
            .err()
            .expect("error");
        assert_eq!(err.message(), Some("nope"));
        assert_eq!(cache.len(), 0);
        cache.get_or_build(&ab, || Ok(plan_for(&ab))).expect("retry");
        assert_eq!(cache.len(), 1);
    }
}
