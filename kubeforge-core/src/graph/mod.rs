//! Dependency-ordered, memoizing generator for installation artifacts.
//!
//! A [`Graph`] holds at most one instance per asset kind. Resolving an asset
//! resolves its dependencies first, generates it once and keeps it; later
//! requests for the same kind return the stored instance. The graph is
//! serialized through an explicit [`AssetRegistry`] and persisted encrypted
//! to blob storage between install phases.

pub mod assets;
pub mod cipher;
pub mod registry;
pub mod store;

use std::{any::Any, collections::HashMap, fmt};

use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::{ClusterError, Result};

pub use cipher::GraphCipher;
pub use registry::AssetRegistry;
pub use store::GraphStore;

/// A generatable installation artifact.
pub trait Asset: Any + Send + Sync + fmt::Debug + 'static {
    /// Stable discriminant; identity key in the graph and in persisted JSON.
    fn kind(&self) -> &'static str;

    /// Fresh instances of every asset this one needs before generating.
    fn dependencies(&self) -> Vec<Box<dyn Asset>> {
        Vec::new()
    }

    /// Populate `self` from already resolved parents.
    fn generate(&mut self, parents: &Graph) -> Result<()>;
}

/// Asset types that can be registered for persistence.
pub trait AssetKind: Asset + Serialize + DeserializeOwned {
    const KIND: &'static str;
}

#[derive(Debug, Default)]
pub struct Graph {
    assets: HashMap<&'static str, Box<dyn Asset>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an asset that was produced outside the graph (for example from
    /// the cluster document). It will never be generated.
    pub fn insert<A: Asset>(&mut self, asset: A) {
        self.assets.insert(asset.kind(), Box::new(asset));
    }

    pub(crate) fn insert_boxed(&mut self, kind: &'static str, asset: Box<dyn Asset>) {
        self.assets.insert(kind, asset);
    }

    pub fn get<A: AssetKind>(&self) -> Option<&A> {
        self.assets
            .get(A::KIND)
            .and_then(|asset| (&**asset as &dyn Any).downcast_ref::<A>())
    }

    pub fn require<A: AssetKind>(&self) -> Result<&A> {
        self.get::<A>().ok_or(ClusterError::MissingAsset(A::KIND))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.assets.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Asset kinds in sorted order.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.assets.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&'static str, &dyn Asset)> {
        self.assets.iter().map(|(kind, asset)| (*kind, asset.as_ref()))
    }

    /// Resolve `asset` and everything it depends on. Generation happens at
    /// most once per kind; the first failure aborts the whole chain.
    pub fn resolve(&mut self, asset: Box<dyn Asset>) -> Result<()> {
        let mut in_progress = Vec::new();
        self.resolve_inner(asset, &mut in_progress)
    }

    /// Resolve the default instance of `A` and return the stored result.
    pub fn resolve_kind<A: AssetKind + Default>(&mut self) -> Result<&A> {
        self.resolve(Box::new(A::default()))?;
        self.require::<A>()
    }

    fn resolve_inner(
        &mut self,
        mut asset: Box<dyn Asset>,
        in_progress: &mut Vec<&'static str>,
    ) -> Result<()> {
        let kind = asset.kind();
        if self.assets.contains_key(kind) {
            return Ok(());
        }

        if in_progress.contains(&kind) {
            let mut chain = in_progress.clone();
            chain.push(kind);
            return Err(ClusterError::CyclicDependency(chain));
        }

        in_progress.push(kind);
        for dependency in asset.dependencies() {
            self.resolve_inner(dependency, in_progress)?;
        }

        debug!(asset = kind, "generating asset");
        asset.generate(self)?;
        in_progress.pop();

        self.assets.insert(kind, asset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use serde::Deserialize;

    use super::*;

    static BASE_GENERATIONS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Base {
        value: u32,
    }

    impl Asset for Base {
        fn kind(&self) -> &'static str {
            Self::KIND
        }

        fn generate(&mut self, _: &Graph) -> Result<()> {
            BASE_GENERATIONS.fetch_add(1, Ordering::SeqCst);
            self.value = 7;
            Ok(())
        }
    }

    impl AssetKind for Base {
        const KIND: &'static str = "test.Base";
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Derived {
        doubled: u32,
    }

    impl Asset for Derived {
        fn kind(&self) -> &'static str {
            Self::KIND
        }

        fn dependencies(&self) -> Vec<Box<dyn Asset>> {
            vec![Box::new(Base::default())]
        }

        fn generate(&mut self, parents: &Graph) -> Result<()> {
            self.doubled = parents.require::<Base>()?.value * 2;
            Ok(())
        }
    }

    impl AssetKind for Derived {
        const KIND: &'static str = "test.Derived";
    }

    /// Counts generations through a shared handle so each test owns its spy.
    #[derive(Debug)]
    struct Spy {
        calls: Arc<AtomicUsize>,
    }

    impl Asset for Spy {
        fn kind(&self) -> &'static str {
            "test.Spy"
        }

        fn generate(&mut self, _: &Graph) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Asset for Failing {
        fn kind(&self) -> &'static str {
            "test.Failing"
        }

        fn generate(&mut self, _: &Graph) -> Result<()> {
            Err(ClusterError::Internal("no entropy".into()))
        }
    }

    #[derive(Debug)]
    struct DependsOnFailing {
        calls: Arc<AtomicUsize>,
    }

    impl Asset for DependsOnFailing {
        fn kind(&self) -> &'static str {
            "test.DependsOnFailing"
        }

        fn dependencies(&self) -> Vec<Box<dyn Asset>> {
            vec![Box::new(Failing)]
        }

        fn generate(&mut self, _: &Graph) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Left;
    #[derive(Debug)]
    struct Right;

    impl Asset for Left {
        fn kind(&self) -> &'static str {
            "test.Left"
        }
        fn dependencies(&self) -> Vec<Box<dyn Asset>> {
            vec![Box::new(Right)]
        }
        fn generate(&mut self, _: &Graph) -> Result<()> {
            Ok(())
        }
    }

    impl Asset for Right {
        fn kind(&self) -> &'static str {
            "test.Right"
        }
        fn dependencies(&self) -> Vec<Box<dyn Asset>> {
            vec![Box::new(Left)]
        }
        fn generate(&mut self, _: &Graph) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn resolve_generates_each_kind_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();

        graph
            .resolve(Box::new(Spy { calls: Arc::clone(&calls) }))
            .expect("first resolve");
        graph
            .resolve(Box::new(Spy { calls: Arc::clone(&calls) }))
            .expect("second resolve");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn dependencies_are_resolved_first_and_shared() {
        let mut graph = Graph::new();
        let before = BASE_GENERATIONS.load(Ordering::SeqCst);

        let derived = graph.resolve_kind::<Derived>().expect("resolve derived");
        assert_eq!(derived.doubled, 14);
        graph.resolve_kind::<Base>().expect("base already present");

        assert_eq!(BASE_GENERATIONS.load(Ordering::SeqCst) - before, 1);
        assert_eq!(graph.kinds(), vec!["test.Base", "test.Derived"]);
    }

    #[test]
    fn seeded_assets_are_never_generated() {
        let mut graph = Graph::new();
        graph.insert(Base { value: 21 });

        let derived = graph.resolve_kind::<Derived>().expect("resolve derived");
        assert_eq!(derived.doubled, 42);
    }

    #[test]
    fn dependency_failure_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();

        let err = graph
            .resolve(Box::new(DependsOnFailing { calls: Arc::clone(&calls) }))
            .expect_err("dependency fails");

        assert!(matches!(err, ClusterError::Internal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = Graph::new();
        let err = graph.resolve(Box::new(Left)).expect_err("cycle");

        match err {
            ClusterError::CyclicDependency(chain) => {
                assert_eq!(chain, vec!["test.Left", "test.Right", "test.Left"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(graph.is_empty());
    }
}
