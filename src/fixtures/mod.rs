//! Fixture lifecycle
//!
//! Shared objects scoped to the assembly, a collection or a class. Each scope
//! owns a [`FixtureManager`] that constructs every declared fixture type once,
//! awaits its initializer, hands out shared references and disposes everything
//! exactly once when the scope ends.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::context::{DiagnosticSink, TestContextAccessor};
use crate::error::TestError;
use crate::models::short_type_name;
use crate::utils::ExceptionAggregator;

/// Lifecycle hooks of a shared fixture
pub trait Fixture: Send + Sync + 'static {
    /// Awaited once after construction, before any test in scope runs
    fn initialize(&self) -> BoxFuture<'_, Result<(), TestError>> {
        async { Ok(()) }.boxed()
    }

    fn dispose(&self) -> Result<(), TestError> {
        Ok(())
    }

    fn dispose_async(&self) -> BoxFuture<'_, Result<(), TestError>> {
        async { Ok(()) }.boxed()
    }
}

/// Scope that owns a fixture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixtureScope {
    Assembly,
    Collection,
    Class,
}

impl fmt::Display for FixtureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureScope::Assembly => write!(f, "Assembly"),
            FixtureScope::Collection => write!(f, "Collection"),
            FixtureScope::Class => write!(f, "Class"),
        }
    }
}

/// A constructed fixture, shared by reference
#[derive(Clone)]
pub struct FixtureInstance {
    value: Arc<dyn Any + Send + Sync>,
    lifecycle: Arc<dyn Fixture>,
    type_name: &'static str,
}

impl FixtureInstance {
    fn new<T: Fixture>(fixture: T) -> Self {
        let fixture = Arc::new(fixture);
        Self {
            value: fixture.clone(),
            lifecycle: fixture,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for FixtureInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FixtureInstance").field(&self.type_name).finish()
    }
}

type FixtureFactory =
    Arc<dyn Fn(&FixtureResolver<'_>) -> Result<FixtureInstance, TestError> + Send + Sync>;

/// How to build one fixture type
#[derive(Clone)]
pub struct FixtureDefinition {
    type_id: TypeId,
    type_name: &'static str,
    factory: FixtureFactory,
}

impl FixtureDefinition {
    pub fn new<T, F>(factory: F) -> Self
    where
        T: Fixture,
        F: Fn(&FixtureResolver<'_>) -> Result<T, TestError> + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            factory: Arc::new(move |resolver| factory(resolver).map(FixtureInstance::new)),
        }
    }

    /// Fixture built from its `Default` value
    pub fn of_default<T: Fixture + Default>() -> Self {
        Self::new(|_| Ok(T::default()))
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for FixtureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FixtureDefinition").field(&self.type_name).finish()
    }
}

/// What a fixture constructor may ask for
pub struct FixtureResolver<'a> {
    parent: Option<&'a FixtureManager>,
    diagnostics: &'a DiagnosticSink,
    unresolved: Mutex<Vec<&'static str>>,
}

impl FixtureResolver<'_> {
    /// A fixture from an enclosing scope
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, TestError> {
        let found = self
            .parent
            .and_then(|parent| parent.lookup(TypeId::of::<T>()))
            .and_then(|instance| instance.downcast::<T>());

        found.ok_or_else(|| {
            let name = std::any::type_name::<T>();
            self.unresolved
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(name);
            TestError::failed(format!("No fixture of type {name} is in scope"))
        })
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        self.diagnostics
    }

    pub fn context(&self) -> TestContextAccessor {
        TestContextAccessor
    }

    fn take_unresolved(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.unresolved.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Owns the fixtures of one scope
pub struct FixtureManager {
    scope: FixtureScope,
    parent: Option<Arc<FixtureManager>>,
    diagnostics: DiagnosticSink,
    instances: Mutex<Vec<(TypeId, FixtureInstance)>>,
    construction: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl FixtureManager {
    pub fn new(
        scope: FixtureScope,
        parent: Option<Arc<FixtureManager>>,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            scope,
            parent,
            diagnostics,
            instances: Mutex::new(Vec::new()),
            construction: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn scope(&self) -> FixtureScope {
        self.scope
    }

    /// Construct and initialize every definition, recording failures
    pub async fn initialize(
        &self,
        definitions: &[FixtureDefinition],
        aggregator: &mut ExceptionAggregator,
    ) {
        for definition in definitions {
            if let Err(err) = self.get_or_create(definition).await {
                warn!("{}", err);
                aggregator.add(err);
            }
        }
    }

    /// The instance of this scope for the definition, constructing it at most once
    pub async fn get_or_create(
        &self,
        definition: &FixtureDefinition,
    ) -> Result<FixtureInstance, TestError> {
        if let Some(instance) = self.own(definition.type_id) {
            return Ok(instance);
        }

        let _guard = self.construction.lock().await;
        if let Some(instance) = self.own(definition.type_id) {
            return Ok(instance);
        }

        let type_name = short_type_name(definition.type_name);
        let instance = self.construct(definition, type_name)?;
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((definition.type_id, instance.clone()));
        debug!("{} fixture {} constructed", self.scope, type_name);

        let initialized = AssertUnwindSafe(instance.lifecycle.initialize())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TestError::from_panic(payload)));
        if let Err(err) = initialized {
            return Err(TestError::fixture(
                format!(
                    "{} fixture type '{}' threw in InitializeAsync",
                    self.scope, type_name
                ),
                Some(err),
            ));
        }

        Ok(instance)
    }

    fn construct(
        &self,
        definition: &FixtureDefinition,
        type_name: &str,
    ) -> Result<FixtureInstance, TestError> {
        let resolver = FixtureResolver {
            parent: self.parent.as_deref(),
            diagnostics: &self.diagnostics,
            unresolved: Mutex::new(Vec::new()),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| (definition.factory)(&resolver)))
            .unwrap_or_else(|payload| Err(TestError::from_panic(payload)));

        let unresolved = resolver.take_unresolved();
        if !unresolved.is_empty() {
            let names: Vec<&str> = unresolved.into_iter().map(short_type_name).collect();
            return Err(TestError::fixture(
                format!(
                    "{} fixture type '{}' had one or more unresolved constructor arguments: {}",
                    self.scope,
                    type_name,
                    names.join(", ")
                ),
                None,
            ));
        }

        result.map_err(|err| {
            TestError::fixture(
                format!(
                    "{} fixture type '{}' threw in its constructor",
                    self.scope, type_name
                ),
                Some(err),
            )
        })
    }

    fn own(&self, type_id: TypeId) -> Option<FixtureInstance> {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(id, _)| *id == type_id)
            .map(|(_, instance)| instance.clone())
    }

    /// Find a fixture in this scope or any enclosing one, innermost first
    pub fn lookup(&self, type_id: TypeId) -> Option<FixtureInstance> {
        self.own(type_id)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.lookup(type_id)))
    }

    pub fn len(&self) -> usize {
        self.instances.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every fixture of this scope, newest first. Runs at most once.
    pub async fn dispose(&self, aggregator: &mut ExceptionAggregator) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let instances: Vec<FixtureInstance> = {
            let mut guard = self.instances.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).rev().map(|(_, instance)| instance).collect()
        };

        for instance in instances {
            let type_name = short_type_name(instance.type_name);

            let sync = panic::catch_unwind(AssertUnwindSafe(|| instance.lifecycle.dispose()))
                .unwrap_or_else(|payload| Err(TestError::from_panic(payload)));
            if let Err(err) = sync {
                aggregator.add(TestError::fixture(
                    format!("{} fixture type '{}' threw in Dispose", self.scope, type_name),
                    Some(err),
                ));
            }

            let asynchronous = AssertUnwindSafe(instance.lifecycle.dispose_async())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(TestError::from_panic(payload)));
            if let Err(err) = asynchronous {
                aggregator.add(TestError::fixture(
                    format!(
                        "{} fixture type '{}' threw in DisposeAsync",
                        self.scope, type_name
                    ),
                    Some(err),
                ));
            }
        }
        debug!("{} fixtures disposed", self.scope);
    }
}

impl fmt::Debug for FixtureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureManager")
            .field("scope", &self.scope)
            .field("instances", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static COUNTER_BUILT: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counter {
        disposed: AtomicUsize,
    }

    impl Fixture for Counter {
        fn dispose(&self) -> Result<(), TestError> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Database;
    impl Fixture for Database {}

    struct Repository {
        _db: Arc<Database>,
    }
    impl Fixture for Repository {}

    struct Broken;
    impl Fixture for Broken {
        fn initialize(&self) -> BoxFuture<'_, Result<(), TestError>> {
            async { Err(TestError::failed("no network")) }.boxed()
        }

        fn dispose_async(&self) -> BoxFuture<'_, Result<(), TestError>> {
            async { Err(TestError::failed("still no network")) }.boxed()
        }
    }

    fn manager(scope: FixtureScope, parent: Option<Arc<FixtureManager>>) -> FixtureManager {
        FixtureManager::new(scope, parent, DiagnosticSink::logging())
    }

    #[tokio::test]
    async fn test_constructs_once_and_disposes_once() {
        let definition = FixtureDefinition::new(|_| {
            COUNTER_BUILT.fetch_add(1, Ordering::SeqCst);
            Ok(Counter::default())
        });
        let manager = manager(FixtureScope::Collection, None);
        let mut aggregator = ExceptionAggregator::new();

        manager.initialize(&[definition.clone()], &mut aggregator).await;
        let first = manager.get_or_create(&definition).await.unwrap();
        let second = manager.get_or_create(&definition).await.unwrap();
        assert_eq!(COUNTER_BUILT.load(Ordering::SeqCst), 1);

        let counter = first.downcast::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&counter, &second.downcast::<Counter>().unwrap()));

        manager.dispose(&mut aggregator).await;
        manager.dispose(&mut aggregator).await;
        assert_eq!(counter.disposed.load(Ordering::SeqCst), 1);
        assert!(!aggregator.has_errors());
    }

    #[tokio::test]
    async fn test_resolves_from_parent_scope() {
        let assembly = Arc::new(manager(FixtureScope::Assembly, None));
        let mut aggregator = ExceptionAggregator::new();
        assembly
            .initialize(&[FixtureDefinition::new(|_| Ok(Database))], &mut aggregator)
            .await;

        let collection = manager(FixtureScope::Collection, Some(assembly));
        let repository = FixtureDefinition::new(|resolver| {
            Ok(Repository {
                _db: resolver.get::<Database>()?,
            })
        });
        collection.initialize(&[repository], &mut aggregator).await;

        assert!(!aggregator.has_errors());
        assert!(collection.lookup(TypeId::of::<Repository>()).is_some());
        assert!(collection.lookup(TypeId::of::<Database>()).is_some());
    }

    #[tokio::test]
    async fn test_unresolved_constructor_argument() {
        let collection = manager(FixtureScope::Collection, None);
        let mut aggregator = ExceptionAggregator::new();
        let repository = FixtureDefinition::new(|resolver| {
            Ok(Repository {
                _db: resolver.get::<Database>()?,
            })
        });
        collection.initialize(&[repository], &mut aggregator).await;

        assert_eq!(
            aggregator.to_error().unwrap().to_string(),
            "Collection fixture type 'Repository' had one or more unresolved constructor arguments: Database"
        );
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_constructor_failure_and_panic() {
        let class = manager(FixtureScope::Class, None);
        let mut aggregator = ExceptionAggregator::new();
        class
            .initialize(
                &[FixtureDefinition::new(|_| -> Result<Database, TestError> {
                    panic!("ctor exploded")
                })],
                &mut aggregator,
            )
            .await;

        let err = aggregator.to_error().unwrap();
        assert_eq!(err.to_string(), "Class fixture type 'Database' threw in its constructor");
        assert_eq!(err.metadata().messages[1], "ctor exploded");
    }

    #[tokio::test]
    async fn test_initialize_and_dispose_failures_are_recorded() {
        let collection = manager(FixtureScope::Collection, None);
        let mut aggregator = ExceptionAggregator::new();
        collection
            .initialize(&[FixtureDefinition::new(|_| Ok(Broken))], &mut aggregator)
            .await;
        assert_eq!(
            aggregator.take().unwrap().to_string(),
            "Collection fixture type 'Broken' threw in InitializeAsync"
        );

        collection.dispose(&mut aggregator).await;
        assert_eq!(
            aggregator.to_error().unwrap().to_string(),
            "Collection fixture type 'Broken' threw in DisposeAsync"
        );
    }

    #[tokio::test]
    async fn test_inner_scope_takes_precedence() {
        let collection = Arc::new(manager(FixtureScope::Collection, None));
        let class = manager(FixtureScope::Class, Some(collection.clone()));
        let mut aggregator = ExceptionAggregator::new();
        let definition = FixtureDefinition::of_default::<Counter>();

        collection.initialize(&[definition.clone()], &mut aggregator).await;
        class.initialize(&[definition], &mut aggregator).await;

        let outer = collection.lookup(TypeId::of::<Counter>()).unwrap();
        let inner = class.lookup(TypeId::of::<Counter>()).unwrap();
        assert!(!Arc::ptr_eq(
            &outer.downcast::<Counter>().unwrap(),
            &inner.downcast::<Counter>().unwrap()
        ));
    }
}
