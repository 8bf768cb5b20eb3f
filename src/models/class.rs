//! Test class construction
//!
//! A class constructor declares its parameters; the class runner resolves them
//! against in-scope fixtures and the per-test capabilities, then the factory
//! receives the resolved values as [`ClassArgs`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::context::{TestContextAccessor, TestOutputHelper};
use crate::error::TestError;
use crate::fixtures::FixtureInstance;

use super::test_case::TestArgument;

/// Lifecycle hooks of a constructed test class instance
pub trait TestInstance: Any + Send + Sync {
    /// Awaited after construction, before any hook or the test body
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

/// A constructed test class instance
#[derive(Clone)]
pub struct InstanceHandle {
    value: Arc<dyn Any + Send + Sync>,
    lifecycle: Arc<dyn TestInstance>,
}

impl InstanceHandle {
    pub fn new<T: TestInstance>(instance: T) -> Self {
        let instance = Arc::new(instance);
        Self {
            value: instance.clone(),
            lifecycle: instance,
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn lifecycle(&self) -> &dyn TestInstance {
        self.lifecycle.as_ref()
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstanceHandle")
    }
}

type Factory = Arc<dyn Fn(ClassArgs) -> Result<InstanceHandle, TestError> + Send + Sync>;

/// A constructor parameter and where its value comes from
#[derive(Clone, Debug)]
pub enum ConstructorParameter {
    /// A fixture from the class, collection or assembly scope
    Fixture {
        name: String,
        type_id: TypeId,
        type_name: &'static str,
        optional: bool,
    },
    /// Optional parameter with a default value
    Default { name: String, value: TestArgument },
    /// Trailing variadic parameter, bound to no values
    Variadic { name: String },
    /// Per-test output capture
    Output { name: String },
    /// Accessor for the current test context
    Context { name: String },
}

impl ConstructorParameter {
    pub fn fixture<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        ConstructorParameter::Fixture {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            optional: false,
        }
    }

    pub fn optional_fixture<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        ConstructorParameter::Fixture {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            optional: true,
        }
    }

    pub fn default_value<T>(name: impl Into<String>, value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        ConstructorParameter::Default {
            name: name.into(),
            value: TestArgument::new(value),
        }
    }

    pub fn variadic(name: impl Into<String>) -> Self {
        ConstructorParameter::Variadic { name: name.into() }
    }

    pub fn output(name: impl Into<String>) -> Self {
        ConstructorParameter::Output { name: name.into() }
    }

    pub fn context(name: impl Into<String>) -> Self {
        ConstructorParameter::Context { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            ConstructorParameter::Fixture { name, .. }
            | ConstructorParameter::Default { name, .. }
            | ConstructorParameter::Variadic { name }
            | ConstructorParameter::Output { name }
            | ConstructorParameter::Context { name } => name,
        }
    }
}

/// The single constructor of a test class
#[derive(Clone)]
pub struct ClassConstructor {
    pub parameters: Vec<ConstructorParameter>,
    factory: Factory,
}

impl ClassConstructor {
    pub fn new<T, F>(parameters: Vec<ConstructorParameter>, factory: F) -> Self
    where
        T: TestInstance,
        F: Fn(ClassArgs) -> Result<T, TestError> + Send + Sync + 'static,
    {
        Self {
            parameters,
            factory: Arc::new(move |args| factory(args).map(InstanceHandle::new)),
        }
    }

    /// Parameterless constructor
    pub fn default_of<T, F>(factory: F) -> Self
    where
        T: TestInstance,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(Vec::new(), move |_| Ok(factory()))
    }

    pub fn construct(&self, args: ClassArgs) -> Result<InstanceHandle, TestError> {
        (self.factory)(args)
    }
}

impl fmt::Debug for ClassConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassConstructor")
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Value bound to one constructor parameter
#[derive(Clone, Debug)]
pub enum ClassArg {
    Fixture(FixtureInstance),
    Value(TestArgument),
    /// Optional fixture that no scope provides
    Missing,
    Variadic,
    Output(TestOutputHelper),
    Context(TestContextAccessor),
}

/// Resolved constructor arguments, in declaration order
#[derive(Clone, Debug, Default)]
pub struct ClassArgs {
    values: Vec<(String, ClassArg)>,
}

impl ClassArgs {
    pub fn new(values: Vec<(String, ClassArg)>) -> Self {
        Self { values }
    }

    fn find(&self, name: &str) -> Result<&ClassArg, TestError> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, arg)| arg)
            .ok_or_else(|| {
                TestError::class_configuration(format!("No constructor argument named '{name}'"))
            })
    }

    pub fn fixture<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, TestError> {
        match self.find(name)? {
            ClassArg::Fixture(instance) => instance.downcast::<T>().ok_or_else(|| {
                TestError::class_configuration(format!(
                    "Constructor argument '{name}' is not of type {}",
                    std::any::type_name::<T>()
                ))
            }),
            _ => Err(TestError::class_configuration(format!(
                "Constructor argument '{name}' is not a fixture"
            ))),
        }
    }

    pub fn optional_fixture<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        match self.find(name) {
            Ok(ClassArg::Fixture(instance)) => instance.downcast::<T>(),
            _ => None,
        }
    }

    pub fn value<T: Clone + 'static>(&self, name: &str) -> Result<T, TestError> {
        match self.find(name)? {
            ClassArg::Value(value) => value.get::<T>().cloned().ok_or_else(|| {
                TestError::class_configuration(format!(
                    "Constructor argument '{name}' is not of type {}",
                    std::any::type_name::<T>()
                ))
            }),
            _ => Err(TestError::class_configuration(format!(
                "Constructor argument '{name}' is not a value"
            ))),
        }
    }

    pub fn output(&self) -> Result<TestOutputHelper, TestError> {
        self.values
            .iter()
            .find_map(|(_, arg)| match arg {
                ClassArg::Output(helper) => Some(helper.clone()),
                _ => None,
            })
            .ok_or_else(|| TestError::class_configuration("Constructor has no output parameter"))
    }

    pub fn context(&self) -> Result<TestContextAccessor, TestError> {
        self.values
            .iter()
            .find_map(|(_, arg)| match arg {
                ClassArg::Context(accessor) => Some(accessor.clone()),
                _ => None,
            })
            .ok_or_else(|| TestError::class_configuration("Constructor has no context parameter"))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Short type name used in configuration errors
pub fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}
