//! Test identity models
//!
//! Immutable assembly, collection, class, method and case records supplied by
//! discovery. They form a strict containment tree: every case points at its
//! method, class and collection.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::TestError;
use crate::executor::orderer::{TestCaseOrderer, TestCollectionOrderer};
use crate::fixtures::FixtureDefinition;

use super::class::ClassConstructor;
use super::invocation::{BeforeAfterHook, TestBody, TestInvocation, TestReturn};

/// Free-form key/value tags
pub type Traits = BTreeMap<String, Vec<String>>;

/// Produces theory rows at run time
pub type DataSource = Arc<dyn Fn() -> Result<Vec<TheoryRow>, TestError> + Send + Sync>;

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Root of the containment tree
#[derive(Clone)]
pub struct TestAssembly {
    pub name: String,
    pub fixtures: Vec<FixtureDefinition>,
    pub collection_orderer: Option<Arc<dyn TestCollectionOrderer>>,
    pub case_orderer: Option<Arc<dyn TestCaseOrderer>>,
    pub before_after: Vec<Arc<dyn BeforeAfterHook>>,
}

impl TestAssembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixtures: Vec::new(),
            collection_orderer: None,
            case_orderer: None,
            before_after: Vec::new(),
        }
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn with_collection_orderer(mut self, orderer: impl TestCollectionOrderer) -> Self {
        self.collection_orderer = Some(Arc::new(orderer));
        self
    }

    pub fn with_case_orderer(mut self, orderer: impl TestCaseOrderer) -> Self {
        self.case_orderer = Some(Arc::new(orderer));
        self
    }

    pub fn with_hook(mut self, hook: impl BeforeAfterHook) -> Self {
        self.before_after.push(Arc::new(hook));
        self
    }
}

impl fmt::Debug for TestAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestAssembly")
            .field("name", &self.name)
            .field("fixtures", &self.fixtures.len())
            .finish()
    }
}

/// Group of classes sharing collection fixtures; the unit of parallelism
#[derive(Clone)]
pub struct TestCollection {
    pub unique_id: String,
    pub display_name: String,
    pub disable_parallelization: bool,
    pub fixtures: Vec<FixtureDefinition>,
    pub case_orderer: Option<Arc<dyn TestCaseOrderer>>,
}

impl TestCollection {
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            unique_id: display_name.clone(),
            display_name,
            disable_parallelization: false,
            fixtures: Vec::new(),
            case_orderer: None,
        }
    }

    /// Run this collection after all parallel collections, one at a time
    pub fn non_parallel(mut self) -> Self {
        self.disable_parallelization = true;
        self
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn with_case_orderer(mut self, orderer: impl TestCaseOrderer) -> Self {
        self.case_orderer = Some(Arc::new(orderer));
        self
    }
}

impl fmt::Debug for TestCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCollection")
            .field("unique_id", &self.unique_id)
            .field("disable_parallelization", &self.disable_parallelization)
            .finish()
    }
}

/// Test class. A class without constructors is static: no instance is built.
#[derive(Clone)]
pub struct TestClass {
    pub name: String,
    pub constructors: Vec<ClassConstructor>,
    pub fixtures: Vec<FixtureDefinition>,
    pub before_after: Vec<Arc<dyn BeforeAfterHook>>,
    pub case_orderer: Option<Arc<dyn TestCaseOrderer>>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
            fixtures: Vec::new(),
            before_after: Vec::new(),
            case_orderer: None,
        }
    }

    pub fn with_constructor(mut self, constructor: ClassConstructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn with_hook(mut self, hook: impl BeforeAfterHook) -> Self {
        self.before_after.push(Arc::new(hook));
        self
    }

    pub fn with_case_orderer(mut self, orderer: impl TestCaseOrderer) -> Self {
        self.case_orderer = Some(Arc::new(orderer));
        self
    }

    pub fn is_static(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl fmt::Debug for TestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClass")
            .field("name", &self.name)
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

/// Test method: a body plus its declared parameter names
#[derive(Clone)]
pub struct TestMethod {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: TestBody,
    pub before_after: Vec<Arc<dyn BeforeAfterHook>>,
    /// Whether the body may return an awaitable; timeouts need one
    pub is_async: bool,
}

impl TestMethod {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestInvocation) -> TestReturn + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            body: Arc::new(body),
            before_after: Vec::new(),
            is_async: true,
        }
    }

    /// Method whose body completes synchronously
    pub fn sync<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestInvocation) -> Result<(), TestError> + Send + Sync + 'static,
    {
        Self {
            is_async: false,
            ..Self::new(name, move |invocation| TestReturn::Complete(body(invocation)))
        }
    }

    /// Method whose body returns a future
    pub fn asynchronous<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestInvocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), TestError>> + Send + 'static,
    {
        Self::new(name, move |invocation| {
            TestReturn::Awaitable(Box::pin(body(invocation)))
        })
    }

    pub fn with_parameters(mut self, names: &[&str]) -> Self {
        self.parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_hook(mut self, hook: impl BeforeAfterHook) -> Self {
        self.before_after.push(Arc::new(hook));
        self
    }
}

impl fmt::Debug for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestMethod")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// One argument value passed to a test method
#[derive(Clone)]
pub struct TestArgument {
    display: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl TestArgument {
    pub fn new<T: fmt::Debug + Send + Sync + 'static>(value: T) -> Self {
        Self {
            display: format!("{value:?}"),
            value: Arc::new(value),
        }
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl fmt::Debug for TestArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// A data row of a delay-enumerated theory
#[derive(Clone, Debug, Default)]
pub struct TheoryRow {
    pub arguments: Vec<TestArgument>,
    pub skip_reason: Option<String>,
    pub display_name: Option<String>,
    pub explicit: bool,
    pub traits: Traits,
}

impl TheoryRow {
    pub fn new(arguments: Vec<TestArgument>) -> Self {
        Self {
            arguments,
            ..Default::default()
        }
    }

    pub fn with_skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.entry(name.into()).or_default().push(value.into());
        self
    }
}

/// Where a case gets its arguments from
#[derive(Clone)]
pub enum CaseData {
    /// Arguments known up front, including none
    Arguments(Vec<TestArgument>),
    /// Rows produced when the case runs, one test per row
    DelayEnumerated(DataSource),
}

impl Default for CaseData {
    fn default() -> Self {
        CaseData::Arguments(Vec::new())
    }
}

impl fmt::Debug for CaseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseData::Arguments(args) => f.debug_tuple("Arguments").field(args).finish(),
            CaseData::DelayEnumerated(_) => f.write_str("DelayEnumerated"),
        }
    }
}

/// Makes a static skip reason conditional
#[derive(Clone)]
pub enum SkipCondition {
    /// Skip unless the predicate holds
    Unless(Predicate),
    /// Skip when the predicate holds
    When(Predicate),
}

impl SkipCondition {
    pub fn unless(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        SkipCondition::Unless(Arc::new(predicate))
    }

    pub fn when(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        SkipCondition::When(Arc::new(predicate))
    }

    pub fn should_skip(&self) -> bool {
        match self {
            SkipCondition::Unless(predicate) => !predicate(),
            SkipCondition::When(predicate) => predicate(),
        }
    }
}

impl fmt::Debug for SkipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipCondition::Unless(_) => f.write_str("Unless"),
            SkipCondition::When(_) => f.write_str("When"),
        }
    }
}

/// A single runnable unit, possibly one data row of a theory
#[derive(Clone, Debug)]
pub struct TestCase {
    pub unique_id: String,
    pub display_name: String,
    pub collection: Arc<TestCollection>,
    pub class: Arc<TestClass>,
    pub method: Arc<TestMethod>,
    pub skip_reason: Option<String>,
    pub skip_condition: Option<SkipCondition>,
    /// Milliseconds; 0 disables the timeout
    pub timeout_ms: u64,
    pub explicit: bool,
    pub traits: Traits,
    pub data: CaseData,
}

impl TestCase {
    pub fn new(
        collection: &Arc<TestCollection>,
        class: &Arc<TestClass>,
        method: &Arc<TestMethod>,
    ) -> Self {
        let display_name = format!("{}.{}", class.name, method.name);
        Self {
            unique_id: format!("{}/{}", collection.unique_id, display_name),
            display_name,
            collection: Arc::clone(collection),
            class: Arc::clone(class),
            method: Arc::clone(method),
            skip_reason: None,
            skip_condition: None,
            timeout_ms: 0,
            explicit: false,
            traits: Traits::new(),
            data: CaseData::default(),
        }
    }

    /// Fixed arguments; the display name and id gain the formatted values
    pub fn with_arguments(mut self, arguments: Vec<TestArgument>) -> Self {
        let rendered = format_arguments(&self.method.parameters, &arguments);
        self.display_name = format!("{}({})", self.display_name, rendered);
        self.unique_id = format!("{}({})", self.unique_id, rendered);
        self.data = CaseData::Arguments(arguments);
        self
    }

    pub fn delay_enumerated<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Result<Vec<TheoryRow>, TestError> + Send + Sync + 'static,
    {
        self.data = CaseData::DelayEnumerated(Arc::new(source));
        self
    }

    pub fn with_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_skip_condition(mut self, condition: SkipCondition) -> Self {
        self.skip_condition = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Resolve the static skip reason, applying any skip condition.
    ///
    /// A condition without a reason is a configuration error.
    pub fn effective_skip_reason(&self) -> Result<Option<String>, TestError> {
        self.resolve_skip(self.skip_reason.as_deref())
    }

    fn resolve_skip(&self, reason: Option<&str>) -> Result<Option<String>, TestError> {
        match (reason, &self.skip_condition) {
            (None, None) => Ok(None),
            (Some(reason), None) => Ok(Some(reason.to_string())),
            (None, Some(_)) => Err(TestError::pipeline(format!(
                "You must set 'Skip' when you set 'SkipUnless' or 'SkipWhen' on test method '{}.{}' to set the message for conditional skips",
                self.class.name, self.method.name
            ))),
            (Some(reason), Some(condition)) => {
                Ok(condition.should_skip().then(|| reason.to_string()))
            }
        }
    }
}

/// One concrete test produced from a case
#[derive(Clone, Debug)]
pub struct Test {
    pub case: Arc<TestCase>,
    pub unique_id: String,
    pub display_name: String,
    /// Position within the case; -1 for synthetic failures
    pub index: i32,
    pub arguments: Vec<TestArgument>,
    pub skip_reason: Option<String>,
    pub explicit: bool,
    pub traits: Traits,
}

impl Test {
    /// The single test of a case with fixed arguments
    pub fn for_case(case: &Arc<TestCase>) -> Self {
        let arguments = match &case.data {
            CaseData::Arguments(arguments) => arguments.clone(),
            CaseData::DelayEnumerated(_) => Vec::new(),
        };
        Self {
            case: Arc::clone(case),
            unique_id: format!("{}-0", case.unique_id),
            display_name: case.display_name.clone(),
            index: 0,
            arguments,
            skip_reason: case.skip_reason.clone(),
            explicit: case.explicit,
            traits: case.traits.clone(),
        }
    }

    /// A test for one data row of a delay-enumerated case
    pub fn for_row(case: &Arc<TestCase>, index: i32, row: TheoryRow) -> Self {
        let display_name = row.display_name.unwrap_or_else(|| {
            format!(
                "{}({})",
                case.display_name,
                format_arguments(&case.method.parameters, &row.arguments)
            )
        });
        let mut traits = case.traits.clone();
        for (name, values) in row.traits {
            traits.entry(name).or_default().extend(values);
        }
        Self {
            case: Arc::clone(case),
            unique_id: format!("{}-{}", case.unique_id, index),
            display_name,
            index,
            arguments: row.arguments,
            skip_reason: row.skip_reason.or_else(|| case.skip_reason.clone()),
            explicit: case.explicit || row.explicit,
            traits,
        }
    }

    /// Placeholder test used to report a failure for a case that produced none
    pub fn synthetic(case: &Arc<TestCase>) -> Self {
        Self {
            case: Arc::clone(case),
            unique_id: format!("{}-synthetic", case.unique_id),
            display_name: case.display_name.clone(),
            index: -1,
            arguments: Vec::new(),
            skip_reason: None,
            explicit: false,
            traits: case.traits.clone(),
        }
    }

    /// Skip reason of this test after applying the case's skip condition
    pub fn effective_skip_reason(&self) -> Result<Option<String>, TestError> {
        self.case.resolve_skip(self.skip_reason.as_deref())
    }
}

/// Render `name: value` pairs; surplus values get a `???` name
fn format_arguments(parameters: &[String], arguments: &[TestArgument]) -> String {
    arguments
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let name = parameters.get(i).map(String::as_str).unwrap_or("???");
            format!("{}: {}", name, arg.display())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case() -> TestCase {
        let collection = Arc::new(TestCollection::new("Default"));
        let class = Arc::new(TestClass::new("MathTests"));
        let method = Arc::new(
            TestMethod::sync("adds", |_| Ok(())).with_parameters(&["x", "y"]),
        );
        TestCase::new(&collection, &class, &method)
    }

    #[test]
    fn test_case_identity() {
        let case = case();
        assert_eq!(case.display_name, "MathTests.adds");
        assert_eq!(case.unique_id, "Default/MathTests.adds");
        assert!(case.class.is_static());
    }

    #[test]
    fn test_arguments_render_into_display_name() {
        let case = case().with_arguments(vec![TestArgument::new(1), TestArgument::new("two")]);
        assert_eq!(case.display_name, "MathTests.adds(x: 1, y: \"two\")");

        let test = Test::for_case(&Arc::new(case));
        assert_eq!(test.arguments.len(), 2);
        assert_eq!(test.arguments[0].get::<i32>(), Some(&1));
        assert!(test.unique_id.ends_with("-0"));
    }

    #[test]
    fn test_row_display_and_skip() {
        let case = Arc::new(case().with_trait("area", "math"));
        let row = TheoryRow::new(vec![
            TestArgument::new(1),
            TestArgument::new(2),
            TestArgument::new(3),
        ])
        .with_skip("flaky")
        .with_trait("speed", "slow");

        let test = Test::for_row(&case, 2, row);
        assert_eq!(test.display_name, "MathTests.adds(x: 1, y: 2, ???: 3)");
        assert_eq!(test.skip_reason.as_deref(), Some("flaky"));
        assert_eq!(test.index, 2);
        assert_eq!(test.traits.len(), 2);
    }

    #[test]
    fn test_effective_skip_reason() {
        assert_eq!(case().effective_skip_reason().unwrap(), None);

        let skipped = case().with_skip("later");
        assert_eq!(
            skipped.effective_skip_reason().unwrap().as_deref(),
            Some("later")
        );

        let unless_true = case()
            .with_skip("needs db")
            .with_skip_condition(SkipCondition::unless(|| true));
        assert_eq!(unless_true.effective_skip_reason().unwrap(), None);

        let when_true = case()
            .with_skip("on ci")
            .with_skip_condition(SkipCondition::when(|| true));
        assert_eq!(
            when_true.effective_skip_reason().unwrap().as_deref(),
            Some("on ci")
        );

        let no_reason = case().with_skip_condition(SkipCondition::when(|| true));
        assert!(no_reason.effective_skip_reason().is_err());
    }
}
