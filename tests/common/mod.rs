#![allow(dead_code)]

use std::sync::Arc;

use test_engine::bus::{CollectingSink, Message, MessageSink};
use test_engine::config::RunConfig;
use test_engine::models::{
    RunSummary, TestAssembly, TestCase, TestClass, TestCollection, TestMethod,
};
use test_engine::utils::logger::{try_init_logger, LogLevel};
use test_engine::AssemblyRunner;

/// Synchronous delivery keeps message order deterministic per task
pub fn sync_config() -> RunConfig {
    RunConfig {
        synchronous_message_reporting: true,
        parallelize_test_collections: false,
        ..Default::default()
    }
}

pub fn passing(name: &str) -> Arc<TestMethod> {
    Arc::new(TestMethod::sync(name, |_| Ok(())))
}

pub fn case(
    collection: &Arc<TestCollection>,
    class: &Arc<TestClass>,
    method: &Arc<TestMethod>,
) -> TestCase {
    TestCase::new(collection, class, method)
}

pub async fn run_with(
    assembly: TestAssembly,
    cases: Vec<TestCase>,
    config: RunConfig,
    sink: Arc<dyn MessageSink>,
) -> RunSummary {
    try_init_logger(LogLevel::Warn);
    AssemblyRunner::new(assembly, cases, config)
        .with_sink(sink)
        .run()
        .await
}

pub async fn run(cases: Vec<TestCase>) -> (RunSummary, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let summary = run_with(TestAssembly::new("asm"), cases, sync_config(), sink.clone()).await;
    (summary, sink)
}

/// Level name of a Starting/Finished message kind
pub fn level(kind: &str) -> Option<&str> {
    kind.strip_suffix("Starting")
        .or_else(|| kind.strip_suffix("Finished"))
}

/// Every Starting has exactly one later Finished with the same ids
pub fn assert_balanced(messages: &[Message]) {
    let mut open: Vec<(String, String)> = Vec::new();
    for message in messages {
        let kind = message.kind_name();
        let Some(level) = level(kind) else { continue };
        if matches!(level, "ClassConstruction" | "ClassDispose" | "BeforeTest" | "AfterTest") {
            continue;
        }
        let key = (level.to_string(), format!("{:?}", message.ids()));
        if message.is_starting() {
            open.push(key);
        } else {
            let position = open
                .iter()
                .rposition(|k| *k == key)
                .unwrap_or_else(|| panic!("{kind} without matching Starting"));
            open.remove(position);
        }
    }
    assert!(open.is_empty(), "unfinished scopes: {open:?}");
}

pub fn finished_summary(messages: &[Message], kind: &str) -> Vec<RunSummary> {
    messages
        .iter()
        .filter(|m| m.kind_name() == kind)
        .filter_map(|m| m.summary().cloned())
        .collect()
}

pub fn failure_messages(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::TestFailed(failed) => Some(failed.failure.message().to_string()),
            _ => None,
        })
        .collect()
}
