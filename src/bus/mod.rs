//! Message bus and sinks
//!
//! Lifecycle messages flow from the runners through a [`MessageBus`] to a
//! [`MessageSink`].

mod message;
mod message_bus;
mod sink;

pub use message::{
    AssemblyStarting, CaseStarting, CleanupFailure, DiagnosticMessage, ErrorMessage, HookEvent,
    Message, MessageIds, ScopeFinished, ScopeStarting, TestEvent, TestFailed, TestOutput,
    TestResult, TestSkipped, TestStarting,
};
pub use message_bus::MessageBus;
pub use sink::{CollectingSink, FanOutSink, FnSink, LoggingSink, MessageSink};
