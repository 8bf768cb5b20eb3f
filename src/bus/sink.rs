//! Message sinks
//!
//! Receivers of the lifecycle message stream. Returning `false` from
//! `on_message` asks the run to stop.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::message::Message;

/// Receiver of lifecycle messages
pub trait MessageSink: Send + Sync {
    /// Handle one message; `false` requests cancellation of the run
    fn on_message(&self, message: &Message) -> bool;
}

type StopPredicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Stores every message it receives
#[derive(Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<Message>>,
    stop_when: Option<StopPredicate>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject (after storing) every message matching the predicate
    pub fn stop_when(predicate: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            stop_when: Some(Box::new(predicate)),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Kind names of the received messages, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(Message::kind_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSink for CollectingSink {
    fn on_message(&self, message: &Message) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        !self.stop_when.as_ref().is_some_and(|stop| stop(message))
    }
}

/// Renders messages through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl MessageSink for LoggingSink {
    fn on_message(&self, message: &Message) -> bool {
        match message {
            Message::AssemblyStarting(m) => {
                info!("Starting {} ({})", m.assembly_name, m.test_environment)
            }
            Message::AssemblyFinished(m) => info!("Finished {}: {}", m.ids.assembly, m.summary),
            Message::TestPassed(m) => debug!("✓ {}", m.ids.test.as_deref().unwrap_or_default()),
            Message::TestFailed(m) => warn!(
                "✗ {}: {}",
                m.result.ids.test.as_deref().unwrap_or_default(),
                m.failure.message()
            ),
            Message::TestSkipped(m) => info!(
                "○ {}: {}",
                m.result.ids.test.as_deref().unwrap_or_default(),
                m.reason
            ),
            Message::AssemblyCleanupFailure(m)
            | Message::CollectionCleanupFailure(m)
            | Message::ClassCleanupFailure(m)
            | Message::MethodCleanupFailure(m)
            | Message::CaseCleanupFailure(m)
            | Message::TestCleanupFailure(m) => {
                warn!("{}: {}", message.kind_name(), m.failure.message())
            }
            Message::Error(m) => warn!("Error: {}", m.failure.message()),
            other => debug!("{}", other.kind_name()),
        }
        true
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

impl<F> MessageSink for FnSink<F>
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    fn on_message(&self, message: &Message) -> bool {
        (self.0)(message)
    }
}

/// Delivers each message to every inner sink; rejects if any of them rejects
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn MessageSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn MessageSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MessageSink for FanOutSink {
    fn on_message(&self, message: &Message) -> bool {
        self.sinks
            .iter()
            .fold(true, |keep_going, sink| sink.on_message(message) && keep_going)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::{MessageIds, TestOutput};

    fn output(text: &str) -> Message {
        Message::TestOutput(TestOutput {
            ids: MessageIds::assembly("asm"),
            output: text.to_string(),
        })
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        assert!(sink.on_message(&output("a")));
        assert!(sink.on_message(&output("b")));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.kinds(), vec!["TestOutput", "TestOutput"]);
    }

    #[test]
    fn test_collecting_sink_stop_when() {
        let sink = CollectingSink::stop_when(
            |m| matches!(m, Message::TestOutput(o) if o.output == "stop"),
        );
        assert!(sink.on_message(&output("go")));
        assert!(!sink.on_message(&output("stop")));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_fan_out_delivers_to_all() {
        let first = Arc::new(CollectingSink::stop_when(|_| true));
        let second = Arc::new(CollectingSink::new());
        let fan_out =
            FanOutSink::new(vec![first.clone(), second.clone()]).with(Arc::new(LoggingSink));

        assert!(!fan_out.on_message(&output("x")));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_fn_sink() {
        let sink = FnSink(|m: &Message| m.kind_name() != "TestOutput");
        assert!(!sink.on_message(&output("x")));
    }
}
