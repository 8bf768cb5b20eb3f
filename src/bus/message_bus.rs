//! Message bus
//!
//! Ordered delivery of lifecycle messages to a sink, either directly on the
//! producer's task or through a background dispatcher.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::message::Message;
use super::sink::MessageSink;

/// Delivers messages in producer order; remembers whether any sink asked to stop
pub struct MessageBus {
    sink: Arc<dyn MessageSink>,
    continue_running: Arc<AtomicBool>,
    delivery: Delivery,
}

enum Delivery {
    Synchronous,
    Asynchronous {
        sender: Mutex<Option<UnboundedSender<Message>>>,
        dispatcher: Mutex<Option<JoinHandle<()>>>,
    },
}

impl MessageBus {
    /// Deliver on the calling task
    pub fn synchronous(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            continue_running: Arc::new(AtomicBool::new(true)),
            delivery: Delivery::Synchronous,
        }
    }

    /// Deliver from a background task. Must be called within a tokio runtime.
    pub fn asynchronous(sink: Arc<dyn MessageSink>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let continue_running = Arc::new(AtomicBool::new(true));

        let dispatcher = {
            let sink = Arc::clone(&sink);
            let continue_running = Arc::clone(&continue_running);
            tokio::spawn(async move {
                while let Some(message) = receiver.recv().await {
                    if !dispatch(sink.as_ref(), &message) {
                        continue_running.store(false, Ordering::SeqCst);
                    }
                }
                debug!("Message dispatcher drained");
            })
        };

        Self {
            sink,
            continue_running,
            delivery: Delivery::Asynchronous {
                sender: Mutex::new(Some(sender)),
                dispatcher: Mutex::new(Some(dispatcher)),
            },
        }
    }

    /// Queue a message for delivery.
    ///
    /// Returns false once any sink has rejected a message. With asynchronous
    /// delivery the rejection is observed on a later call.
    pub fn queue_message(&self, message: Message) -> bool {
        match &self.delivery {
            Delivery::Synchronous => {
                if !dispatch(self.sink.as_ref(), &message) {
                    self.continue_running.store(false, Ordering::SeqCst);
                }
            }
            Delivery::Asynchronous { sender, .. } => {
                let sender = sender.lock().unwrap_or_else(|e| e.into_inner());
                let sent = sender
                    .as_ref()
                    .map(|tx| tx.send(message).is_ok())
                    .unwrap_or(false);
                if !sent {
                    warn!("Message queued after the bus was shut down");
                    return false;
                }
            }
        }
        self.continue_running.load(Ordering::SeqCst)
    }

    /// Whether no sink has asked to stop so far
    pub fn continue_running(&self) -> bool {
        self.continue_running.load(Ordering::SeqCst)
    }

    /// Stop accepting messages and wait until everything queued is delivered
    pub async fn shutdown(&self) {
        let Delivery::Asynchronous { sender, dispatcher } = &self.delivery else {
            return;
        };

        drop(sender.lock().unwrap_or_else(|e| e.into_inner()).take());
        let handle = dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Message dispatcher failed: {}", err);
            }
        }
    }
}

/// Hand one message to the sink; a panicking sink counts as a rejection
fn dispatch(sink: &dyn MessageSink, message: &Message) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.on_message(message))) {
        Ok(keep_going) => keep_going,
        Err(_) => {
            error!("Message sink panicked handling {}", message.kind_name());
            false
        }
    }
}
