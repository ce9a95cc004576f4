//! Relay of a turn's stream events to a consumer.
//!
//! Fragments are handed on in arrival order. The relay ends at the first
//! terminal event: `Stop` completes it; `Error`, or the channel closing
//! without `Stop`, fails it. Fragments already handed on stay delivered.

use tokio::sync::mpsc;

use super::provider::StreamEvent;
use super::AgentError;

/// One step of a relayed stream.
#[derive(Debug)]
pub enum RelayItem {
    Fragment(String),
    Done,
    Failed(AgentError),
}

/// Consumer side of an invocation's event channel.
#[derive(Debug)]
pub struct Relay {
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl Relay {
    pub fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Next item, or `None` once a terminal item has been returned.
    pub async fn next(&mut self) -> Option<RelayItem> {
        if self.finished {
            return None;
        }
        let item = match self.rx.recv().await {
            Some(StreamEvent::TextDelta { text }) => return Some(RelayItem::Fragment(text)),
            Some(StreamEvent::Stop { .. }) => RelayItem::Done,
            Some(StreamEvent::Error { message }) => {
                RelayItem::Failed(AgentError::Invocation(message))
            }
            None => RelayItem::Failed(AgentError::Invocation(
                "stream closed before completion".to_string(),
            )),
        };
        self.finished = true;
        self.rx.close();
        Some(item)
    }

    /// Call `on_fragment` for each fragment as it arrives and return the
    /// full text once the stream completes.
    pub async fn for_each_fragment<F>(mut self, mut on_fragment: F) -> Result<String, AgentError>
    where
        F: FnMut(&str),
    {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item {
                RelayItem::Fragment(fragment) => {
                    on_fragment(&fragment);
                    text.push_str(&fragment);
                }
                RelayItem::Done => return Ok(text),
                RelayItem::Failed(e) => return Err(e),
            }
        }
        Err(AgentError::Invocation("relay already finished".to_string()))
    }

    /// Buffer the whole reply.
    pub async fn collect(self) -> Result<String, AgentError> {
        self.for_each_fragment(|_| {}).await
    }
}

/// Buffer the whole reply from an event channel.
pub async fn collect_response(rx: mpsc::Receiver<StreamEvent>) -> Result<String, AgentError> {
    Relay::new(rx).collect().await
}
