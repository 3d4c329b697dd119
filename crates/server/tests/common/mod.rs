//! Shared test fixtures: scripted stub adapters.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::StreamExt;

use tether_adapter_core::{AdapterError, AgentAdapter, AgentEvent, AgentStream};
use tether_protocol::{SessionOptions, UserContent};

/// One scripted stream item.
pub enum StubItem {
    Event(AgentEvent),
    Fail(String),
}

/// Adapter that replays a scripted sequence of turns. Each `stream` call
/// consumes the next turn; extra calls yield empty streams.
pub struct StubAdapter {
    turns: Mutex<VecDeque<Vec<StubItem>>>,
}

impl StubAdapter {
    pub fn new(turns: Vec<Vec<StubItem>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// A single turn yielding the given events.
    pub fn single_turn(events: Vec<AgentEvent>) -> Self {
        Self::new(vec![events.into_iter().map(StubItem::Event).collect()])
    }
}

impl AgentAdapter for StubAdapter {
    fn name(&self) -> &str {
        "stub"
    }

    fn stream(&self, _prompt: UserContent, _options: SessionOptions) -> AgentStream {
        let items = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        let mapped: Vec<Result<AgentEvent, AdapterError>> = items
            .into_iter()
            .map(|item| match item {
                StubItem::Event(event) => Ok(event),
                StubItem::Fail(message) => Err(AdapterError::ProviderError(message)),
            })
            .collect();
        futures::stream::iter(mapped).boxed()
    }
}

/// Adapter whose stream yields the given events and then pends forever,
/// holding the turn open so tests can abort mid-stream.
pub struct HangingAdapter {
    head: Mutex<Vec<AgentEvent>>,
}

impl HangingAdapter {
    pub fn new(head: Vec<AgentEvent>) -> Self {
        Self {
            head: Mutex::new(head),
        }
    }
}

impl AgentAdapter for HangingAdapter {
    fn name(&self) -> &str {
        "hanging-stub"
    }

    fn stream(&self, _prompt: UserContent, _options: SessionOptions) -> AgentStream {
        let head: Vec<Result<AgentEvent, AdapterError>> =
            std::mem::take(&mut *self.head.lock().unwrap())
                .into_iter()
                .map(Ok)
                .collect();
        futures::stream::iter(head)
            .chain(futures::stream::once(async {
                futures::future::pending::<Result<AgentEvent, AdapterError>>().await
            }))
            .boxed()
    }
}
