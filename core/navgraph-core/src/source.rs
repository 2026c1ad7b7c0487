//! Navigation event sources.
//!
//! The engine pulls events through [`EventSource`]; each host runtime
//! provides one implementation. [`ScriptedSource`] replays a fixed list and
//! is what tests drive the engine with.

use navgraph_protocol::NavEvent;
use std::collections::VecDeque;

pub trait EventSource {
    /// Blocks until the next event is available. `None` ends the stream.
    fn next_event(&mut self) -> Option<NavEvent>;
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    events: VecDeque<NavEvent>,
}

impl ScriptedSource {
    pub fn new(events: impl IntoIterator<Item = NavEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn push(&mut self, event: NavEvent) {
        self.events.push_back(event);
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for ScriptedSource {
    fn next_event(&mut self) -> Option<NavEvent> {
        self.events.pop_front()
    }
}

impl<S: EventSource + ?Sized> EventSource for &mut S {
    fn next_event(&mut self) -> Option<NavEvent> {
        (**self).next_event()
    }
}
