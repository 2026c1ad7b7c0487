//! Single-writer event worker and the periodic sweeper.
//!
//! Connection threads never touch the engine's write path. They validate an
//! event and push it onto an `mpsc` channel; one worker thread drains the
//! channel through the engine, which serializes every tab's events.

use chrono::Utc;
use navgraph_core::{EventSource, NavGraphEngine, Storage};
use navgraph_protocol::NavEvent;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Event source fed by the socket listener.
pub struct ChannelSource {
    receiver: Receiver<NavEvent>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<NavEvent>) -> Self {
        Self { receiver }
    }
}

impl EventSource for ChannelSource {
    fn next_event(&mut self) -> Option<NavEvent> {
        // Ends once every sender is dropped.
        self.receiver.recv().ok()
    }
}

pub fn event_channel() -> (Sender<NavEvent>, ChannelSource) {
    let (sender, receiver) = mpsc::channel();
    (sender, ChannelSource::new(receiver))
}

pub fn spawn_worker<S>(engine: Arc<NavGraphEngine<S>>, mut source: ChannelSource) -> JoinHandle<()>
where
    S: Storage + 'static,
{
    thread::spawn(move || {
        let handled = engine.run(&mut source);
        info!(handled, "Event worker stopped");
    })
}

pub fn spawn_sweeper<S>(engine: Arc<NavGraphEngine<S>>, interval: Duration)
where
    S: Storage + 'static,
{
    thread::spawn(move || loop {
        thread::sleep(interval);
        let report = engine.sweep(Utc::now());
        debug!(removed = report.total(), "Periodic sweep finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use navgraph_core::{node_id, EngineConfig, MemoryStore};
    use navgraph_protocol::NavigationDetails;

    #[test]
    fn worker_drains_channel_until_senders_drop() {
        let engine = Arc::new(NavGraphEngine::new(
            MemoryStore::new(),
            EngineConfig::default(),
        ));
        let (sender, source) = event_channel();
        let handle = spawn_worker(Arc::clone(&engine), source);

        let timestamp = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();
        sender
            .send(NavEvent::NavigationCommitted(NavigationDetails {
                tab_id: 4,
                url: "https://a.example".to_string(),
                frame_id: 0,
                parent_frame_id: -1,
                timestamp,
                transition_kind: Some("typed".to_string()),
                transition_qualifiers: Vec::new(),
            }))
            .expect("send event");
        drop(sender);
        handle.join().expect("worker joins");

        assert!(engine
            .storage()
            .get_record(&node_id(4, "https://a.example"))
            .expect("get")
            .is_some());
    }
}
