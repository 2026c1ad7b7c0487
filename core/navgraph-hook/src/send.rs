//! Forwards navigation events read from stdin.
//!
//! Input is one or more JSON event objects, back to back or one per line.
//! Every event is validated locally before anything is sent, so a bad batch
//! is rejected as a whole.

use navgraph_protocol::{parse_event, NavEvent};
use serde_json::Value;
use std::io::{self, Read};

pub fn run() -> Result<usize, String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    let events = parse_input(&input)?;
    if events.is_empty() {
        tracing::debug!("No events on stdin");
        return Ok(0);
    }

    for event in &events {
        crate::daemon_client::send_event(event)?;
        tracing::debug!(kind = event.kind(), tab_id = ?event.tab_id(), "Event forwarded");
    }
    Ok(events.len())
}

fn parse_input(input: &str) -> Result<Vec<NavEvent>, String> {
    serde_json::Deserializer::from_str(input)
        .into_iter::<Value>()
        .enumerate()
        .map(|(index, value)| {
            let value =
                value.map_err(|e| format!("Event {} is not valid JSON: {}", index + 1, e))?;
            parse_event(value)
                .map_err(|err| format!("Event {} rejected ({}): {}", index + 1, err.code, err.message))
        })
        .collect()
}
