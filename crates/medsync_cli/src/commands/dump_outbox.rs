//! Dump-outbox command implementation.

use medsync_protocol::ChangeEvent;
use medsync_replication::Outbox;
use std::path::Path;

/// Dumps events awaiting relay, oldest first.
pub fn run(path: &Path, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let outbox = Outbox::open(path)?;
    let pending = outbox.pending();
    let shown = limit.unwrap_or(pending.len()).min(pending.len());

    println!("{} events awaiting relay", pending.len());
    for (seq, payload) in pending.iter().take(shown) {
        match ChangeEvent::decode(payload) {
            Ok(event) => println!(
                "{:>6}  {:<9} id={:<6} origin={} event_id={}",
                seq,
                event.action.to_string(),
                event.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                event.origin,
                event.event_id
            ),
            Err(e) => println!("{seq:>6}  <undecodable: {e}>"),
        }
    }
    if shown < pending.len() {
        println!("... and {} more", pending.len() - shown);
    }
    Ok(())
}
