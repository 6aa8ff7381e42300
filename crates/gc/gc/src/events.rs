use crate::service::GcHandle;
use std::ops::ControlFlow;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::debug;
use trie_gc_types::TopChanged;

/// Bridges the node's event streams into the collector mailbox.
///
/// Subscribes to chain-sync completion and top-changed broadcasts. The sync
/// subscription is dropped after the first notification; top-changed
/// notifications are forwarded for the life of the stream. The task ends
/// when the top-changed stream closes.
pub fn spawn_event_bridge(
    mut chain_synced: broadcast::Receiver<()>,
    mut top_changed: broadcast::Receiver<TopChanged>,
    handle: GcHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // keep forwarding tops while waiting for the one-shot sync signal
        loop {
            tokio::select! {
                res = chain_synced.recv() => {
                    match res {
                        // a lagged receiver still means the signal fired
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            handle.chain_synced();
                        }
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                    break
                }
                res = top_changed.recv() => {
                    if forward(&handle, res).is_break() {
                        return
                    }
                }
            }
        }
        drop(chain_synced);

        loop {
            if forward(&handle, top_changed.recv().await).is_break() {
                return
            }
        }
    })
}

fn forward(
    handle: &GcHandle,
    res: Result<TopChanged, broadcast::error::RecvError>,
) -> ControlFlow<()> {
    match res {
        Ok(top) => {
            handle.top_changed(top);
            ControlFlow::Continue(())
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            // the next recv yields the newest retained notification and the
            // controller re-derives the gap from its last height
            debug!(target: "gc", skipped, "Top-changed stream lagged");
            ControlFlow::Continue(())
        }
        Err(broadcast::error::RecvError::Closed) => ControlFlow::Break(()),
    }
}
