//! Connectivity monitor.
//!
//! Holds the current online state in a watch channel, together with a
//! generation counter bumped on every change. A subscriber that falls behind
//! can tell from the counter how many changes it missed, so a quick
//! offline/online/offline sequence is never collapsed into silence.

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// A connectivity change as seen by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub online: bool,
}

/// State published on the channel: (online, generation).
type State = (bool, u64);

/// Reports whether the remote store is reachable.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<State>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel((online, 0));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish the current state. Returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|state| {
            if state.0 == online {
                false
            } else {
                *state = (online, state.1 + 1);
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        self.sender.borrow().0
    }

    /// Stream of connectivity states. Yields the current state first, then
    /// every change; never the same state twice in a row. Each call starts
    /// an independent stream, which ends when every monitor clone is dropped.
    pub fn transitions(&self) -> impl Stream<Item = Transition> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        let current = *receiver.borrow_and_update();

        let start = Subscription {
            receiver,
            generation: current.1,
            backlog: Some(current.0),
        };

        stream::unfold(start, |mut sub| async move {
            if let Some(online) = sub.backlog.take() {
                return Some((Transition { online }, sub));
            }

            sub.receiver.changed().await.ok()?;
            let (online, generation) = *sub.receiver.borrow_and_update();
            let missed = generation.saturating_sub(sub.generation);
            sub.generation = generation;

            if missed % 2 == 0 {
                // Back where we were: replay the excursion.
                sub.backlog = Some(online);
                Some((Transition { online: !online }, sub))
            } else {
                Some((Transition { online }, sub))
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

struct Subscription {
    receiver: watch::Receiver<State>,
    generation: u64,
    backlog: Option<bool>,
}
