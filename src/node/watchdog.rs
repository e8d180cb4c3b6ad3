// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The node's timeout set: one pending timer per [`TimeoutKind`], delivered
//! back into the event queue. Arming a kind replaces any pending timer of
//! the same kind; cancelling is by kind.

use crate::node::core::Event;
use crate::node::fsm::TimeoutKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct Watchdog {
    event_tx: mpsc::UnboundedSender<Event>,
    pending: HashMap<TimeoutKind, JoinHandle<()>>,
}

impl Watchdog {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            event_tx,
            pending: HashMap::new(),
        }
    }

    /// Arms a timeout of the given kind; an already pending timer of that
    /// kind is replaced.
    pub(crate) fn arm(&mut self, kind: TimeoutKind, duration: Duration) {
        self.cancel(kind);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = event_tx.send(Event::Timeout(kind));
        });
        let _ = self.pending.insert(kind, handle);
    }

    /// Cancels the pending timeout of the given kind, if any.
    pub(crate) fn cancel(&mut self, kind: TimeoutKind) {
        if let Some(handle) = self.pending.remove(&kind) {
            handle.abort();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn armed_timeouts_fire_into_the_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new(tx);
        watchdog.arm(TimeoutKind::JoinRetry, Duration::from_millis(5));

        match rx.recv().await {
            Some(Event::Timeout(TimeoutKind::JoinRetry)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_timeouts_do_not_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new(tx);
        watchdog.arm(TimeoutKind::JoinRetry, Duration::from_millis(10));
        watchdog.cancel(TimeoutKind::JoinRetry);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rearming_replaces_the_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new(tx);
        watchdog.arm(TimeoutKind::BootstrapResponse, Duration::from_millis(5));
        watchdog.arm(TimeoutKind::BootstrapResponse, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
