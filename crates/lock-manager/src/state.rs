use engine_primitives::LockMode;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use uuid::Uuid;

/// One queued-or-granted request on a key, in arrival order.
pub(crate) struct Entry {
    pub(crate) tx_id: Uuid,
    pub(crate) mode: LockMode,
    pub(crate) granted: bool,
    pub(crate) waker: Option<oneshot::Sender<()>>,
}

/// Per-key lock state: the FIFO queue of requests, granted or waiting.
pub(crate) struct KeyState {
    pub(crate) entries: VecDeque<Entry>,
}

impl KeyState {
    pub(crate) fn new() -> Self {
        KeyState {
            entries: VecDeque::new(),
        }
    }

    /// Walks the queue front-to-back and grants every entry compatible with
    /// everything ahead of it (granted *or* still-waiting). This is what
    /// gives the per-key queue both FIFO fairness (an entry can never jump
    /// ahead of an earlier incompatible request) and deadlock-freedom
    /// without a detector: a request can only ever wait on requests that
    /// arrived strictly before it.
    pub(crate) fn try_grant(&mut self) {
        let mut ahead: Vec<(Uuid, LockMode)> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter_mut() {
            if entry.granted {
                ahead.push((entry.tx_id, entry.mode));
                continue;
            }
            let compatible = ahead
                .iter()
                .all(|(tx, mode)| *tx == entry.tx_id || entry.mode.compatible_with(*mode));
            if compatible {
                entry.granted = true;
                if let Some(waker) = entry.waker.take() {
                    // Best-effort: if the waiter already dropped its future
                    // (e.g. on cancellation) there is nobody to notify.
                    let _ = waker.send(());
                }
            }
            ahead.push((entry.tx_id, entry.mode));
        }
    }
}
