// Job Control Signals
// Suspend / cancel / rollback requests, observed by the runner at step boundaries

use tokio::sync::watch;

/// Pending requests for one job. Flags are sticky until the runner acts on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlRequest {
    pub suspend: bool,
    pub cancel: bool,
    pub rollback: bool,
}

/// Requesting side, owned by the job handle
pub(crate) struct ControlSender {
    tx: watch::Sender<ControlRequest>,
}

impl ControlSender {
    /// Apply `f` to the pending requests; receivers are woken only on change
    pub(crate) fn update(&self, f: impl FnOnce(&mut ControlRequest)) {
        self.tx.send_if_modified(|request| {
            let before = *request;
            f(request);
            before != *request
        });
    }

    pub(crate) fn current(&self) -> ControlRequest {
        *self.tx.borrow()
    }

    pub(crate) fn token(&self) -> ControlToken {
        ControlToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing side, held by the runner
pub(crate) struct ControlToken {
    rx: watch::Receiver<ControlRequest>,
}

impl ControlToken {
    pub(crate) fn current(&mut self) -> ControlRequest {
        *self.rx.borrow_and_update()
    }

    /// Wait until a request changes
    pub(crate) async fn changed(&mut self) {
        // The sender lives as long as the job, which outlives its runner
        let _ = self.rx.changed().await;
    }
}

/// Create a control channel with no pending request
pub(crate) fn control_channel() -> ControlSender {
    let (tx, _rx) = watch::channel(ControlRequest::default());
    ControlSender { tx }
}
