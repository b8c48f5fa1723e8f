use tokio::sync::mpsc;

use crate::protocol::Frame;

/// One end of a raw duplex frame channel.
///
/// The transport owner bridges this to whatever actually connects controller and workers; for
/// in-process runs and tests, [`link_pair`] connects two ends directly. Dropping the outbound
/// half is how an end signals disconnect.
#[derive(Debug)]
pub struct Link {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Link {
    pub fn new(tx: mpsc::UnboundedSender<Frame>, rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self { tx, rx }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Frame>,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        (self.tx, self.rx)
    }

    /// Sends a frame bypassing any bus. Used to inject traffic in tests.
    pub fn send_raw(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub async fn recv_raw(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// Two connected in-memory ends.
pub fn link_pair() -> (Link, Link) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (Link::new(a_tx, a_rx), Link::new(b_tx, b_rx))
}
