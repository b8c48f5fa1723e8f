use std::sync::Arc;

use feedr_keystore::Keystore;
use parking_lot::Mutex;

use crate::bus::{Bus, Link, RequestHandler};
use crate::producer::Producer;
use crate::protocol::{Request, Response, StopReason};

/// Controller-side service: hosts the producer and the keystore for every attached worker.
///
/// Each worker connection gets its own bus and reader task. Requests on one connection are
/// processed to completion in arrival order; connections are served in parallel and only meet
/// at the per-source locks inside the producer and at the keystore lock.
#[derive(Debug)]
pub struct Controller {
    service: Arc<Service>,
    peers: Mutex<Vec<Bus>>,
}

#[derive(Debug)]
struct Service {
    producer: Arc<Producer>,
    keystore: Arc<Keystore>,
}

impl RequestHandler for Service {
    fn handle(&self, peer: &str, request: Request) -> Response {
        match request {
            Request::Data(req) => Response::Data(self.producer.serve(&req)),
            Request::Keystore(op) => match self.keystore.apply(&op) {
                Ok(result) => Response::Keystore(result),
                Err(err) => {
                    tracing::debug!(peer, key = op.key(), "keystore operation failed: {err}");
                    Response::Failure {
                        reason: err.to_string(),
                    }
                }
            },
        }
    }
}

impl Controller {
    pub fn new(producer: Arc<Producer>, keystore: Arc<Keystore>) -> Self {
        Self {
            service: Arc::new(Service { producer, keystore }),
            peers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn producer(&self) -> &Arc<Producer> {
        &self.service.producer
    }

    #[must_use]
    pub fn keystore(&self) -> &Arc<Keystore> {
        &self.service.keystore
    }

    /// Starts serving one worker connection.
    pub fn attach(&self, peer: impl Into<Arc<str>>, link: Link) -> Bus {
        let peer = peer.into();
        tracing::info!(peer = %peer, "worker attached");
        let bus = Bus::spawn(peer, link, Some(self.service.clone() as Arc<dyn RequestHandler>));
        self.live_peers().push(bus.clone());
        bus
    }

    /// Drops handles of disconnected workers before handing out the list.
    fn live_peers(&self) -> parking_lot::MutexGuard<'_, Vec<Bus>> {
        let mut peers = self.peers.lock();
        peers.retain(|b| !b.is_closed());
        peers
    }

    /// Number of attached workers still connected.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.live_peers().len()
    }

    /// Broadcasts a stop notification; returns how many workers were reached.
    pub fn stop(&self, reason: StopReason) -> usize {
        let peers = self.live_peers().clone();
        let mut reached = 0;
        for bus in peers {
            match bus.notify_stop(reason.clone()) {
                Ok(()) => reached += 1,
                Err(err) => tracing::debug!(peer = %bus.peer(), "stop not delivered: {err}"),
            }
        }
        tracing::info!(%reason, reached, "stop broadcast");
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::link_pair;
    use crate::protocol::{CorrelationId, Frame};
    use feedr_keystore::KeystoreOp;
    use feedr_value::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn keystore_failures_become_failure_responses() {
        let controller = Controller::new(Arc::new(Producer::default()), Arc::new(Keystore::default()));
        controller.keystore().set("scalar", Value::I64(1));

        let (worker_end, controller_end) = link_pair();
        let _bus = controller.attach("w1", controller_end);
        let worker = Bus::spawn("controller", worker_end, None);

        let resp = worker
            .call(
                Request::Keystore(KeystoreOp::Push {
                    key: "scalar".to_string(),
                    value: Value::I64(2),
                }),
                Duration::from_secs(1),
            )
            .await;
        match resp {
            Ok(Response::Failure { reason }) => assert!(reason.contains("not a list")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnected_workers_are_pruned() {
        let controller = Controller::new(Arc::new(Producer::default()), Arc::new(Keystore::default()));

        let (gone, first_end) = link_pair();
        let (_alive, second_end) = link_pair();
        controller.attach("w1", first_end);
        controller.attach("w2", second_end);
        assert_eq!(controller.connected(), 2);

        drop(gone);
        match tokio::time::timeout(Duration::from_secs(1), async {
            while controller.connected() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        {
            Ok(()) => {}
            Err(_) => panic!("disconnect of w1 not observed"),
        }

        assert_eq!(controller.peers.lock().len(), 1);
        assert_eq!(controller.stop(StopReason::Completed), 1);
    }

    #[tokio::test]
    async fn stop_reaches_connected_workers() {
        let controller = Controller::new(Arc::new(Producer::default()), Arc::new(Keystore::default()));

        let (mut raw_worker, controller_end) = link_pair();
        controller.attach("w1", controller_end);
        assert_eq!(controller.connected(), 1);

        assert_eq!(controller.stop(StopReason::Completed), 1);
        match tokio::time::timeout(Duration::from_secs(1), raw_worker.recv_raw()).await {
            Ok(Some(Frame::Stop { reason })) => assert_eq!(reason, StopReason::Completed),
            other => panic!("expected stop frame, got {other:?}"),
        }

        // A response nobody asked for is discarded by the controller without side effects.
        assert!(raw_worker.send_raw(Frame::Response {
            id: CorrelationId::new(99),
            response: Response::Failure {
                reason: "bogus".to_string()
            },
        }));
    }
}
