//! Dedicated owner thread for the stress controller
//!
//! Worker processes are tied to the lifetime of the thread that spawned
//! them, so the controller lives on one long-lived thread and async callers
//! talk to it through a cloneable handle.

use super::{StopReport, StressLoadController, StressState};
use crate::error::{SchedError, SchedResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressStatus {
    pub state: StressState,
    pub workers: usize,
    pub pids: Vec<u32>,
}

impl StressStatus {
    fn of(controller: &StressLoadController) -> Self {
        Self {
            state: controller.state(),
            workers: controller.live_workers(),
            pids: controller.worker_pids(),
        }
    }
}

enum Request {
    Start(oneshot::Sender<SchedResult<StressStatus>>),
    Stop(oneshot::Sender<StopReport>),
    Status(oneshot::Sender<StressStatus>),
}

#[derive(Clone)]
pub struct StressHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl StressHandle {
    /// Move the controller onto its own thread.
    /// The thread stops all workers and exits once every handle is dropped.
    pub fn spawn(controller: StressLoadController) -> SchedResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("stress-controller".to_string())
            .spawn(move || serve(controller, rx))
            .map_err(|e| SchedError::Stress(format!("failed to start controller thread: {}", e)))?;
        Ok(Self { tx })
    }

    pub async fn start(&self) -> SchedResult<StressStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Start(reply))?;
        rx.await.map_err(|_| gone())?
    }

    pub async fn stop(&self) -> SchedResult<StopReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Stop(reply))?;
        rx.await.map_err(|_| gone())
    }

    pub async fn status(&self) -> SchedResult<StressStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Status(reply))?;
        rx.await.map_err(|_| gone())
    }

    fn send(&self, request: Request) -> SchedResult<()> {
        self.tx.send(request).map_err(|_| gone())
    }
}

fn gone() -> SchedError {
    SchedError::Stress("controller thread has exited".to_string())
}

fn serve(mut controller: StressLoadController, mut rx: mpsc::UnboundedReceiver<Request>) {
    while let Some(request) = rx.blocking_recv() {
        // A dropped reply receiver means the caller went away; the work is still done
        match request {
            Request::Start(reply) => {
                let result = controller.start().map(|_| StressStatus::of(&controller));
                let _ = reply.send(result);
            }
            Request::Stop(reply) => {
                let _ = reply.send(controller.stop());
            }
            Request::Status(reply) => {
                let _ = reply.send(StressStatus::of(&controller));
            }
        }
    }

    let report = controller.stop();
    info!(
        stopped = report.total(),
        "All stress handles dropped, controller thread exiting"
    );
}
