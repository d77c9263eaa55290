use crate::events::Timeline;
use crate::timing::{self, CancellationToken, Hardware, RunOutcome, SchedulerSettings};
use crossbeam::channel::{Receiver, TryRecvError};
use tracing::{info, warn};

/// Session-side handle of one timeline executing on its own thread.
///
/// Owns the run's cancellation token; nothing else can stop this run.
pub struct RunHandle {
    cancel: CancellationToken,
    outcome_rx: Receiver<RunOutcome>,
    outcome: Option<RunOutcome>,
    exited: bool,
}

pub fn spawn_run(
    timeline: Timeline,
    hardware: Hardware,
    settings: SchedulerSettings,
) -> std::io::Result<RunHandle> {
    let cancel = CancellationToken::new();
    let (outcome_tx, outcome_rx) = crossbeam::channel::bounded(1);

    let token = cancel.clone();
    std::thread::Builder::new()
        .name("timeline".into())
        .spawn(move || {
            let outcome = timing::run(&timeline, &hardware, &token, &settings);
            let _ = outcome_tx.send(outcome);
        })?;

    Ok(RunHandle {
        cancel,
        outcome_rx,
        outcome: None,
        exited: false,
    })
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Non-blocking check whether the scheduler thread is done.
    pub fn is_finished(&mut self) -> bool {
        if self.outcome.is_some() || self.exited {
            return true;
        }
        match self.outcome_rx.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                warn!("timeline thread exited without reporting an outcome");
                self.exited = true;
                true
            }
        }
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    /// Blocks until the run ends. `None` if the thread died before reporting.
    pub fn wait(mut self) -> Option<RunOutcome> {
        if self.outcome.is_none() && !self.exited {
            self.outcome = self.outcome_rx.recv().ok();
        }
        if let Some(outcome) = self.outcome {
            info!(?outcome, "timeline finished");
        }
        self.outcome
    }
}
