use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::client::AttachClient;
use crate::proto::Status;
use crate::Error;

use super::shell::SharedScreen;
use super::view::{View, ViewOutcome};

/// The one attach session is shared by every poller; the protocol allows a
/// single peer, so calls serialize on this lock for exactly one round trip.
pub type SharedClient = Arc<tokio::sync::Mutex<AttachClient>>;

/// Views are shared between their poller (data hooks) and the shell
/// (key routing). Held only for short, non-blocking hook calls.
pub type SharedView = Arc<Mutex<Box<dyn View>>>;

/// Background worker of one view: fetch, transform, publish under the
/// render lock. One task per view, cancellation flag checked each tick,
/// joined on shutdown.
pub struct Poller {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn(
        view: SharedView,
        client: SharedClient,
        screen: SharedScreen,
        slot: usize,
        interval: Duration,
    ) -> Poller {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = tokio::spawn(async move {
            run(view, client, screen, slot, interval, flag).await;
        });
        Poller { cancel, handle }
    }

    /// Signal the worker and wait for it to finish its current iteration.
    pub async fn stop(self) {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    view: SharedView,
    client: SharedClient,
    screen: SharedScreen,
    slot: usize,
    interval: Duration,
    cancel: Arc<AtomicBool>,
) {
    view.lock().unwrap().on_start();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let (command, data) = view.lock().unwrap().command();
        let called = {
            // Network round trip happens outside the render lock.
            let mut client = client.lock().await;
            client.call(&command, data).await
        };

        let fetched = match called {
            Ok(response) => match response.status {
                Status::Ok => Ok(response.payload),
                Status::Failed => Err(Error::CommandFailed(command.clone())),
                Status::NotFound => Err(Error::CommandNotFound(command.clone())),
            },
            // A malformed response aborts this call only; the view judges it.
            Err(e @ Error::Protocol(_)) => Err(e),
            Err(e) => {
                // Transport-level failure: stop the poller and freeze the
                // pane. The shell stays up.
                tracing::warn!(view = %command, error = %e, "poller lost the target");
                screen.mark_inactive(slot);
                break;
            }
        };

        let outcome = view.lock().unwrap().process(fetched);
        match outcome {
            ViewOutcome::Rows(table) => screen.publish_rows(slot, table),
            ViewOutcome::Stop => {
                tracing::info!(view = %command, "view requested stop");
                screen.mark_inactive(slot);
                break;
            }
        }
    }

    view.lock().unwrap().on_stop();
}
