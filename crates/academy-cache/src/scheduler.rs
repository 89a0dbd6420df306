//! Periodic cache maintenance
//!
//! Two independent loops: one expires the cache, one rotates the key. Both
//! go through the store, so they serialize with caller reads and writes on
//! the key lock. Each run happens on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::store::CacheStore;

pub struct Scheduler;

impl Scheduler {
    /// Start both maintenance loops on the current tokio runtime.
    ///
    /// The first run of each happens one full period after this call.
    pub fn spawn(
        store: Arc<CacheStore>,
        expiry_every: Duration,
        rotate_every: Duration,
    ) -> SchedulerHandle {
        let (shutdown, stop) = watch::channel(false);

        let expiry = {
            let store = store.clone();
            spawn_loop("expiry", expiry_every, stop.clone(), move || {
                if let Err(e) = store.expire_cache() {
                    error!(error = %e, "scheduled cache expiry failed");
                }
            })
        };

        let rotation = spawn_loop("rotation", rotate_every, stop, move || {
            if let Err(e) = store.rotate_keys() {
                error!(error = %e, "scheduled key rotation failed");
            }
        });

        SchedulerHandle {
            shutdown,
            tasks: vec![expiry, rotation],
        }
    }
}

fn spawn_loop<F>(
    name: &'static str,
    every: Duration,
    mut stop: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(task = name, "maintenance tick");
                    // File I/O and the key lock stay off the async workers.
                    let job = job.clone();
                    if let Err(e) = task::spawn_blocking(move || job()).await {
                        error!(task = name, error = %e, "maintenance job panicked");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!(task = name, "maintenance loop stopped");
                        break;
                    }
                }
            }
        }
    })
}

/// Handle to the running loops. Dropping it also stops them.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both loops and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "maintenance task panicked");
            }
        }
    }
}
