use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

/// A spawned probe activity and the stop flag it polls.
#[derive(Debug)]
pub struct TaskHandle<T> {
    pub handle: JoinHandle<T>,
    pub stop_flag: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    /// Asks the task to stop at its next checkpoint.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<T, JoinError> {
        self.handle.await
    }

    /// Stops the task and waits for it to wind down.
    pub async fn stop_and_join(self) -> Result<T, JoinError> {
        self.stop();
        self.join().await
    }
}

/// Raises the stop flag when dropped, so an abandoned handle does not leave
/// its task running.
#[derive(Debug)]
pub(crate) struct StopOnDrop(pub(crate) Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
