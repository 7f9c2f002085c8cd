use tokio::task::JoinHandle;

/// Keeps a listener alive. Cancelling or dropping it stops the listener task
/// and deregisters the underlying store subscription.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stops the listener.
    pub fn cancel(self) {
        drop(self);
    }

    /// False once the listener stopped, either cancelled or because the store
    /// closed the subscription.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
