/// Guard that aborts a spawned task when dropped.
///
/// `tokio::spawn` returns a `JoinHandle` whose `Drop` impl detaches (does NOT
/// abort) the task. This wrapper ensures timers and sweep loops are cancelled
/// when their owner goes away.
pub(crate) struct AbortOnDrop(pub(crate) tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
