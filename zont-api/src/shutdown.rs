use tokio::sync::watch;

/// Resolves once the stop flag is raised; never resolves if the sender is gone.
pub(crate) async fn stop_requested(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
