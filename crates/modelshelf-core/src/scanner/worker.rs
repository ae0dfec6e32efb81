use super::walk::{walk, ScanTask, WalkResult};
use crate::error::Error;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Messages sent from the walker thread to the orchestrator.
#[derive(Debug)]
pub enum WalkMessage {
    Progress { processed: usize },
    Done(WalkResult),
    Error(String),
}

/// Owns a walker running on its own OS thread. The thread shares nothing with
/// the caller except the cancel flag; everything else arrives as messages.
pub struct WalkerHandle {
    messages: mpsc::UnboundedReceiver<WalkMessage>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WalkerHandle {
    pub fn spawn(task: ScanTask) -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::clone(&task.cancel);

        let thread = thread::Builder::new()
            .name("model-walker".to_string())
            .spawn(move || {
                debug!("Walker started for {}", task.root.display());
                let progress_tx = tx.clone();
                let outcome = walk(&task, |processed| {
                    let _ = progress_tx.send(WalkMessage::Progress { processed });
                });
                let message = match outcome {
                    Ok(result) => WalkMessage::Done(result),
                    Err(e) => WalkMessage::Error(e.to_string()),
                };
                if tx.send(message).is_err() {
                    debug!("Walker result dropped, receiver is gone");
                }
            })?;

        Ok(Self {
            messages: rx,
            cancel,
            thread: Some(thread),
        })
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub async fn recv(&mut self) -> Option<WalkMessage> {
        self.messages.recv().await
    }

    /// Drive the walker to completion, forwarding progress counts, and tear the
    /// thread down once a terminal message arrives.
    pub async fn finish(mut self, mut on_progress: impl FnMut(usize)) -> Result<WalkResult, Error> {
        let outcome = loop {
            match self.messages.recv().await {
                Some(WalkMessage::Progress { processed }) => on_progress(processed),
                Some(WalkMessage::Done(result)) => break Ok(result),
                Some(WalkMessage::Error(message)) => break Err(Error::Worker(message)),
                None => break Err(Error::Worker("walker exited without a result".to_string())),
            }
        };
        self.join();
        outcome
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Walker thread panicked");
            }
        }
    }
}

impl Drop for WalkerHandle {
    fn drop(&mut self) {
        // An abandoned walk stops at its next directory boundary.
        if self.thread.is_some() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_walker_streams_progress_then_done() {
        let tmp = tempdir().unwrap();
        for i in 0..120 {
            fs::write(tmp.path().join(format!("m{i}.stl")), b"solid").unwrap();
        }

        let handle = WalkerHandle::spawn(ScanTask::new(tmp.path(), 1024)).unwrap();
        let mut progress = Vec::new();
        let result = handle.finish(|n| progress.push(n)).await.unwrap();

        assert_eq!(progress, vec![100]);
        assert_eq!(result.files.len(), 120);
        assert_eq!(result.total_examined, 120);
    }

    #[tokio::test]
    async fn test_walker_error_message_for_missing_root() {
        let tmp = tempdir().unwrap();
        let mut handle =
            WalkerHandle::spawn(ScanTask::new(tmp.path().join("nope"), 1024)).unwrap();

        match handle.recv().await {
            Some(WalkMessage::Error(message)) => assert!(message.contains("nope")),
            other => panic!("expected error message, got {:?}", other),
        }
    }
}
