use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::routes::ExecutionJob;

/// FIFO hand-off between the HTTP handlers and the execution workers
pub struct JobQueue {
    queue: Mutex<VecDeque<ExecutionJob>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, job: ExecutionJob) {
        self.queue.lock().await.push_back(job);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> ExecutionJob {
        loop {
            if let Some(job) = self.queue.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }
}
