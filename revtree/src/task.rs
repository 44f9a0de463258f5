pub type TaskResult<R> = std::thread::Result<R>;

/// A set of tasks running on a [`threadpool::ThreadPool`] whose outcomes are collected together.
///
/// A task which panics does not take the caller down: its panic payload is handed back by
/// [`TaskGroup::join`].
pub struct TaskGroup<R> {
    tx: crossbeam_channel::Sender<(usize, TaskResult<R>)>,
    rx: crossbeam_channel::Receiver<(usize, TaskResult<R>)>,
    pending: usize,
}

impl<R: Send + 'static> TaskGroup<R> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx, pending: 0 }
    }

    /// Spawn the given task within the given ThreadPool.
    pub fn spawn<F>(&mut self, thread_pool: &threadpool::ThreadPool, task: F)
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let tx = self.tx.clone();
        let index = self.pending;
        thread_pool.execute(move || {
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            let _ = tx.send((index, res));
        });
        self.pending += 1;
    }

    /// Blocks until every spawned task completed and returns their results in spawn order.
    pub fn join(self) -> Vec<TaskResult<R>> {
        let mut results: Vec<Option<TaskResult<R>>> = (0..self.pending).map(|_| None).collect();
        for _ in 0..self.pending {
            // UNWRAP: `self` holds a sender, so the channel can't disconnect.
            let (index, res) = self.rx.recv().unwrap();
            results[index] = Some(res);
        }
        results.into_iter().flatten().collect()
    }
}

impl<R: Send + 'static> Default for TaskGroup<R> {
    fn default() -> Self {
        Self::new()
    }
}
