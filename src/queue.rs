// Main-thread command queue
// Network tasks hand closures to the single thread that owns the survey state

use tokio::sync::mpsc;

/// A deferred action applied to the state owned by the draining thread
pub type Command<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Producer side of the queue. Cheap to clone, usable from any thread or task.
pub struct CommandSender<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
}

impl<S> Clone for CommandSender<S> {
    fn clone(&self) -> Self {
        CommandSender { tx: self.tx.clone() }
    }
}

impl<S> CommandSender<S> {
    /// Queue an action. Returns false if the consumer is gone.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx.send(Box::new(action)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. Only the owner of the state drains it, so drains never overlap.
pub struct CommandQueue<S> {
    rx: mpsc::UnboundedReceiver<Command<S>>,
}

impl<S> CommandQueue<S> {
    pub fn channel() -> (CommandSender<S>, CommandQueue<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSender { tx }, CommandQueue { rx })
    }

    /// Run every queued action in FIFO order against `state`.
    ///
    /// Actions queued while draining (including by the actions themselves)
    /// run in the same drain.
    ///
    /// # Returns
    /// Number of actions executed
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut n = 0;
        while let Ok(action) = self.rx.try_recv() {
            action(state);
            n += 1;
        }
        n
    }
}
