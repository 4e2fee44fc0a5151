//! The reverter stack (spec §4.4, §5 "Ordering guarantees": "Storage-
//! recovery reverters run in exact reverse push order"). Every mutating
//! step of the import pass pushes one undo action; on failure the whole
//! stack unwinds, on success it is simply dropped.

type RevertAction = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>;

/// An ordered stack of undo actions. Call [`Reverter::commit`] once every
/// step has succeeded to discard the stack without running it.
#[derive(Default)]
pub struct Reverter {
    actions: Vec<RevertAction>,
    committed: bool,
}

impl Reverter {
    pub fn new() -> Reverter {
        Reverter { actions: Vec::new(), committed: false }
    }

    /// Pushes an undo action onto the stack.
    pub fn push<F, Fut>(&mut self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.actions.push(Box::new(move || Box::pin(action())));
    }

    /// Marks the operation successful: [`Drop`] will not run any actions.
    pub fn commit(mut self) {
        self.committed = true;
        self.actions.clear();
    }

    /// Runs every pushed action in reverse push order, then clears the
    /// stack. Used explicitly (rather than relying only on `Drop`) so
    /// callers can `.await` the unwind before reporting failure.
    pub async fn unwind(&mut self) {
        while let Some(action) = self.actions.pop() {
            action().await;
        }
    }
}

impl Drop for Reverter {
    fn drop(&mut self) {
        if !self.committed && !self.actions.is_empty() {
            tracing::error!(
                pending = self.actions.len(),
                "reverter dropped with pending actions; call unwind() before dropping on the failure path"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn unwind_runs_in_reverse_push_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut reverter = Reverter::new();
        for i in 0..3 {
            let order = order.clone();
            reverter.push(move || async move {
                order.lock().unwrap().push(i);
            });
        }
        reverter.unwind().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn commit_discards_actions() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut reverter = Reverter::new();
        let order2 = order.clone();
        reverter.push(move || async move {
            order2.lock().unwrap().push(0);
        });
        reverter.commit();
        assert!(order.lock().unwrap().is_empty());
    }
}
