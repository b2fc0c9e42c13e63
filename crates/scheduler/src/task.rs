use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;

/// Arguments a task was bound with, reported by `TaskScheduler::get_tasks`.
pub type TaskArgs = BTreeMap<String, String>;

/// A zero-argument unit of work run on every firing of a scheduled job.
///
/// `run` has nowhere to return an error to: implementations log their own
/// failures. A task may run on several workers at once if it is registered
/// under more than one name, so it must be safe for concurrent use.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    async fn run(&self);

    /// The bound arguments, for introspection only.
    fn args(&self) -> TaskArgs {
        TaskArgs::new()
    }
}

/// Adapts an async closure into a `Task`.
pub struct FnTask<F> {
    f: F,
    args: TaskArgs,
}

pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnTask {
        f,
        args: TaskArgs::new(),
    }
}

impl<F> FnTask<F> {
    pub fn with_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self) {
        (self.f)().await
    }

    fn args(&self) -> TaskArgs {
        self.args.clone()
    }
}
