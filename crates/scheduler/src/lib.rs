pub mod interval;
pub mod scheduler;
pub mod task;

pub use interval::{Interval, IntervalUnit};
pub use scheduler::{SchedulerConfig, TaskInfo, TaskScheduler};
pub use task::{task_fn, FnTask, Task, TaskArgs};
