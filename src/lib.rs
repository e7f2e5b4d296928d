pub mod cache;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod harness;
pub mod profiler;
pub mod registry;
pub mod resolve;
pub mod scripts;
pub mod time;

pub use cache::{InvalidationMode, ScheduleCache};
pub use descriptor::{CallbackDescriptor, DescriptorFlags, DescriptorId, OwnerId, DEFAULT_GROUP, EDITOR_GROUP};
pub use error::{ScheduleError, ScheduleResult};
pub use executor::{
    callback_fn, BehaviourScheduler, FrameFailure, FrameReport, ScheduleCommands, UpdateCallback, UpdateContext,
};
pub use registry::DescriptorRegistry;
pub use resolve::ResolvedSchedule;
pub use time::FrameTime;
