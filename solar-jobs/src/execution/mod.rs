pub mod batch;

pub use batch::{
    plan_windows, Batch, BatchExecutor, BatchHandler, BatchPolicy, BatchWindow, PlannedBatch, RangeConfig,
    WorkPlan,
};
