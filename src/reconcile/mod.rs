pub mod merge;

pub use merge::{merge, BaselineReconciler, BaselineState};
