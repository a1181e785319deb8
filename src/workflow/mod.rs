pub mod item_ctx;
pub mod item_flow;

pub use item_ctx::{ItemCtx, ItemState};
pub use item_flow::{ItemFlow, SkipPredicate};
