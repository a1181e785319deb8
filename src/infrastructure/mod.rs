//! 基础设施层
//!
//! 持有与外部后端交互的能力，只暴露"发送一次请求"的接口，
//! 不包含任何重试或质量判断逻辑。

pub mod backend;
pub mod openai_backend;

pub use backend::Backend;
pub use openai_backend::OpenAiBackend;
