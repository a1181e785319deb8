//! 后端接口 - 基础设施层

use crate::error::BackendError;
use async_trait::async_trait;
use std::sync::Arc;

/// 文本生成 / 打分后端
///
/// 职责：
/// - 发送一次请求并返回原始响应
/// - 不做重试
/// - 不做质量检查
/// - 不认识检查点
#[async_trait]
pub trait Backend: Send + Sync {
    /// 后端名称（通常是模型名），会作为答案的子标识写入记录
    fn name(&self) -> &str;

    /// 调用一次后端
    async fn call(&self, prompt: &str) -> Result<String, BackendError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn call(&self, prompt: &str) -> Result<String, BackendError> {
        (**self).call(prompt).await
    }
}
