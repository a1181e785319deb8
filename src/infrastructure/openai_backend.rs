//! OpenAI 兼容后端 - 基础设施层
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao, DeepSeek 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::BackendError;
use crate::infrastructure::backend::Backend;

/// OpenAI 兼容后端
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model_name: String,
    system_message: Option<String>,
}

impl OpenAiBackend {
    /// 创建新的后端
    pub fn new(config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&config.api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.model_name.clone(),
            system_message: config.system_message.clone(),
        }
    }

    fn request_error(&self, message: impl ToString) -> BackendError {
        BackendError::Request {
            model: self.model_name.clone(),
            message: message.to_string(),
        }
    }

    /// 把 API 错误归类为限流或普通请求失败
    fn classify_error(&self, message: String) -> BackendError {
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            BackendError::RateLimited {
                model: self.model_name.clone(),
            }
        } else {
            self.request_error(message)
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn call(&self, prompt: &str) -> Result<String, BackendError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", prompt.chars().count());

        let mut messages = Vec::new();

        if let Some(sys_msg) = &self.system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()
                .map_err(|e| self.request_error(e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| self.request_error(e))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .build()
            .map_err(|e| self.request_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.classify_error(e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let choice = response
            .choices
            .first()
            .ok_or_else(|| BackendError::EmptyResponse {
                model: self.model_name.clone(),
            })?;

        // 内容为空交给质量检查判定为 empty
        Ok(choice
            .message
            .content
            .clone()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
