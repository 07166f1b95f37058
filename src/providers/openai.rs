use super::*;
use async_trait::async_trait;
use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// OpenAI API structures
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<Vec<OpenAIFunction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>, // For function role messages
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCallResponse {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

// Content is null when the model answers with a function call
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    function_call: Option<FunctionCallResponse>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.timeout_secs.unwrap_or(120)
            ))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions",
            self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/'))
    }
}

fn to_chat_message(m: &Message) -> ChatMessage {
    ChatMessage {
        role: match m.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Function => "function",
        }.to_string(),
        content: m.content.clone(),
        function_call: match m.role {
            MessageRole::Assistant => m.function_call.as_ref().map(|fc| FunctionCallResponse {
                name: fc.name.clone(),
                arguments: fc.arguments.clone(),
            }),
            _ => None,
        },
        name: if matches!(m.role, MessageRole::Function) {
            m.function_call.as_ref().map(|fc| fc.name.clone())
        } else {
            None
        },
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_key = self.config.api_key.as_ref()
            .ok_or(ProviderError::MissingApiKey)?;

        let messages: Vec<ChatMessage> = request.messages.iter().map(to_chat_message).collect();

        let functions = request.functions.as_ref().map(|funcs| {
            funcs.iter().map(|f| OpenAIFunction {
                name: f.name.clone(),
                description: f.description.clone(),
                parameters: f.parameters.clone(),
            }).collect()
        });

        let function_call = request.tool_choice.as_ref().map(|tc| match tc {
            ToolChoice::None => serde_json::json!("none"),
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::Function { name } => serde_json::json!({ "name": name }),
        });

        let api_request = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            functions,
            function_call,
        };

        let response = self.client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimit.into());
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!("HTTP {}: {}", status, error_text)).into());
        }

        let api_response: ChatCompletionResponse = response.json().await
            .context("Failed to parse OpenAI response")?;

        let choice = api_response.choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError("No choices in OpenAI response".to_string()))?;

        let function_call = choice.message.function_call.map(|fc| FunctionCall {
            name: fc.name,
            arguments: fc.arguments,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model,
            usage: api_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            function_call,
        })
    }

    async fn validate_config(&self) -> Result<()> {
        if self.config.api_key.is_none() {
            return Err(ProviderError::MissingApiKey.into());
        }
        Ok(())
    }
}
