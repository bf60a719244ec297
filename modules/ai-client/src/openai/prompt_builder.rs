use std::time::Duration;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::PromptBuilder;

use super::types::*;
use super::OpenAi;

pub struct OpenAiPromptBuilder {
    agent: OpenAi,
    input: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
    json_object: bool,
}

impl OpenAiPromptBuilder {
    pub(crate) fn new(agent: OpenAi, input: String) -> Self {
        Self {
            agent,
            input,
            temperature: None,
            max_tokens: None,
            timeout: None,
            json_object: false,
        }
    }

    fn build_request(&self) -> ChatRequest {
        let mut request =
            ChatRequest::new(&self.agent.model).message(WireMessage::user(&self.input));

        if let Some(temp) = self.temperature {
            request = request.temperature(temp);
        }
        if let Some(limit) = self.max_tokens {
            request = request.output_limit(limit);
        }
        if self.json_object {
            request = request.json_object();
        }

        request
    }
}

#[async_trait]
impl PromptBuilder for OpenAiPromptBuilder {
    fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn json_object(mut self) -> Self {
        self.json_object = true;
        self
    }

    async fn send(self) -> Result<String, AiError> {
        let request = self.build_request();
        let response = self.agent.client().chat(&request, self.timeout).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::Empty("no choices in response".to_string()))
    }
}
