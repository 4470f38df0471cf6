use crate::core::error::GatewayError;
use crate::services::image::ImageClient;
use crate::services::llm::{GenerationOptions, LlmClient};
use log::debug;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Title,
    Framework,
    TitleRegeneration,
    PageContent,
}

impl GenerationKind {
    pub fn temperature(self) -> f32 {
        match self {
            GenerationKind::Title => 0.8,
            GenerationKind::Framework | GenerationKind::TitleRegeneration => 0.7,
            GenerationKind::PageContent => 0.6,
        }
    }

    pub fn max_tokens(self) -> Option<u32> {
        match self {
            GenerationKind::Framework | GenerationKind::PageContent => Some(1024),
            GenerationKind::Title | GenerationKind::TitleRegeneration => None,
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationKind::Title => "title",
            GenerationKind::Framework => "framework",
            GenerationKind::TitleRegeneration => "title regeneration",
            GenerationKind::PageContent => "page content",
        };
        f.write_str(name)
    }
}

/// One text-model call. Built fresh for every call and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: String) -> Self {
        Self {
            kind,
            prompt,
            temperature: kind.temperature(),
            max_tokens: kind.max_tokens(),
        }
    }

    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Single-attempt access to the text and image models. Failures come back
/// as [`GatewayError`]; deciding whether to try again is the caller's job.
#[derive(Debug)]
pub struct GenerationGateway {
    llm: Box<dyn LlmClient>,
    image: Box<dyn ImageClient>,
}

impl GenerationGateway {
    pub fn new(llm: Box<dyn LlmClient>, image: Box<dyn ImageClient>) -> Self {
        Self { llm, image }
    }

    pub async fn generate_text(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        debug!(
            "{} request: temperature={} max_tokens={:?} prompt_chars={}",
            request.kind,
            request.temperature,
            request.max_tokens,
            request.prompt.len()
        );
        self.llm
            .generate(&request.prompt, &request.options())
            .await
            .map_err(|e| GatewayError::Text {
                kind: request.kind,
                message: format!("{:#}", e),
            })
    }

    pub async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, GatewayError> {
        debug!("image request: {}", prompt);
        self.image
            .txt2img(prompt)
            .await
            .map_err(|e| GatewayError::Image {
                message: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct RecordingLlm {
        seen: Arc<Mutex<Vec<GenerationOptions>>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
            self.seen.lock().unwrap().push(*options);
            if self.fail {
                Err(anyhow!("connection refused"))
            } else {
                Ok(format!("echo: {}", prompt))
            }
        }
    }

    #[derive(Debug)]
    struct FailingImage;

    #[async_trait]
    impl ImageClient for FailingImage {
        async fn txt2img(&self, _prompt: &str) -> Result<Vec<u8>> {
            Err(anyhow!("txt2img error (500): {{\"error\":\"CUDA out of memory\"}}"))
        }
    }

    #[test]
    fn test_request_defaults_per_kind() {
        let title = GenerationRequest::new(GenerationKind::Title, String::new());
        assert_eq!(title.temperature, 0.8);
        assert_eq!(title.max_tokens, None);

        let framework = GenerationRequest::new(GenerationKind::Framework, String::new());
        assert_eq!(framework.temperature, 0.7);
        assert_eq!(framework.max_tokens, Some(1024));

        let regen = GenerationRequest::new(GenerationKind::TitleRegeneration, String::new());
        assert_eq!(regen.temperature, 0.7);
        assert_eq!(regen.max_tokens, None);

        let page = GenerationRequest::new(GenerationKind::PageContent, String::new());
        assert_eq!(page.temperature, 0.6);
        assert_eq!(page.max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn test_generate_text_forwards_options() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gateway = GenerationGateway::new(
            Box::new(RecordingLlm { seen: seen.clone(), fail: false }),
            Box::new(FailingImage),
        );

        let request = GenerationRequest::new(GenerationKind::PageContent, "write page 1".to_string());
        let text = gateway.generate_text(&request).await.unwrap();

        assert_eq!(text, "echo: write page 1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn test_text_failure_is_single_attempt_gateway_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gateway = GenerationGateway::new(
            Box::new(RecordingLlm { seen: seen.clone(), fail: true }),
            Box::new(FailingImage),
        );

        let request = GenerationRequest::new(GenerationKind::Framework, "outline".to_string());
        let err = gateway.generate_text(&request).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::Text {
                kind: GenerationKind::Framework,
                message: "connection refused".to_string()
            }
        );
        assert_eq!(seen.lock().unwrap().len(), 1, "no retries");
    }

    #[tokio::test]
    async fn test_image_failure_keeps_upstream_body() {
        let gateway = GenerationGateway::new(
            Box::new(RecordingLlm { seen: Arc::new(Mutex::new(Vec::new())), fail: false }),
            Box::new(FailingImage),
        );

        let err = gateway.generate_image("a dragon").await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }
}
