//! Generation client: the transport seam for the orchestrator.
//!
//! `TextGenerator` is the injected capability — "submit a structured prompt,
//! get a structured response or a classified error within a deadline". The
//! real implementation is `OpenAiClient`; tests inject scripted doubles.

mod openai;

pub use openai::OpenAiClient;

use crate::errors::ClientError;
use crate::prompts::StagePrompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Options for one logical generation call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Correlation id threaded through logs and request metadata.
    pub request_id: Uuid,
    /// Wall-clock deadline for the whole call, transport retries included
    /// per attempt.
    pub timeout: Duration,
    /// Transport-level retries inside the client, on top of the first attempt.
    pub max_transport_retries: u32,
}

impl CallOptions {
    pub fn new(request_id: Uuid, timeout: Duration, max_transport_retries: u32) -> Self {
        Self {
            request_id,
            timeout,
            max_transport_retries,
        }
    }
}

/// Abstraction over the external text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Perform one logical generation call. Transport retries happen inside;
    /// the result is either a structured envelope or a classified error.
    async fn generate(
        &self,
        prompt: &StagePrompt,
        options: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError>;
}

/// Structured response envelope from the Responses API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

/// One item in the response output list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// One content part inside an output message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub text: String,
}

impl ResponseEnvelope {
    /// Build an envelope holding a single text payload.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            output: vec![OutputItem {
                item_type: "message".to_string(),
                content: vec![ContentPart {
                    part_type: "output_text".to_string(),
                    text: text.into(),
                }],
            }],
        }
    }

    /// Extract the concatenated textual payload, if any.
    ///
    /// A structurally valid envelope with no text is a content failure the
    /// orchestrator handles ("missing output"), not a transport error.
    pub fn output_text(&self) -> Option<String> {
        let mut text = String::new();
        for item in &self.output {
            if item.item_type != "message" {
                continue;
            }
            for part in &item.content {
                if part.part_type == "output_text" {
                    text.push_str(&part.text);
                }
            }
        }

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
