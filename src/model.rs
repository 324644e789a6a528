use std::time::Duration;

use anyhow::ensure;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use image::RgbImage;

use crate::capture::encode_data_uri;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_TOKENS: u32 = 512;

/// A captioning model: one decoded string per (prompt, image) pair, in input
/// order. The batching loop only ever talks to this trait, so it can run
/// against a deterministic stub in tests.
#[async_trait]
pub trait CaptionModel: Send + Sync {
    async fn generate(
        &self,
        prompts: &[String],
        images: &[RgbImage],
    ) -> anyhow::Result<Vec<String>>;
}

/// Caption frames with an OpenAI vision-capable chat model. A batch becomes
/// one chat request per pair; any request error aborts the whole batch.
pub struct OpenAiCaptioner {
    client: Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiCaptioner {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            model: "gpt-4o".to_owned(),
        }
    }
}

impl Default for OpenAiCaptioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionModel for OpenAiCaptioner {
    async fn generate(
        &self,
        prompts: &[String],
        images: &[RgbImage],
    ) -> anyhow::Result<Vec<String>> {
        ensure!(
            prompts.len() == images.len(),
            "batch has {} prompts but {} images",
            prompts.len(),
            images.len()
        );

        let mut texts = Vec::with_capacity(prompts.len());
        for (prompt, image) in prompts.iter().zip(images) {
            let frame = encode_data_uri(image)?;
            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.as_str())
                .max_tokens(MAX_TOKENS)
                .messages([ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(vec![
                            ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(prompt.as_str())
                                    .build()?,
                            ),
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImageArgs::default()
                                    .image_url(ImageUrlArgs::default().url(frame).build()?)
                                    .build()?,
                            ),
                        ]))
                        .build()?,
                )])
                .build()?;

            let response =
                tokio::time::timeout(REQUEST_TIMEOUT, self.client.chat().create(request)).await??;
            let text = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.clone())
                .ok_or(anyhow::anyhow!("no content in model response"))?;
            texts.push(text);
        }
        Ok(texts)
    }
}
