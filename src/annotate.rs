use anyhow::ensure;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::{FrameStrategy, VideoSource};
use crate::document::{Annotation, Payload};
use crate::model::CaptionModel;
use crate::prompt::PromptMap;

pub const DEFAULT_PROMPT: &str = "Describe what is shown in this video frame.";
pub const DEFAULT_FRAME_INTERVAL: u64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 8;

const APP_IDENTIFIER: &str = concat!("captionai/", env!("CARGO_PKG_VERSION"));

/// Request parameters as they arrive on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Params {
    pub default_prompt: Option<String>,
    /// Repeatable `label:prompt` pairs.
    pub prompt_map: Vec<String>,
    pub frame_interval: Option<u64>,
    pub batch_size: Option<usize>,
}

/// Parameters resolved against the in-code fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    pub prompts: PromptMap,
    pub frame_interval: u64,
    pub batch_size: usize,
    pub strategy: FrameStrategy,
}

impl Config {
    pub fn new(params: &Params, strategy: FrameStrategy) -> Self {
        Self {
            prompts: PromptMap::parse(
                &params.prompt_map,
                params.default_prompt.as_deref().unwrap_or(DEFAULT_PROMPT),
            ),
            frame_interval: params.frame_interval.unwrap_or(DEFAULT_FRAME_INTERVAL),
            batch_size: params.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            strategy,
        }
    }
}

/// One span ready for inference: rendered prompt, representative frame and
/// the long id of the span it came from.
pub struct BatchItem {
    pub prompt: String,
    pub image: RgbImage,
    pub source: String,
}

struct FrameSpan {
    source: String,
    start: u64,
    end: u64,
    label: Option<String>,
    representatives: Vec<u64>,
}

/// Resolve the spans to caption and extract their frames. Creates the output
/// view (recording synthesized TimePoints in it when interval sampling is
/// used) and returns its index alongside the batch items in encounter order.
pub fn resolve_items(
    payload: &mut Payload,
    video: &mut dyn VideoSource,
    config: &Config,
    params: &Params,
) -> anyhow::Result<(usize, Vec<BatchItem>)> {
    let parameters = serde_json::to_value(params)?;
    let mut items = Vec::new();

    let spans: Vec<FrameSpan> = payload
        .timeframe_view()
        .map(|view| {
            view.annotations
                .iter()
                .filter_map(|annotation| match annotation {
                    Annotation::TimeFrame {
                        id,
                        start,
                        end,
                        label,
                        representatives,
                    } => Some(FrameSpan {
                        source: view.long_id(id),
                        start: *start,
                        end: *end,
                        label: label.clone(),
                        representatives: representatives.clone(),
                    }),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if !spans.is_empty() {
        for span in &spans {
            let context = payload.slice_text(span.start, span.end);
            let Some(prompt) = config.prompts.render(span.label.as_deref(), &context) else {
                debug!(source = %span.source, label = ?span.label, "skipping span");
                continue;
            };
            let index = match config.strategy {
                FrameStrategy::Representative if !span.representatives.is_empty() => {
                    span.representatives[0]
                }
                _ => (span.start + span.end) / 2,
            };
            debug!(source = %span.source, frame = index, "captioning span");
            let image = video.frame_at(index)?;
            items.push(BatchItem {
                prompt,
                image,
                source: span.source.clone(),
            });
        }
        let view_index = payload.new_view(APP_IDENTIFIER, parameters);
        info!(
            spans = spans.len(),
            selected = items.len(),
            "resolved annotated timeframes"
        );
        return Ok((view_index, items));
    }

    ensure!(
        config.frame_interval > 0,
        "frameInterval must be at least 1"
    );
    let total = video.frame_count()?;
    let view_index = payload.new_view(APP_IDENTIFIER, parameters);
    if let Some(prompt) = config.prompts.render(None, "") {
        for index in (0..total).step_by(config.frame_interval as usize) {
            let image = video.frame_at(index)?;
            let view = &mut payload.views[view_index];
            let id = view.next_id();
            view.annotations.push(Annotation::TimePoint {
                id: id.clone(),
                time_point: index,
            });
            items.push(BatchItem {
                prompt: prompt.clone(),
                image,
                source: view.long_id(&id),
            });
        }
    }
    info!(
        frames = total,
        interval = config.frame_interval,
        sampled = items.len(),
        "resolved sampled timepoints"
    );
    Ok((view_index, items))
}

/// Group items into fixed-size batches, invoke the model once per batch and
/// emit one caption plus one alignment per item, in item order. The final
/// partial batch is flushed unconditionally.
pub async fn caption_items(
    payload: &mut Payload,
    view_index: usize,
    items: Vec<BatchItem>,
    model: &dyn CaptionModel,
    batch_size: usize,
) -> anyhow::Result<()> {
    ensure!(batch_size > 0, "batchSize must be at least 1");

    let mut prompts = Vec::new();
    let mut images = Vec::new();
    let mut sources = Vec::new();
    for item in items {
        prompts.push(item.prompt);
        images.push(item.image);
        sources.push(item.source);
        if prompts.len() == batch_size {
            flush_batch(
                payload,
                view_index,
                model,
                std::mem::take(&mut prompts),
                std::mem::take(&mut images),
                std::mem::take(&mut sources),
            )
            .await?;
        }
    }
    if !prompts.is_empty() {
        flush_batch(payload, view_index, model, prompts, images, sources).await?;
    }
    Ok(())
}

async fn flush_batch(
    payload: &mut Payload,
    view_index: usize,
    model: &dyn CaptionModel,
    prompts: Vec<String>,
    images: Vec<RgbImage>,
    sources: Vec<String>,
) -> anyhow::Result<()> {
    debug!(count = prompts.len(), "running caption batch");
    let texts = model.generate(&prompts, &images).await?;
    ensure!(
        texts.len() == sources.len(),
        "model returned {} captions for {} inputs",
        texts.len(),
        sources.len()
    );

    let view = &mut payload.views[view_index];
    let view_id = view.id.clone();
    for (text, source) in texts.into_iter().zip(sources) {
        let text_id = view.next_id();
        view.annotations.push(Annotation::TextDocument {
            id: text_id.clone(),
            text: text.trim().to_owned(),
        });
        let alignment_id = view.next_id();
        view.annotations.push(Annotation::Alignment {
            id: alignment_id,
            source,
            target: format!("{view_id}:{text_id}"),
        });
    }
    Ok(())
}

/// Run the whole pipeline against one payload: resolve spans, batch, caption
/// and emit alignments into a fresh output view.
pub async fn annotate(
    payload: &mut Payload,
    video: &mut dyn VideoSource,
    model: &dyn CaptionModel,
    params: &Params,
    strategy: FrameStrategy,
) -> anyhow::Result<()> {
    let config = Config::new(params, strategy);
    let (view_index, items) = resolve_items(payload, video, &config, params)?;
    caption_items(payload, view_index, items, model, config.batch_size).await
}
