use std::path::Path;
use std::sync::Once;

use anyhow::{anyhow, bail, ensure};
use base64::Engine;
use clap::ValueEnum;
use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, decoder, format, media, rescale, software, Rescale};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::{ImageBuffer, RgbImage};

static INIT: Once = Once::new();

pub(crate) fn init() {
    INIT.call_once(|| {
        ffmpeg::init().unwrap();
    });
}

/// Which frame stands in for a time-delimited span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrameStrategy {
    /// The temporal midpoint of the span's extent.
    Midpoint,
    /// The span's first representative marker, falling back to the midpoint
    /// when no markers are present.
    Representative,
}

/// Read-only access to a video's frames, addressed by frame index.
pub trait VideoSource {
    fn frame_count(&self) -> anyhow::Result<u64>;
    fn frame_at(&mut self, index: u64) -> anyhow::Result<RgbImage>;
}

/// ffmpeg-backed video access. Each `frame_at` seeks to the target index and
/// decodes forward until the frame's timestamp reaches it.
pub struct FfmpegVideo {
    input: format::context::Input,
    stream_index: usize,
    decoder: decoder::Video,
    time_base: f64,
    frame_rate: f64,
    frame_count: u64,
}

impl FfmpegVideo {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let input = format::input(&path)?;
        let (stream_index, time_base, frame_rate, frame_count, decoder) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or(anyhow::Error::from(ffmpeg::Error::StreamNotFound))?;
            let time_base: f64 = stream.time_base().into();
            let frame_rate: f64 = stream.avg_frame_rate().into();
            ensure!(
                frame_rate > 0.0,
                "video stream in {} has no frame rate",
                path.display()
            );
            let frame_count = if stream.frames() > 0 {
                stream.frames() as u64
            } else {
                (stream.duration() as f64 * time_base * frame_rate).round() as u64
            };
            let decoder = codec::context::Context::from_parameters(stream.parameters())?
                .decoder()
                .video()?;
            (stream.index(), time_base, frame_rate, frame_count, decoder)
        };
        Ok(Self {
            input,
            stream_index,
            decoder,
            time_base,
            frame_rate,
            frame_count,
        })
    }
}

impl VideoSource for FfmpegVideo {
    fn frame_count(&self) -> anyhow::Result<u64> {
        Ok(self.frame_count)
    }

    fn frame_at(&mut self, index: u64) -> anyhow::Result<RgbImage> {
        let seconds = index as f64 / self.frame_rate;
        let position = ((seconds * 1000.0) as i64).rescale((1, 1000), rescale::TIME_BASE);
        self.input.seek(position, ..position)?;
        self.decoder.flush();

        // Accept the first decoded frame within half a frame of the target.
        let target = seconds - 0.5 / self.frame_rate;
        let time_base = self.time_base;
        let stream_index = self.stream_index;
        let mut decoded = Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded
                    .pts()
                    .ok_or_else(|| anyhow!("decoded frame has no pts"))?;
                if pts as f64 * time_base >= target {
                    return rgb_image(&decoded);
                }
            }
        }
        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded
                .pts()
                .ok_or_else(|| anyhow!("decoded frame has no pts"))?;
            if pts as f64 * time_base >= target {
                return rgb_image(&decoded);
            }
        }
        bail!("frame {index} is past the end of the stream")
    }
}

fn rgb_image(frame: &Video) -> anyhow::Result<RgbImage> {
    let mut scaler = software::scaling::context::Context::get(
        frame.format(),
        frame.width(),
        frame.height(),
        format::Pixel::RGB24,
        frame.width(),
        frame.height(),
        software::scaling::Flags::BILINEAR,
    )?;
    let mut rgb = Video::empty();
    scaler.run(frame, &mut rgb)?;
    ImageBuffer::from_raw(rgb.width(), rgb.height(), rgb.data(0).to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from decoded frame"))
}

/// Encode a frame as a `data:image/jpeg;base64,...` URI for the model API.
pub fn encode_data_uri(image: &RgbImage) -> anyhow::Result<String> {
    use base64::prelude::BASE64_STANDARD;

    let mut jpeg_data = Vec::new();
    let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, 100);
    encoder.encode(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok("data:image/jpeg;base64,".to_owned() + &BASE64_STANDARD.encode(jpeg_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn data_uri_carries_jpeg_payload() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
        let uri = encode_data_uri(&image).unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));
        assert!(uri.len() > "data:image/jpeg;base64,".len());
    }
}
