use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, warn};

use ::image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use ::image::codecs::png::PngDecoder;
use ::image::codecs::webp::WebPDecoder;
use ::image::{AnimationDecoder, Delay, DynamicImage, Frame, ImageFormat, ImageReader, RgbaImage, imageops};

use super::{ConversionTask, ConvertError, Converter, ConverterType, TaskLease};

/// Decodes the input with the `image` crate and re-encodes it in the target
/// format. The format comes from the task's target format, not the content.
#[derive(Debug, Clone, Default)]
pub struct ImageConverter;

impl ImageConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for ImageConverter {
    fn converter_type(&self) -> ConverterType {
        ConverterType::Image
    }

    async fn convert(&self, task: &ConversionTask, lease: &TaskLease) -> Result<(), ConvertError> {
        let format = target_image_format(&task.target_format)?;
        let input = task.input_path.clone();
        let output = task.output_path.clone();
        let lease = lease.clone();

        tokio::task::spawn_blocking(move || convert_leased(&input, &output, format, &lease))
            .await
            .map_err(|e| ConvertError::Panicked(e.to_string()))??;

        debug!(
            "Image converted: {} -> {}",
            task.input_path.display(),
            task.output_path.display()
        );
        Ok(())
    }
}

/// Runs on the blocking pool holding `lease`. A lease cancelled before the
/// work starts skips it; one cancelled while it ran removes the output.
fn convert_leased(input: &Path, output: &Path, format: ImageFormat, lease: &TaskLease) -> Result<(), ConvertError> {
    if lease.is_cancelled() {
        return Err(ConvertError::Cancelled);
    }

    let result = convert_image_file(input, output, format);

    if lease.is_cancelled() {
        if let Err(e) = std::fs::remove_file(output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove abandoned output {}: {}", output.display(), e);
            }
        }
        return Err(ConvertError::Cancelled);
    }
    result
}

/// Map a target format name such as `jpg` or `WEBP` to an encoder format.
pub fn target_image_format(target_format: &str) -> Result<ImageFormat, ConvertError> {
    let ext = target_format.trim().trim_start_matches('.');
    ImageFormat::from_extension(ext)
        .filter(|format| format.writing_enabled())
        .ok_or_else(|| ConvertError::UnsupportedFormat(target_format.to_string()))
}

/// Blocking conversion of one image file.
///
/// Animated sources keep every frame when the target is GIF or PNG (written
/// as APNG). Other targets cannot hold animation and receive the first
/// frame, with a warning.
pub fn convert_image_file(input: &Path, output: &Path, format: ImageFormat) -> Result<(), ConvertError> {
    if let Some(frames) = read_animation(input)? {
        if frames.len() > 1 {
            match format {
                ImageFormat::Gif => return write_animated_gif(frames, output),
                ImageFormat::Png => return write_apng(frames, output),
                _ => warn!(
                    "{:?} cannot hold animation: keeping the first of {} frames of {}",
                    format,
                    frames.len(),
                    input.display()
                ),
            }
        }
    }

    let image = ImageReader::open(input)?.with_guessed_format()?.decode()?;
    let image = match format {
        // no alpha channel in JPEG
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };

    image.save_with_format(output, format)?;
    Ok(())
}

/// Decode all frames when the input is an animated GIF, APNG, or WebP.
/// Returns `None` for still images and formats without animation support.
fn read_animation(input: &Path) -> Result<Option<Vec<Frame>>, ConvertError> {
    let source_format = ImageReader::open(input)?.with_guessed_format()?.format();
    let reader = || -> Result<BufReader<File>, ConvertError> { Ok(BufReader::new(File::open(input)?)) };

    let frames = match source_format {
        Some(ImageFormat::Gif) => GifDecoder::new(reader()?)?.into_frames().collect_frames()?,
        Some(ImageFormat::Png) => {
            let decoder = PngDecoder::new(reader()?)?;
            if !decoder.is_apng()? {
                return Ok(None);
            }
            decoder.apng()?.into_frames().collect_frames()?
        }
        Some(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(reader()?)?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.into_frames().collect_frames()?
        }
        _ => return Ok(None),
    };

    Ok(Some(frames))
}

fn write_animated_gif(frames: Vec<Frame>, output: &Path) -> Result<(), ConvertError> {
    let frame_count = frames.len();
    let mut encoder = GifEncoder::new(BufWriter::new(File::create(output)?));
    encoder.set_repeat(Repeat::Infinite)?;
    encoder.encode_frames(frames)?;
    drop(encoder);

    debug!("Wrote {} frames to {}", frame_count, output.display());
    Ok(())
}

/// Write frames as an endlessly looping APNG. Every frame is placed on a
/// canvas the size of the first one.
fn write_apng(frames: Vec<Frame>, output: &Path) -> Result<(), ConvertError> {
    let Some(first) = frames.first() else {
        return Err(ConvertError::Internal("animation without frames".to_string()));
    };
    let (width, height) = first.buffer().dimensions();

    let mut encoder = png::Encoder::new(BufWriter::new(File::create(output)?), width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_animated(frames.len() as u32, 0)?;
    let mut writer = encoder.write_header()?;

    for frame in &frames {
        let (numerator, denominator) = apng_delay(frame.delay());
        writer.set_frame_delay(numerator, denominator)?;
        let canvas = frame_canvas(frame, width, height);
        writer.write_image_data(canvas.as_raw())?;
    }
    writer.finish()?;

    debug!("Wrote {} frames to {}", frames.len(), output.display());
    Ok(())
}

fn frame_canvas(frame: &Frame, width: u32, height: u32) -> RgbaImage {
    let buffer = frame.buffer();
    if buffer.dimensions() == (width, height) && frame.left() == 0 && frame.top() == 0 {
        return buffer.clone();
    }
    let mut canvas = RgbaImage::new(width, height);
    imageops::replace(&mut canvas, buffer, i64::from(frame.left()), i64::from(frame.top()));
    canvas
}

/// APNG delays are a fraction of a second with 16-bit parts.
fn apng_delay(delay: Delay) -> (u16, u16) {
    let (numer_ms, denom_ms) = delay.numer_denom_ms();
    let denom_ms = denom_ms.max(1);
    match (u16::try_from(numer_ms), u16::try_from(u64::from(denom_ms) * 1000)) {
        (Ok(numerator), Ok(denominator)) => (numerator, denominator),
        _ => {
            let millis = (f64::from(numer_ms) / f64::from(denom_ms)).round();
            (millis.min(f64::from(u16::MAX)) as u16, 1000)
        }
    }
}
