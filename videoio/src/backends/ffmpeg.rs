//! FFmpeg backend using ffmpeg-next
//!
//! Video decoding to RGB24, MPEG-4 encoding, container tag lookup and mono
//! audio extraction.

use crate::{FrameSink, FrameSource, Result, VideoError};
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::{Audio as AudioFrame, Video as VideoFrame};
use ffmpeg::{codec, encoder, format, media, Packet, Rational};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

static FFMPEG_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

fn init() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(|| {
            ffmpeg::init().map_err(|e| e.to_string())?;
            ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
            Ok(())
        })
        .clone()
        .map_err(|e| VideoError::Backend(format!("FFmpeg init failed: {e}")))
}

fn backend<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> VideoError {
    move |e| VideoError::Backend(format!("{context}: {e}"))
}

fn open_input(path: &Path) -> Result<format::context::Input> {
    init()?;
    if !path.exists() {
        return Err(VideoError::NotFound(path.to_path_buf()));
    }
    format::input(&path).map_err(backend("Failed to open input"))
}

fn rational_to_f64(r: Rational) -> Option<f64> {
    if r.denominator() == 0 || r.numerator() <= 0 {
        None
    } else {
        Some(r.numerator() as f64 / r.denominator() as f64)
    }
}

/// Forward skips shorter than this are decoded frame by frame.
const SEEK_MIN_FRAMES: u64 = 48;

pub struct FfmpegSource {
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: Rational,
    start_pts: i64,
    width: u32,
    height: u32,
    scaler: Scaler,
    fps: Option<f64>,
    frame_count: Option<u64>,
    position: u64,
    pending: Option<RgbImage>,
    flushed: bool,
}

impl std::fmt::Debug for FfmpegSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegSource")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fps", &self.fps)
            .field("frame_count", &self.frame_count)
            .field("position", &self.position)
            .finish()
    }
}

impl FfmpegSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let ictx = open_input(path.as_ref())?;

        let input = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| VideoError::Backend("No video stream found".to_string()))?;

        let stream_index = input.index();
        let time_base = input.time_base();
        // AV_NOPTS_VALUE when the stream does not report a start time.
        let start_pts = match input.start_time() {
            i64::MIN => 0,
            t => t,
        };
        let fps = rational_to_f64(input.avg_frame_rate()).or_else(|| rational_to_f64(input.rate()));
        let frame_count = match input.frames() {
            n if n > 0 => Some(n as u64),
            _ => match (fps, ictx.duration()) {
                (Some(fps), d) if d > 0 => {
                    Some((d as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE) * fps).round() as u64)
                }
                _ => None,
            },
        };

        let context = codec::context::Context::from_parameters(input.parameters())
            .map_err(backend("Failed to get codec context"))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(backend("Failed to get decoder"))?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = Scaler::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(backend("Failed to initialize scaler"))?;

        Ok(Self {
            ictx,
            decoder,
            stream_index,
            time_base,
            start_pts,
            width,
            height,
            scaler,
            fps,
            frame_count,
            position: 0,
            pending: None,
            flushed: false,
        })
    }

    fn convert(&mut self, decoded: &VideoFrame) -> Result<RgbImage> {
        let mut rgb = VideoFrame::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(backend("Failed to convert frame"))?;

        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut buf = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height as usize {
            buf.extend_from_slice(&data[y * stride..y * stride + row_bytes]);
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| VideoError::Backend("Image creation failed".to_string()))
    }

    fn decode_next(&mut self) -> Result<Option<VideoFrame>> {
        let mut decoded = VideoFrame::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.flushed {
                return Ok(None);
            }

            let next = self
                .ictx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .map_err(backend("Failed to decode packet"))?;
                }
                Some(_) => {}
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(backend("Failed to flush decoder"))?;
                    self.flushed = true;
                }
            }
        }
    }

    /// Frame number of a decoded frame, from its timestamp.
    fn frame_index(&self, frame: &VideoFrame, fps: f64) -> Option<u64> {
        let pts = frame.timestamp().or_else(|| frame.pts())?;
        let tb = rational_to_f64(self.time_base)?;
        let seconds = (pts - self.start_pts) as f64 * tb;
        Some((seconds * fps).round().max(0.0) as u64)
    }

    fn skip_decoded(&mut self, n: u64) -> Result<u64> {
        for skipped in 0..n {
            if self.pending.take().is_none() && self.decode_next()?.is_none() {
                return Ok(skipped);
            }
            self.position += 1;
        }
        Ok(n)
    }

    /// Seek to the keyframe before `target` and decode forward to it. The
    /// frame at `target` is kept for the next `read`.
    fn seek_to(&mut self, target: u64, fps: f64) -> Result<u64> {
        let start = self.position;
        let origin = self.start_pts as f64 * rational_to_f64(self.time_base).unwrap_or(0.0);
        let ts = ((target as f64 / fps + origin) * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        if let Err(e) = self.ictx.seek(ts, ..ts) {
            warn!(target, error = %e, "seek failed, decoding forward");
            return self.skip_decoded(target - start);
        }
        self.decoder.flush();
        self.flushed = false;
        self.pending = None;

        let mut reached = None;
        while let Some(decoded) = self.decode_next()? {
            let index = self
                .frame_index(&decoded, fps)
                .ok_or_else(|| VideoError::Backend("decoded frame has no timestamp".to_string()))?;
            if index >= target {
                self.pending = Some(self.convert(&decoded)?);
                self.position = target;
                return Ok(target - start);
            }
            reached = Some(index);
        }

        // Past the end: the last decoded frame bounds what was available.
        let end = reached.map_or(start, |last| (last + 1).max(start));
        self.position = end;
        Ok(end - start)
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if let Some(frame) = self.pending.take() {
            self.position += 1;
            return Ok(Some(frame));
        }
        match self.decode_next()? {
            Some(decoded) => {
                let frame = self.convert(&decoded)?;
                self.position += 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        match self.fps {
            Some(fps) if n >= SEEK_MIN_FRAMES => {
                debug!(from = self.position, frames = n, "seeking");
                self.seek_to(self.position + n, fps)
            }
            _ => self.skip_decoded(n),
        }
    }
}

/// MPEG-4 Part 2 encoder writing into the container implied by the path.
pub struct FfmpegWriter {
    path: PathBuf,
    octx: format::context::Output,
    encoder: encoder::Video,
    scaler: Scaler,
    width: u32,
    height: u32,
    encoder_tb: Rational,
    stream_tb: Rational,
    next_pts: i64,
    closed: bool,
}

impl std::fmt::Debug for FfmpegWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegWriter")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames", &self.next_pts)
            .finish()
    }
}

impl FfmpegWriter {
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32, fps: f64) -> Result<Self> {
        init()?;
        let path = path.as_ref().to_path_buf();
        if width % 2 != 0 || height % 2 != 0 {
            warn!(width, height, "odd output size, the encoder may pad or reject it");
        }

        let mut octx = format::output(&path).map_err(backend("Failed to create output"))?;
        let codec = encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| VideoError::Backend("MPEG-4 encoder not available".to_string()))?;

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(backend("Failed to create encoder"))?;

        // Millisecond-precision frame rate keeps 29.97-style rates exact enough.
        let rate = Rational::new((fps.max(1.0) * 1000.0).round() as i32, 1000);
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_frame_rate(Some(rate));
        video.set_time_base(rate.invert());
        video.set_bit_rate(8_000_000);
        video.set_gop(30);
        if octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER)
        {
            video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let encoder = video
            .open_with(ffmpeg::Dictionary::new())
            .map_err(backend("Failed to open encoder"))?;

        let mut ost = octx.add_stream(codec).map_err(backend("Failed to add stream"))?;
        ost.set_parameters(&encoder);
        ost.set_time_base(encoder.time_base());

        octx.write_header().map_err(backend("Failed to write header"))?;
        let stream_tb = octx
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| VideoError::Backend("Output stream missing".to_string()))?;
        let encoder_tb = encoder.time_base();

        let scaler = Scaler::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(backend("Failed to initialize scaler"))?;

        debug!(path = %path.display(), width, height, fps, "video writer opened");

        Ok(Self {
            path,
            octx,
            encoder,
            scaler,
            width,
            height,
            encoder_tb,
            stream_tb,
            next_pts: 0,
            closed: false,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(0);
            encoded.rescale_ts(self.encoder_tb, self.stream_tb);
            encoded
                .write_interleaved(&mut self.octx)
                .map_err(backend("Failed to write packet"))?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if self.closed {
            return Err(VideoError::InvalidParameters("write after finish".to_string()));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(VideoError::InvalidParameters(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut rgb = VideoFrame::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        {
            let dst = rgb.data_mut(0);
            for (y, src_row) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
                dst[y * stride..y * stride + row_bytes].copy_from_slice(src_row);
            }
        }

        let mut yuv = VideoFrame::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(backend("Failed to convert frame"))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(backend("Failed to send frame"))?;
        self.drain_packets()
    }

    fn frames_written(&self) -> u64 {
        self.next_pts as u64
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.encoder
            .send_eof()
            .map_err(backend("Failed to flush encoder"))?;
        self.drain_packets()?;
        self.octx
            .write_trailer()
            .map_err(backend("Failed to write trailer"))
    }

    fn abort(&mut self) {
        self.closed = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial output");
        }
    }
}

/// Timecode tag from the container, falling back to the first stream that
/// carries one.
pub fn read_timecode_tag<P: AsRef<Path>>(path: P) -> Result<Option<String>> {
    let ictx = open_input(path.as_ref())?;
    if let Some(tc) = ictx.metadata().get("timecode") {
        return Ok(Some(tc.to_string()));
    }
    for stream in ictx.streams() {
        if let Some(tc) = stream.metadata().get("timecode") {
            return Ok(Some(tc.to_string()));
        }
    }
    Ok(None)
}

/// Decode the best audio stream, mixed down to mono f32 at `sample_rate`.
/// Decoding stops once `max_samples` samples have been collected.
pub fn extract_audio_mono<P: AsRef<Path>>(path: P, sample_rate: u32, max_samples: Option<usize>) -> Result<Vec<f32>> {
    let mut ictx = open_input(path.as_ref())?;
    let stream = ictx
        .streams()
        .best(media::Type::Audio)
        .ok_or_else(|| VideoError::Backend("No audio stream found".to_string()))?;
    let stream_index = stream.index();

    let context = codec::context::Context::from_parameters(stream.parameters())
        .map_err(backend("Failed to get codec context"))?;
    let mut decoder = context
        .decoder()
        .audio()
        .map_err(backend("Failed to get audio decoder"))?;
    if decoder.channel_layout().is_empty() {
        decoder.set_channel_layout(ChannelLayout::default(decoder.channels() as i32));
    }

    let mut resampler = decoder
        .resampler(Sample::F32(SampleType::Packed), ChannelLayout::MONO, sample_rate)
        .map_err(backend("Failed to create resampler"))?;

    let mut samples = Vec::new();
    let mut decoded = AudioFrame::empty();
    let mut resampled = AudioFrame::empty();
    let layout = decoder.channel_layout();

    let mut drain = |decoder: &mut ffmpeg::decoder::Audio, samples: &mut Vec<f32>| -> Result<()> {
        while decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.channel_layout().is_empty() {
                decoded.set_channel_layout(layout);
            }
            resampler
                .run(&decoded, &mut resampled)
                .map_err(backend("Failed to resample audio"))?;
            samples.extend_from_slice(&resampled.plane::<f32>(0)[..resampled.samples()]);
        }
        Ok(())
    };

    let limit = max_samples.unwrap_or(usize::MAX);
    for (stream, packet) in ictx.packets() {
        if samples.len() >= limit {
            break;
        }
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(backend("Failed to decode audio packet"))?;
        drain(&mut decoder, &mut samples)?;
    }
    if samples.len() < limit {
        decoder
            .send_eof()
            .map_err(backend("Failed to flush audio decoder"))?;
        drain(&mut decoder, &mut samples)?;
    }
    samples.truncate(limit);

    debug!(
        path = %path.as_ref().display(),
        samples = samples.len(),
        sample_rate,
        "audio extracted"
    );
    Ok(samples)
}
