use cv_videoio::{
    extract_frame, open_sink, open_source, probe, FrameSink, ImageSequenceWriter, VideoError,
};
use image::{Rgb, RgbImage};
use tempfile::tempdir;

fn solid(w: u32, h: u32, v: u8) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb([v, v / 2, 255 - v]))
}

#[test]
fn test_image_sequence_roundtrip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let seq = dir.path().join("frames");

    let mut writer = ImageSequenceWriter::new(&seq, "frame").unwrap();
    for i in 0..5u8 {
        writer.write(&solid(64, 48, i * 10)).unwrap();
    }
    writer.finish().unwrap();
    assert_eq!(writer.frames_written(), 5);

    let mut source = open_source(&seq).unwrap();
    assert_eq!(source.frame_count(), Some(5));
    assert_eq!(source.dimensions(), (64, 48));
    for i in 0..5u8 {
        let img = source.read().unwrap().unwrap();
        assert_eq!(img.get_pixel(0, 0)[0], i * 10);
    }
    assert!(source.read().unwrap().is_none());
}

#[test]
fn test_skip_reports_short_sources() {
    let dir = tempdir().unwrap();
    let mut writer = ImageSequenceWriter::new(dir.path(), "f").unwrap();
    for i in 0..3u8 {
        writer.write(&solid(8, 8, i)).unwrap();
    }

    let mut source = open_source(dir.path()).unwrap();
    assert_eq!(source.skip(2).unwrap(), 2);
    assert_eq!(source.read().unwrap().unwrap().get_pixel(0, 0)[0], 2);
    assert_eq!(source.skip(4).unwrap(), 0);
}

#[test]
fn test_extract_frame_by_index() {
    let dir = tempdir().unwrap();
    let mut writer = ImageSequenceWriter::new(dir.path(), "f").unwrap();
    for i in 0..4u8 {
        writer.write(&solid(8, 8, i * 20)).unwrap();
    }

    let frame = extract_frame(dir.path(), 3).unwrap();
    assert_eq!(frame.get_pixel(0, 0)[0], 60);
    assert!(matches!(
        extract_frame(dir.path(), 4),
        Err(VideoError::FrameUnavailable { index: 4, .. })
    ));
}

#[test]
fn test_still_image_ignores_frame_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("still.png");
    solid(16, 9, 77).save(&path).unwrap();

    let frame = extract_frame(&path, 30).unwrap();
    assert_eq!(frame.dimensions(), (16, 9));
    assert_eq!(frame.get_pixel(3, 3)[0], 77);

    let info = probe(&path).unwrap();
    assert_eq!(info.frame_count, Some(1));
    assert_eq!(info.fps, None);
}

#[test]
fn test_missing_source_is_reported() {
    let res = open_source("/non/existent/path.mp4");
    assert!(matches!(res, Err(VideoError::NotFound(_))));
}

#[test]
fn test_abort_removes_partial_sequence() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let mut sink = open_sink(&out, 8, 8, 30.0).unwrap();
    sink.write(&solid(8, 8, 1)).unwrap();
    sink.write(&solid(8, 8, 2)).unwrap();
    sink.abort();
    assert!(!out.exists());
}

#[cfg(not(feature = "ffmpeg"))]
#[test]
fn test_video_paths_need_ffmpeg() {
    let dir = tempdir().unwrap();
    let video = dir.path().join("clip.mp4");
    std::fs::write(&video, b"not really a video").unwrap();
    assert!(matches!(open_source(&video), Err(VideoError::Unsupported(_))));
    assert!(matches!(
        open_sink(dir.path().join("out.mp4"), 8, 8, 30.0),
        Err(VideoError::Unsupported(_))
    ));
}

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use super::*;
    use cv_videoio::{extract_audio_mono, FfmpegSource, FfmpegWriter, FrameSource};
    use std::path::Path;

    const FRAMES: u32 = 120;

    fn mean_abs_diff(a: &RgbImage, b: &RgbImage) -> f64 {
        let total: u64 = a
            .as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(&x, &y)| u64::from(x.abs_diff(y)))
            .sum();
        total as f64 / a.as_raw().len() as f64
    }

    fn write_clip(path: &Path) {
        let mut writer = FfmpegWriter::new(path, 64, 48, 30.0).unwrap();
        for i in 0..FRAMES {
            writer.write(&solid(64, 48, (i * 2) as u8)).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_all(path: &Path) -> Vec<RgbImage> {
        let mut source = FfmpegSource::new(path).unwrap();
        std::iter::from_fn(|| source.read().unwrap()).collect()
    }

    #[test]
    fn test_backends_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FfmpegSource>();
        assert_send::<FfmpegWriter>();
    }

    #[test]
    fn test_seeking_skip_matches_sequential_read() {
        let dir = tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        write_clip(&clip);
        let frames = read_all(&clip);
        assert_eq!(frames.len(), FRAMES as usize);

        let mut source = FfmpegSource::new(&clip).unwrap();
        assert_eq!(source.skip(70).unwrap(), 70);
        let frame = source.read().unwrap().unwrap();
        assert!(mean_abs_diff(&frame, &frames[70]) < 0.5);
        assert!(mean_abs_diff(&frame, &frames[60]) > 5.0);

        // Reading continues in order after the seek.
        let next = source.read().unwrap().unwrap();
        assert!(mean_abs_diff(&next, &frames[71]) < 0.5);

        let extracted = extract_frame(&clip, 100).unwrap();
        assert!(mean_abs_diff(&extracted, &frames[100]) < 0.5);
    }

    #[test]
    fn test_skip_past_end_reports_available_frames() {
        let dir = tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        write_clip(&clip);

        let mut source = FfmpegSource::new(&clip).unwrap();
        assert_eq!(source.skip(500).unwrap(), u64::from(FRAMES));
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_audio_extraction_stops_at_limit() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
        for i in 0..48_000i32 {
            writer.write_sample(((i % 64) * 256 - 8192) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let full = extract_audio_mono(&wav, 16_000, None).unwrap();
        assert!(full.len() > 16_000);
        let head = extract_audio_mono(&wav, 16_000, Some(16_000)).unwrap();
        assert_eq!(head.len(), 16_000);
        assert_eq!(head[..], full[..16_000]);
    }
}
