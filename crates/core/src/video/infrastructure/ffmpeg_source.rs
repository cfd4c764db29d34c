use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::frame_source::FrameSource;

/// File-playback frame source backed by ffmpeg-next (libavformat +
/// libavcodec).
///
/// Each decoded frame is converted to BGR24 and timestamped as
/// `frame_index / fps`. Pause is a caller-visible flag (the worker skips
/// paused frames); seek flushes the decoder and jumps the demuxer.
pub struct FfmpegFileSource {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    decoder: Option<ffmpeg_next::decoder::Video>,
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    video_stream_index: usize,
    width: u32,
    height: u32,
    fps: f64,
    frame_index: usize,
    flushing: bool,
    done: bool,
    paused: bool,
}

// Safety: FfmpegFileSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegFileSource {}

impl FfmpegFileSource {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            decoder: None,
            scaler: None,
            video_stream_index: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            frame_index: 0,
            flushing: false,
            done: false,
            paused: false,
        }
    }

    fn try_receive(&mut self) -> Option<Result<(Frame, f64), Box<dyn std::error::Error>>> {
        let decoder = self.decoder.as_mut()?;
        let scaler = self.scaler.as_mut()?;

        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if decoder.receive_frame(&mut decoded).is_ok() {
            let mut bgr_frame = ffmpeg_next::util::frame::video::Video::empty();
            if let Err(e) = scaler.run(&decoded, &mut bgr_frame) {
                return Some(Err(Box::new(e)));
            }

            let pixels = extract_bgr_pixels(&bgr_frame, self.width, self.height);
            let frame = Frame::new(pixels, self.width, self.height, 3, self.frame_index);
            let timestamp = if self.fps > 0.0 {
                self.frame_index as f64 / self.fps
            } else {
                self.frame_index as f64
            };
            self.frame_index += 1;
            Some(Ok((frame, timestamp)))
        } else {
            None
        }
    }
}

impl Default for FfmpegFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FfmpegFileSource {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let ictx = ffmpeg_next::format::input(path)?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;

        let video_stream_index = stream.index();
        let codec_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::BGR24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        let metadata = VideoMetadata {
            width,
            height,
            fps,
            total_frames: stream.frames().max(0) as usize,
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            source_path: Some(path.to_path_buf()),
        };

        self.video_stream_index = video_stream_index;
        self.width = width;
        self.height = height;
        self.fps = fps;
        self.frame_index = 0;
        self.flushing = false;
        self.done = false;
        self.decoder = Some(decoder);
        self.scaler = Some(scaler);
        self.input_ctx = Some(ictx);

        Ok(metadata)
    }

    fn next_frame(
        &mut self,
    ) -> Option<Result<(Frame, f64), Box<dyn std::error::Error>>> {
        if self.done || self.input_ctx.is_none() {
            return None;
        }

        if let Some(result) = self.try_receive() {
            return Some(result);
        }

        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            // Only the owned packet and the stream index may escape this
            // block; the Stream handle borrows the input context
            let packet = {
                let ictx = self.input_ctx.as_mut()?;
                ictx.packets()
                    .next()
                    .map(|(stream, packet)| (stream.index(), packet))
            };

            let Some((stream_index, packet)) = packet else {
                if let Some(decoder) = self.decoder.as_mut() {
                    let _ = decoder.send_eof();
                }
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream_index != self.video_stream_index {
                continue;
            }

            if let Some(decoder) = self.decoder.as_mut() {
                if decoder.send_packet(&packet).is_err() {
                    continue;
                }
            }

            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn seek(&mut self, timestamp: f64) -> Result<(), Box<dyn std::error::Error>> {
        let ictx = self
            .input_ctx
            .as_mut()
            .ok_or("FfmpegFileSource: not opened")?;

        let position = (timestamp.max(0.0) * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)) as i64;
        ictx.seek(position, ..position)?;

        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.frame_index = if self.fps > 0.0 {
            (timestamp.max(0.0) * self.fps) as usize
        } else {
            0
        };
        self.flushing = false;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.input_ctx = None;
        self.decoder = None;
        self.scaler = None;
        self.done = true;
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous BGR buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride >
/// width*3); that padding is stripped here.
fn extract_bgr_pixels(
    bgr_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = bgr_frame.stride(0);
    let data = bgr_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
