use super::{VideoDecoder, VideoEncoder};
use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, input, output};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use std::path::Path;

/// Container/codec decoder backed by libav, converting every frame to RGB24.
pub struct FfmpegDecoder {
    input_context: ffmpeg::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    width: u32,
    height: u32,
    fps: f64,
    eof_sent: bool,
}

impl FfmpegDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("Failed to initialise FFmpeg")?;

        let input_context =
            input(&path).with_context(|| format!("Failed to open video {}", path.display()))?;

        let video_stream = input_context
            .streams()
            .best(Type::Video)
            .context("No video stream found")?;

        let video_stream_index = video_stream.index();
        let context_decoder =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context_decoder.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();

        let rate = video_stream.avg_frame_rate();
        let fps = if rate.denominator() == 0 {
            0.0
        } else {
            rate.numerator() as f64 / rate.denominator() as f64
        };

        let scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )?;

        tracing::debug!(width, height, fps, "Video opened");

        Ok(Self {
            input_context,
            video_stream_index,
            decoder,
            scaler,
            width,
            height,
            fps,
            eof_sent: false,
        })
    }

    fn decode_next(&mut self) -> Result<Option<Video>> {
        loop {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut packets = self.input_context.packets();
            loop {
                match packets.next() {
                    Some((stream, packet)) if stream.index() == self.video_stream_index => {
                        self.decoder.send_packet(&packet)?;
                        break;
                    }
                    Some(_) => continue,
                    None => {
                        self.decoder.send_eof()?;
                        self.eof_sent = true;
                        break;
                    }
                }
            }
        }
    }

    fn to_rgb(&mut self, decoded: &Video) -> Result<RgbImage> {
        let mut rgb_frame = Video::empty();
        self.scaler.run(decoded, &mut rgb_frame)?;

        let data = rgb_frame.data(0);
        let stride = rgb_frame.stride(0);
        let row_bytes = self.width as usize * 3;

        // Rows may be padded to the stride
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        RgbImage::from_raw(self.width, self.height, pixels)
            .context("Decoded frame does not match its dimensions")
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.decode_next()? {
            Some(decoded) => self.to_rgb(&decoded).map(Some),
            None => Ok(None),
        }
    }
}

/// H.264 writer (MPEG-4 Part 2 when libx264 is missing) taking RGB24 frames.
///
/// Frames are cropped to even dimensions for YUV 4:2:0.
pub struct FfmpegEncoder {
    output_context: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl FfmpegEncoder {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        ffmpeg::init().context("Failed to initialise FFmpeg")?;

        let (out_width, out_height) = (width & !1, height & !1);
        if out_width == 0 || out_height == 0 {
            anyhow::bail!("Frame too small to encode: {}x{}", width, height);
        }

        let mut output_context = output(path)
            .with_context(|| format!("Failed to create video {}", path.display()))?;
        let global_header = output_context
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .or_else(|| ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4))
            .context("No H.264 or MPEG-4 encoder available")?;

        let rate = fps.round().clamp(1.0, 240.0) as i32;
        let encoder_time_base = ffmpeg::Rational::new(1, rate);

        let mut settings = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        settings.set_width(out_width);
        settings.set_height(out_height);
        settings.set_format(Pixel::YUV420P);
        settings.set_time_base(encoder_time_base);
        settings.set_frame_rate(Some(ffmpeg::Rational::new(rate, 1)));
        if global_header {
            settings.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = settings
            .open_as(codec)
            .context("Failed to open video encoder")?;

        let stream_index = {
            let mut stream = output_context.add_stream(codec)?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };

        output_context.write_header()?;

        // The muxer may pick its own time base when writing the header
        let stream_time_base = output_context
            .stream(stream_index)
            .context("Output stream disappeared")?
            .time_base();

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            out_width,
            out_height,
            Pixel::YUV420P,
            out_width,
            out_height,
            Flags::BILINEAR,
        )?;

        tracing::debug!(
            path = %path.display(),
            width = out_width,
            height = out_height,
            fps = rate,
            codec = codec.name(),
            "Video encoder opened"
        );

        Ok(Self {
            output_context,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width: out_width,
            height: out_height,
            next_pts: 0,
        })
    }

    fn to_video_frame(&mut self, frame: &RgbImage) -> Result<Video> {
        if frame.width() < self.width || frame.height() < self.height {
            anyhow::bail!(
                "Frame {}x{} is smaller than the video {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }

        let mut rgb_frame = Video::new(Pixel::RGB24, self.width, self.height);
        let stride = rgb_frame.stride(0);
        let row_bytes = self.width as usize * 3;
        let source_row_bytes = frame.width() as usize * 3;
        let data = rgb_frame.data_mut(0);
        for (y, row) in frame
            .as_raw()
            .chunks_exact(source_row_bytes)
            .take(self.height as usize)
            .enumerate()
        {
            data[y * stride..y * stride + row_bytes].copy_from_slice(&row[..row_bytes]);
        }

        let mut yuv_frame = Video::empty();
        self.scaler.run(&rgb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        Ok(yuv_frame)
    }

    fn write_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output_context)?;
        }
        Ok(())
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let video_frame = self.to_video_frame(frame)?;
        self.encoder.send_frame(&video_frame)?;
        self.write_packets()
    }

    fn finish(&mut self) -> Result<()> {
        self.encoder.send_eof()?;
        self.write_packets()?;
        self.output_context.write_trailer()?;
        Ok(())
    }
}
