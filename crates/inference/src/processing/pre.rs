use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::RgbImage;
use ndarray::{Array, IxDyn};

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

const LETTERBOX_COLOR: u8 = 114;

/// Geometry of the letterbox applied to one image, needed to map boxes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

pub struct PreProcessor {
    pub input_size: (u32, u32),
    rgb_buffer: Vec<u8>,
    letterboxed_buffer: Vec<u8>,
}

impl PreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            rgb_buffer: Vec::with_capacity(1920 * 1080 * 3),
            letterboxed_buffer: vec![LETTERBOX_COLOR; (input_size.0 * input_size.1 * 3) as usize],
        }
    }

    /// Letterbox `image` into the model input and return an NCHW tensor in `[0, 1]`.
    pub fn preprocess(
        &mut self,
        image: &RgbImage,
    ) -> anyhow::Result<(Array<f32, IxDyn>, LetterboxParams)> {
        let _s = span!("preprocess_image");

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("Image has zero size: {}x{}", width, height);
        }

        tracing::trace!(width, height, "Preprocessing image dimensions");

        self.copy_rgb_pixels(image)?;
        let params = self.resize_and_letterbox(width, height)?;
        let input = self.normalize()?;

        Ok((input, params))
    }

    fn copy_rgb_pixels(&mut self, image: &RgbImage) -> anyhow::Result<()> {
        let (width, height) = image.dimensions();
        let expected_size = (width * height * 3) as usize;
        let pixels = image.as_raw();

        if pixels.len() != expected_size {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                expected_size,
                pixels.len()
            );
        }

        self.rgb_buffer.clear();
        self.rgb_buffer.extend_from_slice(pixels);

        Ok(())
    }

    fn resize_and_letterbox(&mut self, width: u32, height: u32) -> anyhow::Result<LetterboxParams> {
        let _s = span!("resize_and_letterbox");

        let (input_width, input_height) = self.input_size;
        let scale = (input_width as f32 / width as f32).min(input_height as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).clamp(1, input_width);
        let new_height = ((height as f32 * scale) as u32).clamp(1, input_height);

        let offset_x = (input_width - new_width) / 2;
        let offset_y = (input_height - new_height) / 2;

        let src = Image::from_slice_u8(width, height, &mut self.rgb_buffer, PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = input_width * 3;
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height {
            let src_row = (y * new_width * 3) as usize;
            let dst_row = ((y + offset_y) * stride + offset_x * 3) as usize;

            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        Ok(LetterboxParams {
            orig_width: width,
            orig_height: height,
            input_width,
            input_height,
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        })
    }

    fn normalize(&self) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let width = self.input_size.0 as usize;
        let height = self.input_size.1 as usize;
        let spatial = width * height;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in self.letterboxed_buffer.chunks_exact(3).enumerate() {
            output[i] = px[0] as f32 / 255.0;
            output[i + spatial] = px[1] as f32 / 255.0;
            output[i + 2 * spatial] = px[2] as f32 / 255.0;
        }

        Ok(Array::from_shape_vec(
            IxDyn(&[1, 3, height, width]),
            output,
        )?)
    }
}

impl Default for PreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_output_shape_matches_input_size() {
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));

        let mut preprocessor = PreProcessor::default();
        let (output, _) = preprocessor.preprocess(&image).unwrap();

        assert_eq!(output.shape(), &[1, 3, 640, 640]);
    }

    /// Test letterboxing preserves aspect ratio
    #[test]
    fn test_letterboxing_preserves_aspect_ratio() {
        // 800x600 image (4:3 aspect ratio)
        let image = RgbImage::from_pixel(800, 600, Rgb([128, 128, 128]));

        let mut preprocessor = PreProcessor::new((640, 640));
        let (output, params) = preprocessor.preprocess(&image).unwrap();

        // Scale = min(640/800, 640/600) = 0.8, resized to 640x480
        assert_eq!(params.scale, 0.8, "Scale should preserve aspect ratio");
        assert_eq!(params.offset_x, 0.0, "X offset should be 0 for wide image");
        assert_eq!(params.offset_y, 80.0, "Y offset should center vertically");
        assert_eq!(params.orig_width, 800);
        assert_eq!(params.orig_height, 600);

        assert_eq!(output.shape(), &[1, 3, 640, 640]);
    }

    #[test]
    fn test_padding_uses_letterbox_color() {
        let image = RgbImage::from_pixel(800, 600, Rgb([0, 0, 0]));

        let mut preprocessor = PreProcessor::new((640, 640));
        let (output, _) = preprocessor.preprocess(&image).unwrap();

        let pad = LETTERBOX_COLOR as f32 / 255.0;
        // Row 10 lies in the top padding band, row 320 inside the image
        assert!((output[[0, 0, 10, 320]] - pad).abs() < 1e-6);
        assert!(output[[0, 0, 320, 320]].abs() < 1e-6);
    }

    #[test]
    fn test_pixels_scaled_to_unit_range() {
        let image = RgbImage::from_pixel(640, 640, Rgb([255, 0, 51]));

        let mut preprocessor = PreProcessor::new((640, 640));
        let (output, params) = preprocessor.preprocess(&image).unwrap();

        assert_eq!(params.scale, 1.0);
        assert!((output[[0, 0, 100, 100]] - 1.0).abs() < 1e-6);
        assert!(output[[0, 1, 100, 100]].abs() < 1e-6);
        assert!((output[[0, 2, 100, 100]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_tiny_image_is_accepted() {
        let image = RgbImage::from_pixel(10, 10, Rgb([200, 0, 0]));

        let mut preprocessor = PreProcessor::new((320, 320));
        let (output, params) = preprocessor.preprocess(&image).unwrap();

        assert_eq!(output.shape(), &[1, 3, 320, 320]);
        assert_eq!(params.scale, 32.0);
    }
}
