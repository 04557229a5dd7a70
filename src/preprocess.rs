use candle_core::{DType, Device, Result, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};

/// 8-bit grayscale using ITU-R 601-2 luma weights in 16-bit fixed point, rounded
/// to nearest. Alpha is dropped.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            image.to_luma8()
        }
        _ => {
            let rgb = image.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                let luma = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
                Luma([luma as u8])
            })
        }
    }
}

/// Turns a decoded image into a `(1, 3, size, size)` tensor normalized with
/// mean 0.5 and std 0.5 per channel.
pub fn image_to_tensor(image: &DynamicImage, size: u32, device: &Device) -> Result<Tensor> {
    let gray = to_grayscale(image);
    let resized = image::imageops::resize(&gray, size, size, FilterType::Triangle);
    let (width, height) = (resized.width() as usize, resized.height() as usize);

    Tensor::from_vec(resized.into_raw(), (height, width), &Device::Cpu)?
        .to_dtype(DType::F32)?
        .affine(1.0 / 127.5, -1.0)?
        .unsqueeze(0)?
        .repeat((3, 1, 1))?
        .unsqueeze(0)?
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage, Rgba};

    #[test]
    fn rgb_uses_601_luma_weights() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([200, 100, 50]));
        let gray = to_grayscale(&DynamicImage::ImageRgb8(rgb));
        // 200*0.299 + 100*0.587 + 50*0.114 = 124.2
        assert_eq!(gray.get_pixel(0, 0).0, [124]);
    }

    #[test]
    fn luma_rounds_to_nearest() {
        let rgb = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([1, 1, 0]),
            1 => Rgb([3, 0, 0]),
            _ => Rgb([255, 255, 255]),
        });
        let gray = to_grayscale(&DynamicImage::ImageRgb8(rgb));
        // 0.886 and 0.897 round up; white stays white.
        assert_eq!(gray.as_raw(), &vec![1, 1, 255]);
    }

    #[test]
    fn alpha_is_ignored() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        let gray = to_grayscale(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(gray.get_pixel(0, 0).0, [255]);
    }

    #[test]
    fn tensor_shape_and_normalization() -> Result<()> {
        let mut gray = GrayImage::from_pixel(40, 20, Luma([0]));
        for x in 20..40 {
            for y in 0..20 {
                gray.put_pixel(x, y, Luma([255]));
            }
        }
        let tensor = image_to_tensor(&DynamicImage::ImageLuma8(gray), 16, &Device::Cpu)?;
        assert_eq!(tensor.dims(), &[1, 3, 16, 16]);

        let values = tensor.squeeze(0)?.to_vec3::<f32>()?;
        assert!((values[0][8][0] - -1.0).abs() < 1e-6);
        assert!((values[0][8][15] - 1.0).abs() < 1e-6);
        assert_eq!(values[0], values[1]);
        assert_eq!(values[1], values[2]);

        let min = tensor.flatten_all()?.min(0)?.to_scalar::<f32>()?;
        let max = tensor.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert!(min >= -1.0 && max <= 1.0);
        Ok(())
    }
}
