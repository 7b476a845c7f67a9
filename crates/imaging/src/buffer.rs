use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

/// Bytes per pixel for every supported layout.
pub const CHANNELS: usize = 4;
/// Index of the alpha byte inside a pixel, identical for both layouts.
pub const ALPHA: usize = 3;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode {width}x{height} image as {codec:?}: {message}")]
    Encode {
        codec: Codec,
        width: u32,
        height: u32,
        message: String,
    },
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("{len} bytes cannot hold a {width}x{height} image with {CHANNELS} channels")]
    Layout { width: u32, height: u32, len: usize },
}

/// Channel order of a 4-byte-per-pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    /// Byte offsets of red, green and blue inside one pixel.
    pub fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Rgba8 => [0, 1, 2],
            PixelFormat::Bgra8 => [2, 1, 0],
        }
    }

    /// Reorder a pixel between this layout and RGBA. The swap is its own inverse.
    fn swizzle(self, px: [u8; 4]) -> [u8; 4] {
        match self {
            PixelFormat::Rgba8 => px,
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
        }
    }
}

/// Lossless interchange codecs a buffer can be serialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Png,
    Bmp,
    Tiff,
}

impl Codec {
    fn image_format(self) -> ImageFormat {
        match self {
            Codec::Png => ImageFormat::Png,
            Codec::Bmp => ImageFormat::Bmp,
            Codec::Tiff => ImageFormat::Tiff,
        }
    }
}

/// An owned 4-channel raster: `height` rows of `stride` bytes each.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl ImageBuffer {
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        if data.len() != width as usize * height as usize * CHANNELS {
            return Err(CodecError::Layout { width, height, len: data.len() });
        }
        Ok(Self { width, height, format, data })
    }

    /// A buffer where every pixel has the given RGBA colour.
    pub fn filled(width: u32, height: u32, format: PixelFormat, rgba: [u8; 4]) -> Self {
        let px = format.swizzle(rgba);
        let data = px.repeat(width as usize * height as usize);
        Self { width, height, format, data }
    }

    /// Assemble a buffer from parts the caller has already sized correctly.
    pub(crate) fn from_parts(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * CHANNELS);
        Self { width, height, format, data }
    }

    pub fn from_rgba_image(img: RgbaImage, format: PixelFormat) -> Self {
        let (width, height) = img.dimensions();
        let mut data = img.into_raw();
        if format == PixelFormat::Bgra8 {
            for px in data.chunks_exact_mut(CHANNELS) {
                px.swap(0, 2);
            }
        }
        Self { width, height, format, data }
    }

    pub fn from_dynamic(img: &DynamicImage, format: PixelFormat) -> Self {
        Self::from_rgba_image(img.to_rgba8(), format)
    }

    /// Opaque buffer whose colour channels all carry the gray value.
    pub fn from_luma(gray: &GrayImage, format: PixelFormat) -> Self {
        let (width, height) = gray.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for p in gray.pixels() {
            let v = p[0];
            data.extend_from_slice(&[v, v, v, 255]);
        }
        Self { width, height, format, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row. Rows are tightly packed.
    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// The raw bytes viewed as an `RgbaImage` without reordering channels.
    /// Only meaningful for operations that treat every channel alike.
    pub(crate) fn as_channel_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .expect("pixel data length matches the dimensions")
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| y as usize * self.stride() + x as usize * CHANNELS)
    }

    /// Pixel bytes in this buffer's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let i = self.offset(x, y)?;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[i..i + CHANNELS]);
        Some(px)
    }

    /// Overwrite a pixel (own channel order). Returns `false` when outside the image.
    pub fn set_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) -> bool {
        match self.offset(x, y) {
            Some(i) => {
                self.data[i..i + CHANNELS].copy_from_slice(&px);
                true
            }
            None => false,
        }
    }

    /// Pixel as RGBA regardless of the buffer's layout.
    pub fn rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixel(x, y).map(|px| self.format.swizzle(px))
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut data = self.data.clone();
        if self.format == PixelFormat::Bgra8 {
            for px in data.chunks_exact_mut(CHANNELS) {
                px.swap(0, 2);
            }
        }
        RgbaImage::from_raw(self.width, self.height, data)
            .expect("pixel data length matches the dimensions")
    }

    /// BT.601 luma, using fixed-point weights so results are reproducible.
    pub fn to_luma(&self) -> GrayImage {
        let [r, g, b] = self.format.rgb_offsets();
        let mut gray = GrayImage::new(self.width, self.height);
        for (dst, px) in gray.pixels_mut().zip(self.data.chunks_exact(CHANNELS)) {
            let v = (px[r] as u32 * 4899 + px[g] as u32 * 9617 + px[b] as u32 * 1868 + 8192) >> 14;
            *dst = Luma([v as u8]);
        }
        gray
    }

    /// Apply `f` to the colour bytes of every pixel; alpha is left alone.
    pub(crate) fn map_color(&mut self, mut f: impl FnMut(u8) -> u8) {
        for px in self.data.chunks_exact_mut(CHANNELS) {
            for c in &mut px[..ALPHA] {
                *c = f(*c);
            }
        }
    }

    /// Serialize with a lossless codec.
    pub fn encode(&self, codec: Codec) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(self.to_rgba_image())
            .write_to(&mut Cursor::new(&mut buf), codec.image_format())
            .map_err(|e| CodecError::Encode {
                codec,
                width: self.width,
                height: self.height,
                message: e.to_string(),
            })?;
        Ok(buf)
    }

    /// Decode interchange bytes into a buffer with the requested layout.
    pub fn decode(bytes: &[u8], format: PixelFormat) -> Result<Self, CodecError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(&img, format))
    }

    /// Renderer-ready copy: BGRA8 with premultiplied alpha.
    pub fn to_display_bitmap(&self) -> DisplayBitmap {
        let mut data = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(CHANNELS) {
            let [r, g, b, a] = self.format.swizzle([px[0], px[1], px[2], px[3]]);
            let pm = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
            data.extend_from_slice(&[pm(b), pm(g), pm(r), a]);
        }
        DisplayBitmap { width: self.width, height: self.height, data }
    }
}

/// A premultiplied BGRA8 copy of a buffer, handed to whatever shows previews.
#[derive(Clone, PartialEq, Eq)]
pub struct DisplayBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for DisplayBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl DisplayBitmap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Straight-alpha RGBA image, e.g. for writing the preview to disk.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(CHANNELS) {
            let a = px[3];
            let un = |c: u8| {
                if a == 0 {
                    0
                } else {
                    ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
                }
            };
            out.extend_from_slice(&[un(px[2]), un(px[1]), un(px[0]), a]);
        }
        RgbaImage::from_raw(self.width, self.height, out)
            .expect("pixel data length matches the dimensions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(format: PixelFormat) -> ImageBuffer {
        let img = RgbaImage::from_fn(17, 9, |x, y| {
            image::Rgba([(x * 15) as u8, (y * 28) as u8, (x * y) as u8, 200 + (x % 50) as u8])
        });
        ImageBuffer::from_rgba_image(img, format)
    }

    #[test]
    fn from_raw_checks_length() {
        let err = ImageBuffer::from_raw(2, 2, PixelFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert!(matches!(err, CodecError::Layout { len: 15, .. }));
        assert!(ImageBuffer::from_raw(2, 2, PixelFormat::Rgba8, vec![0; 16]).is_ok());
    }

    #[test]
    fn png_round_trip_is_byte_faithful() {
        for format in [PixelFormat::Rgba8, PixelFormat::Bgra8] {
            let buf = gradient(format);
            let bytes = buf.encode(Codec::Png).unwrap();
            assert_eq!(&bytes[..4], b"\x89PNG");
            let back = ImageBuffer::decode(&bytes, format).unwrap();
            assert_eq!(back, buf);
        }
    }

    #[test]
    fn bgra_layout_swaps_red_and_blue() {
        let buf = ImageBuffer::filled(1, 1, PixelFormat::Bgra8, [10, 20, 30, 40]);
        assert_eq!(buf.pixel(0, 0), Some([30, 20, 10, 40]));
        assert_eq!(buf.rgba(0, 0), Some([10, 20, 30, 40]));
    }

    #[test]
    fn accessors_are_bounds_checked() {
        let mut buf = ImageBuffer::filled(3, 2, PixelFormat::Rgba8, [0, 0, 0, 255]);
        assert_eq!(buf.stride(), 12);
        assert!(buf.pixel(3, 0).is_none());
        assert!(buf.pixel(0, 2).is_none());
        assert!(!buf.set_pixel(3, 1, [1, 2, 3, 4]));
        assert!(buf.set_pixel(2, 1, [1, 2, 3, 4]));
        assert_eq!(buf.pixel(2, 1), Some([1, 2, 3, 4]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            ImageBuffer::decode(b"not an image", PixelFormat::Rgba8),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn luma_honours_channel_order() {
        let red_rgba = ImageBuffer::filled(1, 1, PixelFormat::Rgba8, [255, 0, 0, 255]);
        let red_bgra = ImageBuffer::filled(1, 1, PixelFormat::Bgra8, [255, 0, 0, 255]);
        assert_eq!(red_rgba.to_luma().get_pixel(0, 0)[0], 76);
        assert_eq!(red_bgra.to_luma().get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn display_bitmap_premultiplies_without_consuming() {
        let buf = ImageBuffer::filled(4, 3, PixelFormat::Rgba8, [200, 100, 50, 128]);
        let bmp = buf.to_display_bitmap();
        assert_eq!((bmp.width(), bmp.height(), bmp.stride()), (4, 3, 16));
        assert_eq!(&bmp.as_bytes()[..4], &[25, 50, 100, 128]);
        // Source buffer is still usable.
        assert_eq!(buf.rgba(0, 0), Some([200, 100, 50, 128]));
    }

    #[test]
    fn image_views_keep_size_and_bytes() {
        let buf = ImageBuffer::filled(7, 3, PixelFormat::Bgra8, [10, 20, 30, 255]);
        let channels = buf.as_channel_image();
        assert_eq!(channels.dimensions(), (7, 3));
        assert_eq!(channels.as_raw().as_slice(), buf.as_bytes());
        let rgba = buf.to_rgba_image();
        assert_eq!(rgba.get_pixel(6, 2).0, [10, 20, 30, 255]);
        assert_eq!(buf.to_display_bitmap().to_rgba_image(), rgba);
    }

    #[test]
    fn opaque_display_bitmap_converts_back_exactly() {
        let buf = gradient(PixelFormat::Rgba8);
        let mut opaque = buf.to_rgba_image();
        for p in opaque.pixels_mut() {
            p[3] = 255;
        }
        let bmp =
            ImageBuffer::from_rgba_image(opaque.clone(), PixelFormat::Bgra8).to_display_bitmap();
        assert_eq!(bmp.to_rgba_image(), opaque);
    }
}
