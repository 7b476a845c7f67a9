use scanfield_imaging::ImageBuffer;
use sha2::{Digest, Sha256};

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest of a decoded page: its dimensions followed by its pixel bytes.
///
/// Two encodings of the same raster (PNG vs. TIFF, different compression)
/// produce the same digest.
pub fn page_digest(page: &ImageBuffer) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(page.width().to_le_bytes());
    hasher.update(page.height().to_le_bytes());
    hasher.update(page.as_bytes());
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfield_imaging::{Codec, PixelFormat};

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(hex, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn page_digest_ignores_container_format() {
        let page = ImageBuffer::filled(9, 4, PixelFormat::Rgba8, [1, 2, 3, 255]);
        let decode = |codec| {
            ImageBuffer::decode(&page.encode(codec).unwrap(), PixelFormat::Rgba8).unwrap()
        };
        let (png, bmp) = (decode(Codec::Png), decode(Codec::Bmp));
        assert_eq!(page_digest(&png), page_digest(&bmp));
        assert_eq!(to_hex(&page_digest(&png)).len(), 64);
    }

    #[test]
    fn page_digest_depends_on_shape() {
        let wide = ImageBuffer::filled(8, 2, PixelFormat::Rgba8, [0, 0, 0, 255]);
        let tall = ImageBuffer::filled(2, 8, PixelFormat::Rgba8, [0, 0, 0, 255]);
        assert_eq!(wide.as_bytes(), tall.as_bytes());
        assert_ne!(page_digest(&wide), page_digest(&tall));
    }
}
