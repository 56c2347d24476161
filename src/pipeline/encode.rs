//! Bitmap encoding: [`Bitmap`] → base64 PNG wrapped in `ImageData`.
//!
//! PNG over JPEG: lossless compression keeps rendered text crisp, and text
//! crispness matters far more to transcription accuracy than upload size.
//! `detail: "high"` asks GPT-4-class models for the full tile budget so fine
//! print and small tables survive.

use crate::pipeline::render::Bitmap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered unit as a base64 PNG ready for the VLM API.
pub fn encode_bitmap(bitmap: &Bitmap) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    bitmap
        .image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Unit {}: encoded {} bytes base64", bitmap.index, b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
