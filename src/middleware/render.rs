use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use super::error::AuthError;

/// Edge length of rendered QR images, in pixels.
pub(crate) const QR_IMAGE_SIZE: u32 = 150;

/// Renders `data` as a square PNG without a quiet zone.
pub(crate) fn qr_png(data: &str) -> Result<Vec<u8>, AuthError> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| AuthError::Internal(format!("QR encoding failed: {e}")))?;

    let modules = code.render::<Luma<u8>>().quiet_zone(false).build();
    let scaled = imageops::resize(&modules, QR_IMAGE_SIZE, QR_IMAGE_SIZE, FilterType::Nearest);

    let mut png = Cursor::new(Vec::new());
    scaled
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| AuthError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(png.into_inner())
}
