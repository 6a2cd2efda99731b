use std::io::Cursor;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{EcLevel, QrCode, render::unicode},
    wagate_common::{Error, Result},
};

/// Edge length of rendered pairing codes, in pixels.
pub const QR_SIZE: u32 = 256;

/// Bounding box of generated image thumbnails.
pub const THUMBNAIL_SIZE: u32 = 72;

/// Render a pairing payload as a PNG, at least `QR_SIZE` square.
pub fn qr_png(payload: &str) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| Error::validation(format!("cannot encode pairing code: {e}")))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .build();

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::validation(format!("cannot write pairing image: {e}")))?;
    Ok(buf)
}

/// `data:image/png;base64,...` form of [`qr_png`], as persisted on the tenant.
pub fn qr_data_url(payload: &str) -> Result<String> {
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(qr_png(payload)?)
    ))
}

/// Half-block rendering for printing the code in a terminal.
pub fn qr_terminal(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| Error::validation(format!("cannot encode pairing code: {e}")))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// JPEG thumbnail fitting in `THUMBNAIL_SIZE` x `THUMBNAIL_SIZE`, aspect
/// ratio preserved.
pub fn thumbnail_jpeg(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::validation(format!("cannot decode image: {e}")))?;
    let thumb = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE).to_rgb8();

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(thumb)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|e| Error::validation(format!("cannot encode thumbnail: {e}")))?;
    Ok(buf)
}
