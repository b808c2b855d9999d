use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, DynamicImage, ImageDecoder, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use tracing::{debug, instrument, warn};

use super::PdfBuildError;

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// A page image ready for embedding as a `DCTDecode` stream.
struct JpegPage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    color_space: &'static str,
}

/// Assembles `images` into a PDF at `output`, one page per image.
///
/// Each page is sized to its image's pixel dimensions. JPEGs in gray or
/// RGB are embedded unchanged; anything else is re-encoded to an RGB JPEG.
/// Missing or undecodable images are skipped with a warning.
///
/// # Errors
///
/// Returns [`PdfBuildError::NoImages`] if no image was usable, or a
/// serialization/IO failure.
#[instrument(skip(images), fields(count = images.len(), output = %output.display()))]
pub fn generate_pdf_from_images(images: &[PathBuf], output: &Path) -> Result<(), PdfBuildError> {
    let pages: Vec<JpegPage> = images
        .iter()
        .filter_map(|path| match load_page(path) {
            Ok(page) => Some(page),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping page image");
                None
            }
        })
        .collect();

    if pages.is_empty() {
        return Err(PdfBuildError::NoImages);
    }

    let mut doc = build_document(pages)?;

    let part = output.with_extension("pdf.part");
    doc.save(&part).map_err(|source| PdfBuildError::Io {
        path: part.clone(),
        source,
    })?;
    std::fs::rename(&part, output).map_err(|source| PdfBuildError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    debug!("PDF assembled");
    Ok(())
}

fn load_page(path: &Path) -> Result<JpegPage, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;

    if data.starts_with(&JPEG_MAGIC) {
        let (width, height, color_type) = {
            let decoder =
                JpegDecoder::new(Cursor::new(data.as_slice())).map_err(|e| e.to_string())?;
            let (width, height) = decoder.dimensions();
            (width, height, decoder.color_type())
        };
        let color_space = match color_type {
            ColorType::L8 => Some("DeviceGray"),
            ColorType::Rgb8 => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            return Ok(JpegPage {
                data,
                width,
                height,
                color_space,
            });
        }
    }

    reencode_as_jpeg(&data)
}

fn reencode_as_jpeg(data: &[u8]) -> Result<JpegPage, String> {
    let decoded = image::load_from_memory(data).map_err(|e| e.to_string())?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;
    Ok(JpegPage {
        data: out,
        width: rgb.width(),
        height: rgb.height(),
        color_space: "DeviceRGB",
    })
}

fn build_document(pages: Vec<JpegPage>) -> Result<Document, PdfBuildError> {
    let pdf_error = |e: lopdf::Error| PdfBuildError::Pdf {
        reason: e.to_string(),
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let width = i64::from(page.width);
        let height = i64::from(page.height);

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => page.color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.data,
        );
        let image_id = doc.add_object(image);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(pdf_error)?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = i64::try_from(kids.len()).unwrap_or(i64::MAX);
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pdf::test_images::encoded;

    #[test]
    fn test_generate_embeds_one_page_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = dir.path().join("pag_0001.jpg");
        let png = dir.path().join("pag_0002.png");
        std::fs::write(&jpeg, encoded(40, 60, ImageFormat::Jpeg)).unwrap();
        std::fs::write(&png, encoded(30, 20, ImageFormat::Png)).unwrap();

        let output = dir.path().join("compiled.pdf");
        generate_pdf_from_images(&[jpeg, png], &output).unwrap();

        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert!(!dir.path().join("compiled.pdf.part").exists());
    }

    #[test]
    fn test_generate_skips_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = dir.path().join("pag_0001.jpg");
        std::fs::write(&jpeg, encoded(16, 16, ImageFormat::Jpeg)).unwrap();

        let output = dir.path().join("compiled.pdf");
        generate_pdf_from_images(&[jpeg, dir.path().join("pag_0002.jpg")], &output).unwrap();

        assert_eq!(Document::load(&output).unwrap().get_pages().len(), 1);
    }

    #[test]
    fn test_generate_without_usable_images() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("pag_0001.jpg");
        std::fs::write(&junk, b"not an image").unwrap();

        let err =
            generate_pdf_from_images(&[junk], &dir.path().join("compiled.pdf")).unwrap_err();
        assert!(matches!(err, PdfBuildError::NoImages));
        assert!(!dir.path().join("compiled.pdf").exists());
    }
}
