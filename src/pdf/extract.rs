use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, instrument};

use super::ExtractionError;
use crate::manifest::page_filename;

/// Parent chains deeper than this are treated as malformed.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Writes the main raster image of every page in `pdf` into `staging_dir`.
///
/// For each page, in document order, the largest image XObject is taken.
/// `DCTDecode` images are written verbatim; 8-bit gray or RGB images that
/// are uncompressed or `FlateDecode`d are re-encoded as JPEG. Resources
/// are inherited through the page tree's `Parent` links. Pages drawn only
/// with vector content, or holding only JPX/JBIG2/CCITT images, have
/// nothing extractable.
///
/// # Errors
///
/// Returns [`ExtractionError`] if the PDF is unreadable or encrypted, its
/// page count differs from `expected_pages`, a page has no usable image,
/// or an image's pixel data does not decode.
#[instrument(fields(pdf = %pdf.display(), staging = %staging_dir.display()))]
pub fn extract_page_images(
    pdf: &Path,
    staging_dir: &Path,
    expected_pages: usize,
) -> Result<Vec<PathBuf>, ExtractionError> {
    let doc = Document::load(pdf).map_err(|e| ExtractionError::Open {
        path: pdf.to_path_buf(),
        reason: e.to_string(),
    })?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(ExtractionError::Encrypted {
            path: pdf.to_path_buf(),
        });
    }

    let pages = doc.get_pages();
    if pages.len() != expected_pages {
        return Err(ExtractionError::PageCountMismatch {
            expected: expected_pages,
            found: pages.len(),
        });
    }

    // Decode every page before touching the disk.
    let mut images = Vec::with_capacity(pages.len());
    for (&page_number, &page_id) in &pages {
        let (stream, kind) = largest_image(&doc, page_id)
            .ok_or(ExtractionError::MissingImage { page: page_number })?;
        let jpeg = match kind {
            ImageKind::Jpeg => stream.content.clone(),
            ImageKind::Raw(layout) => reencode_raw(stream, layout).map_err(|reason| {
                ExtractionError::Decode {
                    page: page_number,
                    reason,
                }
            })?,
        };
        images.push(jpeg);
    }

    std::fs::create_dir_all(staging_dir).map_err(|source| ExtractionError::Io {
        path: staging_dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(images.len());
    for (index, jpeg) in images.into_iter().enumerate() {
        let path = staging_dir.join(page_filename(index));
        std::fs::write(&path, &jpeg).map_err(|source| ExtractionError::Io {
            path: path.clone(),
            source,
        })?;
        written.push(path);
    }

    debug!(pages = written.len(), "extracted page images");
    Ok(written)
}

/// How an image XObject's pixels are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    /// A complete JPEG file.
    Jpeg,
    /// Packed 8-bit samples.
    Raw(RawLayout),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawLayout {
    width: u32,
    height: u32,
    channels: u8,
    deflated: bool,
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// The page's effective `Resources` dictionary, following `Parent` links.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok();
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let dict = node?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve(doc, resources).and_then(|o| o.as_dict().ok());
        }
        node = dict
            .get(b"Parent")
            .ok()
            .and_then(|parent| resolve(doc, parent))
            .and_then(|o| o.as_dict().ok());
    }
    None
}

fn integer(dict: &Dictionary, key: &[u8]) -> i64 {
    match dict.get(key) {
        Ok(Object::Integer(value)) => *value,
        _ => 0,
    }
}

fn filter_names(stream: &Stream) -> Option<Vec<&[u8]>> {
    match stream.dict.get(b"Filter") {
        Err(_) => Some(Vec::new()),
        Ok(Object::Name(name)) => Some(vec![name.as_slice()]),
        Ok(Object::Array(filters)) => filters
            .iter()
            .map(|filter| match filter {
                Object::Name(name) => Some(name.as_slice()),
                _ => None,
            })
            .collect(),
        Ok(_) => None,
    }
}

/// Components per pixel for gray and RGB colour spaces.
fn color_channels(doc: &Document, stream: &Stream) -> Option<u8> {
    let color_space = resolve(doc, stream.dict.get(b"ColorSpace").ok()?)?;
    match color_space {
        Object::Name(name) if name == b"DeviceGray" || name == b"CalGray" => Some(1),
        Object::Name(name) if name == b"DeviceRGB" || name == b"CalRGB" => Some(3),
        Object::Array(parts) => match parts.as_slice() {
            [Object::Name(family), profile] if family == b"ICCBased" => {
                let profile = resolve(doc, profile)?.as_stream().ok()?;
                match integer(&profile.dict, b"N") {
                    1 => Some(1),
                    3 => Some(3),
                    _ => None,
                }
            }
            [Object::Name(family), ..] if family == b"CalGray" => Some(1),
            [Object::Name(family), ..] if family == b"CalRGB" => Some(3),
            _ => None,
        },
        _ => None,
    }
}

fn image_kind(doc: &Document, stream: &Stream) -> Option<ImageKind> {
    let is_image = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
    if !is_image || matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return None;
    }
    let filters = filter_names(stream)?;
    let deflated = match filters.as_slice() {
        [name] if *name == b"DCTDecode" => return Some(ImageKind::Jpeg),
        [] => false,
        [name] if *name == b"FlateDecode" => true,
        _ => return None,
    };
    if integer(&stream.dict, b"BitsPerComponent") != 8 {
        return None;
    }
    Some(ImageKind::Raw(RawLayout {
        width: u32::try_from(integer(&stream.dict, b"Width")).ok()?,
        height: u32::try_from(integer(&stream.dict, b"Height")).ok()?,
        channels: color_channels(doc, stream)?,
        deflated,
    }))
}

fn pixel_area(stream: &Stream) -> i64 {
    integer(&stream.dict, b"Width").saturating_mul(integer(&stream.dict, b"Height"))
}

fn largest_image(doc: &Document, page_id: ObjectId) -> Option<(&Stream, ImageKind)> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

    xobjects
        .iter()
        .filter_map(|(_, object)| resolve(doc, object)?.as_stream().ok())
        .filter_map(|stream| Some((stream, image_kind(doc, stream)?)))
        .max_by_key(|(stream, _)| (pixel_area(stream), stream.content.len()))
}

fn reencode_raw(stream: &Stream, layout: RawLayout) -> Result<Vec<u8>, String> {
    let mut samples = if layout.deflated {
        stream.decompressed_content().map_err(|e| e.to_string())?
    } else {
        stream.content.clone()
    };

    let expected = u64::from(layout.width) * u64::from(layout.height) * u64::from(layout.channels);
    let expected = usize::try_from(expected).map_err(|e| e.to_string())?;
    if samples.len() < expected {
        return Err(format!(
            "{}x{} image needs {expected} bytes of samples, found {}",
            layout.width,
            layout.height,
            samples.len()
        ));
    }
    samples.truncate(expected);

    let (width, height) = (layout.width, layout.height);
    let image = match layout.channels {
        1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
    }
    .ok_or_else(|| "sample buffer does not match image dimensions".to_string())?;

    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::ImageFormat;
    use lopdf::dictionary;

    use super::*;
    use crate::pdf::generate_pdf_from_images;
    use crate::pdf::test_images::encoded;

    fn write_jpegs(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("src_{i}.jpg"));
                let width = 20 + 4 * u32::try_from(i).unwrap();
                std::fs::write(&path, encoded(width, 30, ImageFormat::Jpeg)).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_extract_from_generated_pdf_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_jpegs(dir.path(), 3);
        let pdf = dir.path().join("book.pdf");
        generate_pdf_from_images(&sources, &pdf).unwrap();

        let staging = dir.path().join("staging");
        let pages = extract_page_images(&pdf, &staging, 3).unwrap();

        assert_eq!(pages.len(), 3);
        for (index, (page, source)) in pages.iter().zip(&sources).enumerate() {
            assert_eq!(page.file_name().unwrap(), page_filename(index).as_str());
            assert_eq!(std::fs::read(page).unwrap(), std::fs::read(source).unwrap());
        }
    }

    #[test]
    fn test_extract_page_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_jpegs(dir.path(), 2);
        let pdf = dir.path().join("book.pdf");
        generate_pdf_from_images(&sources, &pdf).unwrap();

        let err = extract_page_images(&pdf, &dir.path().join("staging"), 5).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::PageCountMismatch {
                expected: 5,
                found: 2
            }
        ));
        assert!(!dir.path().join("staging").exists());
    }

    #[test]
    fn test_extract_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("broken.pdf");
        std::fs::write(&pdf, b"<html>blocked</html>").unwrap();

        let err = extract_page_images(&pdf, &dir.path().join("staging"), 1).unwrap_err();
        assert!(matches!(err, ExtractionError::Open { .. }));
    }

    /// One-page PDF whose resources are `resources`.
    fn single_page_pdf(path: &Path, build: impl FnOnce(&mut Document) -> Dictionary) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let resources = build(&mut doc);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Resources" => resources,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    fn raw_image(width: i64, height: i64, color_space: &str, samples: Vec<u8>) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
            },
            samples,
        )
    }

    #[test]
    fn test_extract_page_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("text-only.pdf");
        single_page_pdf(&pdf, |_| dictionary! {});

        let err = extract_page_images(&pdf, &dir.path().join("staging"), 1).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingImage { page: 1 }));
    }

    #[test]
    fn test_extract_flate_rgb_page_as_jpeg() {
        let (width, height) = (24u32, 16u32);
        let samples: Vec<u8> = (0..width * height)
            .flat_map(|_| [200u8, 30, 30])
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("flate.pdf");
        single_page_pdf(&pdf, |doc| {
            let mut image = raw_image(width.into(), height.into(), "DeviceRGB", samples);
            image.compress().unwrap();
            assert!(image.dict.get(b"Filter").is_ok());
            let image_id = doc.add_object(image);
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
        });

        let pages = extract_page_images(&pdf, &dir.path().join("staging"), 1).unwrap();
        let bytes = std::fs::read(&pages[0]).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (width, height));
        let pixel = decoded.get_pixel(width / 2, height / 2);
        assert!(pixel[0] > 150 && pixel[1] < 80 && pixel[2] < 80, "{pixel:?}");
    }

    #[test]
    fn test_extract_uncompressed_gray_page() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("gray.pdf");
        single_page_pdf(&pdf, |doc| {
            let image_id = doc.add_object(raw_image(10, 8, "DeviceGray", vec![90; 80]));
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
        });

        let pages = extract_page_images(&pdf, &dir.path().join("staging"), 1).unwrap();
        let decoded = image::load_from_memory(&std::fs::read(&pages[0]).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 8));
    }

    #[test]
    fn test_extract_short_sample_buffer_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("short.pdf");
        single_page_pdf(&pdf, |doc| {
            let image_id = doc.add_object(raw_image(10, 10, "DeviceRGB", vec![0; 30]));
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
        });

        let staging = dir.path().join("staging");
        let err = extract_page_images(&pdf, &staging, 1).unwrap_err();
        assert!(matches!(err, ExtractionError::Decode { page: 1, .. }));
        assert!(!staging.exists());
    }

    #[test]
    fn test_extract_skips_unsupported_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("jpx.pdf");
        single_page_pdf(&pdf, |doc| {
            let mut image = raw_image(10, 10, "DeviceRGB", vec![0; 64]);
            image.dict.set("Filter", "JPXDecode");
            let image_id = doc.add_object(image);
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
        });

        let err = extract_page_images(&pdf, &dir.path().join("staging"), 1).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingImage { page: 1 }));
    }
}
