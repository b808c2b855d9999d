//! IIIF Presentation 2/3 parsing.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{IiifVersion, Manifest, PageDescriptor};

/// Why a document could not be turned into a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// The document is not a JSON object.
    #[error("manifest is not a JSON object")]
    NotAnObject,

    /// No canvases were found.
    #[error("manifest has no canvases")]
    NoCanvases,

    /// A canvas carries neither an image service nor an image resource.
    #[error("canvas {index} has no resolvable image")]
    CanvasWithoutImage {
        /// 0-based canvas position.
        index: usize,
    },
}

impl Manifest {
    /// Parses a fetched manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the document has no canvases or a
    /// canvas cannot be resolved to an image URL.
    pub fn from_json(raw: Value) -> Result<Self, ManifestError> {
        if !raw.is_object() {
            return Err(ManifestError::NotAnObject);
        }

        let version = detect_version(&raw);
        let canvases = match version {
            IiifVersion::V2 => raw
                .pointer("/sequences/0/canvases")
                .and_then(Value::as_array),
            IiifVersion::V3 => raw.get("items").and_then(Value::as_array),
        };
        let canvases = canvases
            .filter(|list| !list.is_empty())
            .ok_or(ManifestError::NoCanvases)?;

        let pages = canvases
            .iter()
            .enumerate()
            .map(|(index, canvas)| {
                let image = match version {
                    IiifVersion::V2 => canvas.pointer("/images/0/resource"),
                    IiifVersion::V3 => canvas
                        .pointer("/items/0/items/0/body")
                        .map(first_of),
                };
                image
                    .and_then(|image| page_from_image(index, image))
                    .ok_or(ManifestError::CanvasWithoutImage { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let label = raw.get("label").and_then(flatten_iiif_value).or_else(|| {
            raw.get("metadata")
                .and_then(Value::as_array)
                .and_then(|entries| title_from_metadata(entries))
        });
        let native_pdf_url = find_pdf_rendering(&raw);

        debug!(
            ?version,
            pages = pages.len(),
            has_native_pdf = native_pdf_url.is_some(),
            "parsed manifest"
        );

        Ok(Self {
            version,
            label,
            pages,
            native_pdf_url,
            raw,
        })
    }
}

fn detect_version(raw: &Value) -> IiifVersion {
    let context_mentions_v3 = match raw.get("@context") {
        Some(Value::String(context)) => context.contains("presentation/3"),
        Some(Value::Array(contexts)) => contexts
            .iter()
            .filter_map(Value::as_str)
            .any(|context| context.contains("presentation/3")),
        _ => false,
    };
    if context_mentions_v3 || (raw.get("sequences").is_none() && raw.get("items").is_some()) {
        IiifVersion::V3
    } else {
        IiifVersion::V2
    }
}

fn first_of(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(value),
        _ => value,
    }
}

fn id_of(value: &Value) -> Option<&str> {
    value
        .get("@id")
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn page_from_image(index: usize, image: &Value) -> Option<PageDescriptor> {
    if let Some(service_url) = image.get("service").map(first_of).and_then(id_of) {
        return Some(PageDescriptor::from_service(index, service_url));
    }
    id_of(image).map(|resource| PageDescriptor::from_resource(index, resource))
}

/// Flattens a IIIF text value (plain string, list, `@value` object or v3
/// language map) to its first non-empty string.
#[must_use]
pub fn flatten_iiif_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Array(items) => items.iter().find_map(flatten_iiif_value),
        Value::Object(map) => match map.get("@value") {
            Some(inner) => flatten_iiif_value(inner),
            None => {
                let preferred = ["none", "en"]
                    .iter()
                    .find_map(|lang| map.get(*lang).and_then(flatten_iiif_value));
                preferred.or_else(|| map.values().find_map(flatten_iiif_value))
            }
        },
        _ => None,
    }
}

fn title_from_metadata(entries: &[Value]) -> Option<String> {
    entries.iter().find_map(|entry| {
        let key = entry.get("label").and_then(flatten_iiif_value)?;
        if key.eq_ignore_ascii_case("title") {
            entry.get("value").and_then(flatten_iiif_value)
        } else {
            None
        }
    })
}

fn find_pdf_rendering(raw: &Value) -> Option<String> {
    let sequence_renderings = raw
        .get("sequences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|sequence| sequence.get("rendering"));

    std::iter::once(raw.get("rendering"))
        .flatten()
        .chain(sequence_renderings)
        .flat_map(|rendering| match rendering {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .find_map(|entry| {
            let id = id_of(entry)?;
            let format_is_pdf = entry
                .get("format")
                .and_then(Value::as_str)
                .is_some_and(|format| format.eq_ignore_ascii_case("application/pdf"));
            let path_is_pdf = id
                .split(['?', '#'])
                .next()
                .is_some_and(|path| path.to_ascii_lowercase().ends_with(".pdf"));
            (format_is_pdf || path_is_pdf).then(|| id.to_string())
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v2_manifest(canvas_count: usize) -> Value {
        let canvases: Vec<Value> = (0..canvas_count)
            .map(|i| {
                json!({
                    "@id": format!("https://example.org/canvas/{i}"),
                    "images": [{
                        "resource": {
                            "@id": format!("https://example.org/img/{i}/full/full/0/default.jpg"),
                            "service": {"@id": format!("https://example.org/img/{i}")}
                        }
                    }]
                })
            })
            .collect();
        json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "label": "Urb.lat.1779",
            "sequences": [{"canvases": canvases}]
        })
    }

    #[test]
    fn test_parse_v2_canvases_in_order() {
        let manifest = Manifest::from_json(v2_manifest(3)).unwrap();
        assert_eq!(manifest.version(), IiifVersion::V2);
        assert_eq!(manifest.label(), Some("Urb.lat.1779"));
        let pages = manifest.pages();
        assert_eq!(pages.len(), 3);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.index(), i);
            assert_eq!(
                page.fetch_url(),
                format!("https://example.org/img/{i}/full/max/0/default.jpg")
            );
        }
        assert_eq!(manifest.native_pdf_url(), None);
    }

    #[test]
    fn test_parse_v3_body_and_service_array() {
        let raw = json!({
            "@context": "http://iiif.io/api/presentation/3/context.json",
            "label": {"en": ["Book of Hours"]},
            "items": [
                {"items": [{"items": [{"body": {
                    "id": "https://example.org/a/full/max/0/default.jpg",
                    "service": [{"id": "https://example.org/a", "type": "ImageService3"}]
                }}]}]},
                {"items": [{"items": [{"body": [{
                    "id": "https://example.org/static/b.jpg"
                }]}]}]}
            ]
        });
        let manifest = Manifest::from_json(raw).unwrap();
        assert_eq!(manifest.version(), IiifVersion::V3);
        assert_eq!(manifest.label(), Some("Book of Hours"));
        assert_eq!(
            manifest.pages()[0].image_service_url(),
            Some("https://example.org/a")
        );
        assert_eq!(
            manifest.pages()[1].fetch_url(),
            "https://example.org/static/b.jpg"
        );
    }

    #[test]
    fn test_parse_detects_pdf_rendering() {
        let mut raw = v2_manifest(1);
        raw["sequences"][0]["rendering"] = json!([
            {"@id": "https://example.org/doc.txt", "format": "text/plain"},
            {"@id": "https://example.org/download", "format": "application/pdf"}
        ]);
        let manifest = Manifest::from_json(raw).unwrap();
        assert_eq!(manifest.native_pdf_url(), Some("https://example.org/download"));
    }

    #[test]
    fn test_parse_detects_pdf_by_extension_at_top_level() {
        let mut raw = v2_manifest(1);
        raw["rendering"] = json!({"@id": "https://example.org/full.PDF?dl=1"});
        let manifest = Manifest::from_json(raw).unwrap();
        assert_eq!(
            manifest.native_pdf_url(),
            Some("https://example.org/full.PDF?dl=1")
        );
    }

    #[test]
    fn test_parse_rejects_missing_canvases() {
        let raw = json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "sequences": [{"canvases": []}]
        });
        assert_eq!(Manifest::from_json(raw), Err(ManifestError::NoCanvases));
        assert_eq!(
            Manifest::from_json(json!({"label": "x"})),
            Err(ManifestError::NoCanvases)
        );
        assert_eq!(
            Manifest::from_json(json!([1, 2])),
            Err(ManifestError::NotAnObject)
        );
    }

    #[test]
    fn test_parse_rejects_canvas_without_image() {
        let mut raw = v2_manifest(2);
        raw["sequences"][0]["canvases"][1]["images"] = json!([]);
        assert_eq!(
            Manifest::from_json(raw),
            Err(ManifestError::CanvasWithoutImage { index: 1 })
        );
    }

    #[test]
    fn test_label_falls_back_to_metadata_title() {
        let mut raw = v2_manifest(1);
        raw.as_object_mut().unwrap().remove("label");
        raw["metadata"] = json!([
            {"label": "Shelfmark", "value": "Urb. lat. 1779"},
            {"label": "Title", "value": [{"@value": "Commedia", "@language": "it"}]}
        ]);
        let manifest = Manifest::from_json(raw).unwrap();
        assert_eq!(manifest.label(), Some("Commedia"));
    }

    #[test]
    fn test_flatten_iiif_value_variants() {
        assert_eq!(flatten_iiif_value(&json!(" a ")), Some("a".to_string()));
        assert_eq!(flatten_iiif_value(&json!(["", "b"])), Some("b".to_string()));
        assert_eq!(
            flatten_iiif_value(&json!({"it": ["c"]})),
            Some("c".to_string())
        );
        assert_eq!(
            flatten_iiif_value(&json!({"fr": ["x"], "none": ["d"]})),
            Some("d".to_string())
        );
        assert_eq!(flatten_iiif_value(&json!(42)), None);
    }
}
