//! Reference gallery construction from a directory of labeled images.
//!
//! Layout convention: `root/<label>/<any>.jpg` for people with several
//! reference photos, or `root/<label>.jpg` for a single one.

use crate::engine::{DetectOptions, EngineError, FaceEngine};
use crate::matcher::UNKNOWN_LABEL;
use crate::types::Descriptor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Accepted reference image extensions (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to create gallery directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to scan gallery directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Why one reference image was left out of the gallery.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face found")]
    NoFace,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("encoder returned no descriptor")]
    NoDescriptor,
}

/// Known identities: index-aligned descriptors and labels.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    descriptors: Vec<Descriptor>,
    labels: Vec<String>,
}

impl Gallery {
    pub fn push(&mut self, descriptor: Descriptor, label: String) {
        self.descriptors.push(descriptor);
        self.labels.push(label);
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Distinct labels, sorted.
    pub fn identities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// A candidate reference image and the label derived from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Identity label for `image` found under `root`.
///
/// Nested files take the name of their immediate parent directory; files
/// directly in `root` take their file stem. Paths outside `root` are treated
/// as flat. Empty labels and the unknown-face label are rejected.
pub fn derive_label(root: &Path, image: &Path) -> Option<String> {
    let relative = image
        .strip_prefix(root)
        .unwrap_or_else(|_| Path::new(image.file_name().unwrap_or_default()));

    let parts: Vec<_> = relative.components().collect();
    let label = if parts.len() >= 2 {
        parts[parts.len() - 2].as_os_str().to_str()?
    } else {
        relative.file_stem()?.to_str()?
    };

    if label.is_empty() || label.eq_ignore_ascii_case(UNKNOWN_LABEL) {
        return None;
    }
    Some(label.to_string())
}

/// List reference images under `root` with their labels, sorted by path.
///
/// A missing `root` is created and yields an empty list.
pub fn scan(root: &Path) -> Result<Vec<LabeledImage>, GalleryError> {
    if !root.exists() {
        tracing::info!(dir = %root.display(), "gallery directory not found, creating it");
        std::fs::create_dir_all(root).map_err(|source| GalleryError::CreateDir {
            path: root.to_path_buf(),
            source,
        })?;
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }
        match derive_label(root, entry.path()) {
            Some(label) => images.push(LabeledImage {
                path: entry.into_path(),
                label,
            }),
            None => tracing::warn!(
                path = %entry.path().display(),
                reserved = UNKNOWN_LABEL,
                "no usable label (empty or reserved), skipping"
            ),
        }
    }
    Ok(images)
}

/// Build the gallery from the reference images under `root`.
///
/// Images that fail to decode, contain no face, or fail to encode are skipped
/// with a warning. Only the first detected face of each image is used.
pub fn build<E: FaceEngine + ?Sized>(
    root: &Path,
    engine: &mut E,
    options: &DetectOptions,
) -> Result<Gallery, GalleryError> {
    let images = scan(root)?;
    let mut gallery = Gallery::default();

    if images.is_empty() {
        tracing::warn!(dir = %root.display(), "no reference images found; every face will be unknown");
        return Ok(gallery);
    }

    for LabeledImage { path, label } in images {
        match encode_reference(&path, engine, options) {
            Ok(descriptor) => {
                tracing::info!(label = %label, path = %path.display(), "loaded reference face");
                gallery.push(descriptor, label);
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "skipping reference image")
            }
        }
    }

    tracing::info!(
        faces = gallery.len(),
        identities = gallery.identities().len(),
        "gallery built"
    );
    Ok(gallery)
}

/// Descriptor of the first face in one reference image.
fn encode_reference<E: FaceEngine + ?Sized>(
    path: &Path,
    engine: &mut E,
    options: &DetectOptions,
) -> Result<Descriptor, ReferenceError> {
    let image = image::open(path)?.to_rgb8();

    let regions = engine.detect(&image, options)?;
    let first = regions.first().ok_or(ReferenceError::NoFace)?;

    engine
        .encode(&image, std::slice::from_ref(first))?
        .into_iter()
        .next()
        .ok_or(ReferenceError::NoDescriptor)
}
