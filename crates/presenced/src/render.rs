//! Annotated frame output.

use image::{Rgb, RgbImage};
use presence_core::{FaceRegion, Identity};
use presence_hw::Frame;
use std::path::PathBuf;
use thiserror::Error;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_BAR_HEIGHT: u32 = 20;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to write preview {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// One detected face in native frame coordinates.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub region: FaceRegion,
    pub identity: Identity,
}

/// Display surface for the per-frame results.
pub trait Renderer {
    fn render(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), RenderError>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), RenderError> {
        (**self).render(frame, annotations)
    }
}

/// Renderer for headless runs.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &Frame, annotations: &[Annotation]) -> Result<(), RenderError> {
        for a in annotations {
            tracing::trace!(label = %a.identity, region = ?a.region, "face");
        }
        Ok(())
    }
}

/// Writes each annotated frame over the same image file.
pub struct PreviewRenderer {
    path: PathBuf,
}

impl PreviewRenderer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Renderer for PreviewRenderer {
    fn render(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), RenderError> {
        let mut canvas = frame.image.clone();
        draw_annotations(&mut canvas, annotations);
        for a in annotations {
            tracing::debug!(label = %a.identity, region = ?a.region, "face");
        }
        canvas.save(&self.path).map_err(|source| RenderError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Draw a box per face plus a filled label bar along its bottom edge.
pub fn draw_annotations(canvas: &mut RgbImage, annotations: &[Annotation]) {
    for a in annotations {
        let color = match a.identity {
            Identity::Known(_) => KNOWN_COLOR,
            Identity::Unknown => UNKNOWN_COLOR,
        };
        let r = clamp_region(&a.region, canvas.width(), canvas.height());
        if r.is_empty() {
            continue;
        }

        let t = BOX_THICKNESS.min(r.width()).min(r.height());
        fill(canvas, r.left, r.top, r.right, r.top + t, color);
        fill(canvas, r.left, r.bottom - t, r.right, r.bottom, color);
        fill(canvas, r.left, r.top, r.left + t, r.bottom, color);
        fill(canvas, r.right - t, r.top, r.right, r.bottom, color);

        let bar_top = r.bottom.saturating_sub(LABEL_BAR_HEIGHT).max(r.top);
        fill(canvas, r.left, bar_top, r.right, r.bottom, color);
    }
}

fn clamp_region(region: &FaceRegion, width: u32, height: u32) -> FaceRegion {
    FaceRegion {
        top: region.top.min(height),
        right: region.right.min(width),
        bottom: region.bottom.min(height),
        left: region.left.min(width),
    }
}

/// Fill the half-open rectangle [x0, x1) x [y0, y1).
fn fill(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(top: u32, right: u32, bottom: u32, left: u32, identity: Identity) -> Annotation {
        Annotation {
            region: FaceRegion { top, right, bottom, left },
            identity,
        }
    }

    #[test]
    fn test_box_edges_and_label_bar() {
        let mut canvas = RgbImage::new(100, 100);
        draw_annotations(
            &mut canvas,
            &[annotation(10, 60, 70, 20, Identity::Known("alice".into()))],
        );
        // Top edge, left edge.
        assert_eq!(canvas.get_pixel(30, 10), &KNOWN_COLOR);
        assert_eq!(canvas.get_pixel(20, 30), &KNOWN_COLOR);
        // Interior above the label bar stays untouched.
        assert_eq!(canvas.get_pixel(40, 30), &Rgb([0, 0, 0]));
        // Label bar is filled.
        assert_eq!(canvas.get_pixel(40, 60), &KNOWN_COLOR);
        // Outside the box.
        assert_eq!(canvas.get_pixel(70, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_unknown_uses_other_color() {
        let mut canvas = RgbImage::new(50, 50);
        draw_annotations(&mut canvas, &[annotation(0, 30, 30, 0, Identity::Unknown)]);
        assert_eq!(canvas.get_pixel(0, 0), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_region_past_edge_is_clipped() {
        let mut canvas = RgbImage::new(40, 40);
        draw_annotations(
            &mut canvas,
            &[annotation(30, 90, 95, 35, Identity::Known("bob".into()))],
        );
        assert_eq!(canvas.get_pixel(39, 39), &KNOWN_COLOR);
    }

    #[test]
    fn test_region_fully_outside_is_ignored() {
        let mut canvas = RgbImage::new(40, 40);
        draw_annotations(&mut canvas, &[annotation(50, 90, 95, 60, Identity::Unknown)]);
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_preview_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let frame = Frame {
            image: RgbImage::new(32, 32),
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        let mut renderer = PreviewRenderer::new(path.clone());
        renderer
            .render(&frame, &[annotation(2, 20, 20, 2, Identity::Unknown)])
            .unwrap();
        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (32, 32));
        assert_eq!(written.get_pixel(2, 2), &UNKNOWN_COLOR);
    }
}
