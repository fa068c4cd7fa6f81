//! Per-frame recognition loop: capture, detect, encode, match, record, render.

use crate::attendance::Attendance;
use crate::render::{Annotation, Renderer};
use presence_core::{Clock, DetectOptions, EuclideanMatcher, FaceEngine, Gallery, Identity, Matcher};
use presence_hw::frame::{downscale, effective_scale};
use presence_hw::{Frame, FrameSource};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tunables for one run of the loop.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub tolerance: f32,
    /// Downscale factor before detection; out-of-range values mean full size.
    pub resize: f32,
    pub detect: DetectOptions,
}

/// Shared quit flag, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The camera failed to deliver a frame.
    StreamEnded,
    /// The operator asked to quit.
    QuitRequested,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StreamEnded => f.write_str("camera stream ended"),
            ExitReason::QuitRequested => f.write_str("quit requested"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(ExitReason),
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub frames: u64,
    pub reason: ExitReason,
}

/// The single-threaded recognition loop.
pub struct Pipeline<S, E, R, C> {
    source: S,
    engine: E,
    renderer: R,
    gallery: Gallery,
    attendance: Attendance<C>,
    options: PipelineOptions,
    matcher: EuclideanMatcher,
    stop: StopSignal,
}

impl<S, E, R, C> Pipeline<S, E, R, C>
where
    S: FrameSource,
    E: FaceEngine,
    R: Renderer,
    C: Clock,
{
    pub fn new(
        source: S,
        engine: E,
        renderer: R,
        gallery: Gallery,
        attendance: Attendance<C>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            engine,
            renderer,
            gallery,
            attendance,
            options,
            matcher: EuclideanMatcher,
            stop: StopSignal::default(),
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn attendance(&self) -> &Attendance<C> {
        &self.attendance
    }

    /// Run until the camera fails or a stop is requested.
    pub fn run(&mut self) -> RunSummary {
        let mut frames = 0u64;
        loop {
            match self.step() {
                Step::Continue => frames += 1,
                Step::Exit(reason) => {
                    if reason == ExitReason::QuitRequested {
                        frames += 1;
                    }
                    return RunSummary { frames, reason };
                }
            }
        }
    }

    /// Process exactly one frame.
    pub fn step(&mut self) -> Step {
        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read frame");
                return Step::Exit(ExitReason::StreamEnded);
            }
        };

        let annotations = self.recognize(&frame);
        let identities: Vec<Identity> = annotations.iter().map(|a| a.identity.clone()).collect();
        self.attendance.record(&identities);

        if let Err(e) = self.renderer.render(&frame, &annotations) {
            tracing::warn!(error = %e, "render failed");
        }

        if self.stop.is_triggered() {
            Step::Exit(ExitReason::QuitRequested)
        } else {
            Step::Continue
        }
    }

    /// Detect, encode and match every face in `frame`.
    ///
    /// Regions come back in native frame coordinates. A failed detection means
    /// no faces; a failed encoding leaves every face unknown.
    fn recognize(&mut self, frame: &Frame) -> Vec<Annotation> {
        let scale = effective_scale(self.options.resize);
        let small = downscale(&frame.image, scale);

        let regions = match self.engine.detect(&small, &self.options.detect) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "detection failed");
                return Vec::new();
            }
        };
        if regions.is_empty() {
            return Vec::new();
        }

        let identities: Vec<Identity> = match self.engine.encode(&small, &regions) {
            Ok(descriptors) => descriptors
                .iter()
                .map(|d| self.matcher.identify(d, &self.gallery, self.options.tolerance))
                .collect(),
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "encoding failed");
                Vec::new()
            }
        };

        regions
            .iter()
            .enumerate()
            .map(|(i, region)| Annotation {
                region: region.rescale(small.dimensions(), frame.image.dimensions()),
                identity: identities.get(i).cloned().unwrap_or(Identity::Unknown),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use image::{Rgb, RgbImage};
    use presence_core::engine::EngineError;
    use presence_core::{AttendanceStore, Descriptor, FaceRegion, FixedClock};
    use presence_hw::CameraError;
    use std::collections::VecDeque;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    /// Plays back a fixed list of frames, advancing the clock before each one.
    struct ScriptedCamera {
        frames: VecDeque<RgbImage>,
        clock: FixedClock,
        tick: Duration,
    }

    impl FrameSource for ScriptedCamera {
        fn read(&mut self) -> Result<Frame, CameraError> {
            let image = self.frames.pop_front().ok_or(CameraError::EndOfStream)?;
            self.clock.advance(self.tick);
            Ok(Frame {
                image,
                timestamp: std::time::Instant::now(),
                sequence: 0,
            })
        }
    }

    /// One face per non-black pixel column 0 row; descriptor = red value.
    struct PixelEngine {
        detected_on: Vec<(u32, u32)>,
    }

    impl FaceEngine for PixelEngine {
        fn detect(
            &mut self,
            image: &RgbImage,
            _options: &DetectOptions,
        ) -> Result<Vec<FaceRegion>, EngineError> {
            self.detected_on.push(image.dimensions());
            Ok((0..image.width())
                .filter(|&x| image.get_pixel(x, 0).0[0] != 0)
                .map(|x| FaceRegion { top: 0, right: x + 1, bottom: 1, left: x })
                .collect())
        }

        fn encode(
            &mut self,
            image: &RgbImage,
            regions: &[FaceRegion],
        ) -> Result<Vec<Descriptor>, EngineError> {
            Ok(regions
                .iter()
                .map(|r| Descriptor::new(vec![image.get_pixel(r.left, 0).0[0] as f32]))
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        frames: Vec<Vec<Annotation>>,
    }

    impl Renderer for &mut RecordingRenderer {
        fn render(&mut self, _frame: &Frame, annotations: &[Annotation]) -> Result<(), RenderError> {
            self.frames.push(annotations.to_vec());
            Ok(())
        }
    }

    fn gallery() -> Gallery {
        let mut g = Gallery::default();
        g.push(Descriptor::new(vec![100.0]), "alice".into());
        g.push(Descriptor::new(vec![200.0]), "bob".into());
        g
    }

    /// Frame whose first row carries the given red values (0 = no face).
    fn frame(reds: &[u8]) -> RgbImage {
        let mut image = RgbImage::new(reds.len() as u32, 2);
        for (x, &r) in reds.iter().enumerate() {
            image.put_pixel(x as u32, 0, Rgb([r, 0, 0]));
        }
        image
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            tolerance: 0.5,
            resize: 1.0,
            detect: DetectOptions::default(),
        }
    }

    #[test]
    fn test_run_records_attendance_until_stream_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let clock = FixedClock::new(at(2, 9, 59, 0));
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![
                frame(&[100, 0, 50]),
                frame(&[0, 0, 0]),
                frame(&[100, 200, 0]),
            ]),
            clock: clock.clone(),
            tick: Duration::minutes(1),
        };
        let attendance = Attendance::open(AttendanceStore::new(&path), clock.clone()).unwrap();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            PixelEngine { detected_on: Vec::new() },
            &mut renderer,
            gallery(),
            attendance,
            options(),
        );

        let summary = pipeline.run();
        assert_eq!(summary.reason, ExitReason::StreamEnded);
        assert_eq!(summary.frames, 3);

        let snapshot = pipeline.attendance().snapshot().clone();
        let alice = snapshot.get("alice").unwrap();
        assert_eq!(alice.first_seen, at(2, 10, 0, 0));
        assert_eq!(alice.last_seen, at(2, 10, 2, 0));
        let bob = snapshot.get("bob").unwrap();
        assert_eq!(bob.first_seen, at(2, 10, 2, 0));
        assert_eq!(snapshot.len(), 2);
        drop(pipeline);

        let first = &renderer.frames[0];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].identity, Identity::Known("alice".into()));
        assert_eq!(first[1].identity, Identity::Unknown);
        assert!(renderer.frames[1].is_empty());

        let on_disk = AttendanceStore::new(&path).load_today(at(2, 0, 0, 0).date()).unwrap();
        assert_eq!(on_disk, snapshot);
    }

    #[test]
    fn test_empty_gallery_everything_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let clock = FixedClock::new(at(2, 9, 0, 0));
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![frame(&[100, 200])]),
            clock: clock.clone(),
            tick: Duration::seconds(1),
        };
        let attendance = Attendance::open(AttendanceStore::new(&path), clock).unwrap();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            PixelEngine { detected_on: Vec::new() },
            &mut renderer,
            Gallery::default(),
            attendance,
            options(),
        );

        assert_eq!(pipeline.step(), Step::Continue);
        assert!(pipeline.attendance().snapshot().is_empty());
        drop(pipeline);
        assert!(renderer.frames[0]
            .iter()
            .all(|a| a.identity == Identity::Unknown));
    }

    #[test]
    fn test_stop_signal_ends_after_current_frame() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::new(at(2, 9, 0, 0));
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![frame(&[100]), frame(&[100]), frame(&[100])]),
            clock: clock.clone(),
            tick: Duration::seconds(1),
        };
        let attendance =
            Attendance::open(AttendanceStore::new(dir.path().join("a.csv")), clock).unwrap();
        let stop = StopSignal::default();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            PixelEngine { detected_on: Vec::new() },
            &mut renderer,
            gallery(),
            attendance,
            options(),
        )
        .with_stop(stop.clone());

        assert_eq!(pipeline.step(), Step::Continue);
        stop.trigger();
        let summary = pipeline.run();
        assert_eq!(summary.reason, ExitReason::QuitRequested);
        assert_eq!(summary.frames, 1);
        drop(pipeline);
        // The in-flight frame still completed and was rendered.
        assert_eq!(renderer.frames.len(), 2);
    }

    /// Finds one face everywhere but can never encode it.
    struct BrokenEncoder;

    impl FaceEngine for BrokenEncoder {
        fn detect(
            &mut self,
            _image: &RgbImage,
            _options: &DetectOptions,
        ) -> Result<Vec<FaceRegion>, EngineError> {
            Ok(vec![FaceRegion { top: 0, right: 1, bottom: 1, left: 0 }])
        }

        fn encode(
            &mut self,
            _image: &RgbImage,
            _regions: &[FaceRegion],
        ) -> Result<Vec<Descriptor>, EngineError> {
            Err(EngineError::Recognizer(
                presence_core::recognizer::RecognizerError::InferenceFailed("boom".into()),
            ))
        }
    }

    #[test]
    fn test_encode_failure_marks_faces_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::new(at(2, 9, 0, 0));
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![frame(&[100])]),
            clock: clock.clone(),
            tick: Duration::seconds(1),
        };
        let attendance =
            Attendance::open(AttendanceStore::new(dir.path().join("a.csv")), clock).unwrap();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            BrokenEncoder,
            &mut renderer,
            gallery(),
            attendance,
            options(),
        );

        assert_eq!(pipeline.step(), Step::Continue);
        assert!(pipeline.attendance().snapshot().is_empty());
        drop(pipeline);
        assert_eq!(renderer.frames[0].len(), 1);
        assert_eq!(renderer.frames[0][0].identity, Identity::Unknown);
    }

    #[test]
    fn test_downscaled_detection_maps_back_to_native() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::new(at(2, 9, 0, 0));
        let mut big = RgbImage::new(8, 8);
        for x in 0..8 {
            for y in 0..8 {
                big.put_pixel(x, y, Rgb([100, 0, 0]));
            }
        }
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![big]),
            clock: clock.clone(),
            tick: Duration::seconds(1),
        };
        let attendance =
            Attendance::open(AttendanceStore::new(dir.path().join("a.csv")), clock).unwrap();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            PixelEngine { detected_on: Vec::new() },
            &mut renderer,
            gallery(),
            attendance,
            PipelineOptions {
                resize: 0.5,
                ..options()
            },
        );

        pipeline.step();
        assert_eq!(pipeline.engine.detected_on, vec![(4, 4)]);
        drop(pipeline);
        let regions: Vec<FaceRegion> = renderer.frames[0].iter().map(|a| a.region).collect();
        assert_eq!(regions[1], FaceRegion { top: 0, right: 4, bottom: 2, left: 2 });
    }

    #[test]
    fn test_odd_frame_size_boxes_stay_inside_frame() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock::new(at(2, 9, 0, 0));
        let camera = ScriptedCamera {
            frames: VecDeque::from(vec![RgbImage::from_pixel(5, 5, Rgb([100, 0, 0]))]),
            clock: clock.clone(),
            tick: Duration::seconds(1),
        };
        let attendance =
            Attendance::open(AttendanceStore::new(dir.path().join("a.csv")), clock).unwrap();
        let mut renderer = RecordingRenderer::default();
        let mut pipeline = Pipeline::new(
            camera,
            PixelEngine { detected_on: Vec::new() },
            &mut renderer,
            gallery(),
            attendance,
            PipelineOptions {
                resize: 0.5,
                ..options()
            },
        );

        pipeline.step();
        assert_eq!(pipeline.engine.detected_on, vec![(3, 3)]);
        drop(pipeline);
        let last = renderer.frames[0].last().unwrap().region;
        assert_eq!(last, FaceRegion { top: 0, right: 5, bottom: 2, left: 3 });
    }
}
