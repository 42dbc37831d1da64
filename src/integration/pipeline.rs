//! TrackerPipeline for combining detection with tracking.

use thiserror::Error;

use crate::error::TrackError;
use crate::tracker::{BYTETracker, TrackedObject, TrackerConfig};

use super::DetectionSource;

#[derive(Debug, Error)]
pub enum PipelineError<E: std::fmt::Debug + std::fmt::Display> {
    #[error("detector failed: {0}")]
    Detector(E),
    #[error(transparent)]
    Tracker(#[from] TrackError),
}

/// Any `DetectionSource` bundled with a tracking session.
pub struct TrackerPipeline<D: DetectionSource> {
    detector: D,
    tracker: BYTETracker,
}

impl<D: DetectionSource> TrackerPipeline<D>
where
    D::Error: std::fmt::Debug + std::fmt::Display,
{
    pub fn new(detector: D, config: TrackerConfig) -> Result<Self, TrackError> {
        Ok(Self {
            detector,
            tracker: BYTETracker::new(config)?,
        })
    }

    pub fn with_default_config(detector: D) -> Result<Self, TrackError> {
        Self::new(detector, TrackerConfig::default())
    }

    /// Detect on one frame and feed the result to the tracker.
    ///
    /// # Arguments
    /// * `input` - Raw image bytes
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    pub fn process_frame(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<TrackedObject>, PipelineError<D::Error>> {
        let detections = self
            .detector
            .detect(input, width, height)
            .map_err(PipelineError::Detector)?;
        Ok(self.tracker.update(detections)?)
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn tracker(&self) -> &BYTETracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut BYTETracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Detection;

    struct MockDetector {
        frames: Vec<Vec<Detection>>,
    }

    impl DetectionSource for MockDetector {
        type Error = String;

        fn detect(
            &mut self,
            _input: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, Self::Error> {
            if self.frames.is_empty() {
                return Err("stream ended".to_string());
            }
            Ok(self.frames.remove(0))
        }
    }

    #[test]
    fn test_tracker_pipeline() {
        let detector = MockDetector {
            frames: vec![
                vec![Detection::new(10.0, 20.0, 50.0, 80.0, 0.9)],
                vec![Detection::new(12.0, 20.0, 52.0, 80.0, 0.9)],
            ],
        };

        let mut pipeline = TrackerPipeline::with_default_config(detector).unwrap();
        let first = pipeline.process_frame(&[], 640, 480).unwrap();
        let second = pipeline.process_frame(&[], 640, 480).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second[0].track_id, first[0].track_id);
        assert_eq!(pipeline.tracker().frame_id(), 2);

        assert!(matches!(
            pipeline.process_frame(&[], 640, 480),
            Err(PipelineError::Detector(_))
        ));
    }
}
