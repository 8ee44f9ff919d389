//! Message features and their dispatch.
//!
//! Every incoming message segment is offered to the features in fixed
//! priority order; the first feature whose [`Feature::applies_to`] accepts
//! the segment handles it and no other feature sees it.
//!
//! | Priority | Feature | Trigger |
//! |----------|---------|---------|
//! | 1 | [`Feature::DuplicateImage`] | Image segment with a download URL |
//! | 2 | [`Feature::FeatureList`] | Text segment exactly `echo features` |

pub mod transport;

pub use transport::{OutgoingReply, TransportStats, serve_json_lines};

use crate::config::DupwatchConfig;
use crate::models::{MessageSegment, Sender, Submitter};
use crate::services::{
    DetectionOutcome, DuplicateDetector, FingerprintEngine, ImageFetcher, ImagePreprocessor,
};
use crate::storage::DuplicateStore;
use crate::Result;
use tracing::instrument;

/// Text command that lists the loaded features.
pub const FEATURE_LIST_COMMAND: &str = "echo features";

/// The closed set of message features, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Calls out images that have been posted before.
    DuplicateImage,
    /// Replies with the names of the loaded features.
    FeatureList,
}

impl Feature {
    /// All features, highest priority first.
    pub const ALL: [Self; 2] = [Self::DuplicateImage, Self::FeatureList];

    /// Feature name shown to users.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DuplicateImage => "dup_check",
            Self::FeatureList => "echo_features",
        }
    }

    /// Whether this feature handles `segment`.
    #[must_use]
    pub fn applies_to(self, segment: &MessageSegment) -> bool {
        match (self, segment) {
            (Self::DuplicateImage, MessageSegment::Image { .. }) => true,
            (Self::FeatureList, MessageSegment::Text { text }) => text == FEATURE_LIST_COMMAND,
            _ => false,
        }
    }

    /// The first feature that handles `segment`, if any.
    #[must_use]
    pub fn select(segment: &MessageSegment) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.applies_to(segment))
    }
}

/// Routes message segments to features and runs them.
///
/// Holds the whole duplicate-image pipeline. One dispatcher is built at
/// startup and shared across tasks.
#[derive(Debug)]
pub struct Dispatcher<S: DuplicateStore> {
    fetcher: ImageFetcher,
    preprocessor: ImagePreprocessor,
    engine: FingerprintEngine,
    detector: DuplicateDetector<S>,
}

impl<S: DuplicateStore> Dispatcher<S> {
    /// Creates a dispatcher from its parts.
    #[must_use]
    pub const fn new(
        fetcher: ImageFetcher,
        preprocessor: ImagePreprocessor,
        engine: FingerprintEngine,
        detector: DuplicateDetector<S>,
    ) -> Self {
        Self {
            fetcher,
            preprocessor,
            engine,
            detector,
        }
    }

    /// Builds the pipeline over `store` from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the fingerprint size is out of range,
    /// or [`crate::Error::OperationFailed`] if the HTTP client cannot be built.
    pub fn from_config(store: S, config: &DupwatchConfig) -> Result<Self> {
        let engine = FingerprintEngine::new(config.detection.fingerprint_size)?;
        let detector = DuplicateDetector::new(store, config.detection.clone())
            .with_scan_batch_size(config.store.scan_batch_size);

        Ok(Self::new(
            ImageFetcher::new(config.image.fetch_timeout())?,
            ImagePreprocessor::new(&config.image),
            engine,
            detector,
        ))
    }

    /// Returns the detector.
    pub const fn detector(&self) -> &DuplicateDetector<S> {
        &self.detector
    }

    /// Handles one segment and returns the reply text (empty for none).
    ///
    /// Fetch failures and image rejections end the segment quietly.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] if the duplicate store cannot be
    /// reached; the caller should log it and carry on with other messages.
    #[instrument(skip(self, segment, sender), fields(operation = "dispatch", kind = segment.kind()))]
    pub async fn handle(&self, segment: &MessageSegment, sender: &Sender) -> Result<String> {
        let Some(feature) = Feature::select(segment) else {
            return Ok(String::new());
        };
        tracing::debug!(feature = feature.name(), "Dispatching segment");

        match (feature, segment) {
            (Feature::DuplicateImage, MessageSegment::Image { url }) => {
                self.duplicate_image(url, sender).await
            },
            (Feature::FeatureList, _) => Ok(feature_list()),
            _ => Ok(String::new()),
        }
    }

    async fn duplicate_image(&self, url: &str, sender: &Sender) -> Result<String> {
        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url, error = %e, "Image fetch failed");
                return Ok(String::new());
            },
        };

        match self.check_image(&bytes, &Submitter::from(sender)).await {
            Ok(outcome) => Ok(outcome.message().to_string()),
            Err(e) if e.is_rejection() => {
                tracing::debug!(url, reason = %e, "Image skipped");
                metrics::counter!("images_rejected_total").increment(1);
                Ok(String::new())
            },
            Err(e) => Err(e),
        }
    }

    /// Runs validation, fingerprinting and detection on raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns a rejection error ([`crate::Error::is_rejection`]) for images that
    /// fail validation, or [`crate::Error::StoreUnavailable`].
    pub async fn check_image(
        &self,
        bytes: &[u8],
        reporter: &Submitter,
    ) -> Result<DetectionOutcome> {
        let info = self.preprocessor.validate(bytes)?;
        tracing::debug!(width = info.width, height = info.height, "Image accepted");
        let fingerprint = self.engine.compute(bytes)?;
        self.detector.check(&fingerprint, reporter).await
    }
}

/// Reply for the feature-list command.
#[must_use]
pub fn feature_list() -> String {
    let names: Vec<&str> = Feature::ALL
        .into_iter()
        .filter(|feature| *feature != Feature::FeatureList)
        .map(Feature::name)
        .collect();
    format!("Loaded features:\n{}", names.join(",\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::storage::MemoryDuplicateStore;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use test_case::test_case;

    fn text(s: &str) -> MessageSegment {
        MessageSegment::Text {
            text: s.to_string(),
        }
    }

    fn image_segment(url: &str) -> MessageSegment {
        MessageSegment::Image {
            url: url.to_string(),
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            if x < width / 3 && y > height / 2 {
                Rgb([220, 30, 30])
            } else if x > width / 2 {
                Rgb([20, 20, 160])
            } else {
                Rgb([200, 200, 200])
            }
        }));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn dispatcher() -> Dispatcher<MemoryDuplicateStore> {
        Dispatcher::from_config(MemoryDuplicateStore::new(), &DupwatchConfig::default()).unwrap()
    }

    #[test_case(image_segment("https://example.com/a.png"), Some(Feature::DuplicateImage) ; "image")]
    #[test_case(text("echo features"), Some(Feature::FeatureList) ; "list command")]
    #[test_case(text(" echo features"), None ; "padded command")]
    #[test_case(text("hello"), None ; "plain text")]
    #[test_case(MessageSegment::Other { kind: "face".to_string() }, None ; "other segment")]
    fn test_select(segment: MessageSegment, expected: Option<Feature>) {
        assert_eq!(Feature::select(&segment), expected);
    }

    #[test]
    fn test_feature_list_text() {
        assert_eq!(feature_list(), "Loaded features:\ndup_check");
    }

    #[tokio::test]
    async fn test_handle_feature_list() {
        let reply = dispatcher()
            .handle(&text("echo features"), &Sender::new(1, "alice"))
            .await
            .unwrap();
        assert_eq!(reply, feature_list());
    }

    #[tokio::test]
    async fn test_handle_unmatched_segment_is_silent() {
        let reply = dispatcher()
            .handle(&text("good morning"), &Sender::new(1, "alice"))
            .await
            .unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_silent() {
        let reply = dispatcher()
            .handle(&image_segment("not a url"), &Sender::new(1, "alice"))
            .await
            .unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_check_image_rejects_thumbnail() {
        let err = dispatcher()
            .check_image(&png(64, 64), &Submitter::new(1, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooSmall { .. }));
    }

    #[tokio::test]
    async fn test_check_image_repeat_calls_out() {
        let dispatcher = dispatcher();
        let bytes = png(600, 600);

        let first = dispatcher
            .check_image(&bytes, &Submitter::new(1, "alice"))
            .await
            .unwrap();
        assert!(matches!(first, DetectionOutcome::Recorded { .. }));

        let second = dispatcher
            .check_image(&bytes, &Submitter::new(2, "bob"))
            .await
            .unwrap();
        assert!(second.message().contains("bob"));
        assert!(second.message().contains("alice (1)"));
        assert_eq!(dispatcher.detector().store().len().unwrap(), 1);
    }
}
