mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::{StubBackend, STUB_CONFIDENCE};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{
    non_max_suppression, BoundingBox, Detection, DetectionResult, DEFAULT_IOU_THRESHOLD,
    DEFAULT_SCORE_FLOOR, PERSON_CLASS_ID,
};
