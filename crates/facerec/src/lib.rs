//! Face analysis post-processing.
//!
//! This crate implements the numeric parts of a face recognition pipeline that runs around two
//! externally executed neural networks (a RetinaFace-style detector and an embedding network):
//!
//! 1. [`detection`]: raw detector outputs are filtered, decoded against the network's anchor
//!    table, de-duplicated with non-maximum suppression and mapped into frame coordinates.
//! 2. [`align`]: the 5 facial landmarks of a detection are aligned to a canonical template by
//!    solving for a similarity transform. The transform is handed to an external warp to produce
//!    the crop that is fed to the embedding network.
//! 3. [`recognition`]: the resulting embedding is matched against an [`EnrollmentStore`] of
//!    enrolled faces.
//!
//! Model execution, image resizing and warping, and drawing are not part of this crate.
//!
//! # Coordinates
//!
//! Detector outputs are normalized to the longer side of the network input (the input image is
//! padded to a square on the right/bottom before resizing). [`Detector::detect`] converts them to
//! pixel coordinates of the original frame, with X pointing right and Y pointing down.
//!
//! # Environment Variables
//!
//! The `facerec` binary reads the following variables:
//!
//! * `FACEREC_DB_DIR`: directory holding the enrolled faces (default `./facedb`).
//! * `FACEREC_DB_CAPACITY`: maximum number of enrolled faces (default 100).
//! * `FACEREC_RECOGNITION_THRESHOLD`: score above which a face counts as recognized (default 75).
//!
//! Logging is configured via `RUST_LOG`, see [`init_logger!`].
//!
//! [`EnrollmentStore`]: recognition::store::EnrollmentStore
//! [`Detector::detect`]: detection::Detector::detect

pub mod align;
pub mod detection;
pub mod num;
pub mod recognition;
pub mod rect;
pub mod resolution;
pub mod timer;

#[cfg(test)]
mod test;

use log::LevelFilter;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `facerec` will log at *trace*
/// level. Otherwise, they will log at *debug* level. `RUST_LOG` takes precedence over both.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
