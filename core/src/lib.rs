//! Shared building blocks for the panorama pipeline
//!
//! Keypoints and matches, homography geometry, a seeded generic RANSAC
//! engine and global thread-pool setup.

pub mod error;
pub mod geometry;
pub mod keypoint;
pub mod robust;
pub mod runtime;

pub use error::{Error, Result};
pub use geometry::*;
pub use keypoint::*;
pub use robust::{Ransac, RobustConfig, RobustModel, RobustResult};
pub use runtime::{current_cpu_threads, init_global_thread_pool};
