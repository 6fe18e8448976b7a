//! Signal processing stages of the tracking loop
//!
//! - [`MotionNoiseFilter`]: drops GPS jitter fixes
//! - [`HeadingFusion`]: smoothed compass heading from orientation sensors

pub mod heading_fusion;
pub mod noise_filter;

pub use heading_fusion::HeadingFusion;
pub use noise_filter::MotionNoiseFilter;
