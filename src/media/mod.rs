//! # Media Container Handling
//!
//! Byte-level tooling that turns per-turn slices of a chunked WebM recording
//! into buffers a standard decoder can play from offset zero.
//!
//! ## Components:
//! - **vint**: EBML variable-length integers, fixed-width writes, marker search
//! - **webm**: header detection, initialization segment cache, timecode rebasing

pub mod vint;
pub mod webm;

pub use webm::{make_playable, InitSegmentCache};
