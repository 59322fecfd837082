//! # nkips-core
//!
//! Routing state tracked for an NK router.
//!
//! This crate provides:
//! - The routing matrix (source per level and destination)
//! - The label store and its `.lbl` text format
//! - Crosspoint views composed from both

pub mod crosspoint;
pub mod error;
pub mod labels;
pub mod matrix;

pub use crosspoint::{CrossPointState, LevelSource};
pub use error::CoreError;
pub use labels::{Label, LabelStore, LabelUpdate, PortKind};
pub use matrix::RoutingMatrix;
