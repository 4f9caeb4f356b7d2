//! Retouchr — a small design editor whose layers panel stays reconciled,
//! in both directions, with an event-driven canvas object graph.
//!
//! The interesting machinery lives in [`layers`]: a pure reducer over a
//! hierarchical layer tree, a debounced canvas synchronizer, and a
//! fingerprint-keyed store for group layouts.  [`canvas`] owns the object
//! graph the tree mirrors; everything else is shell.

pub mod app;
pub mod canvas;
pub mod components;
pub mod io;
pub mod layers;
pub mod logger;
pub mod project;
