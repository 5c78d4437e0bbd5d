//! Sentinel camera service
//!
//! This library provides the core of the sentinel-cam server: a live
//! recording controller that turns watched-label detections on a camera
//! stream into transcoded footage segments, and an upload job engine that
//! runs detection over submitted videos in the background.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
