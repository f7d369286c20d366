//! bookshot library.
//!
//! Drives a real browser through a vendor's canvas-rendered e-book reader
//! and captures each page as a PNG. The interesting part is the page-capture
//! synchronization in [`controller`]: commanding the remote page-flip
//! viewer, confirming arrival, waiting out loading overlays, and rejecting
//! blank or stale frames before anything touches disk.

pub mod auth;
pub mod book;
pub mod capture;
pub mod config;
pub mod controller;
pub mod cookies;
pub mod error;
pub mod flow;
pub mod poll;
pub mod session;
pub mod site;
pub mod viewer;

pub use error::Error;
