//! Image Toolkit Backend
//!
//! This library provides the core functionality for the image-toolkit
//! system: job lifecycle management for asynchronous image transformations,
//! dispatch to external worker pools, worker status ingestion, and
//! token-gated premium access to processed results.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
