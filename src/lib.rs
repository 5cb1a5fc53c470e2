//! Typepad archiver library.
//!
//! Crawls a paginated Typepad-style blog, downloads every post with its
//! assets and media, merges visually duplicate images, and rewrites post
//! content into a WordPress import.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archiver;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod dedup;
pub mod export;
pub mod fetch;
pub mod fs_utils;
pub mod html;
pub mod post;
pub mod progress;
pub mod rewriter;
