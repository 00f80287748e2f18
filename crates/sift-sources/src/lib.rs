//! # Sift Sources
//!
//! Document search collaborators. arXiv is the only source today.

pub mod arxiv;

pub use arxiv::{parse_feed, ArxivSearch};
