//! Shared utility functions for trajforge.

pub mod json_extraction;

pub use json_extraction::{
    extract_json_object, fenced_blocks, find_matching_brace, FencedBlock, JsonExtractionError,
};
