use std::error::Error;

pub mod api;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod model;
pub mod render;
pub mod sync;
pub mod vault;

/// Flattens an error and its source chain into one line for log output.
pub fn unpack_error(err: &dyn Error) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
