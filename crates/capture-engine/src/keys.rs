//! Storage key convention for capture artifacts.
//!
//! Primary-path and fallback-path keys must never collide: a retried job
//! that escalates to the fallback must not overwrite artifacts a previous
//! attempt already uploaded.

use inboxshot_core_types::{JobId, VisualMode};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CapturePath {
    Primary,
    Fallback,
}

pub fn artifact_key(job: JobId, mode: VisualMode, path: CapturePath) -> String {
    match path {
        CapturePath::Primary => format!("screenshots/{job}-{mode}.png"),
        CapturePath::Fallback => format!("screenshots/{job}-fallback-{mode}.png"),
    }
}
