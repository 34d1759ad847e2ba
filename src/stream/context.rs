// SPDX-License-Identifier: GPL-3.0-only

//! Explicit processing context
//!
//! Holds the transform graph that would otherwise be a process-wide
//! singleton. Cloning a context is cheap and shares it. Stream identities are
//! drawn from one process-wide counter so streams of different contexts never
//! compare equal.

use super::{StreamId, StreamKind, StreamRef, VideoStreamProfile};
use crate::calibration::Intrinsics;
use crate::graph::TransformGraph;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Next stream identity, shared by every context in the process
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    graph: TransformGraph,
}

/// Shared context passed to whatever creates streams and processing blocks
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("graph", &self.inner.graph)
            .finish()
    }
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                graph: TransformGraph::new(),
            }),
        }
    }

    /// Draw the next stream identity. Identities are never reused, not even
    /// across contexts.
    pub fn generate_stream_id(&self) -> StreamId {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The transform graph shared by every stream of this context
    pub fn transform_graph(&self) -> &TransformGraph {
        &self.inner.graph
    }

    /// Create a video stream and register it with the transform graph
    pub fn create_video_stream(&self, kind: StreamKind, intrinsics: Intrinsics) -> StreamRef {
        let stream: StreamRef = Arc::new(VideoStreamProfile::new(self, kind, intrinsics));
        let node = self.inner.graph.register_stream(&stream);
        debug!(
            stream = %stream.unique_id(),
            kind = %kind,
            node = ?node,
            width = intrinsics.width,
            height = intrinsics.height,
            "Created video stream"
        );
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ids_are_unique() {
        let ctx = Context::new();
        let a = ctx.generate_stream_id();
        let b = ctx.generate_stream_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_stream_ids_unique_across_contexts() {
        let first = Context::new();
        let second = Context::new();
        let intr = Intrinsics::pinhole(4, 4, 2.0, 2.0, 2.0, 2.0);
        let a = first.create_video_stream(StreamKind::Depth, intr);
        let b = second.create_video_stream(StreamKind::Depth, intr);
        assert_ne!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_clones_share_graph() {
        let ctx = Context::new();
        let other = ctx.clone();
        let intr = Intrinsics::pinhole(4, 4, 2.0, 2.0, 2.0, 2.0);
        let _s = ctx.create_video_stream(StreamKind::Depth, intr);
        assert_eq!(other.transform_graph().node_count(), 1);
    }
}
