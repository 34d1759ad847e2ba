// SPDX-License-Identifier: GPL-3.0-only

//! Transform graph between streams
//!
//! Nodes are streams, edges are lazily evaluated rigid transforms. The graph
//! never keeps a stream or a caller-supplied edge alive: both are held weakly
//! and pruned once their owners drop them. Resolving `A -> B` searches for a
//! path and composes the edges along it, inverting any edge that only exists
//! in the opposite direction.

mod lazy;
mod transform_graph;

pub use lazy::{Lazy, LazyExtrinsics};
pub use transform_graph::{GraphLock, NodeId, TransformGraph};
