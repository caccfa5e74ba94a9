//! Snapshot state trees and the versioned binary container.
//!
//! An execution's state exports as a nested tree of named nodes whose leaves
//! are primitive values, bytes, or byte vectors ([`StateNode`]). The tree is
//! the exchange format at the core boundary; wire encodings other than the
//! binary container below (e.g. CBOR) are the concern of external tooling.
//!
//! The binary container prefixes a header with a magic number and a format
//! version, so a reader can detect foreign or future data before decoding
//! the payload.

use crate::connection::StepNumber;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a simbus snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x51B5_0001;

/// Current snapshot format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
    #[error("snapshot decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{SNAPSHOT_MAGIC:08X}, got 0x{0:08X}")]
    InvalidMagic(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("unsupported snapshot version: expected {FORMAT_VERSION}, got {0}")]
    UnsupportedVersion(u32),
}

// ---------------------------------------------------------------------------
// State tree
// ---------------------------------------------------------------------------

/// A node in a snapshot state tree.
///
/// Branches map child names to nodes in deterministic (lexicographic) order;
/// leaves hold primitive values, a byte, or a byte vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateNode {
    Real(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
    Byte(u8),
    Bytes(Vec<u8>),
    Branch(BTreeMap<String, StateNode>),
}

impl StateNode {
    /// Build a branch node from `(name, child)` pairs.
    pub fn branch<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, StateNode)>,
        S: Into<String>,
    {
        StateNode::Branch(
            children
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        )
    }

    /// Look up a named child of a branch node.
    pub fn child(&self, name: &str) -> Option<&StateNode> {
        match self {
            StateNode::Branch(children) => children.get(name),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            StateNode::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StateNode::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            StateNode::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateNode::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StateNode::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot header and container
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic number for format detection.
    pub magic: u32,
    /// Format version for forward compatibility.
    pub version: u32,
    /// Step count at the time the snapshot was taken.
    pub step: StepNumber,
}

impl SnapshotHeader {
    /// Create a header for the current format version.
    pub fn new(step: StepNumber) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            step,
        }
    }

    /// Validate the header. Returns `Ok(())` if this build can decode the
    /// payload.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(SnapshotError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    header: SnapshotHeader,
    state: StateNode,
}

/// Encode a state tree into the versioned binary container.
pub fn encode_snapshot(state: &StateNode, step: StepNumber) -> Result<Vec<u8>, SnapshotError> {
    let snapshot = Snapshot {
        header: SnapshotHeader::new(step),
        state: state.clone(),
    };
    bitcode::serialize(&snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Decode and validate a snapshot previously produced by
/// [`encode_snapshot`].
pub fn decode_snapshot(data: &[u8]) -> Result<(SnapshotHeader, StateNode), SnapshotError> {
    let snapshot: Snapshot =
        bitcode::deserialize(data).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    snapshot.header.validate()?;
    Ok((snapshot.header, snapshot.state))
}

// ===========================================================================
// Tests
// ===========================================================================
