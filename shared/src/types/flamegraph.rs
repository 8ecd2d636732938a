//! Flamebearer encoding
//!
//! Converts a stack [`Tree`] into the level-indexed flamegraph payload the
//! renderer consumes: a deduplicated name table, one flat int array per
//! depth laid out as `(dx, total, self, name_idx)` 4-tuples, and the global
//! tick/self maxima. `dx` is the delta from the previous sibling's right
//! edge at the same level, which keeps dense levels compact.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::tree::{NodeId, Tree};

/// Entries per frame in a level array.
const TUPLE_WIDTH: usize = 4;

/// The encoded flamegraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flamebearer {
    pub names: Vec<String>,
    pub levels: Vec<Vec<i64>>,
    pub num_ticks: i64,
    pub max_self: i64,
}

/// Render metadata attached to a flamebearer by the render endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlamebearerMetadata {
    pub format: String,
    pub units: String,
    pub name: String,
    pub sample_rate: u32,
}

/// A flamebearer together with its render metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlamebearerProfile {
    pub version: u32,
    pub metadata: FlamebearerMetadata,
    pub flamebearer: Flamebearer,
}

impl Flamebearer {
    /// Encodes a tree breadth-first under a synthetic `"total"` root.
    ///
    /// The synthetic root is interned first, so index 0 of the name table is
    /// always `"total"`. Siblings are emitted left to right in insertion
    /// order; the delta pass then rewrites absolute x offsets in place.
    pub fn from_tree(tree: &Tree) -> Self {
        let total = tree.total();
        let mut names: Vec<String> = Vec::new();
        let mut name_index: HashMap<String, usize> = HashMap::new();
        let mut levels: Vec<Vec<i64>> = Vec::new();
        let mut max_self: i64 = 0;

        // node None is the synthetic root
        let mut queue: VecDeque<(Option<NodeId>, usize, i64)> = VecDeque::new();
        queue.push_back((None, 0, 0));

        while let Some((node, depth, x_offset)) = queue.pop_front() {
            let (name, self_value, node_total, children) = match node {
                None => ("total", 0, total, tree.roots()),
                Some(id) => {
                    let n = tree.node(id);
                    (&*n.name, n.self_value, n.total, tree.children(id))
                }
            };

            if self_value > max_self {
                max_self = self_value;
            }

            let name_idx = match name_index.get(name) {
                Some(&i) => i,
                None => {
                    let i = names.len();
                    name_index.insert(name.to_string(), i);
                    names.push(name.to_string());
                    i
                }
            };

            if depth == levels.len() {
                levels.push(Vec::new());
            }
            levels[depth].extend_from_slice(&[x_offset, node_total, self_value, name_idx as i64]);

            let mut child_offset = x_offset + self_value;
            for &child in children {
                queue.push_back((Some(child), depth + 1, child_offset));
                child_offset += tree.node(child).total;
            }
        }

        // delta-encode x offsets against the previous sibling's right edge
        for level in &mut levels {
            let mut prev = 0;
            for i in (0..level.len()).step_by(TUPLE_WIDTH) {
                level[i] -= prev;
                prev += level[i] + level[i + 1];
            }
        }

        Flamebearer {
            names,
            levels,
            num_ticks: total,
            max_self,
        }
    }

    /// Wraps the flamebearer with render metadata for the given profile
    /// type coordinates.
    pub fn into_profile(self, sample_type: &str, sample_unit: &str) -> FlamebearerProfile {
        FlamebearerProfile {
            version: 1,
            metadata: FlamebearerMetadata {
                format: "single".to_string(),
                units: sample_unit.to_string(),
                name: sample_type.to_string(),
                sample_rate: 100,
            },
            flamebearer: self,
        }
    }
}
