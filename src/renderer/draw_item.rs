//! Draw items and their ordering

use std::cmp::Ordering;

use crate::pipeline::{ParameterSet, PipelineId};
use crate::resources::BufferSegment;
use crate::scene::{GeometryId, MaterialId, NodeId};

/// One model part drawn with one pipeline and one parameter set.
#[derive(Debug)]
pub struct DrawItem {
    pub node: NodeId,
    /// Index into the node's model parts
    pub part: usize,
    pub geometry: GeometryId,
    pub material: MaterialId,
    pub pipeline: PipelineId,
    pub parameters: ParameterSet,
    /// Per-draw transform constants
    pub transform_buffer: BufferSegment,
    pub sort_key: DrawSortKey,
}

/// Per-frame ordering inputs of a draw item
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawSortKey {
    pub translucent: bool,
    /// Squared distance from the camera
    pub distance: f32,
    pub depth_bias: f32,
}

/// Opaque before translucent; translucent far to near, then by ascending depth bias.
///
/// Everything else compares equal, so a stable sort keeps scene order for ties.
pub fn compare_draw_order(a: &DrawSortKey, b: &DrawSortKey) -> Ordering {
    match (a.translucent, b.translucent) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, false) => Ordering::Equal,
        (true, true) => b
            .distance
            .total_cmp(&a.distance)
            .then_with(|| a.depth_bias.total_cmp(&b.depth_bias)),
    }
}

pub fn sort_draw_items(items: &mut [DrawItem]) {
    items.sort_by(|a, b| compare_draw_order(&a.sort_key, &b.sort_key));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(translucent: bool, distance: f32, depth_bias: f32) -> DrawSortKey {
        DrawSortKey {
            translucent,
            distance,
            depth_bias,
        }
    }

    fn sorted(keys: &[DrawSortKey]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|a, b| compare_draw_order(&keys[*a], &keys[*b]));
        order
    }

    #[test]
    fn opaque_first_regardless_of_distance() {
        let keys = [key(true, 1.0, 0.0), key(false, 1000.0, 0.0)];
        assert_eq!(sorted(&keys), vec![1, 0]);
    }

    #[test]
    fn translucent_far_to_near() {
        let keys = [key(true, 25.0, 0.0), key(true, 100.0, 0.0)];
        assert_eq!(sorted(&keys), vec![1, 0]);
    }

    #[test]
    fn equal_distance_orders_by_bias_then_scene_order() {
        let keys = [
            key(true, 4.0, 2.0),
            key(true, 4.0, 1.0),
            key(true, 4.0, 1.0),
            key(false, 0.0, 5.0),
        ];
        assert_eq!(sorted(&keys), vec![3, 1, 2, 0]);
    }
}
