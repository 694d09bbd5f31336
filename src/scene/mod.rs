//! Scene graph input: camera, lights and model nodes

mod camera;
mod light;
mod node;
mod transform;

pub use camera::*;
pub use light::*;
pub use node::*;
pub use transform::*;

use thiserror::Error;

/// Point lights the stock lighting model evaluates
pub const MAX_POINT_LIGHT_COUNT: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneError {
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("Unknown geometry {0:?}")]
    UnknownGeometry(GeometryId),
    #[error("Unknown material {0:?}")]
    UnknownMaterial(MaterialId),
    #[error("Node {0:?} has a different kind")]
    WrongKind(NodeId),
    #[error("The root node cannot be removed")]
    RootRemoval,
}
