//! Scene graph arena

use glam::{Mat4, Vec3, Vec4};

use crate::resources::{Geometry, Material};

use super::{Camera, Light, PointLight, SceneError, Transform, MAX_POINT_LIGHT_COUNT};

/// Index of a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// Index of a geometry owned by a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub(crate) u32);

/// Index of a material owned by a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub(crate) u32);

/// Geometry and material pairs drawn at a model node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub parts: Vec<(GeometryId, MaterialId)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part(mut self, geometry: GeometryId, material: MaterialId) -> Self {
        self.parts.push((geometry, material));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Container,
    Camera(Camera),
    Light(Light),
    Model(Model),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    transform: Transform,
    world: Mat4,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// World transform as of the last [`SceneGraph::update_world_transforms`]
    pub fn world_transform(&self) -> Mat4 {
        self.world
    }

    pub fn world_position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Point light as seen by the renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePointLight {
    pub node: NodeId,
    pub position: Vec3,
    pub light: PointLight,
}

/// Hierarchy of camera, light and model nodes plus the geometry and materials they use.
///
/// `structure_revision` moves whenever the set of drawable parts changes; `revision` moves on
/// every edit, structural or not.
pub struct SceneGraph {
    nodes: Vec<Option<Node>>,
    geometries: Vec<Geometry>,
    materials: Vec<Material>,
    active_camera: Option<NodeId>,
    structure_revision: u64,
    revision: u64,
    transforms_dirty: bool,
}

impl SceneGraph {
    pub fn new() -> Self {
        let root = Node {
            name: "root".into(),
            kind: NodeKind::Container,
            transform: Transform::default(),
            world: Mat4::IDENTITY,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            geometries: Vec::new(),
            materials: Vec::new(),
            active_camera: None,
            structure_revision: 0,
            revision: 0,
            transforms_dirty: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn structure_revision(&self) -> u64 {
        self.structure_revision
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn structure_changed(&mut self) {
        self.structure_revision += 1;
        self.revision += 1;
    }

    fn content_changed(&mut self) {
        self.revision += 1;
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometries.push(geometry);
        GeometryId(self.geometries.len() as u32 - 1)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(id.0 as usize)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() as u32 - 1)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)
    }

    /// Mutable material access; counts as a content edit.
    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        let material = self.materials.get_mut(id.0 as usize)?;
        self.revision += 1;
        Some(material)
    }

    pub fn add_node(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        transform: Transform,
    ) -> Result<NodeId, SceneError> {
        if let NodeKind::Model(model) = &kind {
            self.check_model(model)?;
        }
        let id = NodeId(self.nodes.len() as u32);
        let parent_world = {
            let parent_node = self.node_mut(parent)?;
            parent_node.children.push(id);
            parent_node.world
        };
        self.nodes.push(Some(Node {
            name: name.to_string(),
            kind,
            transform,
            world: parent_world * transform.matrix(),
            parent: Some(parent),
            children: Vec::new(),
        }));
        self.structure_changed();
        Ok(id)
    }

    pub fn add_container(&mut self, parent: NodeId, name: &str, transform: Transform) -> Result<NodeId, SceneError> {
        self.add_node(parent, name, NodeKind::Container, transform)
    }

    pub fn add_camera(&mut self, parent: NodeId, camera: Camera, transform: Transform) -> Result<NodeId, SceneError> {
        self.add_node(parent, "camera", NodeKind::Camera(camera), transform)
    }

    pub fn add_light(&mut self, parent: NodeId, light: Light, transform: Transform) -> Result<NodeId, SceneError> {
        self.add_node(parent, "light", NodeKind::Light(light), transform)
    }

    pub fn add_model(&mut self, parent: NodeId, model: Model, transform: Transform) -> Result<NodeId, SceneError> {
        self.add_node(parent, "model", NodeKind::Model(model), transform)
    }

    /// Remove a node and its whole subtree.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), SceneError> {
        if id == self.root() {
            return Err(SceneError::RootRemoval);
        }
        let parent = self.node(id).ok_or(SceneError::UnknownNode(id))?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|child| *child != id);
        }
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(next.0 as usize).and_then(Option::take) {
                pending.extend(node.children);
            }
            if self.active_camera == Some(next) {
                self.active_camera = None;
            }
        }
        self.structure_changed();
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SceneError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(SceneError::UnknownNode(id))
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) -> Result<(), SceneError> {
        let node = self.node_mut(id)?;
        if node.transform != transform {
            node.transform = transform;
            self.transforms_dirty = true;
            self.content_changed();
        }
        Ok(())
    }

    pub fn set_camera(&mut self, id: NodeId, camera: Camera) -> Result<(), SceneError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Camera(current) => *current = camera,
            _ => return Err(SceneError::WrongKind(id)),
        }
        self.content_changed();
        Ok(())
    }

    pub fn set_light(&mut self, id: NodeId, light: Light) -> Result<(), SceneError> {
        let node = self.node_mut(id)?;
        let NodeKind::Light(current) = &mut node.kind else {
            return Err(SceneError::WrongKind(id));
        };
        let kind_changed = std::mem::discriminant(current) != std::mem::discriminant(&light);
        *current = light;
        if kind_changed {
            self.structure_changed();
        } else {
            self.content_changed();
        }
        Ok(())
    }

    /// Replace the parts of a model node.
    pub fn set_model(&mut self, id: NodeId, model: Model) -> Result<(), SceneError> {
        self.check_model(&model)?;
        match &mut self.node_mut(id)?.kind {
            NodeKind::Model(current) => *current = model,
            _ => return Err(SceneError::WrongKind(id)),
        }
        self.structure_changed();
        Ok(())
    }

    fn check_model(&self, model: &Model) -> Result<(), SceneError> {
        for (geometry, material) in &model.parts {
            self.geometry(*geometry)
                .ok_or(SceneError::UnknownGeometry(*geometry))?;
            self.material(*material)
                .ok_or(SceneError::UnknownMaterial(*material))?;
        }
        Ok(())
    }

    /// Camera used for rendering; the first camera in traversal order unless one was chosen.
    pub fn set_active_camera(&mut self, id: NodeId) -> Result<(), SceneError> {
        match self.node(id).map(|node| &node.kind) {
            Some(NodeKind::Camera(_)) => {
                self.active_camera = Some(id);
                self.content_changed();
                Ok(())
            }
            Some(_) => Err(SceneError::WrongKind(id)),
            None => Err(SceneError::UnknownNode(id)),
        }
    }

    pub fn active_camera(&self) -> Option<(NodeId, &Camera)> {
        let id = self.active_camera.or_else(|| {
            self.traverse()
                .find(|id| matches!(self.node(*id).map(|n| &n.kind), Some(NodeKind::Camera(_))))
        })?;
        match &self.node(id)?.kind {
            NodeKind::Camera(camera) => Some((id, camera)),
            _ => None,
        }
    }

    /// Recompute cached world transforms after local edits.
    pub fn update_world_transforms(&mut self) {
        if !self.transforms_dirty {
            return;
        }
        let order: Vec<NodeId> = self.traverse().collect();
        for id in order {
            let Some(node) = self.node(id) else { continue };
            let parent_world = node
                .parent
                .and_then(|parent| self.node(parent))
                .map(|parent| parent.world)
                .unwrap_or(Mat4::IDENTITY);
            let local = node.transform.matrix();
            if let Ok(node) = self.node_mut(id) {
                node.world = parent_world * local;
            }
        }
        self.transforms_dirty = false;
    }

    /// Depth-first pre-order walk from the root
    pub fn traverse(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![self.root()];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
            Some(id)
        })
    }

    /// Model nodes in traversal order
    pub fn models(&self) -> impl Iterator<Item = (NodeId, &Model)> + '_ {
        self.traverse().filter_map(|id| match &self.node(id)?.kind {
            NodeKind::Model(model) => Some((id, model)),
            _ => None,
        })
    }

    fn lights(&self) -> impl Iterator<Item = (NodeId, &Light)> + '_ {
        self.traverse().filter_map(|id| match &self.node(id)?.kind {
            NodeKind::Light(light) => Some((id, light)),
            _ => None,
        })
    }

    /// Summed color of all ambient lights
    pub fn ambient_light(&self) -> Vec4 {
        self.lights()
            .filter_map(|(_, light)| match light {
                Light::Ambient { color } => Some(*color),
                _ => None,
            })
            .fold(Vec4::ZERO, |sum, color| sum + color)
    }

    /// First directional light as (world direction, color)
    pub fn directional_light(&self) -> Option<(Vec3, Vec4)> {
        self.lights().find_map(|(id, light)| match light {
            Light::Directional { color } => {
                let world = self.node(id)?.world;
                let direction = world.transform_vector3(Vec3::Z).normalize_or_zero();
                Some((direction, *color))
            }
            _ => None,
        })
    }

    /// Point lights in traversal order, capped at `max` (itself capped at the shader limit).
    pub fn point_lights(&self, max: usize) -> Vec<ScenePointLight> {
        let max = max.min(MAX_POINT_LIGHT_COUNT);
        self.lights()
            .filter_map(|(id, light)| match light {
                Light::Point(point) => Some(ScenePointLight {
                    node: id,
                    position: self.node(id)?.world_position(),
                    light: *point,
                }),
                _ => None,
            })
            .take(max)
            .collect()
    }

    pub fn point_light_count(&self) -> usize {
        self.lights()
            .filter(|(_, light)| matches!(light, Light::Point(_)))
            .count()
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
