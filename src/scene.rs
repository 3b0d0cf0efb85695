//! Scene host seam: camera, pointer rays, and the named-object registry.
//!
//! The renderer itself lives outside this crate. What the interaction layer
//! needs from it is a camera to cast rays from and something to intersect
//! those rays with; `SceneQuery` is that seam and `SceneRegistry` is a small
//! box-based implementation of it.

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;

use glam::{Mat4, Vec2, Vec3};

// =============================================================================
// CAMERA
// =============================================================================

/// Perspective camera looking from `position` at `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    /// Viewport width over height.
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(-10.0, 10.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 20.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    #[must_use]
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y.to_radians(), self.aspect, self.near, self.far)
    }

    /// Unit view direction.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Ray from the eye through `ndc` (x and y in `[-1, 1]`, y up).
    #[must_use]
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Ray {
        let inverse = (self.projection() * self.view()).inverse();
        let near = inverse.project_point3(ndc.extend(-1.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        Ray { origin: self.position, direction: (far - near).normalize_or_zero() }
    }
}

/// Normalized device coordinates for a client-space pointer position.
#[must_use]
pub fn ndc_from_client(x: f32, y: f32, width: f32, height: f32) -> Vec2 {
    Vec2::new((x / width) * 2.0 - 1.0, -(y / height) * 2.0 + 1.0)
}

// =============================================================================
// RAYS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    #[must_use]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Entry distance into the axis-aligned box `[min, max]`, if the ray hits
    /// it in front of the origin. A ray starting inside reports 0.
    #[must_use]
    pub fn intersect_aabb(&self, min: Vec3, max: Vec3) -> Option<f32> {
        let inv = self.direction.recip();
        let t0 = (min - self.origin) * inv;
        let t1 = (max - self.origin) * inv;
        let enter = t0.min(t1).max_element();
        let exit = t0.max(t1).min_element();
        // NaN from a zero direction component on a slab face fails both checks.
        if exit >= enter.max(0.0) {
            Some(enter.max(0.0))
        } else {
            None
        }
    }
}

/// Nearest named object under a ray.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub name: String,
    /// World-space intersection point.
    pub point: Vec3,
    /// The same point in the object's local space.
    pub local_point: Vec3,
    pub distance: f32,
}

/// Anything a pointer ray can be cast into.
pub trait SceneQuery {
    /// Nearest intersection along `ray`. An unnamed nearest object is a miss.
    fn intersect(&self, ray: &Ray) -> Option<Hit>;
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    /// Empty for decoration that occludes but cannot be hovered.
    pub name: String,
    pub half_extents: Vec3,
    pub transform: Mat4,
}

/// Named boxes with world transforms.
#[derive(Debug, Clone, Default)]
pub struct SceneRegistry {
    objects: Vec<SceneObject>,
}

impl SceneRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the object called `name`.
    pub fn insert(&mut self, name: &str, half_extents: Vec3, transform: Mat4) {
        let object = SceneObject { name: name.to_owned(), half_extents, transform };
        match self.objects.iter_mut().find(|o| !name.is_empty() && o.name == name) {
            Some(existing) => *existing = object,
            None => self.objects.push(object),
        }
    }

    /// Returns false if there is no such object.
    pub fn set_transform(&mut self, name: &str, transform: Mat4) -> bool {
        match self.objects.iter_mut().find(|o| o.name == name) {
            Some(object) => {
                object.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|o| o.name != name);
        self.objects.len() != before
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.iter()
    }
}

impl SceneQuery for SceneRegistry {
    fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let mut nearest: Option<Hit> = None;
        for object in &self.objects {
            if object.transform.determinant().abs() <= f32::EPSILON {
                continue;
            }
            let to_local = object.transform.inverse();
            // Unnormalized local direction keeps `t` in world units.
            let local = Ray {
                origin: to_local.transform_point3(ray.origin),
                direction: to_local.transform_vector3(ray.direction),
            };
            let Some(t) = local.intersect_aabb(-object.half_extents, object.half_extents) else {
                continue;
            };
            if nearest.as_ref().is_some_and(|n| n.distance <= t) {
                continue;
            }
            nearest =
                Some(Hit { name: object.name.clone(), point: ray.at(t), local_point: local.at(t), distance: t });
        }
        nearest.filter(|hit| !hit.name.is_empty())
    }
}
