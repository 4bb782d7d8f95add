use glam::{UVec2, Vec3, Vec4, Vec4Swizzles};

use crate::{ImageRead, LUSTRE_EPSILON};

/// Maximum relative depth difference for two surfaces to be considered the
/// same during reprojection.
pub const REPROJECTION_MAX_DEPTH_DIFF: f32 = 0.1;

/// Minimum cosine between normals for two surfaces to be considered the same
/// during reprojection.
pub const REPROJECTION_MIN_NORMAL_DOT: f32 = 0.9;

/// Geometric attributes of a single G-buffer texel.
///
/// Stored as one RGBA32F texel: xyz = world-space normal, w = linear depth;
/// non-positive depth marks pixels that hit nothing (sky).
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct GBufferEntry {
    pub normal: Vec3,
    pub depth: f32,
}

impl GBufferEntry {
    pub fn new(normal: Vec3, depth: f32) -> Self {
        Self { normal, depth }
    }

    pub fn sky() -> Self {
        Self::default()
    }

    pub fn unpack(d0: Vec4) -> Self {
        Self {
            normal: d0.xyz(),
            depth: d0.w,
        }
    }

    pub fn pack(self) -> Vec4 {
        self.normal.extend(self.depth)
    }

    pub fn load(image: &impl ImageRead, pos: UVec2) -> Self {
        Self::unpack(image.load(pos))
    }

    pub fn is_sky(&self) -> bool {
        self.depth <= 0.0
    }

    /// Returns whether `other` describes (roughly) the same surface; used to
    /// reject history samples after disocclusion.
    pub fn matches(&self, other: &Self) -> bool {
        if self.is_sky() || other.is_sky() {
            return false;
        }

        let depth_diff =
            (self.depth - other.depth).abs() / self.depth.max(LUSTRE_EPSILON);

        depth_diff < REPROJECTION_MAX_DEPTH_DIFF
            && self.normal.dot(other.normal) > REPROJECTION_MIN_NORMAL_DOT
    }

    /// Edge-stopping weight on normals, `max(0, dot)^phi`.
    pub fn normal_weight(&self, other: &Self, phi: f32) -> f32 {
        self.normal.dot(other.normal).max(0.0).powf(phi)
    }
}

#[cfg(test)]
mod tests {
    use glam::vec3;

    use super::*;

    #[test]
    fn matching() {
        let a = GBufferEntry::new(Vec3::Z, 10.0);

        assert!(a.matches(&GBufferEntry::new(Vec3::Z, 10.5)));

        // Too far away
        assert!(!a.matches(&GBufferEntry::new(Vec3::Z, 12.0)));

        // Facing a different direction
        assert!(!a.matches(&GBufferEntry::new(Vec3::X, 10.0)));

        // Sky never matches anything, including itself
        assert!(!a.matches(&GBufferEntry::sky()));
        assert!(!GBufferEntry::sky().matches(&GBufferEntry::sky()));
    }

    #[test]
    fn normal_weight() {
        let a = GBufferEntry::new(Vec3::Z, 1.0);
        let b = GBufferEntry::new(vec3(0.0, 0.6, 0.8), 1.0);

        assert_eq!(1.0, a.normal_weight(&a, 32.0));
        assert_eq!(0.0, a.normal_weight(&GBufferEntry::new(-Vec3::Z, 1.0), 8.0));
        assert!((a.normal_weight(&b, 2.0) - 0.64).abs() < 1e-6);
    }
}
