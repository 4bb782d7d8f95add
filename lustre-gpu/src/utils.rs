mod bilinear_filter;
mod f32_ext;
mod halton;
mod vec3_ext;

use core::ops;

use glam::{vec3, Vec3};

pub use self::bilinear_filter::*;
pub use self::f32_ext::*;
pub use self::halton::*;
pub use self::vec3_ext::*;

pub fn lerp<T>(a: T, b: T, t: f32) -> T
where
    T: ops::Add<Output = T>,
    T: ops::Sub<Output = T>,
    T: ops::Mul<f32, Output = T>,
    T: Copy,
{
    a + (b - a) * t.clamp(0.0, 1.0)
}

pub fn rgb_to_ycocg(val: Vec3) -> Vec3 {
    let co = val.x - val.z;
    let tmp = val.z + co / 2.0;
    let cg = val.y - tmp;
    let y = tmp + cg / 2.0;

    vec3(y, co, cg)
}

pub fn ycocg_to_rgb(val: Vec3) -> Vec3 {
    let tmp = val.x - val.z / 2.0;
    let g = val.z + tmp;
    let b = tmp - val.y / 2.0;
    let r = b + val.y;

    vec3(r, g, b)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn lerp_clamps_factor() {
        assert_eq!(2.5, lerp(2.0, 3.0, 0.5));
        assert_eq!(3.0, lerp(2.0, 3.0, 4.0));
        assert_eq!(2.0, lerp(2.0, 3.0, -1.0));
    }

    #[test]
    fn ycocg() {
        let rgb = vec3(0.2, 0.7, 0.4);
        let out = ycocg_to_rgb(rgb_to_ycocg(rgb));

        assert_relative_eq!(out.x, rgb.x, epsilon = 1e-6);
        assert_relative_eq!(out.y, rgb.y, epsilon = 1e-6);
        assert_relative_eq!(out.z, rgb.z, epsilon = 1e-6);
    }
}
