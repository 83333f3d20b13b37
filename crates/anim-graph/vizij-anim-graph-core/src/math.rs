//! Small math types used by the evaluator: looping percentages and rigid transforms.

use std::ops::{Add, Mul, Sub};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Normalized playback position. The integer part counts completed loops.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(pub f32);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0.0);
    pub const ONE: Percentage = Percentage(1.0);

    #[inline]
    pub fn value(self) -> f32 {
        self.0
    }

    /// Number of whole loops contained in this percentage.
    #[inline]
    pub fn loop_count(self) -> i32 {
        self.0.floor() as i32
    }

    /// Fractional part in `[0, 1)`.
    #[inline]
    pub fn normalized(self) -> Percentage {
        Percentage(self.0 - self.0.floor())
    }

    /// Fractional part, except that an exact positive whole number maps to `1.0` so that
    /// "end of cycle" stays distinguishable from "start of cycle".
    #[inline]
    pub fn normalized_time(self) -> Percentage {
        let fraction = self.0 - self.0.floor();
        if fraction == 0.0 && self.0 > 0.0 {
            Percentage::ONE
        } else {
            Percentage(fraction)
        }
    }

    #[inline]
    pub fn clamp(self, min: f32, max: f32) -> Percentage {
        Percentage(self.0.clamp(min, max))
    }

    /// Distance travelled when moving from `from` to `to` on a looping `[0, 1]` cycle.
    #[inline]
    pub fn looping_delta(from: Percentage, to: Percentage) -> f32 {
        if to.0 >= from.0 {
            to.0 - from.0
        } else {
            (1.0 - from.0) + to.0
        }
    }
}

impl From<f32> for Percentage {
    fn from(value: f32) -> Self {
        Percentage(value)
    }
}

impl Add<f32> for Percentage {
    type Output = Percentage;
    fn add(self, rhs: f32) -> Percentage {
        Percentage(self.0 + rhs)
    }
}

impl Sub<f32> for Percentage {
    type Output = Percentage;
    fn sub(self, rhs: f32) -> Percentage {
        Percentage(self.0 - rhs)
    }
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    // Written as a weighted sum so that t == 0 and t == 1 return the endpoints exactly.
    a * (1.0 - t) + b * t
}

/// Rigid transform with uniform scale.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default = "identity_rotation")]
    pub rotation: Quat,
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default = "unit_scale")]
    pub scale: f32,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

fn unit_scale() -> f32 {
    1.0
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: 1.0,
    };

    pub fn new(rotation: Quat, translation: Vec3, scale: f32) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Transform::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Transform::IDENTITY
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * (point * self.scale) + self.translation
    }

    pub fn inverse(&self) -> Transform {
        let inv_scale = if self.scale != 0.0 { 1.0 / self.scale } else { 0.0 };
        let inv_rotation = self.rotation.inverse();
        let inv_translation = inv_rotation * (-self.translation) * inv_scale;
        Transform {
            rotation: inv_rotation,
            translation: inv_translation,
            scale: inv_scale,
        }
    }

    /// Relative transform that takes `from` to `to`, expressed in `from`'s space.
    pub fn delta(from: &Transform, to: &Transform) -> Transform {
        from.inverse() * *to
    }

    /// Translation/scale lerp with shortest-path normalized rotation lerp.
    pub fn blend(a: &Transform, b: &Transform, weight: f32) -> Transform {
        if weight <= 0.0 {
            return *a;
        }
        if weight >= 1.0 {
            return *b;
        }
        let mut target_rotation = b.rotation;
        if a.rotation.dot(target_rotation) < 0.0 {
            target_rotation = -target_rotation;
        }
        let rotation = (a.rotation * (1.0 - weight) + target_rotation * weight).normalize();
        Transform {
            rotation,
            translation: a.translation.lerp(b.translation, weight),
            scale: lerp(a.scale, b.scale, weight),
        }
    }

    pub fn abs_diff_eq(&self, other: &Transform, epsilon: f32) -> bool {
        self.translation.abs_diff_eq(other.translation, epsilon)
            && (self.scale - other.scale).abs() <= epsilon
            && (self.rotation.dot(other.rotation).abs() - 1.0).abs() <= epsilon
    }
}

impl Mul for Transform {
    type Output = Transform;

    /// Applies `rhs` in the local space of `self` (parent * child).
    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            rotation: (self.rotation * rhs.rotation).normalize(),
            translation: self.transform_point(rhs.translation),
            scale: self.scale * rhs.scale,
        }
    }
}
