// shared.rs - 2D math and engine-wide constants shared by game and server

use std::f32::consts::PI;

pub type Vec2 = [f32; 2];

pub const VEC2_ORIGIN: Vec2 = [0.0, 0.0];

pub const PI2: f32 = PI * 2.0;

/// Default simulation rate. The protocol assumes 25 updates per second.
pub const DEFAULT_TICKRATE_HZ: u32 = 25;

/// Largest identifier space the protocol can address.
pub const MAX_ENTITIES: usize = 16384;

pub const MAX_CLIENTS: usize = 256;

// ============================================================
// Vector helpers
// ============================================================

#[inline]
pub fn vector_add(a: &Vec2, b: &Vec2) -> Vec2 {
    [a[0] + b[0], a[1] + b[1]]
}

#[inline]
pub fn vector_scale(v: &Vec2, scale: f32) -> Vec2 {
    [v[0] * scale, v[1] * scale]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec2, scale: f32, vecb: &Vec2) -> Vec2 {
    [veca[0] + scale * vecb[0], veca[1] + scale * vecb[1]]
}

#[inline]
pub fn vector_length(v: &Vec2) -> f32 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

#[inline]
pub fn vector_distance_squared(a: &Vec2, b: &Vec2) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Unit vector pointing along `angle` (radians).
#[inline]
pub fn angle_vector(angle: f32) -> Vec2 {
    [angle.cos(), angle.sin()]
}

/// Rotates `v` counter-clockwise by `angle` radians.
#[inline]
pub fn vector_rotate(v: &Vec2, angle: f32) -> Vec2 {
    let (sin, cos) = angle.sin_cos();
    [v[0] * cos - v[1] * sin, v[0] * sin + v[1] * cos]
}

/// Angle of the vector pointing from `from` to `to`.
#[inline]
pub fn angle_between(from: &Vec2, to: &Vec2) -> f32 {
    (to[1] - from[1]).atan2(to[0] - from[0])
}

/// Wraps an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let a = angle % PI2;
    if a < 0.0 {
        a + PI2
    } else {
        a
    }
}

// ============================================================
// Tests
// ============================================================
