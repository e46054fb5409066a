use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A double-precision 3-vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3d {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Parse from a slice of exactly three numbers.
    pub fn from_slice(values: &[f64]) -> Result<Self, TypeError> {
        match values {
            [x, y, z] => Ok(Self::new(*x, *y, *z)),
            _ => Err(TypeError::InvalidField {
                field: "vector".into(),
                reason: format!("expected 3 components, got {}", values.len()),
            }),
        }
    }

    fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Add for Vector3d {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3d {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vector3d {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A 4x4 affine transformation in row-major order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix4([f64; 16]);

impl Matrix4 {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub const fn from_row_major(values: [f64; 16]) -> Self {
        Self(values)
    }

    /// Pure translation by `offset`.
    pub fn translation(offset: Vector3d) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = offset.x;
        m.0[7] = offset.y;
        m.0[11] = offset.z;
        m
    }

    /// Build from nested rows as stored in node documents (`[[f64; 4]; 4]`).
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, TypeError> {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        if rows.len() != 4 || flat.len() != 16 {
            return Err(TypeError::InvalidMatrix {
                expected: 16,
                actual: flat.len(),
            });
        }
        let mut values = [0.0; 16];
        values.copy_from_slice(&flat);
        Ok(Self(values))
    }

    /// Rows as nested vectors, the inverse of [`Matrix4::from_rows`].
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.0.chunks(4).map(|row| row.to_vec()).collect()
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn as_slice(&self) -> &[f64; 16] {
        &self.0
    }

    /// Apply the affine transform to a point.
    pub fn transform_point(&self, p: Vector3d) -> Vector3d {
        let m = &self.0;
        Vector3d::new(
            m[0] * p.x + m[1] * p.y + m[2] * p.z + m[3],
            m[4] * p.x + m[5] * p.y + m[6] * p.z + m[7],
            m[8] * p.x + m[9] * p.y + m[10] * p.z + m[11],
        )
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = (0..4).map(|k| self.0[row * 4 + k] * rhs.0[k * 4 + col]).sum();
            }
        }
        Self(out)
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vector3d,
    pub max: Vector3d,
}

impl BoundingBox {
    /// Box spanning the two corners, normalized so `min <= max` per axis.
    pub fn new(a: Vector3d, b: Vector3d) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_point(p: Vector3d) -> Self {
        Self { min: p, max: p }
    }

    /// Grow this box to contain `other`.
    pub fn encapsulate(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grow this box to contain a point.
    pub fn encapsulate_point(&mut self, p: Vector3d) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Axis-aligned bounds of this box after transformation by `m`.
    pub fn transformed(&self, m: &Matrix4) -> Self {
        let (lo, hi) = (self.min, self.max);
        let corners = [
            Vector3d::new(lo.x, lo.y, lo.z),
            Vector3d::new(lo.x, lo.y, hi.z),
            Vector3d::new(lo.x, hi.y, lo.z),
            Vector3d::new(lo.x, hi.y, hi.z),
            Vector3d::new(hi.x, lo.y, lo.z),
            Vector3d::new(hi.x, lo.y, hi.z),
            Vector3d::new(hi.x, hi.y, lo.z),
            Vector3d::new(hi.x, hi.y, hi.z),
        ];
        let mut out = Self::from_point(m.transform_point(corners[0]));
        for corner in &corners[1..] {
            out.encapsulate_point(m.transform_point(*corner));
        }
        out
    }

    /// Parse the `[[minx, miny, minz], [maxx, maxy, maxz]]` document form.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, TypeError> {
        match rows {
            [min, max] => Ok(Self::new(Vector3d::from_slice(min)?, Vector3d::from_slice(max)?)),
            _ => Err(TypeError::InvalidField {
                field: "bounding_box".into(),
                reason: format!("expected 2 corners, got {}", rows.len()),
            }),
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        vec![self.min.to_array().to_vec(), self.max.to_array().to_vec()]
    }

    pub fn size(&self) -> Vector3d {
        self.max - self.min
    }
}
