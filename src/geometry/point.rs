//! Fixed-dimension point type used for mesh vertex coordinates.
//!
//! Coordinates are stored as a plain `[f64; D]` so that a `Vec<Point<D>>`
//! is a contiguous coordinate array. Displacements are represented as bare
//! `[f64; D]` arrays; the free functions at the bottom of this module
//! provide the handful of vector operations the smoothing kernels need.

use serde::{Deserialize, Serialize};

/// A point in `D`-dimensional Euclidean space.
///
/// # Examples
///
/// ```rust
/// use relaxmesh::geometry::point::Point;
///
/// let p = Point::new([1.0, 2.0]);
/// let q = Point::new([4.0, 6.0]);
/// assert_eq!(p.coords(), [1.0, 2.0]);
/// assert_eq!(p.distance(&q), 5.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point<const D: usize> {
    coords: [f64; D],
}

// `Default`, `Serialize`, and `Deserialize` cannot be `derive`d for a
// struct holding a const-generic `[f64; D]` array (serde's and std's
// derives only cover fixed array lengths). These hand-written impls
// reproduce exactly what the derives would have emitted: an all-zero
// default and a `{"coords": [..]}` struct wire format.
impl<const D: usize> Default for Point<D> {
    #[inline]
    fn default() -> Self {
        Self { coords: [0.0; D] }
    }
}

impl<const D: usize> Serialize for Point<D> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Point", 1)?;
        state.serialize_field("coords", &self.coords[..])?;
        state.end()
    }
}

impl<'de, const D: usize> Deserialize<'de> for Point<D> {
    fn deserialize<De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename = "Point")]
        struct Helper {
            coords: Vec<f64>,
        }
        let helper = Helper::deserialize(deserializer)?;
        let len = helper.coords.len();
        let coords: [f64; D] = helper
            .coords
            .try_into()
            .map_err(|_| serde::de::Error::invalid_length(len, &"D coordinates"))?;
        Ok(Self { coords })
    }
}

impl<const D: usize> Point<D> {
    /// Creates a new point from a coordinate array.
    #[inline]
    #[must_use]
    pub const fn new(coords: [f64; D]) -> Self {
        Self { coords }
    }

    /// Returns the coordinate array.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> [f64; D] {
        self.coords
    }

    /// Returns the first two coordinates.
    ///
    /// Used by the planar predicates and the flip procedure, which only
    /// operate on 2D meshes.
    ///
    /// # Panics
    ///
    /// Panics if `D < 2`.
    #[inline]
    #[must_use]
    pub fn xy(&self) -> [f64; 2] {
        [self.coords[0], self.coords[1]]
    }

    /// Returns `true` if every coordinate is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    /// Returns the displacement vector from `self` to `other`.
    #[inline]
    #[must_use]
    pub fn vector_to(&self, other: &Self) -> [f64; D] {
        let mut v = [0.0; D];
        for ((out, a), b) in v.iter_mut().zip(&other.coords).zip(&self.coords) {
            *out = a - b;
        }
        v
    }

    /// Returns the point translated by `displacement`.
    #[inline]
    #[must_use]
    pub fn translated(&self, displacement: [f64; D]) -> Self {
        let mut coords = self.coords;
        for (c, d) in coords.iter_mut().zip(&displacement) {
            *c += d;
        }
        Self { coords }
    }

    /// Returns the Euclidean distance to `other`.
    #[inline]
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        norm(self.vector_to(other))
    }
}

/// Squared Euclidean norm of a displacement vector.
#[inline]
#[must_use]
pub fn norm_squared<const D: usize>(v: [f64; D]) -> f64 {
    v.iter().map(|c| c * c).sum()
}

/// Euclidean norm of a displacement vector.
#[inline]
#[must_use]
pub fn norm<const D: usize>(v: [f64; D]) -> f64 {
    norm_squared(v).sqrt()
}

/// Dot product of two displacement vectors.
#[inline]
#[must_use]
pub fn dot<const D: usize>(a: [f64; D], b: [f64; D]) -> f64 {
    a.iter().zip(&b).map(|(x, y)| x * y).sum()
}

/// Scales a displacement vector in place.
#[inline]
pub fn scale_in_place<const D: usize>(v: &mut [f64; D], factor: f64) {
    for c in v.iter_mut() {
        *c *= factor;
    }
}
