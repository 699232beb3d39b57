//! Allocation weights.
//!
//! A weight is a fixed set of `f64` levels compared lexicographically. The
//! level a value lives on acts as its scale: a weight on a more dominant
//! level outranks any amount on a less dominant one, and sums never mix
//! levels, so adding a tiny weight to a huge one loses nothing.

use pyo3::prelude::*;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Number of lexicographic levels.
pub const N_LEVELS: usize = 7;

/// Largest accepted `relative_lexico` magnitude.
pub const MAX_RELATIVE_LEXICO: i32 = (N_LEVELS as i32 - 1) / 2;

/// A lexicographic weight. Level 0 is the most dominant.
#[pyclass(frozen)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocWeight {
    levels: [f64; N_LEVELS],
}

impl AllocWeight {
    /// The additive identity.
    pub const fn zero() -> Self {
        Self {
            levels: [0.0; N_LEVELS],
        }
    }

    /// A weight of `value` on the default (middle) level.
    pub fn from_value(value: f64) -> Self {
        let mut w = Self::zero();
        w.levels[MAX_RELATIVE_LEXICO as usize] = value;
        w.normalized()
    }

    /// A weight of `value` placed `relative_lexico` levels away from the
    /// default one. Negative values are more dominant. Returns `None` when
    /// the level does not exist.
    pub fn with_lexico(value: f64, relative_lexico: i32) -> Option<Self> {
        if relative_lexico.abs() > MAX_RELATIVE_LEXICO {
            return None;
        }
        let mut w = Self::zero();
        w.levels[(MAX_RELATIVE_LEXICO + relative_lexico) as usize] = value;
        Some(w.normalized())
    }

    /// Rebuild a weight from its raw levels.
    pub fn from_levels(levels: [f64; N_LEVELS]) -> Self {
        Self { levels }.normalized()
    }

    pub fn negative_one() -> Self {
        Self::from_value(-1.0)
    }

    /// Raw level values, most dominant first.
    pub fn levels(&self) -> [f64; N_LEVELS] {
        self.levels
    }

    pub fn is_zero(&self) -> bool {
        self.levels.iter().all(|&x| x == 0.0)
    }

    /// Absolute value of every level.
    pub fn abs(&self) -> Self {
        let mut w = *self;
        for x in &mut w.levels {
            *x = x.abs();
        }
        w
    }

    // -0.0 and 0.0 must compare and hash the same.
    fn normalized(mut self) -> Self {
        for x in &mut self.levels {
            *x += 0.0;
        }
        self
    }

    fn zip_with(self, rhs: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        let mut w = self;
        for (a, b) in w.levels.iter_mut().zip(rhs.levels) {
            *a = f(*a, b);
        }
        w.normalized()
    }

    fn scaled(self, factor: f64) -> Self {
        let mut w = self;
        for x in &mut w.levels {
            *x *= factor;
        }
        w.normalized()
    }
}

#[pymethods]
impl AllocWeight {
    #[new]
    #[pyo3(signature = (value, relative_lexico=0))]
    fn py_new(value: f64, relative_lexico: i32) -> PyResult<Self> {
        Self::with_lexico(value, relative_lexico).ok_or_else(|| {
            pyo3::exceptions::PyValueError::new_err(format!(
                "relative_lexico must be in [-{0}, {0}], not {1}",
                MAX_RELATIVE_LEXICO, relative_lexico
            ))
        })
    }

    /// Level values, most dominant first.
    fn values(&self) -> Vec<f64> {
        self.levels.to_vec()
    }

    fn __repr__(&self) -> String {
        format!("AllocWeight({})", self)
    }
}

impl Ord for AllocWeight {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.levels.iter().zip(other.levels.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for AllocWeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AllocWeight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AllocWeight {}

impl Hash for AllocWeight {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for x in &self.levels {
            x.to_bits().hash(state);
        }
    }
}

impl Add for AllocWeight {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl AddAssign for AllocWeight {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for AllocWeight {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl SubAssign for AllocWeight {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for AllocWeight {
    type Output = Self;
    fn neg(self) -> Self {
        self.scaled(-1.0)
    }
}

impl Mul<f64> for AllocWeight {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        self.scaled(rhs)
    }
}

impl Mul<i64> for AllocWeight {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        self.scaled(rhs as f64)
    }
}

impl Mul<u64> for AllocWeight {
    type Output = Self;
    fn mul(self, rhs: u64) -> Self {
        self.scaled(rhs as f64)
    }
}

impl Mul<usize> for AllocWeight {
    type Output = Self;
    fn mul(self, rhs: usize) -> Self {
        self.scaled(rhs as f64)
    }
}

impl Sum for AllocWeight {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, w| acc + w)
    }
}

impl fmt::Display for AllocWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let non_default = self
            .levels
            .iter()
            .enumerate()
            .any(|(i, &x)| i != MAX_RELATIVE_LEXICO as usize && x != 0.0);
        if !non_default {
            return write!(f, "{}", self.levels[MAX_RELATIVE_LEXICO as usize]);
        }
        write!(f, "(")?;
        for (i, x) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if *x == 0.0 {
                write!(f, ".")?;
            } else {
                write!(f, "{}", x)?;
            }
        }
        write!(f, ")")
    }
}
