use std::ops::{Deref, DerefMut};

use derive_more::Display;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::CastError;

/// The largest rank a [`Coord`] can hold.
pub const MAX_RANK: usize = 8;

/// A rank-polymorphic index or shape: a fixed-capacity array of components plus an explicit rank.
///
/// Dimension `0` is the least significant one, i.e., the fastest varying when
/// the grid is walked in linear order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("({})", data[..*rank].iter().format(", "))]
pub struct Coord {
    data: [usize; MAX_RANK],
    rank: usize,
}

impl std::fmt::Debug for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Default for Coord {
    #[inline]
    fn default() -> Self {
        Self::zeros(0)
    }
}

impl Deref for Coord {
    type Target = [usize];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data[..self.rank]
    }
}

impl DerefMut for Coord {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[..self.rank]
    }
}

impl Coord {
    /// Creates a coordinate of `rank` zeros.
    ///
    /// # Panics
    /// Panics if `rank` exceeds [`MAX_RANK`].
    #[inline]
    pub fn zeros(rank: usize) -> Self {
        assert!(rank <= MAX_RANK, "rank {rank} exceeds {MAX_RANK}");
        let data = [0; MAX_RANK];
        Self { data, rank }
    }

    /// Creates a rank-1 coordinate.
    #[inline]
    pub fn scalar(value: usize) -> Self {
        let mut data = [0; MAX_RANK];
        data[0] = value;
        Self { data, rank: 1 }
    }

    pub fn try_from_slice(values: &[usize]) -> Result<Self, CastError> {
        if values.len() > MAX_RANK {
            return Err(CastError::RankOverflow(values.len()));
        }
        let mut data = [0; MAX_RANK];
        data[..values.len()].copy_from_slice(values);
        let rank = values.len();
        Ok(Self { data, rank })
    }

    /// # Panics
    /// Panics if the slice is longer than [`MAX_RANK`].
    #[inline]
    pub fn from_slice(values: &[usize]) -> Self {
        match Self::try_from_slice(values) {
            Ok(coord) => coord,
            Err(err) => panic!("{err}"),
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Appends a new most significant component.
    ///
    /// # Panics
    /// Panics if the coordinate is already at [`MAX_RANK`].
    #[inline]
    pub fn push(&mut self, value: usize) {
        assert!(self.rank < MAX_RANK, "rank {} exceeds {MAX_RANK}", self.rank + 1);
        self.data[self.rank] = value;
        self.rank += 1;
    }

    /// Removes and returns the most significant component.
    #[inline]
    pub fn pop(&mut self) -> Option<usize> {
        if self.rank == 0 {
            return None;
        }
        self.rank -= 1;
        let value = self.data[self.rank];
        self.data[self.rank] = 0;
        Some(value)
    }

    /// Returns the most significant component.
    #[inline]
    pub fn last(&self) -> Option<usize> {
        self.deref().last().copied()
    }

    /// Total number of cells when this coordinate is read as a shape.
    #[inline]
    pub fn size(&self) -> usize {
        self.iter().product()
    }

    /// Like [`Coord::size`], but `None` if the count does not fit in a `usize`.
    #[inline]
    pub fn checked_size(&self) -> Option<usize> {
        self.iter().try_fold(1usize, |acc, &extent| acc.checked_mul(extent))
    }

    /// Returns `true` if `index` lies inside this shape.
    #[inline]
    pub fn contains(&self, index: &Coord) -> bool {
        self.rank == index.rank && itertools::zip_eq(index.iter(), self.iter()).all(|(i, e)| i < e)
    }

    /// The position `self` would occupy if `shape` were flattened to one dimension.
    ///
    /// # Panics
    /// Panics if the ranks of `self` and `shape` differ.
    #[inline]
    pub fn linear(&self, shape: &Coord) -> usize {
        assert_eq!(self.rank, shape.rank, "index {self} does not match shape {shape}");
        self.iter()
            .zip(shape.iter())
            .rev()
            .fold(0, |acc, (&index, &extent)| acc * extent + index)
    }

    /// Inverse of [`Coord::linear`]: the index at linear position `rank` of `shape`.
    pub fn delinearize(mut rank: usize, shape: &Coord) -> Self {
        let mut index = Self::zeros(shape.rank);
        for (x, &extent) in index.iter_mut().zip(shape.iter()) {
            match extent {
                0 => *x = 0,
                extent => {
                    *x = rank % extent;
                    rank /= extent;
                }
            }
        }
        index
    }

    /// Iterates over all indices of this shape in linear order.
    pub fn iter_shape(&self) -> impl Iterator<Item = Coord> + use<> {
        let shape = *self;
        (0..shape.size()).map(move |rank| Self::delinearize(rank, &shape))
    }
}
