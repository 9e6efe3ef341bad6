//! The `grid` module models execution grids of arbitrary rank.
//!
//! A *shape* is a fixed-length sequence of extents, one per dimension; an *index* is a position
//! inside a shape of the same rank. Dimension `0` is the least significant one, so the linear rank
//! of index `c` in shape `e` is `c[0] + e[0] * (c[1] + e[1] * (c[2] + ...))`.
//!
//! ## Key Components
//! 1. **Typed points**: [`Point`] is implemented for bare unsigned integers (rank 1), arrays and tuples,
//!    so backends keep their natural index vocabulary (`usize`, `[u32; 2]`, ...).
//! 2. **Working form**: [`Coord`] is the rank-polymorphic form all algorithms run on.
//! 3. **Rank conversion**: [`project`], [`lift`] and [`cast`] move indices between grids of different rank
//!    while preserving their linear rank.

use casey::snake;

pub use cast::{CastError, cast, cast_coord, lift, project, try_cast};
pub use coord::{Coord, MAX_RANK};

pub mod cast;
pub mod coord;

/// An unsigned integer used as one extent or coordinate of a grid.
pub trait Extent: Copy + Send + Sync + 'static {
    fn to_usize(self) -> usize;
    fn from_usize(value: usize) -> Self;
}

/// A fixed-rank index or shape.
///
/// A rank-1 point and a bare scalar are the same object: `usize`, `[usize; 1]` and `(usize,)`
/// all convert into the same [`Coord`].
pub trait Point: Clone + Send + Sync + 'static {
    const RANK: usize;

    fn to_coord(&self) -> Coord;

    /// Reads the point back from a coordinate of rank [`Point::RANK`].
    fn from_coord(coord: &Coord) -> Self;
}

macro_rules! impl_extent {
    ($($t:ty),+) => {
        $(
            impl Extent for $t {
                #[inline]
                fn to_usize(self) -> usize {
                    self as usize
                }

                #[inline]
                fn from_usize(value: usize) -> Self {
                    value as $t
                }
            }

            impl Point for $t {
                const RANK: usize = 1;

                #[inline]
                fn to_coord(&self) -> Coord {
                    Coord::scalar(self.to_usize())
                }

                #[inline]
                fn from_coord(coord: &Coord) -> Self {
                    debug_assert_eq!(coord.rank(), 1);
                    Self::from_usize(coord[0])
                }
            }
        )+
    };
}

impl_extent!(u8, u16, u32, u64, usize);

impl<T: Extent, const N: usize> Point for [T; N] {
    const RANK: usize = N;

    #[inline]
    fn to_coord(&self) -> Coord {
        let mut coord = Coord::zeros(N);
        for (x, y) in coord.iter_mut().zip(self.iter()) {
            *x = y.to_usize();
        }
        coord
    }

    #[inline]
    fn from_coord(coord: &Coord) -> Self {
        debug_assert_eq!(coord.rank(), N);
        std::array::from_fn(|index| T::from_usize(coord[index]))
    }
}

macro_rules! impl_point_tuple {
    ($($t:ident),+) => {
        impl<$($t: Extent),+> Point for ($($t,)+) {
            const RANK: usize = [$(stringify!($t)),+].len();

            #[inline]
            fn to_coord(&self) -> Coord {
                let ($(snake!($t),)+) = *self;
                Coord::from_slice(&[$(snake!($t).to_usize()),+])
            }

            #[inline]
            fn from_coord(coord: &Coord) -> Self {
                debug_assert_eq!(coord.rank(), Self::RANK);
                let mut values = coord.iter().copied();
                ($(<$t>::from_usize(values.next().unwrap_or_default()),)+)
            }
        }
    };
}

impl_point_tuple!(T0);
impl_point_tuple!(T0, T1);
impl_point_tuple!(T0, T1, T2);
impl_point_tuple!(T0, T1, T2, T3);
impl_point_tuple!(T0, T1, T2, T3, T4);
impl_point_tuple!(T0, T1, T2, T3, T4, T5);
impl_point_tuple!(T0, T1, T2, T3, T4, T5, T6);
impl_point_tuple!(T0, T1, T2, T3, T4, T5, T6, T7);

#[cfg(test)]
mod tests {
    use super::{Coord, Point};

    #[test]
    fn test_scalar_is_rank_one() {
        assert_eq!(7usize.to_coord(), [7u32].to_coord());
        assert_eq!(7usize.to_coord(), (7u8,).to_coord());
        assert_eq!(<(u16,)>::RANK, 1);
        assert_eq!(u32::from_coord(&Coord::scalar(7)), 7);
    }

    #[test]
    fn test_points() {
        let coord = (1u8, 2u16, 3u32, 4u64).to_coord();
        assert_eq!(coord, Coord::from_slice(&[1, 2, 3, 4]));
        assert_eq!(<(u8, u16, u32, u64)>::from_coord(&coord), (1, 2, 3, 4));
        assert_eq!(<[usize; 4]>::from_coord(&coord), [1, 2, 3, 4]);
        assert_eq!(<[u32; 2]>::RANK, 2);
    }
}
