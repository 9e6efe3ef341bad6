use std::cmp::Ordering;

use thiserror::Error;

use super::{Coord, Point};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("cast error: cannot cast into or out of a rank-0 grid")]
    RankZero,
    #[error("cast error: rank {0} exceeds the capacity of a coordinate")]
    RankOverflow(usize),
    #[error("cast error: shape {0} holds more cells than a usize can count")]
    SizeOverflow(Coord),
    #[error("cast error: index {0} does not match shape {1}")]
    Mismatch(Coord, Coord),
    #[error("cast error: cannot project index {0} of shape {1}")]
    Project(Coord, Coord),
    #[error("cast error: cannot lift index {0} toward shape {1}")]
    Lift(Coord, Coord),
}

/// Reduces the rank of `(index, shape)` by one, folding the two most significant dimensions into one.
///
/// For a 2D example, consider element `(2, 2)` in a `(5, 4)`-shaped grid:
/// its linear rank is `2 + 5 * 2 = 12`, and projecting gives index `(12)` in shape `(20)`.
///
/// Requires `index` and `shape` to be of the same rank, at least 2.
pub fn project(index: &Coord, shape: &Coord) -> Result<(Coord, Coord), CastError> {
    let rank = index.rank();
    if rank < 2 || rank != shape.rank() {
        return Err(CastError::Project(*index, *shape));
    }

    let mut projected_index = *index;
    let mut projected_shape = *shape;
    if let (Some(x), Some(e)) = (projected_index.pop(), projected_shape.pop()) {
        projected_index[rank - 2] += shape[rank - 2] * x;
        projected_shape[rank - 2] *= e;
    }
    Ok((projected_index, projected_shape))
}

/// Raises the rank of `index` by one toward `to_shape`.
///
/// The most significant coordinate `c` of `index` is split against the extent `e` of `to_shape`
/// at the same position: it is replaced by `c % e`, and `c / e` is appended as the new most significant coordinate.
pub fn lift(index: &Coord, to_shape: &Coord) -> Result<Coord, CastError> {
    let rank = index.rank();
    if rank == 0 || rank >= to_shape.rank() || to_shape[rank - 1] == 0 {
        return Err(CastError::Lift(*index, *to_shape));
    }

    let extent = to_shape[rank - 1];
    let mut lifted = *index;
    let x = lifted[rank - 1];
    lifted[rank - 1] = x % extent;
    lifted.push(x / extent);
    Ok(lifted)
}

/// Casts `index` of `from_shape` into an index of the rank of `to_shape`, preserving the linear rank.
///
/// Equal ranks re-package the index untouched; a lower rank is lifted, a higher one projected, one step at a time.
pub fn cast_coord(index: Coord, from_shape: Coord, to_shape: &Coord) -> Result<Coord, CastError> {
    if to_shape.rank() == 0 || index.rank() == 0 {
        return Err(CastError::RankZero);
    }
    match index.rank().cmp(&to_shape.rank()) {
        Ordering::Equal => Ok(index),
        Ordering::Less => cast_coord(lift(&index, to_shape)?, from_shape, to_shape),
        Ordering::Greater => {
            let (index, from_shape) = project(&index, &from_shape)?;
            cast_coord(index, from_shape, to_shape)
        }
    }
}

/// Typed [`cast_coord`]: converts an index of `from_shape` into a `To` index of `to_shape`.
pub fn try_cast<To, Index, FromShape, ToShape>(
    index: &Index,
    from_shape: &FromShape,
    to_shape: &ToShape,
) -> Result<To, CastError>
where
    To: Point,
    Index: Point,
    FromShape: Point,
    ToShape: Point,
{
    let index = index.to_coord();
    let from_shape = from_shape.to_coord();
    let to_shape = to_shape.to_coord();
    if index.rank() != from_shape.rank() {
        return Err(CastError::Mismatch(index, from_shape));
    }
    let to = cast_coord(index, from_shape, &to_shape)?;
    if to.rank() != To::RANK {
        return Err(CastError::Mismatch(to, to_shape));
    }
    Ok(To::from_coord(&to))
}

/// Converts an index of `from_shape` into a `To` index of `to_shape`.
///
/// # Panics
/// Panics on rank mismatches this model cannot resolve, e.g., a rank-0 target.
/// Use [`try_cast`] to handle them instead.
#[inline]
pub fn cast<To, Index, FromShape, ToShape>(
    index: &Index,
    from_shape: &FromShape,
    to_shape: &ToShape,
) -> To
where
    To: Point,
    Index: Point,
    FromShape: Point,
    ToShape: Point,
{
    match try_cast(index, from_shape, to_shape) {
        Ok(to) => to,
        Err(err) => panic!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{CastError, cast, lift, project, try_cast};
    use crate::grid::{Coord, MAX_RANK};

    /// Folds the most significant dimensions of `shape` until it reaches `rank`.
    fn fold(shape: &Coord, rank: usize) -> Coord {
        let mut shape = *shape;
        while shape.rank() > rank {
            let zeros = Coord::zeros(shape.rank());
            (_, shape) = project(&zeros, &shape).expect("rank must be at least 2");
        }
        shape
    }

    fn random_coord(rng: &mut fastrand::Rng, rank: usize, max: usize) -> Coord {
        let values: Vec<_> = (0..rank).map(|_| rng.usize(1..=max)).collect();
        Coord::from_slice(&values)
    }

    fn random_index(rng: &mut fastrand::Rng, shape: &Coord) -> Coord {
        let values: Vec<_> = shape.iter().map(|&e| rng.usize(0..e)).collect();
        Coord::from_slice(&values)
    }

    #[test]
    fn test_project() -> Result<(), CastError> {
        let (index, shape) = project(&Coord::from_slice(&[2, 2]), &Coord::from_slice(&[5, 4]))?;
        assert_eq!(index, Coord::scalar(12));
        assert_eq!(shape, Coord::scalar(20));

        let (index, shape) = project(
            &Coord::from_slice(&[1, 2, 3]),
            &Coord::from_slice(&[4, 5, 6]),
        )?;
        assert_eq!(index, Coord::from_slice(&[1, 17]));
        assert_eq!(shape, Coord::from_slice(&[4, 30]));

        let scalar = Coord::scalar(3);
        assert!(project(&scalar, &Coord::scalar(4)).is_err());
        Ok(())
    }

    #[test]
    fn test_lift() -> Result<(), CastError> {
        let lifted = lift(&Coord::scalar(12), &Coord::from_slice(&[5, 4]))?;
        assert_eq!(lifted, Coord::from_slice(&[2, 2]));

        let lifted = lift(&Coord::from_slice(&[1, 17]), &Coord::from_slice(&[4, 5, 6]))?;
        assert_eq!(lifted, Coord::from_slice(&[1, 2, 3]));

        assert!(lift(&Coord::scalar(3), &Coord::scalar(4)).is_err());
        assert!(lift(&Coord::scalar(3), &Coord::from_slice(&[0, 4])).is_err());
        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<(), CastError> {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..1000 {
            let rank = rng.usize(2..=MAX_RANK.min(5));
            let shape = random_coord(&mut rng, rank, 6);
            let index = random_index(&mut rng, &shape);

            let (projected, _) = project(&index, &shape)?;
            let lifted = lift(&projected, &shape)?;
            assert_eq!(lifted, index, "shape {shape}");
        }
        Ok(())
    }

    #[test]
    fn test_linear_rank() {
        let index = cast::<usize, _, _, _>(&[2usize, 2], &[5usize, 4], &20usize);
        assert_eq!(index, 12);

        let index = cast::<[u32; 2], _, _, _>(&12usize, &20usize, &[5u32, 4]);
        assert_eq!(index, [2, 2]);

        let mut rng = fastrand::Rng::with_seed(0xcafe);
        for _ in 0..1000 {
            let rank = rng.usize(1..=5);
            let fine = random_coord(&mut rng, rank, 5);
            let from_shape = fold(&fine, rng.usize(1..=fine.rank()));
            let to_shape = fold(&fine, rng.usize(1..=fine.rank()));
            let index = random_index(&mut rng, &from_shape);

            let to = super::cast_coord(index, from_shape, &to_shape).expect("compatible shapes");
            assert!(to_shape.contains(&to), "{to} outside {to_shape}");
            assert_eq!(to.linear(&to_shape), index.linear(&from_shape));
        }
    }

    #[test]
    fn test_identity() {
        let index: (u32, u32, u32) = cast(&[1usize, 2, 3], &[4usize, 5, 6], &[4usize, 5, 6]);
        assert_eq!(index, (1, 2, 3));

        let index: usize = cast(&(7usize,), &9usize, &[9usize]);
        assert_eq!(index, 7);
    }

    #[test]
    fn test_rank_zero() {
        let err = try_cast::<[usize; 0], _, _, _>(&3usize, &4usize, &[0usize; 0]);
        assert_eq!(err, Err(CastError::RankZero));

        let err = try_cast::<usize, _, _, _>(&[1usize, 2], &4usize, &4usize);
        assert!(matches!(err, Err(CastError::Mismatch(..))));
    }

    #[test]
    #[should_panic]
    fn test_cast_panics() {
        let _: [usize; 0] = cast(&3usize, &4usize, &[0usize; 0]);
    }
}
