use std::marker::PhantomData;

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Runtime description of an [`ExecutionCategory`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Category {
    /// Agents run one after another in index order.
    #[display("sequential")]
    Sequential,
    /// Agents may run in any order, possibly at the same time.
    #[display("parallel")]
    Parallel,
    /// Agents run at the same time and may wait for each other.
    #[display("concurrent")]
    Concurrent,
    /// A grid of groups: the outer category schedules groups, the inner one the agents of a group.
    #[display("nested({_0}, {_1})")]
    Nested(Box<Category>, Box<Category>),
}

impl Category {
    /// Number of grid levels described by the category.
    pub fn depth(&self) -> usize {
        match self {
            Category::Nested(outer, inner) => outer.depth() + inner.depth(),
            _ => 1,
        }
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        matches!(self, Category::Nested(..))
    }
}

/// Compile-time tag describing the concurrency semantics of a backend's agents.
pub trait ExecutionCategory: Send + Sync + 'static {
    /// Number of grid levels, i.e., one for flat categories.
    const DEPTH: usize;

    fn category() -> Category;
}

/// A category of one level.
pub trait FlatCategory: ExecutionCategory {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequential;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Parallel;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Concurrent;

/// A grid of groups, scheduled as `O` across groups and as `I` within one group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nested<O, I>(PhantomData<fn() -> (O, I)>);

macro_rules! impl_flat_category {
    ($t:ident) => {
        impl ExecutionCategory for $t {
            const DEPTH: usize = 1;

            #[inline]
            fn category() -> Category {
                Category::$t
            }
        }

        impl FlatCategory for $t {}
    };
}

impl_flat_category!(Sequential);
impl_flat_category!(Parallel);
impl_flat_category!(Concurrent);

impl<O: ExecutionCategory, I: ExecutionCategory> ExecutionCategory for Nested<O, I> {
    const DEPTH: usize = O::DEPTH + I::DEPTH;

    #[inline]
    fn category() -> Category {
        Category::Nested(Box::new(O::category()), Box::new(I::category()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Concurrent, ExecutionCategory, Nested, Parallel, Sequential};

    #[test]
    fn test_nested_category() {
        type Gpu = Nested<Parallel, Concurrent>;
        assert_eq!(Gpu::DEPTH, 2);
        assert!(Gpu::category().is_nested());
        assert_eq!(Gpu::category().to_string(), "nested(parallel, concurrent)");

        type Deep = Nested<Sequential, Gpu>;
        assert_eq!(Deep::DEPTH, 3);
        assert_eq!(Deep::category().depth(), 3);
        assert_eq!(Sequential::category(), Category::Sequential);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() -> Result<(), Box<dyn std::error::Error>> {
        let category = Nested::<Parallel, Concurrent>::category();
        let json = serde_json::to_string(&category)?;
        assert_eq!(serde_json::from_str::<Category>(&json)?, category);
        Ok(())
    }
}
