//! Restartable iteration helpers
//!
//! Storage layers hand out views ("the keys visible right now") that callers
//! may walk more than once. A [`Restartable`] is anything that can produce a
//! fresh iterator on demand without consuming itself; [`chain`] glues two of
//! them into one merged view that is itself restartable.

/// A lazily evaluated sequence that can be walked any number of times
pub trait Restartable {
    type Item;
    type Iter: Iterator<Item = Self::Item>;

    /// Start a new pass from the beginning
    fn restart(&self) -> Self::Iter;

    /// Count items by walking one full pass
    fn count(&self) -> usize {
        self.restart().count()
    }

    /// Collect one full pass
    fn to_vec(&self) -> Vec<Self::Item> {
        self.restart().collect()
    }
}

/// Restartable view over a cloneable iterator
#[derive(Debug, Clone)]
pub struct Source<I> {
    iter: I,
}

/// Wrap a cloneable iterator so it can be replayed
pub fn source<I: Iterator + Clone>(iter: I) -> Source<I> {
    Source { iter }
}

impl<I: Iterator + Clone> Restartable for Source<I> {
    type Item = I::Item;
    type Iter = I;

    fn restart(&self) -> I {
        self.iter.clone()
    }
}

/// Two restartable sequences walked back to back
#[derive(Debug, Clone)]
pub struct Chain<A, B> {
    first: A,
    second: B,
}

/// Concatenate two restartable sequences
pub fn chain<A, B>(first: A, second: B) -> Chain<A, B>
where
    A: Restartable,
    B: Restartable<Item = A::Item>,
{
    Chain { first, second }
}

impl<A, B> Restartable for Chain<A, B>
where
    A: Restartable,
    B: Restartable<Item = A::Item>,
{
    type Item = A::Item;
    type Iter = std::iter::Chain<A::Iter, B::Iter>;

    fn restart(&self) -> Self::Iter {
        self.first.restart().chain(self.second.restart())
    }
}

/// Any number of restartable sequences of the same type, walked in order
#[derive(Debug, Clone)]
pub struct ChainAll<R> {
    parts: Vec<R>,
}

pub fn chain_all<R: Restartable>(parts: impl IntoIterator<Item = R>) -> ChainAll<R> {
    ChainAll {
        parts: parts.into_iter().collect(),
    }
}

impl<R: Restartable> Restartable for ChainAll<R> {
    type Item = R::Item;
    type Iter = std::iter::Flatten<std::vec::IntoIter<R::Iter>>;

    fn restart(&self) -> Self::Iter {
        self.parts
            .iter()
            .map(Restartable::restart)
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_restarts() {
        let data = [1, 2, 3];
        let view = source(data.iter().copied());
        assert_eq!(view.to_vec(), vec![1, 2, 3]);
        assert_eq!(view.to_vec(), vec![1, 2, 3]);
        assert_eq!(Restartable::count(&view), 3);
    }

    #[test]
    fn test_chain_is_lazy_and_restartable() {
        let base = ["a", "b", "c"];
        let extra = ["d"];
        let hidden = "b";

        let merged = chain(
            source(base.iter().filter(move |k| **k != hidden)),
            source(extra.iter()),
        );

        let first: Vec<_> = merged.restart().copied().collect();
        let second: Vec<_> = merged.restart().copied().collect();
        assert_eq!(first, vec!["a", "c", "d"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_chain_all_preserves_part_order() {
        let a = [1, 2];
        let b: [i32; 0] = [];
        let c = [3];
        let all = chain_all(vec![
            source(a.iter()),
            source(b.iter()),
            source(c.iter()),
        ]);
        assert_eq!(all.to_vec(), vec![&1, &2, &3]);
        assert_eq!(all.to_vec().len(), 3);
    }

    #[test]
    fn test_empty_chain() {
        let empty: [u8; 0] = [];
        let merged = chain(source(empty.iter()), source(empty.iter()));
        assert_eq!(merged.restart().next(), None);
    }
}
