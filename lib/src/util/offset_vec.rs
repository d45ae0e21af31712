use std::fmt::{Debug, Error, Formatter};
use std::iter::{DoubleEndedIterator, Enumerate, Extend, FromIterator};
use std::slice::Iter;
use std::vec::IntoIter as VecIntoIter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// The operand stack is the main user: `long` and `double` take two stack words while everything
/// else takes one, and the maximum stack size of a method is measured in words.
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
        }
    }

    /// Length of the `OffsetVec` (aka. number of entries)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current offset size of the `OffsetVec` (aka. offset of the next element to be added)
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the back
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));

        offset
    }

    /// Remove an entry from the back
    pub fn pop(&mut self) -> Option<(Offset, usize, T)> {
        self.entries.pop().map(|(off, elem)| {
            self.offset_len = off;
            (off, self.entries.len(), elem)
        })
    }

    /// Peek at the entry `depth` positions from the back (0 is the top)
    pub fn peek(&self, depth: usize) -> Option<&T> {
        self.entries
            .len()
            .checked_sub(depth + 1)
            .map(|idx| &self.entries[idx].1)
    }

    /// Empty the vector
    pub fn clear(&mut self) {
        self.entries.clear();
        self.offset_len = Offset(0);
    }

    /// Mutable access to an entry by its position, only if the replacement keeps the width
    pub fn replace_index(&mut self, index: usize, value: T) -> Result<T, T> {
        match self.entries.get_mut(index) {
            Some((_, existing)) if existing.width() == value.width() => {
                Ok(std::mem::replace(existing, value))
            }
            _ => Err(value),
        }
    }

    pub fn iter<'a>(&'a self) -> OffsetVecIter<'a, T> {
        self.into_iter()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

/// Iterator for owned `OffsetVec`
pub struct OffsetVecIntoIter<T>(Enumerate<VecIntoIter<(Offset, T)>>);

impl<T> Iterator for OffsetVecIntoIter<T> {
    type Item = (Offset, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> DoubleEndedIterator for OffsetVecIntoIter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> IntoIterator for OffsetVec<T> {
    type Item = (Offset, usize, T);
    type IntoIter = OffsetVecIntoIter<T>;

    fn into_iter(self) -> OffsetVecIntoIter<T> {
        OffsetVecIntoIter(self.entries.into_iter().enumerate())
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> DoubleEndedIterator for OffsetVecIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Width, const N: usize> From<[T; N]> for OffsetVec<T> {
    fn from(elems: [T; N]) -> Self {
        elems.into_iter().collect()
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Word {
        Single(u8),
        Double(u8),
    }

    impl Width for Word {
        fn width(&self) -> usize {
            match self {
                Word::Single(_) => 1,
                Word::Double(_) => 2,
            }
        }
    }

    #[test]
    fn mixed_width_stack() {
        let mut stack: OffsetVec<Word> = OffsetVec::new();
        stack.push(Word::Single(1));
        stack.push(Word::Double(2));
        stack.push(Word::Single(3));
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.offset_len(), Offset(4), "two single words and one double word");
        assert_eq!(stack.peek(0), Some(&Word::Single(3)));
        assert_eq!(stack.peek(1), Some(&Word::Double(2)));
        assert_eq!(stack.peek(3), None);

        assert_eq!(stack.pop(), Some((Offset(3), 2, Word::Single(3))));
        assert_eq!(stack.offset_len(), Offset(3));
        assert_eq!(stack.pop(), Some((Offset(1), 1, Word::Double(2))));
        assert_eq!(stack.offset_len(), Offset(1));
    }

    #[test]
    fn replace_keeps_width() {
        let mut stack: OffsetVec<Word> = OffsetVec::from([Word::Single(1), Word::Double(2)]);
        assert_eq!(stack.replace_index(0, Word::Single(7)), Ok(Word::Single(1)));
        assert_eq!(stack.replace_index(1, Word::Single(7)), Err(Word::Single(7)));
        assert_eq!(
            stack.into_iter().collect::<Vec<_>>(),
            vec![(Offset(0), 0, Word::Single(7)), (Offset(1), 1, Word::Double(2))]
        );
    }
}
