//! Type hierarchy queries
//!
//! Analysis only ever needs three facts about a class: its superclass, its interfaces and whether
//! it is itself an interface. Those come from a [`ClassHierarchy`], which can be backed by the
//! built-in Java library table, by class models in memory, by raw class files or by a scanned
//! classpath. Sources are combined with [`CompositeHierarchy`] and memoized with
//! [`CachingHierarchy`].

use crate::jvm::model::Class;
use crate::jvm::{BinaryName, Error, RefType};
use elsa::map::FrozenMap;
use std::collections::HashMap;

mod assignable;
mod class_file;
mod classpath;
mod java_lib_types;

pub use assignable::*;
pub use class_file::*;
pub use classpath::*;
pub use java_lib_types::*;

/// Super type information about one class or interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: BinaryName,

    /// Super class (`None` only for `java/lang/Object`)
    pub superclass: Option<BinaryName>,

    pub interfaces: Vec<BinaryName>,
    pub is_interface: bool,
}

/// Source of type hierarchy information
pub trait ClassHierarchy {
    /// Look up the super types of a class, if the class is known
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo>;

    /// Look up the super types of a class, failing if the class is unknown
    fn type_info(&self, name: &BinaryName) -> Result<TypeInfo, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::MissingClass(name.clone()))
    }

    /// Least common super class of two classes
    ///
    /// If one class is a subtype of the other, the super type is returned. Otherwise, if either is
    /// an interface, the result is `java/lang/Object`. Otherwise, the superclass chain of `a` is
    /// walked until reaching a superclass of `b`.
    fn common_super_class(&self, a: &BinaryName, b: &BinaryName) -> Result<BinaryName, Error> {
        assignable::common_super_class(self, a, b)
    }

    /// Least common super type of two reference types
    fn merge_ref_types(&self, a: &RefType, b: &RefType) -> Result<RefType, Error> {
        assignable::merge_ref_types(self, a, b)
    }
}

impl<H: ClassHierarchy + ?Sized> ClassHierarchy for &H {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        (**self).lookup(name)
    }
}

impl<H: ClassHierarchy + ?Sized> ClassHierarchy for Box<H> {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        (**self).lookup(name)
    }
}

/// Ordered list of hierarchy sources, where the first source to know a class wins
#[derive(Default)]
pub struct CompositeHierarchy<'a> {
    sources: Vec<Box<dyn ClassHierarchy + 'a>>,
}

impl<'a> CompositeHierarchy<'a> {
    pub fn new() -> Self {
        CompositeHierarchy { sources: vec![] }
    }

    /// Add a source, with lower priority than all existing sources
    pub fn with(mut self, source: impl ClassHierarchy + 'a) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn push(&mut self, source: impl ClassHierarchy + 'a) {
        self.sources.push(Box::new(source));
    }
}

impl<'a> ClassHierarchy for CompositeHierarchy<'a> {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        self.sources.iter().find_map(|source| source.lookup(name))
    }
}

/// Hierarchy built from in-memory class models (usually the unit being instrumented)
#[derive(Default, Debug)]
pub struct ClassModelHierarchy {
    classes: HashMap<BinaryName, TypeInfo>,
}

impl ClassModelHierarchy {
    pub fn new<'c>(classes: impl IntoIterator<Item = &'c Class>) -> Self {
        let classes = classes
            .into_iter()
            .map(|class| {
                let info = TypeInfo {
                    name: class.name.clone(),
                    superclass: class.superclass.clone(),
                    interfaces: class.interfaces.clone(),
                    is_interface: class.is_interface(),
                };
                (class.name.clone(), info)
            })
            .collect();
        ClassModelHierarchy { classes }
    }
}

impl ClassHierarchy for ClassModelHierarchy {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        self.classes.get(name).cloned()
    }
}

/// Memoizes lookups (hits and misses) into another hierarchy
///
/// Lookups only need `&self`, so the cache is an append-only map.
pub struct CachingHierarchy<H> {
    inner: H,
    cache: FrozenMap<BinaryName, Box<Option<TypeInfo>>>,
}

impl<H: ClassHierarchy> CachingHierarchy<H> {
    pub fn new(inner: H) -> Self {
        CachingHierarchy {
            inner,
            cache: FrozenMap::new(),
        }
    }

    /// Number of distinct classes looked up so far
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl<H: ClassHierarchy> ClassHierarchy for CachingHierarchy<H> {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }
        let info = self.inner.lookup(name);
        log::trace!("Caching hierarchy entry for {}: {:?}", name, info);
        self.cache.insert(name.clone(), Box::new(info)).clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassAccessFlags, Name};
    use std::cell::Cell;

    struct CountingHierarchy<'a>(&'a Cell<usize>);

    impl<'a> ClassHierarchy for CountingHierarchy<'a> {
        fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
            self.0.set(self.0.get() + 1);
            JavaLibraryHierarchy::new().lookup(name)
        }
    }

    #[test]
    fn composite_priority() {
        let mut shadow = Class::new(BinaryName::STRING, ClassAccessFlags::PUBLIC);
        shadow.superclass = Some(BinaryName::NUMBER);
        let models = ClassModelHierarchy::new([&shadow]);
        let hierarchy = CompositeHierarchy::new()
            .with(models)
            .with(JavaLibraryHierarchy::new());

        let string = hierarchy.type_info(&BinaryName::STRING).unwrap();
        assert_eq!(string.superclass, Some(BinaryName::NUMBER), "first source wins");

        let missing = BinaryName::from_str("does/not/Exist").unwrap();
        assert!(matches!(
            hierarchy.type_info(&missing),
            Err(Error::MissingClass(name)) if name == missing
        ));
    }

    #[test]
    fn caching_remembers_misses() {
        let calls = Cell::new(0);
        let hierarchy = CachingHierarchy::new(CountingHierarchy(&calls));
        let missing = BinaryName::from_str("does/not/Exist").unwrap();

        for _ in 0..3 {
            assert!(hierarchy.lookup(&BinaryName::OBJECT).is_some());
            assert!(hierarchy.lookup(&missing).is_none());
        }
        assert_eq!(calls.get(), 2, "each class looked up once");
        assert_eq!(hierarchy.cached_len(), 2);
    }
}
