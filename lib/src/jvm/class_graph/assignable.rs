use super::ClassHierarchy;
use crate::jvm::{ArrayType, BaseType, BinaryName, Error, RefType};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Subtyping relationship between types
pub trait Assignable {
    /// Is the first type assignable to the second?
    ///
    /// This matches the semantics of the prolog predicate `isJavaAssignable(sub_type, super_type)`
    /// in the JVM verifier specification: in particular, every reference type is assignable to an
    /// interface type.
    fn is_assignable<H: ClassHierarchy + ?Sized>(
        &self,
        super_type: &Self,
        hierarchy: &H,
    ) -> Result<bool, Error>;
}

impl Assignable for BinaryName {
    fn is_assignable<H: ClassHierarchy + ?Sized>(
        &self,
        super_type: &BinaryName,
        hierarchy: &H,
    ) -> Result<bool, Error> {
        if self == super_type || super_type == &BinaryName::OBJECT {
            return Ok(true);
        }
        if hierarchy.type_info(super_type)?.is_interface {
            return Ok(true);
        }

        // Super type is a class, so only the superclass chain matters
        let mut current = hierarchy.type_info(self)?;
        while let Some(superclass) = current.superclass {
            if &superclass == super_type {
                return Ok(true);
            }
            current = hierarchy.type_info(&superclass)?;
        }
        Ok(false)
    }
}

impl Assignable for RefType {
    fn is_assignable<H: ClassHierarchy + ?Sized>(
        &self,
        super_type: &RefType,
        hierarchy: &H,
    ) -> Result<bool, Error> {
        match (self, super_type) {
            // Special superclass and interfaces of all arrays
            (
                RefType::PrimitiveArray(_) | RefType::ObjectArray(_),
                RefType::Object(object_type),
            ) => Ok(is_array_super_type(object_type)
                || hierarchy.type_info(object_type)?.is_interface),

            // Primitive arrays must match in dimension and type
            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => Ok(arr1 == arr2),

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less | Ordering::Equal => Ok(false),
                    Ordering::Greater => Ok(is_array_super_type(&arr2.element_type)),
                }
            }

            // Cursed (unsound) covariance of arrays
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less => Ok(false),
                    Ordering::Equal => arr1
                        .element_type
                        .is_assignable(&arr2.element_type, hierarchy),
                    Ordering::Greater => Ok(is_array_super_type(&arr2.element_type)),
                }
            }

            (RefType::Object(cls1), RefType::Object(cls2)) => cls1.is_assignable(cls2, hierarchy),

            _ => Ok(false),
        }
    }
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_super_type(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}

/// Is `sub_type` really a subtype of `super_type`?
///
/// Unlike [`Assignable`], this visits interfaces instead of assuming everything implements them.
pub fn is_subclass<H: ClassHierarchy + ?Sized>(
    sub_type: &BinaryName,
    super_type: &BinaryName,
    hierarchy: &H,
) -> Result<bool, Error> {
    let mut supertypes_to_visit: Vec<BinaryName> = vec![sub_type.clone()];
    let mut dont_revisit: HashSet<BinaryName> = HashSet::new();
    dont_revisit.insert(sub_type.clone());

    while let Some(class_name) = supertypes_to_visit.pop() {
        if &class_name == super_type {
            return Ok(true);
        }
        let info = hierarchy.type_info(&class_name)?;
        for next in info.superclass.into_iter().chain(info.interfaces) {
            if dont_revisit.insert(next.clone()) {
                supertypes_to_visit.push(next);
            }
        }
    }

    Ok(false)
}

pub(super) fn common_super_class<H: ClassHierarchy + ?Sized>(
    hierarchy: &H,
    a: &BinaryName,
    b: &BinaryName,
) -> Result<BinaryName, Error> {
    if a == b {
        return Ok(a.clone());
    }
    if is_subclass(b, a, hierarchy)? {
        return Ok(a.clone());
    }
    if is_subclass(a, b, hierarchy)? {
        return Ok(b.clone());
    }
    let info_a = hierarchy.type_info(a)?;
    if info_a.is_interface || hierarchy.type_info(b)?.is_interface {
        return Ok(BinaryName::OBJECT);
    }

    let mut current = info_a;
    loop {
        let superclass = match current.superclass {
            Some(superclass) => superclass,
            None => return Ok(BinaryName::OBJECT),
        };
        if is_subclass(b, &superclass, hierarchy)? {
            return Ok(superclass);
        }
        current = hierarchy.type_info(&superclass)?;
    }
}

pub(super) fn merge_ref_types<H: ClassHierarchy + ?Sized>(
    hierarchy: &H,
    a: &RefType,
    b: &RefType,
) -> Result<RefType, Error> {
    if a == b {
        return Ok(a.clone());
    }

    /// Array of `java/lang/Object` with the given additional dimensions
    fn object_array(additional_dimensions: usize) -> RefType {
        RefType::ObjectArray(ArrayType {
            additional_dimensions,
            element_type: BinaryName::OBJECT,
        })
    }

    /// Arrays of dimension `n + 1` are all `Object[]` with `n` additional dimensions
    fn common_dimensions(dims1: usize, dims2: usize) -> RefType {
        match dims1.min(dims2) {
            0 => RefType::OBJECT,
            n => object_array(n - 1),
        }
    }

    let merged = match (a, b) {
        (RefType::Object(cls1), RefType::Object(cls2)) => {
            RefType::Object(hierarchy.common_super_class(cls1, cls2)?)
        }

        (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
            if arr1.additional_dimensions == arr2.additional_dimensions {
                RefType::ObjectArray(ArrayType {
                    additional_dimensions: arr1.additional_dimensions,
                    element_type: hierarchy
                        .common_super_class(&arr1.element_type, &arr2.element_type)?,
                })
            } else {
                object_array(arr1.additional_dimensions.min(arr2.additional_dimensions))
            }
        }

        (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => {
            common_dimensions(arr1.additional_dimensions, arr2.additional_dimensions)
        }

        (RefType::PrimitiveArray(prim), RefType::ObjectArray(obj))
        | (RefType::ObjectArray(obj), RefType::PrimitiveArray(prim)) => {
            primitive_with_object_array(prim, obj)
        }

        (RefType::Object(cls), _) | (_, RefType::Object(cls)) => {
            if cls == &BinaryName::CLONEABLE || cls == &BinaryName::SERIALIZABLE {
                RefType::Object(cls.clone())
            } else {
                RefType::OBJECT
            }
        }
    };
    Ok(merged)
}

/// A primitive array with `n` additional dimensions is an `Object[]` with `n - 1` additional
/// dimensions
fn primitive_with_object_array(prim: &ArrayType<BaseType>, obj: &ArrayType<BinaryName>) -> RefType {
    match prim.additional_dimensions {
        0 => RefType::OBJECT,
        n => RefType::ObjectArray(ArrayType {
            additional_dimensions: (n - 1).min(obj.additional_dimensions),
            element_type: BinaryName::OBJECT,
        }),
    }
}
