use super::{ClassHierarchy, TypeInfo};
use crate::jvm::BinaryName;
use std::collections::HashMap;

/// `(name, superclass, interfaces, is_interface)`
type Entry = (
    &'static str,
    Option<&'static str>,
    &'static [&'static str],
    bool,
);

const OBJECT: Option<&str> = Some("java/lang/Object");

/// Classes inside `java.*` which analysis of ordinary code tends to run into
const JAVA_CLASSES: &[Entry] = &[
    ("java/lang/Object", None, &[], false),
    ("java/lang/CharSequence", OBJECT, &[], true),
    ("java/lang/Comparable", OBJECT, &[], true),
    ("java/lang/Cloneable", OBJECT, &[], true),
    ("java/lang/Runnable", OBJECT, &[], true),
    ("java/lang/Iterable", OBJECT, &[], true),
    ("java/lang/AutoCloseable", OBJECT, &[], true),
    ("java/io/Serializable", OBJECT, &[], true),
    ("java/io/Closeable", OBJECT, &["java/lang/AutoCloseable"], true),
    ("java/io/Flushable", OBJECT, &[], true),
    ("java/lang/annotation/Annotation", OBJECT, &[], true),
    (
        "java/lang/String",
        OBJECT,
        &[
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
        ],
        false,
    ),
    ("java/lang/Class", OBJECT, &["java/io/Serializable"], false),
    ("java/lang/System", OBJECT, &[], false),
    ("java/lang/Math", OBJECT, &[], false),
    ("java/lang/Number", OBJECT, &["java/io/Serializable"], false),
    (
        "java/lang/Integer",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Long",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Float",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Double",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Boolean",
        OBJECT,
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Character",
        OBJECT,
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    ("java/lang/Throwable", OBJECT, &["java/io/Serializable"], false),
    ("java/lang/Error", Some("java/lang/Throwable"), &[], false),
    ("java/lang/AssertionError", Some("java/lang/Error"), &[], false),
    ("java/lang/Exception", Some("java/lang/Throwable"), &[], false),
    (
        "java/lang/RuntimeException",
        Some("java/lang/Exception"),
        &[],
        false,
    ),
    (
        "java/lang/IllegalStateException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/IllegalArgumentException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/IllegalMonitorStateException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/ArithmeticException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/NullPointerException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/ClassCastException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/UnsupportedOperationException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/IndexOutOfBoundsException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        Some("java/lang/IndexOutOfBoundsException"),
        &[],
        false,
    ),
    (
        "java/lang/NegativeArraySizeException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/io/OutputStream",
        OBJECT,
        &["java/io/Closeable", "java/io/Flushable"],
        false,
    ),
    (
        "java/io/FilterOutputStream",
        Some("java/io/OutputStream"),
        &[],
        false,
    ),
    (
        "java/io/PrintStream",
        Some("java/io/FilterOutputStream"),
        &["java/lang/Appendable", "java/io/Closeable"],
        false,
    ),
    ("java/lang/Appendable", OBJECT, &[], true),
    ("java/lang/invoke/MethodType", OBJECT, &["java/io/Serializable"], false),
    ("java/lang/invoke/MethodHandle", OBJECT, &[], false),
    ("java/util/Collection", OBJECT, &["java/lang/Iterable"], true),
    ("java/util/List", OBJECT, &["java/util/Collection"], true),
    ("java/util/Map", OBJECT, &[], true),
    (
        "java/util/AbstractCollection",
        OBJECT,
        &["java/util/Collection"],
        false,
    ),
    (
        "java/util/AbstractList",
        Some("java/util/AbstractCollection"),
        &["java/util/List"],
        false,
    ),
    (
        "java/util/ArrayList",
        Some("java/util/AbstractList"),
        &[
            "java/util/List",
            "java/lang/Cloneable",
            "java/io/Serializable",
        ],
        false,
    ),
    ("java/util/AbstractMap", OBJECT, &["java/util/Map"], false),
    (
        "java/util/HashMap",
        Some("java/util/AbstractMap"),
        &[
            "java/util/Map",
            "java/lang/Cloneable",
            "java/io/Serializable",
        ],
        false,
    ),
];

/// Classes of the coroutine runtime, which instrumented code calls into
const RUNTIME_CLASSES: &[Entry] = &[
    (
        "coroutines/user/Continuation",
        OBJECT,
        &["java/io/Serializable"],
        false,
    ),
    ("coroutines/user/Coroutine", OBJECT, &["java/io/Serializable"], true),
    (
        "coroutines/user/MethodState",
        OBJECT,
        &["java/io/Serializable"],
        false,
    ),
    (
        "coroutines/user/LockState",
        OBJECT,
        &["java/io/Serializable"],
        false,
    ),
    ("coroutines/user/Data", OBJECT, &["java/io/Serializable"], false),
    (
        "coroutines/user/Suspendable",
        OBJECT,
        &["java/lang/annotation/Annotation"],
        true,
    ),
];

/// Built-in table of Java library and coroutine runtime types
pub struct JavaLibraryHierarchy {
    classes: HashMap<BinaryName, TypeInfo>,
}

impl JavaLibraryHierarchy {
    pub fn new() -> Self {
        let classes = JAVA_CLASSES
            .iter()
            .chain(RUNTIME_CLASSES)
            .map(|(name, superclass, interfaces, is_interface)| {
                let name = BinaryName::name(*name);
                let info = TypeInfo {
                    name: name.clone(),
                    superclass: superclass.map(BinaryName::name),
                    interfaces: interfaces.iter().map(|i| BinaryName::name(*i)).collect(),
                    is_interface: *is_interface,
                };
                (name, info)
            })
            .collect();
        JavaLibraryHierarchy { classes }
    }

    /// All of the classes in the table
    pub fn class_names(&self) -> impl Iterator<Item = &BinaryName> {
        self.classes.keys()
    }
}

impl Default for JavaLibraryHierarchy {
    fn default() -> Self {
        JavaLibraryHierarchy::new()
    }
}

impl ClassHierarchy for JavaLibraryHierarchy {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        self.classes.get(name).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::is_subclass;

    #[test]
    fn every_super_type_is_known() {
        let java = JavaLibraryHierarchy::new();
        for name in java.class_names() {
            let info = java.type_info(name).unwrap();
            for super_type in info.superclass.iter().chain(&info.interfaces) {
                assert!(
                    java.lookup(super_type).is_some(),
                    "{} refers to unknown {}",
                    name,
                    super_type
                );
            }
            assert!(
                is_subclass(name, &BinaryName::OBJECT, &java).unwrap(),
                "{} reaches java.lang.Object",
                name
            );
        }
    }
}
