use super::{ClassHeader, ClassHierarchy, TypeInfo};
use crate::jvm::{BinaryName, Error};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Hierarchy precomputed by scanning directories of class files
///
/// Directories are scanned in order and the first occurrence of a class wins, just like a JVM
/// classpath.
#[derive(Debug, Default)]
pub struct ClasspathHierarchy {
    classes: HashMap<BinaryName, TypeInfo>,
    origins: HashMap<BinaryName, PathBuf>,
}

impl ClasspathHierarchy {
    /// Scan every `.class` file under the given directories
    pub fn scan<P: AsRef<Path>>(directories: &[P]) -> Result<ClasspathHierarchy, Error> {
        let mut hierarchy = ClasspathHierarchy::default();
        for directory in directories {
            hierarchy.scan_directory(directory.as_ref())?;
        }
        Ok(hierarchy)
    }

    fn scan_directory(&mut self, directory: &Path) -> Result<(), Error> {
        log::debug!("Scanning classpath directory {}", directory.display());

        // Sorting makes "first occurrence" deterministic inside one directory too
        for entry in WalkDir::new(directory).sort_by_file_name() {
            let entry = entry.map_err(|err| Error::IoError(err.into()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "class")
            {
                continue;
            }

            let bytes = fs::read(path)?;
            let header = match ClassHeader::parse(&bytes) {
                Ok(header) => header,
                Err(err) => {
                    log::warn!("Skipping {}: {}", path.display(), err);
                    continue;
                }
            };

            if let Some(previous) = self.origins.get(&header.name) {
                log::debug!(
                    "Ignoring {} (already found {} in {})",
                    path.display(),
                    header.name,
                    previous.display()
                );
                continue;
            }
            self.origins.insert(header.name.clone(), path.to_owned());
            self.classes.insert(header.name.clone(), header.type_info());
        }
        Ok(())
    }

    /// Number of classes found
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class file the class was read from
    pub fn origin(&self, name: &BinaryName) -> Option<&Path> {
        self.origins.get(name).map(PathBuf::as_path)
    }
}

impl ClassHierarchy for ClasspathHierarchy {
    fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
        self.classes.get(name).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassAccessFlags, Name};
    use crate::util::Serialize;

    fn write_class(dir: &Path, file: &str, name: &str, superclass: &str, interface: bool) {
        let mut access_flags = ClassAccessFlags::PUBLIC;
        if interface {
            access_flags |= ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        }
        let header = ClassHeader {
            minor_version: 0,
            major_version: 52,
            access_flags,
            name: BinaryName::from_str(name).unwrap(),
            superclass: Some(BinaryName::from_str(superclass).unwrap()),
            interfaces: vec![],
        };
        let path = dir.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut bytes = vec![];
        header.serialize(&mut bytes).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_class(first.path(), "a/Task.class", "a/Task", "java/lang/Object", false);
        write_class(second.path(), "a/Task.class", "a/Task", "java/lang/Number", false);
        write_class(second.path(), "a/Job.class", "a/Job", "java/lang/Object", true);
        fs::write(second.path().join("a/README.txt"), "not a class").unwrap();
        fs::write(second.path().join("a/Broken.class"), [1, 2, 3]).unwrap();

        let hierarchy = ClasspathHierarchy::scan(&[first.path(), second.path()]).unwrap();
        assert_eq!(hierarchy.len(), 2);

        let task = hierarchy
            .lookup(&BinaryName::from_str("a/Task").unwrap())
            .unwrap();
        assert_eq!(task.superclass, Some(BinaryName::OBJECT));
        assert!(hierarchy
            .origin(&task.name)
            .unwrap()
            .starts_with(first.path()));

        let job = hierarchy
            .lookup(&BinaryName::from_str("a/Job").unwrap())
            .unwrap();
        assert!(job.is_interface);
    }
}
