use coroutines::interp::{self, HeapObject, HeapObjectCodec, Machine, Value};
use coroutines::jvm::class_graph::{
    ClassHeader, ClassHierarchy, ClasspathHierarchy, CompositeHierarchy, JavaLibraryHierarchy,
    TypeInfo,
};
use coroutines::jvm::{self, BinaryName, Name, RenderDescriptor};
use coroutines::runtime::Continuation;
use coroutines::snapshot::{read_snapshot, Data, SNAPSHOT_MAGIC};

use clap::{Arg, ArgAction, Command};
use std::collections::HashSet;
use std::fs;

fn main() -> Result<(), interp::Error> {
    env_logger::init();

    let matches = Command::new("Coroutine snapshot tools")
        .version("0.1.0")
        .about("Inspect coroutine snapshots and the type hierarchy of class files")
        .subcommand_required(true)
        .subcommand(
            Command::new("inspect")
                .about("Describe a snapshot or the header of a class file")
                .arg(
                    Arg::new("FILE")
                        .help("Snapshot or class file to read")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("hierarchy")
                .about("Print the super types of classes found on a classpath")
                .arg(
                    Arg::new("classpath")
                        .long("classpath")
                        .value_name("DIR")
                        .action(ArgAction::Append)
                        .help("Directory of class files (can be repeated, earlier wins)"),
                )
                .arg(
                    Arg::new("CLASS")
                        .help("Binary class names (eg. `java/lang/String`)")
                        .required(true)
                        .action(ArgAction::Append),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("inspect", sub)) => {
            let file = sub.get_one::<String>("FILE").map(String::as_str).unwrap_or_default();
            log::info!("Reading '{}'", file);
            let bytes = fs::read(file).map_err(jvm::Error::IoError)?;
            if bytes.starts_with(&SNAPSHOT_MAGIC.to_be_bytes()) {
                inspect_snapshot(&bytes)
            } else {
                inspect_class(&bytes)
            }
        }
        Some(("hierarchy", sub)) => {
            let directories: Vec<&String> = sub
                .get_many::<String>("classpath")
                .map(|dirs| dirs.collect())
                .unwrap_or_default();
            let classpath = ClasspathHierarchy::scan(&directories)?;
            log::info!("Found {} classes on the classpath", classpath.len());
            let hierarchy = CompositeHierarchy::new()
                .with(&classpath)
                .with(JavaLibraryHierarchy::new());
            let classes = sub.get_many::<String>("CLASS").into_iter().flatten();
            for class in classes {
                let name = BinaryName::from_string(class.clone()).map_err(|err| {
                    interp::Error::Unsupported(format!("bad class name {:?}: {}", class, err))
                })?;
                if let Some(origin) = classpath.origin(&name) {
                    println!("{} (from {})", name, origin.display());
                }
                print_super_types(&hierarchy, &name)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn inspect_class(bytes: &[u8]) -> Result<(), interp::Error> {
    let header = ClassHeader::parse(bytes)?;
    println!(
        "class {} (version {}.{})",
        header.name, header.major_version, header.minor_version
    );
    println!("  flags: {:?}", header.access_flags);
    if let Some(superclass) = &header.superclass {
        println!("  extends {}", superclass);
    }
    for interface in &header.interfaces {
        println!("  implements {}", interface);
    }
    Ok(())
}

fn inspect_snapshot(bytes: &[u8]) -> Result<(), interp::Error> {
    let mut machine = Machine::new();
    let handle = machine.alloc(HeapObject::Continuation(Continuation::new()));
    let state = {
        let mut objects = HeapObjectCodec::new(&mut machine, handle);
        let mut reader = bytes;
        read_snapshot(&mut reader, &mut objects)?
    };

    println!("coroutine {}", describe(&machine, state.payload)?);
    println!("{} frames (outermost first)", state.frames.len());
    for (index, versioned) in state.frames.iter().enumerate() {
        for (version, frame) in versioned.representations.iter().enumerate() {
            let marker = if version == 0 { format!("#{}", index) } else { String::from("  ->") };
            println!("{} {}", marker, frame.key());
            if !frame.monitors.is_empty() {
                let monitors = frame
                    .monitors
                    .iter()
                    .map(|monitor| describe(&machine, *monitor))
                    .collect::<Result<Vec<_>, _>>()?;
                println!("      monitors: {}", monitors.join(", "));
            }
            print_data(&machine, "locals", &frame.locals)?;
            print_data(&machine, "stack", &frame.stack)?;
        }
    }
    Ok(())
}

fn print_data(machine: &Machine, label: &str, data: &Data<Value>) -> Result<(), interp::Error> {
    if data.is_empty() {
        return Ok(());
    }
    let objects = data
        .objects
        .iter()
        .enumerate()
        .map(|(idx, object)| {
            if data.continuation_indexes.contains(&(idx as u32)) {
                Ok(String::from("<continuation>"))
            } else {
                describe(machine, *object)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    println!(
        "      {}: ints {:?}, longs {:?}, floats {:?}, doubles {:?}, objects [{}]",
        label,
        data.ints,
        data.longs,
        data.floats,
        data.doubles,
        objects.join(", ")
    );
    Ok(())
}

/// Short description of a value read from a snapshot
fn describe(machine: &Machine, value: Value) -> Result<String, interp::Error> {
    let obj = match value {
        Value::Ref(obj) => obj,
        other => return machine.render(other),
    };
    Ok(match machine.object(obj)? {
        HeapObject::String(string) => format!("{:?}", string),
        HeapObject::Array { array_type, values } => {
            format!("{} of length {}", array_type.render(), values.len())
        }
        other => other.class_type().render(),
    })
}

fn print_super_types(hierarchy: &dyn ClassHierarchy, name: &BinaryName) -> Result<(), interp::Error> {
    for (depth, info) in super_class_chain(hierarchy, name)?.iter().enumerate() {
        let kind = if info.is_interface { "interface" } else { "class" };
        println!("{:indent$}{} {}", "", kind, info.name.as_str(), indent = depth * 2);
        for interface in &info.interfaces {
            println!("{:indent$}implements {}", "", interface, indent = depth * 2 + 2);
        }
    }
    Ok(())
}

/// The class followed by its superclasses, stopping early if a class shows up twice
fn super_class_chain(
    hierarchy: &dyn ClassHierarchy,
    name: &BinaryName,
) -> Result<Vec<TypeInfo>, interp::Error> {
    let mut chain = vec![];
    let mut seen = HashSet::new();
    let mut current = Some(name.clone());
    while let Some(class) = current {
        if !seen.insert(class.clone()) {
            log::warn!("Superclass cycle through {}", class);
            break;
        }
        let info = hierarchy.type_info(&class)?;
        current = info.superclass.clone();
        chain.push(info);
    }
    Ok(chain)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    /// Hierarchy from a fixed table of `(class, superclass)` pairs
    struct Table(HashMap<BinaryName, Option<BinaryName>>);

    impl Table {
        fn new(entries: &[(&str, Option<&str>)]) -> Table {
            let name = |name: &str| BinaryName::from_string(name.to_owned()).unwrap();
            Table(
                entries
                    .iter()
                    .map(|(class, superclass)| (name(*class), superclass.map(name)))
                    .collect(),
            )
        }
    }

    impl ClassHierarchy for Table {
        fn lookup(&self, name: &BinaryName) -> Option<TypeInfo> {
            self.0.get(name).map(|superclass| TypeInfo {
                name: name.clone(),
                superclass: superclass.clone(),
                interfaces: vec![],
                is_interface: false,
            })
        }
    }

    fn names(chain: &[TypeInfo]) -> Vec<&str> {
        chain.iter().map(|info| info.name.as_str()).collect()
    }

    #[test]
    fn chain_ends_at_the_root() {
        let table = Table::new(&[("me/A", Some("me/B")), ("me/B", None)]);
        let start = BinaryName::from_string(String::from("me/A")).unwrap();
        let chain = super_class_chain(&table, &start).unwrap();
        assert_eq!(names(&chain), vec!["me/A", "me/B"]);
    }

    #[test]
    fn cycles_stop_the_chain() {
        let table = Table::new(&[
            ("me/A", Some("me/B")),
            ("me/B", Some("me/C")),
            ("me/C", Some("me/A")),
        ]);
        let start = BinaryName::from_string(String::from("me/A")).unwrap();
        let chain = super_class_chain(&table, &start).unwrap();
        assert_eq!(names(&chain), vec!["me/A", "me/B", "me/C"], "each class once");
    }

    #[test]
    fn unknown_classes_are_errors() {
        let table = Table::new(&[("me/A", Some("me/Missing"))]);
        let start = BinaryName::from_string(String::from("me/A")).unwrap();
        assert!(super_class_chain(&table, &start).is_err());
    }
}
