use super::FrameKey;
use crate::jvm::model::{Attribute, Class, InstrumentedMethod};
use crate::jvm::Name;
use std::collections::HashMap;

/// Decides whether the running code can load a frame
pub trait FrameResolver {
    fn is_loadable(&self, key: &FrameKey) -> bool;
}

/// Resolver backed by the instrumentation markers of loaded classes
///
/// A frame can be loaded if its class has an instrumented method with the same id and version,
/// and that method has the frame's continuation point.
#[derive(Default, Debug)]
pub struct MarkerResolver {
    methods: HashMap<String, Vec<InstrumentedMethod>>,
}

impl MarkerResolver {
    pub fn new<'c>(classes: impl IntoIterator<Item = &'c Class>) -> MarkerResolver {
        let mut methods: HashMap<String, Vec<InstrumentedMethod>> = HashMap::new();
        for class in classes {
            for attribute in &class.attributes {
                if let Attribute::Instrumented(instrumented) = attribute {
                    methods
                        .entry(class.name.as_str().to_owned())
                        .or_default()
                        .extend(instrumented.iter().cloned());
                }
            }
        }
        MarkerResolver { methods }
    }
}

impl FrameResolver for MarkerResolver {
    fn is_loadable(&self, key: &FrameKey) -> bool {
        self.methods.get(&key.class_name).map_or(false, |methods| {
            methods.iter().any(|method| {
                method.method_id == key.method_id
                    && method.method_version == key.method_version
                    && key.continuation_point >= 0
                    && (key.continuation_point as u32) < method.continuation_points
            })
        })
    }
}
