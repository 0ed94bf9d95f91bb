//! Class hierarchy queries used when two reference types meet in a frame.
//!
//! The resolver never loads anything by itself: it asks a [`ClassHierarchy`],
//! which stands for the host's own loading context. Resolving through any
//! other context risks loading a class twice or recursively.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::class_reader::read_class_info;
use crate::constants::OBJECT;
use crate::error::{ClassReadError, TypeResolveError};

/// The structural facts about a class that assignability needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
}

impl ClassInfo {
    pub fn class(name: &str, super_name: &str, interfaces: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            is_interface: false,
        }
    }

    pub fn interface(name: &str, super_interfaces: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some(OBJECT.to_string()),
            interfaces: super_interfaces.iter().map(|name| name.to_string()).collect(),
            is_interface: true,
        }
    }
}

/// A loading context able to describe classes by internal name.
pub trait ClassHierarchy {
    fn resolve(&self, name: &str) -> Option<ClassInfo>;
}

impl<T: ClassHierarchy + ?Sized> ClassHierarchy for &T {
    fn resolve(&self, name: &str) -> Option<ClassInfo> {
        (**self).resolve(name)
    }
}

/// An in-memory hierarchy.
#[derive(Debug, Clone, Default)]
pub struct StaticHierarchy {
    classes: HashMap<String, ClassInfo>,
}

impl StaticHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hierarchy pre-populated with the `java/lang` and `java/io` types a
    /// method body most commonly merges.
    pub fn with_platform_types() -> Self {
        let mut hierarchy = Self::new();
        hierarchy.insert(ClassInfo {
            name: OBJECT.to_string(),
            super_name: None,
            interfaces: Vec::new(),
            is_interface: false,
        });
        for interface in [
            "java/io/Serializable",
            "java/lang/Cloneable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
            "java/lang/Runnable",
            "java/lang/Iterable",
            "java/lang/AutoCloseable",
        ] {
            hierarchy.insert(ClassInfo::interface(interface, &[]));
        }
        hierarchy.insert(ClassInfo::interface("java/util/Collection", &["java/lang/Iterable"]));
        hierarchy.insert(ClassInfo::interface("java/util/List", &["java/util/Collection"]));

        let serializable = "java/io/Serializable";
        hierarchy.insert(ClassInfo::class(
            "java/lang/String",
            OBJECT,
            &[serializable, "java/lang/Comparable", "java/lang/CharSequence"],
        ));
        hierarchy.insert(ClassInfo::class("java/lang/Throwable", OBJECT, &[serializable]));
        hierarchy.insert(ClassInfo::class("java/lang/Exception", "java/lang/Throwable", &[]));
        hierarchy.insert(ClassInfo::class("java/lang/Error", "java/lang/Throwable", &[]));
        hierarchy.insert(ClassInfo::class(
            "java/lang/RuntimeException",
            "java/lang/Exception",
            &[],
        ));
        hierarchy.insert(ClassInfo::class("java/lang/Number", OBJECT, &[serializable]));
        for boxed in [
            "java/lang/Integer",
            "java/lang/Long",
            "java/lang/Float",
            "java/lang/Double",
            "java/lang/Short",
            "java/lang/Byte",
        ] {
            hierarchy.insert(ClassInfo::class(boxed, "java/lang/Number", &["java/lang/Comparable"]));
        }
        for boxed in ["java/lang/Boolean", "java/lang/Character"] {
            hierarchy.insert(ClassInfo::class(
                boxed,
                OBJECT,
                &[serializable, "java/lang/Comparable"],
            ));
        }
        hierarchy.insert(ClassInfo::class("java/lang/Class", OBJECT, &[serializable]));
        hierarchy
    }

    pub fn insert(&mut self, info: ClassInfo) -> &mut Self {
        self.classes.insert(info.name.clone(), info);
        self
    }

    /// Parses the header of a class file and records it.
    pub fn insert_class_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, ClassReadError> {
        let info = read_class_info(bytes)?;
        Ok(self.insert(info))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassHierarchy for StaticHierarchy {
    fn resolve(&self, name: &str) -> Option<ClassInfo> {
        self.classes.get(name).cloned()
    }
}

/// A hierarchy backed by a host-supplied byte loader.
///
/// Lookups consult the loader first and fall back to the platform types.
/// Parsed headers are cached, misses included.
pub struct LoaderHierarchy<F> {
    load: F,
    platform: StaticHierarchy,
    cache: Mutex<HashMap<String, Option<ClassInfo>>>,
}

impl<F> LoaderHierarchy<F>
where
    F: Fn(&str) -> Option<Vec<u8>>,
{
    pub fn new(load: F) -> Self {
        Self {
            load,
            platform: StaticHierarchy::with_platform_types(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load(&self, name: &str) -> Option<ClassInfo> {
        let bytes = (self.load)(name)?;
        match read_class_info(&bytes) {
            Ok(info) => Some(info),
            Err(err) => {
                log::warn!("Unable to read class header of {name}: {err}");
                None
            }
        }
    }
}

impl<F> ClassHierarchy for LoaderHierarchy<F>
where
    F: Fn(&str) -> Option<Vec<u8>>,
{
    fn resolve(&self, name: &str) -> Option<ClassInfo> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(name) {
                return cached.clone();
            }
        }
        let info = self.load(name).or_else(|| self.platform.resolve(name));
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), info.clone());
        }
        info
    }
}

/// Computes common supertypes through one [`ClassHierarchy`].
#[derive(Clone, Copy)]
pub struct SafeTypeResolver<'a> {
    hierarchy: &'a dyn ClassHierarchy,
}

impl<'a> SafeTypeResolver<'a> {
    pub fn new(hierarchy: &'a dyn ClassHierarchy) -> Self {
        Self { hierarchy }
    }

    /// Nearest common supertype of two classes, by internal name.
    ///
    /// If one is a supertype of the other it wins. Otherwise, when either is
    /// an interface the answer is `java/lang/Object`; else the superclass
    /// chain of `first` is climbed until it reaches a supertype of `second`.
    pub fn common_super_class(&self, first: &str, second: &str) -> Result<String, TypeResolveError> {
        if first == second {
            return Ok(first.to_string());
        }
        let first_info = self.lookup(first)?;
        let second_info = self.lookup(second)?;

        if self.is_assignable_from(&first_info, &second_info)? {
            return Ok(first.to_string());
        }
        if self.is_assignable_from(&second_info, &first_info)? {
            return Ok(second.to_string());
        }
        if first_info.is_interface || second_info.is_interface {
            return Ok(OBJECT.to_string());
        }

        let mut seen = HashSet::new();
        let mut current = first_info;
        loop {
            if !seen.insert(current.name.clone()) {
                return Err(TypeResolveError::CyclicHierarchy(current.name));
            }
            let parent = match current.super_name.as_deref() {
                Some(parent) => parent,
                None => return Ok(OBJECT.to_string()),
            };
            current = self.lookup(parent)?;
            if self.is_assignable_from(&current, &second_info)? {
                return Ok(current.name);
            }
        }
    }

    /// Whether a value of type `from` may be stored where `target` is expected.
    pub fn is_assignable_from(
        &self,
        target: &ClassInfo,
        from: &ClassInfo,
    ) -> Result<bool, TypeResolveError> {
        if target.name == from.name || target.name == OBJECT {
            return Ok(true);
        }

        let mut pending: Vec<ClassInfo> = vec![from.clone()];
        let mut visited: HashSet<String> = HashSet::from([from.name.clone()]);
        while let Some(next) = pending.pop() {
            let parents = next
                .super_name
                .iter()
                .chain(next.interfaces.iter())
                .filter(|parent| target.is_interface || next.super_name.as_ref() == Some(*parent));
            for parent in parents {
                if *parent == target.name {
                    return Ok(true);
                }
                if visited.insert(parent.clone()) {
                    pending.push(self.lookup(parent)?);
                }
            }
        }
        Ok(false)
    }

    fn lookup(&self, name: &str) -> Result<ClassInfo, TypeResolveError> {
        self.hierarchy
            .resolve(name)
            .ok_or_else(|| TypeResolveError::ClassNotFound(name.to_string()))
    }
}
