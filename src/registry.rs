use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use crate::error::Error;
use crate::hierarchy::ClassHierarchy;
use crate::pipeline::{self, PatchRule};

/// Classes found present when the registry was built.
///
/// Checks run once, at startup; the answers never change afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    present: BTreeSet<String>,
}

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    /// Asks `check` about each class name once and records the ones present.
    pub fn detect<I, S, F>(markers: I, check: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> bool,
    {
        let mut present = BTreeSet::new();
        let mut asked = BTreeSet::new();
        for name in markers {
            let name = internal_name(name.as_ref()).into_owned();
            if !asked.insert(name.clone()) {
                continue;
            }
            if check(&name) {
                log::info!("Detected {name}");
                present.insert(name);
            }
        }
        Self { present }
    }

    /// Checks by resolving each class through `hierarchy`.
    pub fn from_hierarchy<I, S>(markers: I, hierarchy: &dyn ClassHierarchy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::detect(markers, |name| hierarchy.resolve(name).is_some())
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.present.contains(internal_name(name).as_ref())
    }
}

/// Collects rules at startup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    rules: HashMap<String, Vec<PatchRule>>,
    capabilities: Capabilities,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rule` for `class_name`, after any rules already registered for it.
    pub fn register(&mut self, class_name: &str, rule: PatchRule) -> &mut Self {
        self.rules
            .entry(internal_name(class_name).into_owned())
            .or_default()
            .push(rule);
        self
    }

    /// Every class name some registered rule uses as a disabling marker.
    pub fn markers(&self) -> BTreeSet<String> {
        self.rules
            .values()
            .flatten()
            .filter_map(|rule| rule.unless_present.clone())
            .collect()
    }

    pub fn capabilities(&mut self, capabilities: Capabilities) -> &mut Self {
        self.capabilities = capabilities;
        self
    }

    pub fn build(self) -> TransformerRegistry {
        TransformerRegistry {
            rules: self.rules,
            capabilities: self.capabilities,
        }
    }
}

/// The frozen rule set, shared by reference between class loads.
#[derive(Debug)]
pub struct TransformerRegistry {
    rules: HashMap<String, Vec<PatchRule>>,
    capabilities: Capabilities,
}

impl TransformerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Rules registered for a class, in registration order.
    pub fn lookup(&self, class_name: &str) -> &[PatchRule] {
        self.rules
            .get(internal_name(class_name).as_ref())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Internal names of every class with rules, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Patches one class as it is loaded.
    ///
    /// Classes without rules are not parsed; their buffer is handed back as is.
    pub fn apply<'a>(
        &self,
        class_name: &str,
        bytes: &'a [u8],
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<Cow<'a, [u8]>, Error> {
        let rules = self.lookup(class_name);
        if rules.is_empty() {
            return Ok(Cow::Borrowed(bytes));
        }
        log::info!("Transforming {}", class_name.replace('/', "."));
        pipeline::transform(bytes, rules, &self.capabilities, hierarchy)
    }
}

/// `a.b.C` to `a/b/C`; internal names pass through.
pub fn internal_name(name: &str) -> Cow<'_, str> {
    if name.contains('.') {
        Cow::Owned(name.replace('.', "/"))
    } else {
        Cow::Borrowed(name)
    }
}
