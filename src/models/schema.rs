//! Domain type schema consumed by the entity resolver.
//!
//! The schema maps label names (plain and package-dotted) to type
//! descriptors carrying parent links and a creation policy. The core
//! treats the dictionary as read-only; hosts build it from their own
//! domain model.

use std::collections::{HashMap, HashSet};

/// Descriptor of a single domain type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Plain type name (no package qualifier).
    pub name: String,
    /// Names of direct parent types.
    pub parents: Vec<String>,
    /// Whether the resolver may declare new entities of this type.
    pub creation_permitted: bool,
    /// Opaque host-side type identifier.
    pub domain_type_id: Option<String>,
}

impl TypeDescriptor {
    /// Creates a descriptor with creation permitted and no parents.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            creation_permitted: true,
            domain_type_id: None,
        }
    }

    /// Sets the parent type names.
    #[must_use]
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parents = parents;
        self
    }

    /// Sets the creation policy.
    #[must_use]
    pub const fn with_creation_permitted(mut self, permitted: bool) -> Self {
        self.creation_permitted = permitted;
        self
    }

    /// Attaches the host-side type identifier.
    #[must_use]
    pub fn with_domain_type_id(mut self, id: impl Into<String>) -> Self {
        self.domain_type_id = Some(id.into());
        self
    }
}

/// Read-only mapping from label names to type descriptors.
///
/// Lookups are case-insensitive and ignore dotted package prefixes, so
/// `com.example.Person` and `person` resolve to the same descriptor.
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    types: HashMap<String, TypeDescriptor>,
}

impl DataDictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Creates a dictionary from descriptors.
    #[must_use]
    pub fn from_types(descriptors: Vec<TypeDescriptor>) -> Self {
        let mut dictionary = Self::new();
        for descriptor in descriptors {
            dictionary.insert(descriptor);
        }
        dictionary
    }

    /// Registers a descriptor under its plain name.
    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        self.types
            .insert(Self::normalize(&descriptor.name), descriptor);
    }

    /// Looks up a descriptor by plain or dotted label.
    #[must_use]
    pub fn descriptor(&self, label: &str) -> Option<&TypeDescriptor> {
        self.types.get(&Self::normalize(label))
    }

    /// Returns whether creating entities of the labelled type is allowed.
    ///
    /// Unknown labels default to permitted: the schema can only veto types
    /// it actually describes.
    #[must_use]
    pub fn creation_permitted(&self, label: &str) -> bool {
        self.descriptor(label)
            .is_none_or(|d| d.creation_permitted)
    }

    /// Returns true if `ancestor` is a (transitive) ancestor of `label`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &str, label: &str) -> bool {
        let target = Self::normalize(ancestor);
        let mut visited = HashSet::new();
        let mut stack = vec![Self::normalize(label)];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(descriptor) = self.types.get(&current) else {
                continue;
            };
            for parent in &descriptor.parents {
                let parent = Self::normalize(parent);
                if parent == target {
                    return true;
                }
                stack.push(parent);
            }
        }
        false
    }

    /// Returns the set of all (transitive) ancestors of a label,
    /// normalized.
    #[must_use]
    pub fn ancestors(&self, label: &str) -> HashSet<String> {
        let mut ancestors = HashSet::new();
        let mut stack = vec![Self::normalize(label)];
        while let Some(current) = stack.pop() {
            let Some(descriptor) = self.types.get(&current) else {
                continue;
            };
            for parent in &descriptor.parents {
                let parent = Self::normalize(parent);
                if ancestors.insert(parent.clone()) {
                    stack.push(parent);
                }
            }
        }
        ancestors
    }

    /// Strips a dotted package prefix and lowercases.
    fn normalize(label: &str) -> String {
        label
            .rsplit('.')
            .next()
            .unwrap_or(label)
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn music_schema() -> DataDictionary {
        DataDictionary::from_types(vec![
            TypeDescriptor::new("Person"),
            TypeDescriptor::new("Composer").with_parents(vec!["Person".to_string()]),
            TypeDescriptor::new("Pianist").with_parents(vec!["Person".to_string()]),
            TypeDescriptor::new("Customer").with_creation_permitted(false),
        ])
    }

    #[test]
    fn test_dotted_lookup() {
        let schema = music_schema();
        assert!(schema.descriptor("org.example.Composer").is_some());
        assert!(schema.descriptor("composer").is_some());
        assert!(schema.descriptor("Orchestra").is_none());
    }

    #[test]
    fn test_creation_policy() {
        let schema = music_schema();
        assert!(schema.creation_permitted("Person"));
        assert!(!schema.creation_permitted("Customer"));
        assert!(!schema.creation_permitted("crm.Customer"));
        // Unknown types are not vetoed by an incomplete schema.
        assert!(schema.creation_permitted("Orchestra"));
    }

    #[test]
    fn test_ancestry() {
        let schema = music_schema();
        assert!(schema.is_ancestor("Person", "Composer"));
        assert!(!schema.is_ancestor("Composer", "Person"));
        assert!(schema.ancestors("Pianist").contains("person"));
    }

    #[test]
    fn test_ancestor_cycle_terminates() {
        let schema = DataDictionary::from_types(vec![
            TypeDescriptor::new("A").with_parents(vec!["B".to_string()]),
            TypeDescriptor::new("B").with_parents(vec!["A".to_string()]),
        ]);
        assert!(schema.is_ancestor("B", "A"));
        assert!(schema.is_ancestor("A", "B"));
        assert!(!schema.is_ancestor("C", "A"));
    }
}
