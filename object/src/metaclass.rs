use core::fmt;

/// The metaclasses this VM implements.
///
/// An image names the metaclasses it depends on (e.g. `tads-object/030005`);
/// the loader maps each dependency to one of these by the name before the
/// `/`. The version suffix is not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metaclass {
    RootObject,
    TadsObject,
    String,
    List,
    Vector,
    LookupTable,
    IntrinsicClass,
    IntClassMod,
    AnonFuncPtr,
    Collection,
}

impl Metaclass {
    pub const ALL: [Metaclass; 10] = [
        Metaclass::RootObject,
        Metaclass::TadsObject,
        Metaclass::String,
        Metaclass::List,
        Metaclass::Vector,
        Metaclass::LookupTable,
        Metaclass::IntrinsicClass,
        Metaclass::IntClassMod,
        Metaclass::AnonFuncPtr,
        Metaclass::Collection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metaclass::RootObject => "root-object",
            Metaclass::TadsObject => "tads-object",
            Metaclass::String => "string",
            Metaclass::List => "list",
            Metaclass::Vector => "vector",
            Metaclass::LookupTable => "lookuptable",
            Metaclass::IntrinsicClass => "intrinsic-class",
            Metaclass::IntClassMod => "int-class-mod",
            Metaclass::AnonFuncPtr => "anon-func-ptr",
            Metaclass::Collection => "collection",
        }
    }

    /// Resolve a dependency-table entry such as `"vector/030005"`.
    pub fn from_name(dep: &str) -> Option<Metaclass> {
        let name = dep.split('/').next().unwrap_or(dep);
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// The metaclass this one inherits native behavior from.
    pub fn parent(self) -> Option<Metaclass> {
        match self {
            Metaclass::RootObject => None,
            Metaclass::TadsObject
            | Metaclass::String
            | Metaclass::IntrinsicClass
            | Metaclass::Collection => Some(Metaclass::RootObject),
            Metaclass::List | Metaclass::Vector | Metaclass::LookupTable => {
                Some(Metaclass::Collection)
            }
            Metaclass::IntClassMod => Some(Metaclass::TadsObject),
            Metaclass::AnonFuncPtr => Some(Metaclass::Vector),
        }
    }

    /// This metaclass followed by its ancestors.
    pub fn ancestry(self) -> impl Iterator<Item = Metaclass> {
        core::iter::successors(Some(self), |m| m.parent())
    }

    pub fn is_kind_of(self, other: Metaclass) -> bool {
        self.ancestry().any(|m| m == other)
    }

    /// Whether objects of this metaclass can be created with `NEW`.
    pub fn is_instantiable(self) -> bool {
        !matches!(
            self,
            Metaclass::RootObject | Metaclass::Collection | Metaclass::IntrinsicClass
        )
    }
}

impl fmt::Display for Metaclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_ignore_version() {
        assert_eq!(Metaclass::from_name("tads-object/030005"), Some(Metaclass::TadsObject));
        assert_eq!(Metaclass::from_name("anon-func-ptr"), Some(Metaclass::AnonFuncPtr));
        assert_eq!(Metaclass::from_name("bignumber/030000"), None);
        for m in Metaclass::ALL {
            assert_eq!(Metaclass::from_name(m.name()), Some(m));
        }
    }

    #[test]
    fn ancestry() {
        assert!(Metaclass::AnonFuncPtr.is_kind_of(Metaclass::Collection));
        assert!(Metaclass::List.is_kind_of(Metaclass::RootObject));
        assert!(!Metaclass::String.is_kind_of(Metaclass::Collection));
        assert_eq!(
            Metaclass::Vector.ancestry().collect::<Vec<_>>(),
            vec![Metaclass::Vector, Metaclass::Collection, Metaclass::RootObject]
        );
    }
}
