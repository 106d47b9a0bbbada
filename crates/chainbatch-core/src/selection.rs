//! Data-selection descriptors: which fields of an item a handler wants fetched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Requested fields for one event or call name.
///
/// `None` is the identity of [`Selection::merge`] and `All` absorbs everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Nothing requested.
    #[default]
    None,
    /// Only these (dotted) field paths, e.g. `"event.args"`, `"extrinsic.hash"`.
    Fields(BTreeSet<String>),
    /// Every field.
    All,
}

impl Selection {
    /// A partial selection over the given field paths.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self::None
        } else {
            Self::Fields(set)
        }
    }

    /// Union of two selections.
    pub fn merge(&self, other: &Selection) -> Selection {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::None, x) | (x, Self::None) => x.clone(),
            (Self::Fields(a), Self::Fields(b)) => Self::Fields(a.union(b).cloned().collect()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns `true` if `field` would be fetched under this selection.
    pub fn includes(&self, field: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Fields(set) => set.contains(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_absorbs_partial() {
        let partial = Selection::fields(["event.args"]);
        assert_eq!(partial.merge(&Selection::All), Selection::All);
        assert_eq!(Selection::All.merge(&partial), Selection::All);
    }

    #[test]
    fn none_is_identity() {
        let partial = Selection::fields(["event.args"]);
        assert_eq!(partial.merge(&Selection::None), partial);
        assert_eq!(Selection::None.merge(&Selection::None), Selection::None);
    }

    #[test]
    fn partial_union() {
        let a = Selection::fields(["event.args", "extrinsic.hash"]);
        let b = Selection::fields(["extrinsic.hash", "extrinsic.signature"]);
        let merged = a.merge(&b);
        assert!(merged.includes("event.args"));
        assert!(merged.includes("extrinsic.signature"));
        assert!(!merged.includes("call.args"));
        assert_eq!(
            merged,
            Selection::fields(["event.args", "extrinsic.hash", "extrinsic.signature"])
        );
    }

    #[test]
    fn empty_field_list_is_none() {
        assert!(Selection::fields(Vec::<String>::new()).is_none());
    }
}
