//! Modification records and the change log. This is how an [`Entry`] stores and
//! expresses the series of modifications that must be sent to the server to
//! reconcile the entry with its server state.
//!
//! [`Entry`]: crate::entry::Entry

use std::slice;

use ldap3_proto::proto::{LdapModify, LdapModifyType, LdapPartialAttribute};
use serde::{Deserialize, Serialize};

use crate::entry::AttrName;

/// The three primitive operations a modify request may carry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModType {
    Add,
    Delete,
    Replace,
}

impl From<ModType> for LdapModifyType {
    fn from(m: ModType) -> Self {
        match m {
            ModType::Add => LdapModifyType::Add,
            ModType::Delete => LdapModifyType::Delete,
            ModType::Replace => LdapModifyType::Replace,
        }
    }
}

/// One pending modification: operation, attribute, values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub op: ModType,
    pub attr: AttrName,
    pub values: Vec<Vec<u8>>,
}

pub fn m_add(attr: impl Into<AttrName>, values: Vec<Vec<u8>>) -> Mod {
    Mod {
        op: ModType::Add,
        attr: attr.into(),
        values,
    }
}

pub fn m_delete(attr: impl Into<AttrName>, values: Vec<Vec<u8>>) -> Mod {
    Mod {
        op: ModType::Delete,
        attr: attr.into(),
        values,
    }
}

pub fn m_replace(attr: impl Into<AttrName>, values: Vec<Vec<u8>>) -> Mod {
    Mod {
        op: ModType::Replace,
        attr: attr.into(),
        values,
    }
}

impl From<&Mod> for LdapModify {
    fn from(m: &Mod) -> Self {
        LdapModify {
            operation: m.op.into(),
            modification: LdapPartialAttribute {
                atype: m.attr.as_str().to_string(),
                vals: m.values.clone(),
            },
        }
    }
}

/// The ordered change log of an entry. The order of this list matters - the
/// server applies each change in sequence and later changes may depend on the
/// visible state between them, so the log is never compacted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyList {
    mods: Vec<Mod>,
}

impl ModifyList {
    pub fn new() -> Self {
        ModifyList {
            mods: Vec::with_capacity(0),
        }
    }

    pub fn new_list(mods: Vec<Mod>) -> Self {
        ModifyList { mods }
    }

    pub fn push_mod(&mut self, m: Mod) {
        self.mods.push(m)
    }

    pub fn iter(&self) -> slice::Iter<'_, Mod> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.mods.clear()
    }

    /// The wire form sent inside a ModifyRequest.
    pub fn to_wire(&self) -> Vec<LdapModify> {
        self.mods.iter().map(LdapModify::from).collect()
    }
}

impl<'a> IntoIterator for &'a ModifyList {
    type IntoIter = slice::Iter<'a, Mod>;
    type Item = &'a Mod;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

impl FromIterator<Mod> for ModifyList {
    fn from_iter<T: IntoIterator<Item = Mod>>(iter: T) -> Self {
        ModifyList {
            mods: iter.into_iter().collect(),
        }
    }
}
