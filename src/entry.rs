//! Entries are the base unit of the toolkit. An [`Entry`] is a collection of
//! attribute-value sets keyed by case-insensitive attribute name, for example:
//!
//! ```text
//! Entry {
//!   "cn": ["william"],
//!   "mail": ["maila@example.com", "mailb@example.com"],
//! };
//! ```
//!
//! Alongside the present attribute map every entry carries an ordered change
//! log. The two are deliberately redundant: the present map answers reads, the
//! log records *intent* so the connection manager can replay exactly what the
//! caller did against the server. The log is never compacted into a minimal
//! diff of the present map - the server applies modifications in sequence and
//! later ones may depend on the visible state between them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ldap3_proto::proto::{
    LdapAddRequest, LdapAttribute, LdapPartialAttribute, LdapSearchResultEntry,
};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::modify::{Mod, ModType, ModifyList};

/// A case-insensitive attribute name. The spelling given by the caller is
/// preserved for display and wire output, while equality, ordering and hashing
/// use a pre-folded key, so `"uid"`, `"UID"` and `"Uid"` are one attribute.
#[derive(Debug, Clone)]
pub struct AttrName {
    name: AttrString,
    folded: AttrString,
}

impl AttrName {
    pub fn new(name: &str) -> Self {
        AttrName {
            name: AttrString::from(name),
            folded: AttrString::from(name.to_lowercase()),
        }
    }

    /// The spelling this name was created with.
    pub fn as_str(&self) -> &str {
        self.name.as_str()
    }

    /// The folded comparison key.
    pub fn folded(&self) -> &str {
        self.folded.as_str()
    }
}

impl From<&str> for AttrName {
    fn from(s: &str) -> Self {
        AttrName::new(s)
    }
}

impl From<String> for AttrName {
    fn from(s: String) -> Self {
        AttrName::new(s.as_str())
    }
}

impl fmt::Display for AttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for AttrName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for AttrName {}

impl PartialOrd for AttrName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttrName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl std::hash::Hash for AttrName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.folded.hash(state)
    }
}

impl Serialize for AttrName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name.as_str())
    }
}

impl<'de> Deserialize<'de> for AttrName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AttrName::new(&s))
    }
}

/// An unordered set of attribute values. Values are opaque byte strings -
/// equality is exact byte match, which is the wire semantic a server uses when
/// a modify request names a value to delete. Insertion order is preserved for
/// stable output but plays no part in equality.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ValueSet {
    values: Vec<Vec<u8>>,
}

impl ValueSet {
    pub fn new() -> Self {
        ValueSet {
            values: Vec::with_capacity(0),
        }
    }

    pub fn insert(&mut self, v: Vec<u8>) -> bool {
        if self.values.iter().any(|x| x == &v) {
            false
        } else {
            self.values.push(v);
            true
        }
    }

    pub fn remove(&mut self, v: &[u8]) -> bool {
        let before = self.values.len();
        self.values.retain(|x| x.as_slice() != v);
        self.values.len() != before
    }

    pub fn contains(&self, v: &[u8]) -> bool {
        self.values.iter().any(|x| x.as_slice() == v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<u8>> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        self.values.clone()
    }

    /// Convenience for tests and callers dealing in text values.
    pub fn contains_str(&self, v: &str) -> bool {
        self.contains(v.as_bytes())
    }
}

impl From<Vec<Vec<u8>>> for ValueSet {
    fn from(values: Vec<Vec<u8>>) -> Self {
        let mut vs = ValueSet::new();
        for v in values {
            vs.insert(v);
        }
        vs
    }
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().all(|v| other.contains(v.as_slice()))
    }
}

impl Eq for ValueSet {}

/// What kind of server-side action this entry represents when committed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Modrdn,
    Moddn,
}

/// Read-only capability over anything that looks like an entry: enumerate the
/// attribute names and read a value set. [`diff`] works over this rather than
/// a concrete type so schema-checked and account entries participate too.
pub trait EntryView {
    fn view_dn(&self) -> &str;
    fn view_attrs(&self) -> Vec<&AttrName>;
    fn view_values(&self, attr: &AttrName) -> Option<&ValueSet>;
}

/// One directory object: a DN, a change-type tag, the present attribute map
/// and the pending change log. The entry is a pure data structure - attribute
/// names are never validated here. Schema legality is the job of
/// [`crate::checked::CheckedEntry`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: String,
    ctype: ChangeType,
    attrs: BTreeMap<AttrName, ValueSet>,
    changes: ModifyList,
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    /// A fresh entry destined to be added to a server.
    pub fn new() -> Self {
        Entry {
            dn: String::new(),
            ctype: ChangeType::Add,
            attrs: BTreeMap::new(),
            changes: ModifyList::new(),
        }
    }

    pub fn with_dn(dn: &str) -> Self {
        let mut e = Entry::new();
        e.dn = dn.to_string();
        e
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: &str) {
        self.dn = dn.to_string();
    }

    pub fn changetype(&self) -> ChangeType {
        self.ctype
    }

    pub fn set_changetype(&mut self, ctype: ChangeType) {
        self.ctype = ctype;
    }

    pub fn changes(&self) -> &ModifyList {
        &self.changes
    }

    /// Empty the change log without touching the present map. Called after a
    /// successful commit, or when the caller wants the entry treated as
    /// freshly read from the server.
    pub fn flush_changes(&mut self) {
        self.changes.clear();
    }

    pub fn get_value(&self, attr: impl Into<AttrName>) -> Option<&ValueSet> {
        self.attrs.get(&attr.into())
    }

    pub fn exists(&self, attr: impl Into<AttrName>) -> bool {
        self.attrs.contains_key(&attr.into())
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttrName> {
        self.attrs.keys()
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    /// Union `values` into the attribute, creating it if absent. An add of no
    /// values to an absent attribute is left unspecified by LDAP; it is a
    /// no-op here and nothing is logged.
    pub fn add(&mut self, attr: impl Into<AttrName>, values: Vec<Vec<u8>>) {
        let attr = attr.into();
        if values.is_empty() && !self.attrs.contains_key(&attr) {
            return;
        }
        let vs = self.attrs.entry(attr.clone()).or_default();
        for v in values.iter() {
            vs.insert(v.clone());
        }
        self.log_change(Mod {
            op: ModType::Add,
            attr,
            values,
        });
    }

    /// Remove listed values, or the whole attribute when `values` is empty.
    /// A value-level delete that empties the attribute removes it from the
    /// present map, but the log still records the value-level form - if that
    /// empties a required attribute the server will reject it, and that
    /// failure is surfaced rather than prevented here.
    pub fn delete(&mut self, attr: impl Into<AttrName>, values: Vec<Vec<u8>>) {
        let attr = attr.into();
        if values.is_empty() {
            self.attrs.remove(&attr);
        } else {
            let emptied = match self.attrs.get_mut(&attr) {
                Some(vs) => {
                    for v in values.iter() {
                        vs.remove(v);
                    }
                    vs.is_empty()
                }
                None => false,
            };
            if emptied {
                self.attrs.remove(&attr);
            }
        }
        self.log_change(Mod {
            op: ModType::Delete,
            attr,
            values,
        });
    }

    /// Overwrite the attribute's value set. An empty `values` deletes the
    /// attribute, matching the wire semantics of a replace with no values.
    pub fn replace(&mut self, attr: impl Into<AttrName>, values: Vec<Vec<u8>>) {
        let attr = attr.into();
        if values.is_empty() {
            self.attrs.remove(&attr);
        } else {
            self.attrs.insert(attr.clone(), ValueSet::from(values.clone()));
        }
        self.log_change(Mod {
            op: ModType::Replace,
            attr,
            values,
        });
    }

    /// Apply a sequence of records in order; equivalent to the corresponding
    /// primitive calls.
    pub fn modify(&mut self, mods: impl IntoIterator<Item = Mod>) {
        for m in mods {
            match m.op {
                ModType::Add => self.add(m.attr, m.values),
                ModType::Delete => self.delete(m.attr, m.values),
                ModType::Replace => self.replace(m.attr, m.values),
            }
        }
    }

    fn log_change(&mut self, m: Mod) {
        // A deleted entry needs no reconciliation log - the server action is
        // implicit in the change type.
        if self.ctype != ChangeType::Delete {
            self.changes.push_mod(m);
        }
    }

    /// Fold another wire record for the same DN into this entry without
    /// recording changes. Used when a search returns an object split across
    /// several messages.
    pub(crate) fn merge_wire(&mut self, lsre: LdapSearchResultEntry) {
        for pa in lsre.attributes {
            let vs = self.attrs.entry(AttrName::new(&pa.atype)).or_default();
            for v in pa.vals {
                vs.insert(v);
            }
        }
    }

    /// A referral response represented as an entry: empty DN, the URIs held
    /// under a `ref` attribute for caller inspection. Chasing referrals is the
    /// caller's business.
    pub fn from_referral(uris: Vec<String>) -> Self {
        let mut e = Entry::new();
        e.ctype = ChangeType::Modify;
        let vs = e.attrs.entry(AttrName::new("ref")).or_default();
        for u in uris {
            vs.insert(u.into_bytes());
        }
        e
    }

    pub fn is_referral(&self) -> bool {
        self.dn.is_empty() && self.exists("ref")
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dn)
    }
}

impl EntryView for Entry {
    fn view_dn(&self) -> &str {
        &self.dn
    }

    fn view_attrs(&self) -> Vec<&AttrName> {
        self.attrs.keys().collect()
    }

    fn view_values(&self, attr: &AttrName) -> Option<&ValueSet> {
        self.attrs.get(attr)
    }
}

impl From<LdapSearchResultEntry> for Entry {
    fn from(lsre: LdapSearchResultEntry) -> Self {
        let mut e = Entry::new();
        e.dn = lsre.dn.clone();
        // It came off a server, so reconciliation means modification.
        e.ctype = ChangeType::Modify;
        e.merge_wire(lsre);
        e
    }
}

impl From<&Entry> for LdapSearchResultEntry {
    fn from(e: &Entry) -> Self {
        LdapSearchResultEntry {
            dn: e.dn.clone(),
            attributes: e
                .attrs
                .iter()
                .map(|(k, vs)| LdapPartialAttribute {
                    atype: k.as_str().to_string(),
                    vals: vs.to_vec(),
                })
                .collect(),
        }
    }
}

impl From<&Entry> for LdapAddRequest {
    fn from(e: &Entry) -> Self {
        LdapAddRequest {
            dn: e.dn.clone(),
            attributes: e
                .attrs
                .iter()
                .map(|(k, vs)| LdapAttribute {
                    atype: k.as_str().to_string(),
                    vals: vs.to_vec(),
                })
                .collect(),
        }
    }
}

/// The minimal record list that transforms `older`'s present state into
/// `newer`'s, attribute by attribute: a full-value add where only `newer` has
/// the attribute, a full-value delete where only `older` has it, a replace
/// carrying the new set where both have it and the sets differ.
///
/// Attribute identity here is the case-folded name. Callers wanting OID
/// identity through schema aliases should diff via
/// [`crate::checked::CheckedEntry::diff`].
pub fn diff<N: EntryView, O: EntryView>(newer: &N, older: &O) -> ModifyList {
    let names: BTreeSet<&AttrName> = newer
        .view_attrs()
        .into_iter()
        .chain(older.view_attrs())
        .collect();

    let mut out = ModifyList::new();
    for attr in names {
        match (newer.view_values(attr), older.view_values(attr)) {
            (Some(n), None) => out.push_mod(Mod {
                op: ModType::Add,
                attr: attr.clone(),
                values: n.to_vec(),
            }),
            (None, Some(o)) => out.push_mod(Mod {
                op: ModType::Delete,
                attr: attr.clone(),
                values: o.to_vec(),
            }),
            (Some(n), Some(o)) => {
                if n != o {
                    out.push_mod(Mod {
                        op: ModType::Replace,
                        attr: attr.clone(),
                        values: n.to_vec(),
                    });
                }
            }
            (None, None) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modify::{m_add, m_delete, m_replace};

    fn vals(vs: &[&str]) -> Vec<Vec<u8>> {
        vs.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_attrname_case_fold() {
        assert_eq!(AttrName::new("uid"), AttrName::new("UID"));
        assert_eq!(AttrName::new("objectClass").folded(), "objectclass");
        assert_eq!(AttrName::new("objectClass").as_str(), "objectClass");
    }

    #[test]
    fn test_entry_add_union() {
        let mut e = Entry::with_dn("cn=a,dc=x");
        e.add("mail", vals(&["a@x"]));
        e.add("MAIL", vals(&["b@x", "a@x"]));

        let vs = e.get_value("mail").expect("attr must exist");
        assert_eq!(vs.len(), 2);
        assert!(vs.contains_str("a@x"));
        assert!(vs.contains_str("b@x"));
        // Both calls were logged, in order, without compaction.
        assert_eq!(e.changes().len(), 2);
    }

    #[test]
    fn test_entry_add_empty_absent_noop() {
        let mut e = Entry::new();
        e.add("mail", vec![]);
        assert!(!e.exists("mail"));
        assert!(e.changes().is_empty());
    }

    #[test]
    fn test_entry_delete_attribute() {
        let mut e = Entry::new();
        e.add("sn", vals(&["b"]));
        e.delete("sn", vec![]);
        assert!(!e.exists("sn"));

        let last = e.changes().iter().last().expect("log must not be empty");
        assert_eq!(last.op, ModType::Delete);
        assert!(last.values.is_empty());
    }

    #[test]
    fn test_entry_delete_values_emptying() {
        let mut e = Entry::new();
        e.add("mail", vals(&["a@x", "b@x"]));
        e.delete("mail", vals(&["a@x"]));
        assert!(e.get_value("mail").expect("still present").contains_str("b@x"));

        // Deleting the last value removes the attribute but the log keeps the
        // value-level record for the server to judge.
        e.delete("mail", vals(&["b@x"]));
        assert!(!e.exists("mail"));
        let last = e.changes().iter().last().expect("log must not be empty");
        assert_eq!(last.op, ModType::Delete);
        assert_eq!(last.values, vals(&["b@x"]));
    }

    #[test]
    fn test_entry_replace() {
        let mut e = Entry::new();
        e.add("cn", vals(&["a", "b"]));
        e.replace("cn", vals(&["A"]));
        let vs = e.get_value("cn").expect("attr must exist");
        assert_eq!(vs.to_vec(), vals(&["A"]));

        e.replace("cn", vec![]);
        assert!(!e.exists("cn"));
    }

    #[test]
    fn test_entry_changelog_scenario() {
        // The S1 shape: mutate, then check the exact log and present map.
        let mut e = Entry::with_dn("cn=a,dc=x");
        e.add("cn", vals(&["a"]));
        e.add("sn", vals(&["b"]));
        e.flush_changes();

        e.add("mail", vals(&["a@x"]));
        e.delete("sn", vals(&["b"]));
        e.replace("cn", vals(&["A"]));

        let log: Vec<(ModType, String, Vec<Vec<u8>>)> = e
            .changes()
            .iter()
            .map(|m| (m.op, m.attr.as_str().to_string(), m.values.clone()))
            .collect();
        assert_eq!(
            log,
            vec![
                (ModType::Add, "mail".to_string(), vals(&["a@x"])),
                (ModType::Delete, "sn".to_string(), vals(&["b"])),
                (ModType::Replace, "cn".to_string(), vals(&["A"])),
            ]
        );

        assert_eq!(e.attr_count(), 2);
        assert_eq!(e.get_value("cn").expect("cn").to_vec(), vals(&["A"]));
        assert_eq!(e.get_value("mail").expect("mail").to_vec(), vals(&["a@x"]));
    }

    #[test]
    fn test_entry_delete_changetype_skips_log() {
        let mut e = Entry::with_dn("cn=a,dc=x");
        e.set_changetype(ChangeType::Delete);
        e.add("cn", vals(&["a"]));
        assert!(e.changes().is_empty());
    }

    #[test]
    fn test_entry_changelog_replay() {
        // Replaying the log against the pre-change state must land on the
        // same present map.
        let mut pre = Entry::with_dn("cn=a,dc=x");
        pre.add("cn", vals(&["a"]));
        pre.add("sn", vals(&["b"]));
        pre.flush_changes();

        let mut e = pre.clone();
        e.add("mail", vals(&["a@x"]));
        e.delete("sn", vec![]);
        e.replace("cn", vals(&["A", "a2"]));

        let mut replay = pre.clone();
        replay.modify(e.changes().iter().cloned());

        for attr in e.attributes() {
            assert_eq!(replay.get_value(attr.as_str()), e.get_value(attr.as_str()));
        }
        assert_eq!(replay.attr_count(), e.attr_count());
    }

    #[test]
    fn test_entry_modify_records() {
        let mut e = Entry::new();
        e.modify(vec![
            m_add("cn", vals(&["a"])),
            m_replace("cn", vals(&["b"])),
            m_delete("cn", vals(&["b"])),
        ]);
        assert!(!e.exists("cn"));
        assert_eq!(e.changes().len(), 3);
    }

    #[test]
    fn test_diff_identity_empty() {
        let mut e = Entry::with_dn("cn=a,dc=x");
        e.add("cn", vals(&["a"]));
        assert!(diff(&e, &e).is_empty());
    }

    #[test]
    fn test_diff_apply_roundtrip() {
        let mut e1 = Entry::with_dn("cn=a,dc=x");
        e1.add("cn", vals(&["A"]));
        e1.add("mail", vals(&["a@x"]));

        let mut e2 = Entry::with_dn("cn=a,dc=x");
        e2.add("cn", vals(&["a"]));
        e2.add("sn", vals(&["b"]));

        let d = diff(&e1, &e2);
        e2.modify(d.iter().cloned());

        assert_eq!(e2.get_value("cn").expect("cn").to_vec(), vals(&["A"]));
        assert_eq!(e2.get_value("mail").expect("mail").to_vec(), vals(&["a@x"]));
        assert!(!e2.exists("sn"));
    }

    #[test]
    fn test_valueset_set_equality() {
        let a = ValueSet::from(vals(&["x", "y"]));
        let b = ValueSet::from(vals(&["y", "x"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut e = Entry::with_dn("cn=a,dc=x");
        e.add("cn", vals(&["a"]));
        e.add("objectClass", vals(&["person"]));

        let wire: LdapSearchResultEntry = (&e).into();
        assert_eq!(wire.dn, "cn=a,dc=x");

        let back = Entry::from(wire);
        assert_eq!(back.dn(), "cn=a,dc=x");
        assert_eq!(back.changetype(), ChangeType::Modify);
        assert!(back.changes().is_empty());
        assert_eq!(back.get_value("cn"), e.get_value("cn"));
    }

    #[test]
    fn test_referral_entry() {
        let e = Entry::from_referral(vec!["ldap://other.example/dc=x".to_string()]);
        assert!(e.is_referral());
        assert!(e
            .get_value("ref")
            .expect("ref attr")
            .contains_str("ldap://other.example/dc=x"));
    }
}
