//! A schema-checked entry binds a plain [`Entry`] to a [`Schema`] and keeps
//! the derived attribute sets current: which attributes the chosen object
//! classes require, which they permit, which are present, which are missing.
//! Every mutation revalidates; a mutation that breaks the rules is rolled
//! back and the error returned, leaving the entry untouched.
//!
//! Two check modes exist. Optimistic completes the object-class cover and
//! silently hides attributes the cover does not account for. Pessimistic
//! refuses them, and refuses object classes the schema does not define.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::constants::ATTR_OBJECTCLASS;
use crate::entry::{AttrName, ChangeType, Entry, EntryView, ValueSet};
use crate::error::SchemaViolation;
use crate::modify::{Mod, ModType, ModifyList};
use crate::schema::{Oid, Schema};

/// Strictness of the schema check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Complete the cover, hide what it cannot account for.
    Optimistic,
    /// Reject unknown classes and unpermitted attributes.
    Pessimistic,
}

pub struct CheckedEntry {
    entry: Entry,
    schema: Arc<Schema>,
    mode: CheckMode,
    must: BTreeSet<Oid>,
    may: BTreeSet<Oid>,
    present: BTreeSet<Oid>,
    missing: BTreeSet<Oid>,
}

impl fmt::Debug for CheckedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckedEntry")
            .field("dn", &self.entry.dn())
            .field("mode", &self.mode)
            .field("present", &self.present)
            .field("missing", &self.missing)
            .finish()
    }
}

impl CheckedEntry {
    /// Bind an existing entry to a schema. The object-class cover is
    /// completed immediately; in pessimistic mode the entry must already be
    /// legal or this fails.
    pub fn from_entry(
        mode: CheckMode,
        entry: Entry,
        schema: Arc<Schema>,
    ) -> Result<Self, SchemaViolation> {
        let mut ce = CheckedEntry {
            entry,
            schema,
            mode,
            must: BTreeSet::new(),
            may: BTreeSet::new(),
            present: BTreeSet::new(),
            missing: BTreeSet::new(),
        };
        ce.resolve()?;
        Ok(ce)
    }

    pub fn mode(&self) -> CheckMode {
        self.mode
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The raw entry, dropping the schema binding.
    pub fn into_entry(self) -> Entry {
        self.entry
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn dn(&self) -> &str {
        self.entry.dn()
    }

    pub fn set_dn(&mut self, dn: &str) {
        self.entry.set_dn(dn)
    }

    pub fn changetype(&self) -> ChangeType {
        self.entry.changetype()
    }

    pub fn set_changetype(&mut self, ctype: ChangeType) {
        self.entry.set_changetype(ctype)
    }

    pub fn changes(&self) -> &ModifyList {
        self.entry.changes()
    }

    pub fn flush_changes(&mut self) {
        self.entry.flush_changes()
    }

    // ===== mutation =====

    pub fn add(&mut self, attr: &str, values: Vec<Vec<u8>>) -> Result<(), SchemaViolation> {
        if let Some(def) = self.schema.attr_def(attr) {
            if def.single_value {
                let mut union = self.entry.get_value(attr).cloned().unwrap_or_default();
                for v in values.iter() {
                    union.insert(v.clone());
                }
                if union.len() > 1 {
                    return Err(SchemaViolation::SingleValue(attr.to_string()));
                }
            }
        }
        self.mutate(|e| e.add(attr, values))
    }

    pub fn delete(&mut self, attr: &str, values: Vec<Vec<u8>>) -> Result<(), SchemaViolation> {
        self.mutate(|e| e.delete(attr, values))
    }

    pub fn replace(&mut self, attr: &str, values: Vec<Vec<u8>>) -> Result<(), SchemaViolation> {
        if let Some(def) = self.schema.attr_def(attr) {
            if def.single_value && ValueSet::from(values.clone()).len() > 1 {
                return Err(SchemaViolation::SingleValue(attr.to_string()));
            }
        }
        self.mutate(|e| e.replace(attr, values))
    }

    /// Apply records in order; the first illegal record aborts with the entry
    /// rolled back to the state before that record.
    pub fn modify(
        &mut self,
        mods: impl IntoIterator<Item = Mod>,
    ) -> Result<(), SchemaViolation> {
        for m in mods {
            match m.op {
                ModType::Add => self.add(m.attr.as_str(), m.values)?,
                ModType::Delete => self.delete(m.attr.as_str(), m.values)?,
                ModType::Replace => self.replace(m.attr.as_str(), m.values)?,
            }
        }
        Ok(())
    }

    fn mutate<F: FnOnce(&mut Entry)>(&mut self, f: F) -> Result<(), SchemaViolation> {
        let saved = self.entry.clone();
        f(&mut self.entry);
        match self.resolve() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.entry = saved;
                // The prior state was valid, so this cannot fail again.
                let _ = self.resolve();
                Err(e)
            }
        }
    }

    // ===== queries =====

    /// Alias-aware read: `userID` finds a value stored under `uid` when the
    /// schema maps both to one OID.
    pub fn get_value(&self, attr: &str) -> Option<&ValueSet> {
        if let Some(vs) = self.entry.get_value(attr) {
            return Some(vs);
        }
        let oid = self.schema.attr_oid(attr)?;
        self.entry
            .attributes()
            .find(|a| self.schema.attr_oid(a.as_str()) == Some(oid))
            .and_then(|a| self.entry.get_value(a.as_str()))
    }

    pub fn exists(&self, attr: &str) -> bool {
        self.get_value(attr).is_some()
    }

    /// Is the attribute permitted under the current cover (MUST or MAY)?
    pub fn is_allowed(&self, attr: &str) -> bool {
        if attr.eq_ignore_ascii_case(ATTR_OBJECTCLASS) {
            return true;
        }
        match self.schema.attr_oid(attr) {
            Some(oid) => self.must.contains(oid) || self.may.contains(oid),
            None => false,
        }
    }

    /// Is the attribute required but absent?
    pub fn is_missing(&self, attr: &str) -> bool {
        match self.schema.attr_oid(attr) {
            Some(oid) => self.missing.contains(oid),
            None => false,
        }
    }

    pub fn list_must(&self) -> &BTreeSet<Oid> {
        &self.must
    }

    pub fn list_may(&self) -> &BTreeSet<Oid> {
        &self.may
    }

    /// MUST union MAY.
    pub fn list_allowed(&self) -> BTreeSet<Oid> {
        self.must.union(&self.may).cloned().collect()
    }

    pub fn list_present(&self) -> &BTreeSet<Oid> {
        &self.present
    }

    pub fn list_missing(&self) -> &BTreeSet<Oid> {
        &self.missing
    }

    /// The commit-time rule that construction does not enforce: an entry
    /// headed to the server must carry an objectClass attribute.
    pub fn check_commit(&self) -> Result<(), SchemaViolation> {
        if self.entry.exists(ATTR_OBJECTCLASS) {
            Ok(())
        } else {
            Err(SchemaViolation::ObjectClassRequired)
        }
    }

    /// OID-identity diff: attributes pair up through the schema, so a value
    /// stored as `uid` on one side and `userID` on the other compares as one
    /// attribute. Only the schema-accounted present view participates.
    pub fn diff(&self, older: &CheckedEntry) -> ModifyList {
        let newer_map = self.oid_view();
        let older_map = older.oid_view();

        let oids: BTreeSet<&Oid> = newer_map.keys().chain(older_map.keys()).collect();

        let mut out = ModifyList::new();
        for oid in oids {
            match (newer_map.get(oid), older_map.get(oid)) {
                (Some((name, vs)), None) => out.push_mod(Mod {
                    op: ModType::Add,
                    attr: (*name).clone(),
                    values: vs.to_vec(),
                }),
                (None, Some((name, vs))) => out.push_mod(Mod {
                    op: ModType::Delete,
                    attr: (*name).clone(),
                    values: vs.to_vec(),
                }),
                (Some((name, n)), Some((_, o))) => {
                    if n != o {
                        out.push_mod(Mod {
                            op: ModType::Replace,
                            attr: (*name).clone(),
                            values: n.to_vec(),
                        });
                    }
                }
                (None, None) => {}
            }
        }
        out
    }

    fn oid_view(&self) -> std::collections::BTreeMap<Oid, (&AttrName, &ValueSet)> {
        let mut out = std::collections::BTreeMap::new();
        for attr in self.entry.attributes() {
            if let Some(oid) = self.schema.attr_oid(attr.as_str()) {
                if self.present.contains(oid) {
                    if let Some(vs) = self.entry.get_value(attr.as_str()) {
                        out.entry(oid.clone()).or_insert((attr, vs));
                    }
                }
            }
        }
        out
    }

    // ===== the recompute =====

    /// Recompute the cached sets from the entry's current object classes and
    /// attributes, completing the cover first.
    fn resolve(&mut self) -> Result<(), SchemaViolation> {
        let oc_names: Vec<String> = self
            .entry
            .get_value(ATTR_OBJECTCLASS)
            .map(|vs| {
                vs.iter()
                    .map(|v| String::from_utf8_lossy(v).to_string())
                    .collect()
            })
            .unwrap_or_default();

        let (closure, unknown) = self
            .schema
            .sup_closure(oc_names.iter().map(|s| s.as_str()));

        if self.mode == CheckMode::Pessimistic {
            if let Some(name) = unknown.into_iter().next() {
                return Err(SchemaViolation::InvalidObjectClass(name));
            }
        }

        self.complete_cover(&oc_names, &closure);

        self.must.clear();
        self.may.clear();
        for class_oid in closure.iter() {
            if let Some(def) = self.schema.class_def_by_oid(class_oid) {
                for a in def.must.iter() {
                    match self.schema.attr_oid(a) {
                        Some(oid) => {
                            self.must.insert(oid.clone());
                        }
                        None => warn!(class = %def.name(), attr = %a, "MUST names an attribute the schema does not define"),
                    }
                }
                for a in def.may.iter() {
                    match self.schema.attr_oid(a) {
                        Some(oid) => {
                            self.may.insert(oid.clone());
                        }
                        None => warn!(class = %def.name(), attr = %a, "MAY names an attribute the schema does not define"),
                    }
                }
            }
        }

        self.present.clear();
        for attr in self.entry.attributes() {
            if attr.folded() == "objectclass" {
                if let Some(oid) = self.schema.attr_oid(attr.as_str()) {
                    self.present.insert(oid.clone());
                }
                continue;
            }
            match self.schema.attr_oid(attr.as_str()) {
                Some(oid) if self.must.contains(oid) || self.may.contains(oid) => {
                    self.present.insert(oid.clone());
                }
                _ if self.mode == CheckMode::Pessimistic => {
                    return Err(SchemaViolation::InvalidAttribute(attr.as_str().to_string()));
                }
                _ => {
                    // Optimistic: outside the cover, drop from the view. The
                    // raw entry keeps the values.
                    trace!(attr = %attr, "attribute hidden from schema view");
                }
            }
        }

        self.missing = self.must.difference(&self.present).cloned().collect();
        Ok(())
    }

    /// Ensure the objectClass attribute lists every class of the SUP closure.
    /// Servers usually return the full chain already, in which case this is a
    /// no-op and nothing reaches the change log.
    fn complete_cover(&mut self, oc_names: &[String], closure: &BTreeSet<Oid>) {
        let mut additions: Vec<Vec<u8>> = Vec::new();
        for class_oid in closure.iter() {
            let listed = oc_names
                .iter()
                .any(|n| self.schema.class_oid(n) == Some(class_oid));
            if !listed {
                if let Some(def) = self.schema.class_def_by_oid(class_oid) {
                    additions.push(def.name().as_bytes().to_vec());
                }
            }
        }
        if !additions.is_empty() {
            self.entry.add(ATTR_OBJECTCLASS, additions);
        }
    }
}

impl EntryView for CheckedEntry {
    fn view_dn(&self) -> &str {
        self.entry.dn()
    }

    fn view_attrs(&self) -> Vec<&AttrName> {
        self.entry
            .attributes()
            .filter(|a| {
                a.folded() == "objectclass"
                    || self
                        .schema
                        .attr_oid(a.as_str())
                        .map(|oid| self.present.contains(oid))
                        .unwrap_or(false)
            })
            .collect()
    }

    fn view_values(&self, attr: &AttrName) -> Option<&ValueSet> {
        self.view_attrs()
            .into_iter()
            .find(|a| *a == attr)
            .and_then(|a| self.entry.get_value(a.as_str()))
    }
}
