//! Account entries extend schema-checked entries with *generators* (functions
//! that compute attribute values from other attributes) and *services* (named
//! bundles of static attributes, generated attributes and service
//! dependencies). Calling [`AccountEntry::generate`] resolves the dependency
//! graph between pending generated attributes and produces values in
//! topological order, so a generator always sees the attributes it requires
//! already filled in.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::checked::{CheckedEntry, CheckMode};
use crate::entry::{AttrName, Entry, ValueSet};
use crate::error::{AccountError, GenerationError};
use crate::modify::ModifyList;
use crate::schema::Schema;

/// The computing half of a generator: reads the raw entry, returns the values
/// for the attribute the generator is named after. Domain failures are
/// reported as a message and wrapped in
/// [`GenerationError::GeneratorError`].
pub type GeneratorFn = Arc<dyn Fn(&Entry) -> Result<Vec<Vec<u8>>, String> + Send + Sync>;

/// A named value producer. The name is the attribute it generates; `required`
/// lists the attributes that must hold at least one value before it runs.
#[derive(Clone)]
pub struct Generator {
    pub name: AttrName,
    pub required: Vec<AttrName>,
    pub func: GeneratorFn,
}

impl Generator {
    pub fn new<F>(name: &str, required: &[&str], func: F) -> Self
    where
        F: Fn(&Entry) -> Result<Vec<Vec<u8>>, String> + Send + Sync + 'static,
    {
        Generator {
            name: AttrName::new(name),
            required: required.iter().map(|r| AttrName::new(r)).collect(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

/// A named bundle: attributes set verbatim, attributes produced by
/// generators, and other services this one depends on.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub static_attrs: Vec<(AttrName, Vec<Vec<u8>>)>,
    pub generate_attrs: Vec<AttrName>,
    pub depends: Vec<String>,
}

impl Service {
    pub fn new(name: &str) -> Self {
        Service {
            name: name.to_string(),
            static_attrs: Vec::new(),
            generate_attrs: Vec::new(),
            depends: Vec::new(),
        }
    }

    pub fn static_attr(mut self, attr: &str, values: Vec<Vec<u8>>) -> Self {
        self.static_attrs.push((AttrName::new(attr), values));
        self
    }

    pub fn generate_attr(mut self, attr: &str) -> Self {
        self.generate_attrs.push(AttrName::new(attr));
        self
    }

    pub fn depends_on(mut self, service: &str) -> Self {
        self.depends.push(service.to_string());
        self
    }
}

/// A schema-checked entry plus the generator and service registries and the
/// set of attributes pending generation.
pub struct AccountEntry {
    inner: CheckedEntry,
    generators: HashMap<String, Generator>,
    services: HashMap<String, Service>,
    pending: BTreeSet<AttrName>,
}

impl fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountEntry")
            .field("dn", &self.inner.dn())
            .field("pending", &self.pending)
            .finish()
    }
}

impl AccountEntry {
    pub fn from_checked(inner: CheckedEntry) -> Self {
        AccountEntry {
            inner,
            generators: HashMap::new(),
            services: HashMap::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn from_entry(
        mode: CheckMode,
        entry: Entry,
        schema: Arc<Schema>,
    ) -> Result<Self, crate::error::SchemaViolation> {
        CheckedEntry::from_entry(mode, entry, schema).map(Self::from_checked)
    }

    pub fn checked(&self) -> &CheckedEntry {
        &self.inner
    }

    pub fn checked_mut(&mut self) -> &mut CheckedEntry {
        &mut self.inner
    }

    pub fn into_checked(self) -> CheckedEntry {
        self.inner
    }

    pub fn dn(&self) -> &str {
        self.inner.dn()
    }

    pub fn changes(&self) -> &ModifyList {
        self.inner.changes()
    }

    pub fn get_value(&self, attr: &str) -> Option<&ValueSet> {
        self.inner.get_value(attr)
    }

    pub fn register_generator(&mut self, g: Generator) {
        self.generators.insert(g.name.folded().to_string(), g);
    }

    pub fn register_service(&mut self, s: Service) {
        self.services.insert(s.name.clone(), s);
    }

    /// Mark an attribute for generation on the next [`generate`] run. It must
    /// be produced by a registered generator.
    ///
    /// [`generate`]: AccountEntry::generate
    pub fn add_generate(&mut self, attr: &str) -> Result<(), AccountError> {
        let attr = AttrName::new(attr);
        if !self.generators.contains_key(attr.folded()) {
            return Err(AccountError::NoGenerator(attr.to_string()));
        }
        self.pending.insert(attr);
        Ok(())
    }

    /// A filtered copy of the named service: static attributes and generated
    /// attributes the entry already carries are left out, so adding a service
    /// to an already-populated entry does not clobber existing values.
    pub fn adapt_service(&self, name: &str) -> Result<Service, AccountError> {
        let svc = self
            .services
            .get(name)
            .ok_or_else(|| AccountError::NoService(name.to_string()))?;
        Ok(self.adapt(svc))
    }

    fn adapt(&self, svc: &Service) -> Service {
        Service {
            name: svc.name.clone(),
            static_attrs: svc
                .static_attrs
                .iter()
                .filter(|(a, _)| !self.inner.exists(a.as_str()))
                .cloned()
                .collect(),
            generate_attrs: svc
                .generate_attrs
                .iter()
                .filter(|a| !self.inner.exists(a.as_str()))
                .cloned()
                .collect(),
            depends: svc.depends.clone(),
        }
    }

    /// Enqueue a service: validate its dependency closure, apply its static
    /// attributes, and mark its generated attributes pending. Values the
    /// entry already holds are not clobbered.
    pub fn add_service(&mut self, name: &str) -> Result<(), AccountError> {
        if !self.services.contains_key(name) {
            return Err(AccountError::NoService(name.to_string()));
        }

        // Walk the service dependency closure; every dependency must be
        // registered.
        let mut closure: Vec<Service> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(n) = stack.pop() {
            if !seen.insert(n.clone()) {
                continue;
            }
            let svc = self
                .services
                .get(&n)
                .ok_or(AccountError::ServiceDepUnsatisfiable(n))?;
            stack.extend(svc.depends.iter().cloned());
            closure.push(self.adapt(svc));
        }

        // Every generated attribute needs a registered generator whose
        // required inputs are reachable: already on the entry, set statically
        // by this closure, or generated alongside.
        let soon_static: BTreeSet<&AttrName> = closure
            .iter()
            .flat_map(|s| s.static_attrs.iter().map(|(a, _)| a))
            .collect();
        let soon_generated: BTreeSet<&AttrName> = self
            .pending
            .iter()
            .chain(closure.iter().flat_map(|s| s.generate_attrs.iter()))
            .collect();

        for svc in closure.iter() {
            for attr in svc.generate_attrs.iter() {
                let gen = self.generators.get(attr.folded()).ok_or_else(|| {
                    AccountError::GeneratorDepUnsatisfiable(svc.name.clone(), attr.to_string())
                })?;
                for req in gen.required.iter() {
                    let reachable = self.inner.exists(req.as_str())
                        || soon_static.contains(req)
                        || soon_generated.contains(req);
                    if !reachable {
                        return Err(AccountError::GeneratorDepUnsatisfiable(
                            svc.name.clone(),
                            attr.to_string(),
                        ));
                    }
                }
            }
        }

        // All checks passed - now mutate.
        for svc in closure.iter() {
            for (attr, values) in svc.static_attrs.iter() {
                self.inner.replace(attr.as_str(), values.clone())?;
            }
        }
        for svc in closure {
            self.pending.extend(svc.generate_attrs);
        }
        debug!(service = name, pending = self.pending.len(), "service enqueued");
        Ok(())
    }

    /// Produce every pending generated attribute, dependency-first. A cycle
    /// among the pending generators fails with the unsortable remainder and
    /// leaves the entry's attribute values unchanged.
    pub fn generate(&mut self) -> Result<(), AccountError> {
        let order = self.sort_pending()?;

        for attr in order {
            // The generator was checked at enqueue time, but registries are
            // caller-owned, so re-resolve defensively at run time.
            let gen = self
                .generators
                .get(attr.folded())
                .cloned()
                .ok_or_else(|| AccountError::NoGenerator(attr.to_string()))?;

            for req in gen.required.iter() {
                let filled = self
                    .inner
                    .get_value(req.as_str())
                    .map(|vs| !vs.is_empty())
                    .unwrap_or(false);
                if !filled {
                    return Err(AccountError::GenerationFailed(
                        GenerationError::MissingRequired(
                            gen.name.to_string(),
                            req.to_string(),
                        ),
                    ));
                }
            }

            let values = (gen.func)(self.inner.entry()).map_err(|msg| {
                AccountError::GenerationFailed(GenerationError::GeneratorError(msg))
            })?;
            trace!(attr = %attr, produced = values.len(), "generated");
            self.inner.replace(attr.as_str(), values)?;
            self.pending.remove(&attr);
        }
        Ok(())
    }

    /// Kahn's algorithm over the pending attributes. An edge runs from a
    /// generated attribute to each required attribute that is itself pending;
    /// requirements surface earlier in the returned order.
    fn sort_pending(&self) -> Result<Vec<AttrName>, AccountError> {
        let nodes: Vec<&AttrName> = self.pending.iter().collect();
        let deps: Vec<Vec<usize>> = nodes
            .iter()
            .map(|a| {
                let required = self
                    .generators
                    .get(a.folded())
                    .map(|g| g.required.as_slice())
                    .unwrap_or(&[]);
                nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| required.contains(b))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        let mut in_degree: Vec<usize> = deps.iter().map(|d| d.len()).collect();
        let mut queue: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order: Vec<AttrName> = Vec::with_capacity(nodes.len());
        let mut done = vec![false; nodes.len()];

        while let Some(i) = queue.pop() {
            if done[i] {
                continue;
            }
            done[i] = true;
            order.push(nodes[i].clone());

            for (j, d) in deps.iter().enumerate() {
                if !done[j] && d.contains(&i) {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        queue.push(j);
                    }
                }
            }
        }

        if order.len() == nodes.len() {
            Ok(order)
        } else {
            let remaining: Vec<String> = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| !done[*i])
                .map(|(_, a)| a.to_string())
                .collect();
            Err(AccountError::CannotSortDependencies(remaining))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checked::tests::test_schema;
    use crate::constants::ATTR_OBJECTCLASS;

    fn vals(vs: &[&str]) -> Vec<Vec<u8>> {
        vs.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    fn account() -> AccountEntry {
        let mut e = Entry::with_dn("uid=william,ou=people,dc=x");
        e.add(ATTR_OBJECTCLASS, vals(&["person", "posixAccount"]));
        e.add("cn", vals(&["william"]));
        e.add("sn", vals(&["b"]));
        e.flush_changes();
        AccountEntry::from_entry(CheckMode::Optimistic, e, test_schema())
            .expect("fixture entry must bind")
    }

    fn g_uid_number() -> Generator {
        Generator::new("uidNumber", &[], |_| Ok(vec![b"1000".to_vec()]))
    }

    fn g_home_directory() -> Generator {
        Generator::new("homeDirectory", &["uid", "uidNumber"], |e| {
            let uid = e
                .get_value("uid")
                .and_then(|vs| vs.iter().next().cloned())
                .ok_or_else(|| "uid has no value".to_string())?;
            let uid = String::from_utf8_lossy(&uid).to_string();
            Ok(vec![format!("/home/{uid}").into_bytes()])
        })
    }

    fn unix_service() -> Service {
        Service::new("unix")
            .static_attr("uid", vals(&["william"]))
            .static_attr("gidNumber", vals(&["1000"]))
            .generate_attr("uidNumber")
            .generate_attr("homeDirectory")
    }

    #[test]
    fn test_account_generator_order() {
        let mut a = account();
        a.register_generator(g_uid_number());
        a.register_generator(g_home_directory());
        a.register_service(unix_service());

        a.add_service("unix").expect("service must enqueue");
        a.generate().expect("generation must succeed");

        // uidNumber ran before homeDirectory, which consumed uid.
        assert!(a.get_value("uidNumber").expect("generated").contains_str("1000"));
        assert!(a
            .get_value("homeDirectory")
            .expect("generated")
            .contains_str("/home/william"));
        assert!(a.get_value("uid").expect("static").contains_str("william"));
    }

    #[test]
    fn test_account_cycle_detected() {
        let mut a = account();
        a.register_generator(Generator::new("mail", &["telephoneNumber"], |_| {
            Ok(vec![b"x".to_vec()])
        }));
        a.register_generator(Generator::new("telephoneNumber", &["mail"], |_| {
            Ok(vec![b"y".to_vec()])
        }));

        a.add_generate("mail").expect("generator is registered");
        a.add_generate("telephoneNumber").expect("generator is registered");

        let before = a.checked().entry().clone();
        let r = a.generate();
        match r {
            Err(AccountError::CannotSortDependencies(remaining)) => {
                assert_eq!(remaining.len(), 2);
            }
            other => panic!("expected CannotSortDependencies, got {other:?}"),
        }
        // Nothing was produced.
        assert_eq!(a.checked().entry(), &before);
    }

    #[test]
    fn test_account_no_generator() {
        let mut a = account();
        assert_eq!(
            a.add_generate("mail"),
            Err(AccountError::NoGenerator("mail".to_string()))
        );
    }

    #[test]
    fn test_account_no_service() {
        let mut a = account();
        assert_eq!(
            a.add_service("unix"),
            Err(AccountError::NoService("unix".to_string()))
        );
    }

    #[test]
    fn test_account_service_dep_unsatisfiable() {
        let mut a = account();
        a.register_service(Service::new("mailbox").depends_on("imap"));
        assert_eq!(
            a.add_service("mailbox"),
            Err(AccountError::ServiceDepUnsatisfiable("imap".to_string()))
        );
    }

    #[test]
    fn test_account_generator_dep_unsatisfiable() {
        let mut a = account();
        // homeDirectory requires uid and uidNumber; neither is present,
        // static, nor generated alongside.
        a.register_generator(g_home_directory());
        a.register_service(Service::new("halfunix").generate_attr("homeDirectory"));

        assert_eq!(
            a.add_service("halfunix"),
            Err(AccountError::GeneratorDepUnsatisfiable(
                "halfunix".to_string(),
                "homeDirectory".to_string()
            ))
        );

        // A generate attr with no registered generator at all reports the same.
        a.register_service(Service::new("ghost").generate_attr("mail"));
        assert_eq!(
            a.add_service("ghost"),
            Err(AccountError::GeneratorDepUnsatisfiable(
                "ghost".to_string(),
                "mail".to_string()
            ))
        );
    }

    #[test]
    fn test_account_service_dependency_chain() {
        let mut a = account();
        a.register_generator(g_uid_number());
        a.register_generator(g_home_directory());
        a.register_service(
            Service::new("base-unix")
                .static_attr("uid", vals(&["william"]))
                .static_attr("gidNumber", vals(&["1000"]))
                .generate_attr("uidNumber"),
        );
        a.register_service(
            Service::new("homedir")
                .depends_on("base-unix")
                .generate_attr("homeDirectory"),
        );

        a.add_service("homedir").expect("chain must enqueue");
        a.generate().expect("generation must succeed");
        assert!(a.get_value("homeDirectory").is_some());
    }

    #[test]
    fn test_account_adapt_service_skips_present() {
        let mut a = account();
        a.checked_mut()
            .replace("uid", vals(&["keepme"]))
            .expect("uid is permitted");
        a.register_generator(g_uid_number());
        a.register_generator(g_home_directory());
        a.register_service(unix_service());

        let adapted = a.adapt_service("unix").expect("service is registered");
        assert!(adapted
            .static_attrs
            .iter()
            .all(|(attr, _)| attr.folded() != "uid"));

        a.add_service("unix").expect("service must enqueue");
        a.generate().expect("generation must succeed");
        // The existing uid survived and fed the home directory generator.
        assert!(a.get_value("uid").expect("kept").contains_str("keepme"));
        assert!(a
            .get_value("homeDirectory")
            .expect("generated")
            .contains_str("/home/keepme"));
    }

    #[test]
    fn test_account_missing_required_at_runtime() {
        let mut a = account();
        a.register_generator(g_home_directory());
        // Bypass service validation via add_generate, leaving uid unset.
        a.add_generate("homeDirectory").expect("generator is registered");

        match a.generate() {
            Err(AccountError::GenerationFailed(GenerationError::MissingRequired(g, r))) => {
                assert_eq!(g, "homeDirectory");
                assert!(r == "uid" || r == "uidNumber");
            }
            other => panic!("expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_account_generator_domain_error() {
        let mut a = account();
        a.register_generator(Generator::new("mail", &[], |_| {
            Err("mail domain not configured".to_string())
        }));
        a.add_generate("mail").expect("generator is registered");

        assert_eq!(
            a.generate(),
            Err(AccountError::GenerationFailed(
                GenerationError::GeneratorError("mail domain not configured".to_string())
            ))
        );
    }
}
