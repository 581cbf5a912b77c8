//! A client-side toolkit for LDAP v3 directories (RFC 4511 wire format,
//! spoken through `ldap3_proto`). It provides an entry object model with a
//! replayable change log, schema-aware validation and completion, account
//! entries with dependency-resolved attribute generation, and a connection
//! manager that multiplexes one logical session over a pool of server
//! endpoints with transparent reconnection.
//!
//! The pieces stack from the bottom up:
//!
//! * [`entry::Entry`] - the present attribute map plus the pending change log.
//! * [`schema::Schema`] - attribute and class definitions keyed by OID, with
//!   alias-aware name lookup.
//! * [`checked::CheckedEntry`] - an entry bound to a schema, kept legal on
//!   every mutation.
//! * [`account::AccountEntry`] - a checked entry with generators and services.
//! * [`client::LdapClient`] - the session: bind, search, modify, failover.

#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
// We allow expect since it forces good error messages at the least.
#![allow(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

pub mod account;
pub mod checked;
pub mod client;
pub mod constants;
pub mod entry;
pub mod error;
pub mod modify;
pub mod schema;

pub use crate::account::{AccountEntry, Generator, GeneratorFn, Service};
pub use crate::checked::{CheckMode, CheckedEntry};
pub use crate::client::{BindMethod, LdapClient, LdapClientBuilder, SearchOptions, SearchStream};
pub use crate::entry::{diff, AttrName, ChangeType, Entry, EntryView, ValueSet};
pub use crate::error::{
    AccountError, GenerationError, LdapError, SchemaParseError, SchemaViolation,
};
pub use crate::modify::{m_add, m_delete, m_replace, Mod, ModType, ModifyList};
pub use crate::schema::{ClassKind, Oid, Schema, SchemaAttribute, SchemaClass};

// The wire types callers hand to the search API.
pub use ldap3_proto::proto::{LdapFilter, LdapResultCode, LdapSearchScope};
