//! Error types shared across the toolkit. There are two families: [`LdapError`]
//! covers everything the connection manager can surface, including server result
//! codes and transport faults, while [`SchemaViolation`] and [`AccountError`] are
//! local validation errors that never involve a server round trip.

use ldap3_proto::proto::LdapResultCode;
use serde::{Deserialize, Serialize};

/// Failures surfaced by the connection manager. A server result code other than
/// success becomes [`LdapError::Failure`]; everything else describes a fault in
/// the client side plumbing. Transport-family errors are eligible for the
/// manager's single transparent reconnect, all others propagate unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum LdapError {
    /// The server processed the request and returned a non-success result.
    Failure {
        code: LdapResultCode,
        message: String,
        matched_dn: String,
    },
    /// The connection dropped, refused, or was never established.
    ServerDown(String),
    /// The connect timeout elapsed before the endpoint answered.
    Timeout,
    /// The transport could not be set up (TCP or TLS negotiation).
    ConnectError(String),
    /// The peer sent bytes that did not decode as an LDAP PDU, or a PDU of an
    /// unexpected type for the operation in flight.
    Decoding(String),
    /// A client-side precondition failed before anything was sent.
    Local(String),
    /// A server URL could not be parsed or resolved.
    InvalidUrl(String),
}

impl LdapError {
    /// True for the transport family - these trigger the one-shot reconnect in
    /// the connection manager. Server result codes never do.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LdapError::ServerDown(_) | LdapError::Timeout | LdapError::ConnectError(_)
        )
    }

    pub(crate) fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => LdapError::Timeout,
            std::io::ErrorKind::InvalidData => LdapError::Decoding(e.to_string()),
            _ => LdapError::ServerDown(e.to_string()),
        }
    }
}

/// Raised by the schema-checked entry when a mutation or completion breaks the
/// rules the bound schema imposes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaViolation {
    /// An object class named on the entry is not defined by the schema.
    InvalidObjectClass(String),
    /// An attribute is present that no chosen class permits.
    InvalidAttribute(String),
    /// An add or replace would leave more than one value on a SINGLE-VALUE
    /// attribute.
    SingleValue(String),
    /// The entry carries no objectClass attribute at commit time.
    ObjectClassRequired,
}

/// Raised while parsing the raw subschema subentry into a [`crate::schema::Schema`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaParseError {
    /// The definition string did not follow the parenthesised RFC 4512 form.
    InvalidDefinition(String),
    /// A definition was missing its leading numeric OID.
    MissingOid(String),
}

/// The reason a single generator failed during [`crate::account::AccountEntry::generate`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationError {
    /// A required input attribute had no values when the generator ran.
    /// Fields are the generator name and the missing attribute.
    MissingRequired(String, String),
    /// The generator function itself reported a domain error.
    GeneratorError(String),
}

/// Raised by the account entry while registering services or resolving the
/// generator dependency graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountError {
    /// No registered generator produces the named attribute.
    NoGenerator(String),
    /// No service is registered under the requested name.
    NoService(String),
    /// A generator ran and failed, or could not run at all.
    GenerationFailed(GenerationError),
    /// A service dependency (transitively) names an unregistered service.
    ServiceDepUnsatisfiable(String),
    /// A generated attribute of the service cannot be produced - either its
    /// generator is unregistered or a required input is unreachable. Fields
    /// are the service and the attribute.
    GeneratorDepUnsatisfiable(String, String),
    /// The pending generators form a dependency cycle. Carries the attributes
    /// that could not be ordered.
    CannotSortDependencies(Vec<String>),
    /// Applying generated or static values broke a schema rule.
    Schema(SchemaViolation),
}

impl From<SchemaViolation> for AccountError {
    fn from(e: SchemaViolation) -> Self {
        AccountError::Schema(e)
    }
}
