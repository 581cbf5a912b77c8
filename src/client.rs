//! The connection manager. An [`LdapClient`] holds the logical session to a
//! directory: it resolves the configured URL list into an ordered endpoint
//! pool, binds, dispatches requests, and transparently reconnects (and
//! rebinds) exactly once when the transport fails mid-operation. Server
//! result codes are never retried - only the transport family is.
//!
//! Every method takes `&mut self`: the session is single-flight by
//! construction, and a live [`SearchStream`] borrows the client so no other
//! operation can be issued until the stream is drained or abandoned.

use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use hashbrown::HashMap;
use ldap3_proto::proto::*;
use ldap3_proto::LdapCodec;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_openssl::SslStream;
use tokio_util::codec::Framed;
use url::Url;

use crate::constants::{
    ATTR_ATTRIBUTE_TYPES, ATTR_DELETEOLDRDN, ATTR_NEWRDN, ATTR_NEWSUPERIOR, ATTR_OBJECTCLASS,
    ATTR_OBJECT_CLASSES, ATTR_SUBSCHEMA_SUBENTRY, VAL_SUBSCHEMA,
};
use crate::entry::{ChangeType, Entry};
use crate::error::LdapError;
use crate::modify::ModifyList;
use crate::schema::Schema;

const DEFAULT_CONNECT_TIMEOUT: u64 = 10;
const PORT_LDAP: u16 = 389;
const PORT_LDAPS: u16 = 636;

/// How to authenticate. Simple binds are the only mechanism today; SASL slots
/// in here as a further variant when a mechanism negotiation lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMethod {
    Simple,
}

#[derive(Debug, Clone)]
struct BindState {
    dn: String,
    cred: String,
    method: BindMethod,
}

#[derive(Debug, Clone)]
struct Endpoint {
    addr: SocketAddr,
    host: String,
    tls: bool,
}

enum LdapStream {
    Plain(Framed<TcpStream, LdapCodec>),
    Tls(Framed<SslStream<TcpStream>, LdapCodec>),
}

impl LdapStream {
    async fn send(&mut self, msg: LdapMsg) -> Result<(), LdapError> {
        match self {
            LdapStream::Plain(f) => f.send(msg).await.map_err(LdapError::from_io),
            LdapStream::Tls(f) => f.send(msg).await.map_err(LdapError::from_io),
        }
    }

    async fn next_msg(&mut self) -> Result<LdapMsg, LdapError> {
        let next = match self {
            LdapStream::Plain(f) => f.next().await,
            LdapStream::Tls(f) => f.next().await,
        };
        match next {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(e)) => Err(LdapError::from_io(e)),
            None => Err(LdapError::ServerDown("connection closed by peer".to_string())),
        }
    }
}

struct LdapConn {
    stream: LdapStream,
    msgid: i32,
}

impl LdapConn {
    async fn send_op(&mut self, op: LdapOp) -> Result<i32, LdapError> {
        self.msgid += 1;
        let msgid = self.msgid;
        self.stream
            .send(LdapMsg {
                msgid,
                op,
                ctrl: vec![],
            })
            .await?;
        Ok(msgid)
    }

    /// Receive the next message for `msgid`, discarding responses that
    /// belong to abandoned or superseded operations.
    async fn recv_expect(&mut self, msgid: i32) -> Result<LdapOp, LdapError> {
        loop {
            let msg = self.stream.next_msg().await?;
            if msg.msgid == msgid {
                return Ok(msg.op);
            }
            trace!(
                got = msg.msgid,
                want = msgid,
                "discarding response for stale message id"
            );
        }
    }
}

/// Scope, base, filter and attribute selection for a search. Defaults to a
/// subtree search from the empty base returning all attributes.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub base: String,
    pub scope: LdapSearchScope,
    pub filter: LdapFilter,
    pub attrs: Vec<String>,
    pub attrs_only: bool,
}

impl SearchOptions {
    pub fn new(filter: LdapFilter) -> Self {
        SearchOptions {
            base: String::new(),
            scope: LdapSearchScope::Subtree,
            filter,
            attrs: Vec::new(),
            attrs_only: false,
        }
    }

    pub fn base(mut self, base: &str) -> Self {
        self.base = base.to_string();
        self
    }

    pub fn scope(mut self, scope: LdapSearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs = attrs.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn attrs_only(mut self, attrs_only: bool) -> Self {
        self.attrs_only = attrs_only;
        self
    }

    fn to_request(&self) -> LdapSearchRequest {
        LdapSearchRequest {
            base: self.base.clone(),
            scope: self.scope.clone(),
            aliases: LdapDerefAliases::Never,
            sizelimit: 0,
            timelimit: 0,
            typesonly: self.attrs_only,
            filter: self.filter.clone(),
            attrs: self.attrs.clone(),
        }
    }
}

/// Configuration for an [`LdapClient`]. URLs are resolved at [`build`] time -
/// a hostname with several addresses fans out into several endpoints, in
/// input order.
///
/// [`build`]: LdapClientBuilder::build
#[derive(Debug, Clone)]
pub struct LdapClientBuilder {
    urls: Vec<String>,
    version: u8,
    connect_timeout: u64,
    verify_certs: bool,
}

impl LdapClientBuilder {
    pub fn new(url: &str) -> Self {
        LdapClientBuilder {
            urls: vec![url.to_string()],
            version: 3,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            verify_certs: true,
        }
    }

    /// A further URL appended to the pool; tried after the ones before it.
    pub fn add_url(mut self, url: &str) -> Self {
        self.urls.push(url.to_string());
        self
    }

    /// LDAP protocol version, 2 or 3. Defaults to 3.
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Connect timeout in seconds, applied per endpoint attempt.
    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = secs;
        self
    }

    /// Disable TLS certificate verification. Test environments only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.verify_certs = !accept;
        self
    }

    pub fn build(self) -> Result<LdapClient, LdapError> {
        if !(2..=3).contains(&self.version) {
            return Err(LdapError::Local(format!(
                "unsupported protocol version {}",
                self.version
            )));
        }

        let mut endpoints = Vec::new();
        for url_s in self.urls.iter() {
            let url = Url::parse(url_s)
                .map_err(|e| LdapError::InvalidUrl(format!("{url_s} - {e}")))?;
            let tls = match url.scheme() {
                "ldap" => false,
                "ldaps" => true,
                other => {
                    return Err(LdapError::InvalidUrl(format!(
                        "{url_s} - unsupported scheme {other}"
                    )))
                }
            };
            let host = url
                .host_str()
                .ok_or_else(|| LdapError::InvalidUrl(format!("{url_s} has no host")))?
                .to_string();
            let port = url
                .port()
                .unwrap_or(if tls { PORT_LDAPS } else { PORT_LDAP });

            match (host.as_str(), port).to_socket_addrs() {
                Ok(addrs) => {
                    for addr in addrs {
                        endpoints.push(Endpoint {
                            addr,
                            host: host.clone(),
                            tls,
                        });
                    }
                }
                Err(e) => {
                    warn!(url = url_s.as_str(), err = %e, "address resolution failed, skipping url");
                }
            }
        }

        if endpoints.is_empty() {
            return Err(LdapError::InvalidUrl(
                "no usable endpoints resolved from the url list".to_string(),
            ));
        }

        debug!(endpoints = endpoints.len(), "endpoint pool resolved");

        Ok(LdapClient {
            endpoints,
            next_endpoint: 0,
            version: self.version,
            timeout: Duration::from_secs(self.connect_timeout),
            verify_certs: self.verify_certs,
            conn: None,
            bind_state: None,
            schema: None,
        })
    }
}

/// The logical session. See the module documentation for the concurrency and
/// retry rules.
pub struct LdapClient {
    endpoints: Vec<Endpoint>,
    next_endpoint: usize,
    version: u8,
    timeout: Duration,
    verify_certs: bool,
    conn: Option<LdapConn>,
    bind_state: Option<BindState>,
    schema: Option<Arc<Schema>>,
}

impl std::fmt::Debug for LdapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapClient")
            .field("endpoints", &self.endpoints)
            .field("version", &self.version)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

fn result_of(op: LdapOp) -> Result<(), LdapError> {
    let res = match op {
        LdapOp::BindResponse(b) => b.res,
        LdapOp::AddResponse(r)
        | LdapOp::ModifyResponse(r)
        | LdapOp::DelResponse(r)
        | LdapOp::ModifyDNResponse(r)
        | LdapOp::SearchResultDone(r) => r,
        other => {
            return Err(LdapError::Decoding(format!(
                "unexpected response pdu {other:?}"
            )))
        }
    };
    if res.code == LdapResultCode::Success {
        Ok(())
    } else {
        Err(LdapError::Failure {
            code: res.code,
            message: res.message,
            matched_dn: res.matcheddn,
        })
    }
}

impl LdapClient {
    /// Open the transport to one endpoint, TLS iff the URL scheme was
    /// `ldaps`, bounded by the connect timeout.
    async fn connect_endpoint(&self, ep: &Endpoint) -> Result<LdapStream, LdapError> {
        debug!(addr = %ep.addr, tls = ep.tls, "connecting");
        let tcp = match timeout(self.timeout, TcpStream::connect(ep.addr)).await {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => return Err(LdapError::ConnectError(format!("{} - {e}", ep.addr))),
            Err(_) => return Err(LdapError::Timeout),
        };

        if !ep.tls {
            return Ok(LdapStream::Plain(Framed::new(tcp, LdapCodec::default())));
        }

        let mut tls_parms = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| LdapError::ConnectError(format!("openssl -> {e:?}")))?;
        if !self.verify_certs {
            tls_parms.set_verify(SslVerifyMode::NONE);
        }
        let tls_parms = tls_parms.build();

        let mut tlsstream = tls_parms
            .configure()
            .and_then(|c| c.into_ssl(ep.host.as_str()))
            .and_then(|ssl| SslStream::new(ssl, tcp))
            .map_err(|e| LdapError::ConnectError(format!("tls setup -> {e:?}")))?;

        match timeout(self.timeout, SslStream::connect(Pin::new(&mut tlsstream))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(LdapError::ConnectError(format!("tls handshake -> {e:?}")))
            }
            Err(_) => return Err(LdapError::Timeout),
        }

        Ok(LdapStream::Tls(Framed::new(tlsstream, LdapCodec::default())))
    }

    /// Walk the pool round-robin until an endpoint accepts, replaying the
    /// saved bind state on the fresh connection. The pool index carries over
    /// between calls and is never reset.
    async fn reconnect(&mut self) -> Result<(), LdapError> {
        let total = self.endpoints.len();
        for _ in 0..total {
            let ep = self.endpoints[self.next_endpoint % total].clone();
            self.next_endpoint = (self.next_endpoint + 1) % total;

            let stream = match self.connect_endpoint(&ep).await {
                Ok(s) => s,
                Err(e) if e.is_transport() => {
                    warn!(addr = %ep.addr, err = ?e, "endpoint unavailable, trying next");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut conn = LdapConn { stream, msgid: 0 };

            if let Some(bs) = self.bind_state.clone() {
                let op = match bs.method {
                    BindMethod::Simple => LdapOp::BindRequest(LdapBindRequest {
                        dn: bs.dn,
                        cred: LdapBindCred::Simple(bs.cred),
                    }),
                };
                let msgid = match conn.send_op(op).await {
                    Ok(id) => id,
                    Err(e) if e.is_transport() => {
                        warn!(addr = %ep.addr, err = ?e, "bind send failed, trying next");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                match conn.recv_expect(msgid).await {
                    Ok(op) => result_of(op)?,
                    Err(e) if e.is_transport() => {
                        warn!(addr = %ep.addr, err = ?e, "bind lost, trying next");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            info!(addr = %ep.addr, "session established");
            self.conn = Some(conn);
            return Ok(());
        }
        Err(LdapError::ServerDown(
            "every endpoint in the pool failed".to_string(),
        ))
    }

    async fn ensure_conn(&mut self) -> Result<(), LdapError> {
        if self.conn.is_none() {
            self.reconnect().await?;
        }
        Ok(())
    }

    fn conn_mut(&mut self) -> Result<&mut LdapConn, LdapError> {
        self.conn
            .as_mut()
            .ok_or_else(|| LdapError::ServerDown("not connected".to_string()))
    }

    async fn send_recv(&mut self, op: LdapOp) -> Result<LdapOp, LdapError> {
        let conn = self.conn_mut()?;
        let msgid = conn.send_op(op).await?;
        conn.recv_expect(msgid).await
    }

    /// The one-retry dispatch wrapper: a transport fault mid-operation drops
    /// the connection, reconnects (rebinding), and re-issues the request
    /// once. Anything the server actually answered is returned as is.
    async fn roundtrip(&mut self, op: LdapOp) -> Result<LdapOp, LdapError> {
        let mut retried = false;
        loop {
            self.ensure_conn().await?;
            match self.send_recv(op.clone()).await {
                Err(e) if e.is_transport() && !retried => {
                    warn!(err = ?e, "transport fault, reconnecting once");
                    retried = true;
                    self.conn = None;
                }
                other => return other,
            }
        }
    }

    /// Authenticate. The bind state is stored before anything is sent so a
    /// later reconnect can rebind as the same identity. An anonymous bind is
    /// an empty DN with no credentials.
    pub async fn bind(&mut self, dn: &str, cred: &str) -> Result<(), LdapError> {
        self.bind_state = Some(BindState {
            dn: dn.to_string(),
            cred: cred.to_string(),
            method: BindMethod::Simple,
        });

        if self.conn.is_none() {
            // The connect path replays the bind state we just stored.
            return self.reconnect().await;
        }

        let op = LdapOp::BindRequest(LdapBindRequest {
            dn: dn.to_string(),
            cred: LdapBindCred::Simple(cred.to_string()),
        });
        let resp = self.roundtrip(op).await?;
        result_of(resp)
    }

    /// Send an unbind and drop the connection. The bind state is cleared;
    /// transport faults while saying goodbye are ignored.
    pub async fn unbind(&mut self) -> Result<(), LdapError> {
        if let Some(conn) = self.conn.as_mut() {
            let _ = conn.send_op(LdapOp::UnbindRequest).await;
        }
        self.conn = None;
        self.bind_state = None;
        Ok(())
    }

    /// Add the entry's present attribute map as a new object.
    pub async fn add(&mut self, entry: &Entry) -> Result<(), LdapError> {
        let op = LdapOp::AddRequest(LdapAddRequest::from(entry));
        let resp = self.roundtrip(op).await?;
        result_of(resp)
    }

    /// Apply a change log to the named object as a single modify request.
    pub async fn modify(&mut self, dn: &str, mods: &ModifyList) -> Result<(), LdapError> {
        let op = LdapOp::ModifyRequest(LdapModifyRequest {
            dn: dn.to_string(),
            changes: mods.to_wire(),
        });
        let resp = self.roundtrip(op).await?;
        result_of(resp)
    }

    pub async fn delete(&mut self, dn: &str) -> Result<(), LdapError> {
        let resp = self.roundtrip(LdapOp::DelRequest(dn.to_string())).await?;
        result_of(resp)
    }

    /// Rename an object. Moving under a new superior is a v3 feature; a v2
    /// session refuses it locally with `ProtocolError`.
    pub async fn modrdn(
        &mut self,
        dn: &str,
        newrdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<(), LdapError> {
        if new_superior.is_some() && self.version < 3 {
            return Err(LdapError::Failure {
                code: LdapResultCode::ProtocolError,
                message: "newSuperior requires protocol version 3".to_string(),
                matched_dn: String::new(),
            });
        }
        let op = LdapOp::ModifyDNRequest(LdapModifyDNRequest {
            dn: dn.to_string(),
            newrdn: newrdn.to_string(),
            deleteoldrdn: delete_old_rdn,
            new_superior: new_superior.map(|s| s.to_string()),
        });
        let resp = self.roundtrip(op).await?;
        result_of(resp)
    }

    /// Run a search and buffer every result. Wire records sharing a DN fold
    /// into one entry; referrals come back as `ref` entries. A transport
    /// fault mid-stream restarts the whole search once.
    pub async fn search(&mut self, opts: &SearchOptions) -> Result<Vec<Entry>, LdapError> {
        let mut retried = false;
        loop {
            self.ensure_conn().await?;
            match self.try_search(opts).await {
                Err(e) if e.is_transport() && !retried => {
                    warn!(err = ?e, "transport fault during search, reconnecting once");
                    retried = true;
                    self.conn = None;
                }
                other => return other,
            }
        }
    }

    async fn try_search(&mut self, opts: &SearchOptions) -> Result<Vec<Entry>, LdapError> {
        let conn = self.conn_mut()?;
        let msgid = conn
            .send_op(LdapOp::SearchRequest(opts.to_request()))
            .await?;

        let mut out: Vec<Entry> = Vec::new();
        let mut by_dn: HashMap<String, usize> = HashMap::new();
        loop {
            match conn.recv_expect(msgid).await? {
                LdapOp::SearchResultEntry(lsre) => match by_dn.get(&lsre.dn) {
                    Some(&i) => out[i].merge_wire(lsre),
                    None => {
                        by_dn.insert(lsre.dn.clone(), out.len());
                        out.push(Entry::from(lsre));
                    }
                },
                LdapOp::SearchResultReference(r) => {
                    out.push(Entry::from_referral(r.uris));
                }
                LdapOp::SearchResultDone(res) => {
                    return if res.code == LdapResultCode::Success {
                        debug!(entries = out.len(), "search complete");
                        Ok(out)
                    } else {
                        Err(LdapError::Failure {
                            code: res.code,
                            message: res.message,
                            matched_dn: res.matcheddn,
                        })
                    };
                }
                other => {
                    return Err(LdapError::Decoding(format!(
                        "unexpected pdu during search {other:?}"
                    )))
                }
            }
        }
    }

    /// Start a search and return a pull handle instead of buffering. The
    /// handle borrows the session exclusively until it is drained, dropped or
    /// abandoned.
    pub async fn search_stream(
        &mut self,
        opts: &SearchOptions,
    ) -> Result<SearchStream<'_>, LdapError> {
        let mut retried = false;
        let msgid = loop {
            self.ensure_conn().await?;
            let r = {
                let conn = self.conn_mut()?;
                conn.send_op(LdapOp::SearchRequest(opts.to_request())).await
            };
            match r {
                Ok(msgid) => break msgid,
                Err(e) if e.is_transport() && !retried => {
                    warn!(err = ?e, "transport fault starting search, reconnecting once");
                    retried = true;
                    self.conn = None;
                }
                Err(e) => return Err(e),
            }
        };
        Ok(SearchStream {
            client: self,
            msgid,
            done: false,
        })
    }

    /// Fetch the raw subschema subentry: chase the root DSE's
    /// `subschemaSubentry` attribute and read the named object base-scope.
    pub async fn rawschema(&mut self) -> Result<Entry, LdapError> {
        let rootdse_opts = SearchOptions::new(LdapFilter::Present(ATTR_OBJECTCLASS.to_string()))
            .scope(LdapSearchScope::Base)
            .attrs(&[ATTR_SUBSCHEMA_SUBENTRY]);
        let rootdse = self
            .search(&rootdse_opts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LdapError::Failure {
                code: LdapResultCode::NoSuchObject,
                message: "server returned no root DSE".to_string(),
                matched_dn: String::new(),
            })?;

        let sub_dn = rootdse
            .get_value(ATTR_SUBSCHEMA_SUBENTRY)
            .and_then(|vs| vs.iter().next())
            .map(|v| String::from_utf8_lossy(v).to_string())
            .ok_or_else(|| {
                LdapError::Local("server does not advertise subschemaSubentry".to_string())
            })?;

        debug!(subschema = sub_dn.as_str(), "reading subschema");

        let sub_opts = SearchOptions::new(LdapFilter::Equality(
            ATTR_OBJECTCLASS.to_string(),
            VAL_SUBSCHEMA.to_string(),
        ))
        .base(&sub_dn)
        .scope(LdapSearchScope::Base)
        .attrs(&[ATTR_ATTRIBUTE_TYPES, ATTR_OBJECT_CLASSES]);

        self.search(&sub_opts)
            .await?
            .into_iter()
            .find(|e| !e.is_referral())
            .ok_or_else(|| LdapError::Failure {
                code: LdapResultCode::NoSuchObject,
                message: "no subschema entry returned".to_string(),
                matched_dn: sub_dn,
            })
    }

    /// The parsed server schema, fetched once and shared for the life of the
    /// manager.
    pub async fn schema(&mut self) -> Result<Arc<Schema>, LdapError> {
        if let Some(s) = &self.schema {
            return Ok(s.clone());
        }
        let raw = self.rawschema().await?;
        let schema = Schema::try_from(&raw)
            .map_err(|e| LdapError::Decoding(format!("schema parse failed: {e:?}")))?;
        let schema = Arc::new(schema);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    /// Commit an entry according to its change type. A modify re-reads the
    /// object first so a vanished entry surfaces as `NoSuchObject` before any
    /// changes are sent. The change log is flushed only on full success - a
    /// rejected modify leaves it intact for the caller to inspect and retry.
    pub async fn update_entry(&mut self, e: &mut Entry) -> Result<(), LdapError> {
        match e.changetype() {
            ChangeType::Add => {
                self.add(e).await?;
            }
            ChangeType::Delete => {
                self.delete(e.dn()).await?;
            }
            ChangeType::Modrdn | ChangeType::Moddn => {
                let newrdn = e
                    .get_value(ATTR_NEWRDN)
                    .and_then(|vs| vs.iter().next())
                    .map(|v| String::from_utf8_lossy(v).to_string())
                    .ok_or_else(|| {
                        LdapError::Local("modrdn entry carries no newrdn attribute".to_string())
                    })?;
                let delete_old = e
                    .get_value(ATTR_DELETEOLDRDN)
                    .and_then(|vs| vs.iter().next())
                    .map(|v| v.as_slice() == b"1" || v.as_slice() == b"true")
                    .unwrap_or(true);
                let new_sup = e
                    .get_value(ATTR_NEWSUPERIOR)
                    .and_then(|vs| vs.iter().next())
                    .map(|v| String::from_utf8_lossy(v).to_string());
                self.modrdn(e.dn(), &newrdn, delete_old, new_sup.as_deref())
                    .await?;
            }
            ChangeType::Modify => {
                if e.changes().is_empty() {
                    return Ok(());
                }
                let probe = SearchOptions::new(LdapFilter::Present(
                    ATTR_OBJECTCLASS.to_string(),
                ))
                .base(e.dn())
                .scope(LdapSearchScope::Base)
                .attrs_only(true);
                if self.search(&probe).await?.is_empty() {
                    return Err(LdapError::Failure {
                        code: LdapResultCode::NoSuchObject,
                        message: "entry disappeared before modify".to_string(),
                        matched_dn: e.dn().to_string(),
                    });
                }
                self.modify(e.dn(), e.changes()).await?;
            }
        }
        e.flush_changes();
        Ok(())
    }
}

/// A live server-side cursor. While this exists the session is mid-stream
/// for its message id; pull with [`next`], or [`abandon`] to cancel.
///
/// [`next`]: SearchStream::next
/// [`abandon`]: SearchStream::abandon
pub struct SearchStream<'a> {
    client: &'a mut LdapClient,
    msgid: i32,
    done: bool,
}

impl SearchStream<'_> {
    /// The next entry, or `None` once the server reports the search done. A
    /// non-success result code surfaces as the terminal error.
    pub async fn next(&mut self) -> Result<Option<Entry>, LdapError> {
        if self.done {
            return Ok(None);
        }
        let conn = match self.client.conn.as_mut() {
            Some(c) => c,
            None => {
                self.done = true;
                return Err(LdapError::ServerDown("connection lost".to_string()));
            }
        };
        match conn.recv_expect(self.msgid).await {
            Ok(LdapOp::SearchResultEntry(lsre)) => Ok(Some(Entry::from(lsre))),
            Ok(LdapOp::SearchResultReference(r)) => Ok(Some(Entry::from_referral(r.uris))),
            Ok(LdapOp::SearchResultDone(res)) => {
                self.done = true;
                if res.code == LdapResultCode::Success {
                    Ok(None)
                } else {
                    Err(LdapError::Failure {
                        code: res.code,
                        message: res.message,
                        matched_dn: res.matcheddn,
                    })
                }
            }
            Ok(other) => {
                self.done = true;
                Err(LdapError::Decoding(format!(
                    "unexpected pdu during search {other:?}"
                )))
            }
            Err(e) => {
                // A cursor cannot resume across a reconnect; the caller
                // restarts the search if it still wants the results.
                self.done = true;
                self.client.conn = None;
                Err(e)
            }
        }
    }

    /// Cancel the search: sends an abandon for the saved message id and
    /// discards whatever the server has in flight. The session stays usable.
    pub async fn abandon(&mut self) -> Result<(), LdapError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(conn) = self.client.conn.as_mut() {
            conn.send_op(LdapOp::AbandonRequest(self.msgid)).await?;
            debug!(msgid = self.msgid, "search abandoned");
        }
        Ok(())
    }
}
