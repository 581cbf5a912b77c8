//! A scripted mock LDAP server for driving the client end to end. Each test
//! supplies a behaviour closure deciding, per connection and per request,
//! whether to reply, stay silent, or drop the link.

// Every test binary compiles its own copy and uses a different slice of it.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use ldap3_proto::proto::*;
use ldap3_proto::LdapCodec;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub enum MockAction {
    /// Send these ops back, each stamped with the request's message id.
    Reply(Vec<LdapOp>),
    /// Close the connection immediately.
    DropConn,
    /// Say nothing (abandon, unbind).
    Ignore,
}

pub type Behavior = Arc<dyn Fn(usize, &LdapMsg) -> MockAction + Send + Sync>;

pub struct MockServer {
    pub addr: SocketAddr,
    pub conn_count: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn connections(&self) -> usize {
        self.conn_count.load(Ordering::SeqCst)
    }
}

pub async fn spawn_mock(behavior: Behavior) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("mock listener must bind");
    let addr = listener.local_addr().expect("mock listener has an addr");
    let conn_count = Arc::new(AtomicUsize::new(0));

    let cc = conn_count.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => break,
            };
            let idx = cc.fetch_add(1, Ordering::SeqCst);
            let behavior = behavior.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, LdapCodec::default());
                while let Some(Ok(msg)) = framed.next().await {
                    match behavior(idx, &msg) {
                        MockAction::Reply(ops) => {
                            for op in ops {
                                let reply = LdapMsg {
                                    msgid: msg.msgid,
                                    op,
                                    ctrl: vec![],
                                };
                                if framed.send(reply).await.is_err() {
                                    return;
                                }
                            }
                        }
                        MockAction::DropConn => return,
                        MockAction::Ignore => {}
                    }
                }
            });
        }
    });

    MockServer { addr, conn_count }
}

/// An address on loopback with nothing listening behind it.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("probe listener must bind");
    let addr = listener.local_addr().expect("probe listener has an addr");
    drop(listener);
    addr
}

pub fn success_result() -> LdapResult {
    LdapResult {
        code: LdapResultCode::Success,
        matcheddn: String::new(),
        message: String::new(),
        referral: Vec::new(),
    }
}

pub fn bind_success() -> LdapOp {
    LdapOp::BindResponse(LdapBindResponse {
        res: success_result(),
        saslcreds: None,
    })
}

pub fn bind_refused() -> LdapOp {
    LdapOp::BindResponse(LdapBindResponse {
        res: LdapResult {
            code: LdapResultCode::InvalidCredentials,
            matcheddn: String::new(),
            message: "wrong password".to_string(),
            referral: Vec::new(),
        },
        saslcreds: None,
    })
}

pub fn result_entry(dn: &str, attrs: &[(&str, &[&str])]) -> LdapOp {
    LdapOp::SearchResultEntry(LdapSearchResultEntry {
        dn: dn.to_string(),
        attributes: attrs
            .iter()
            .map(|(name, vals)| LdapPartialAttribute {
                atype: name.to_string(),
                vals: vals.iter().map(|v| v.as_bytes().to_vec()).collect(),
            })
            .collect(),
    })
}

pub fn search_done() -> LdapOp {
    LdapOp::SearchResultDone(success_result())
}
