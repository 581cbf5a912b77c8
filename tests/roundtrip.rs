//! Schema fetch and entry commit against the scripted server.

use std::sync::Arc;

use ldap3_proto::proto::{LdapFilter, LdapOp, LdapResult, LdapResultCode};
use ldap_toolkit::{
    ChangeType, Entry, LdapClientBuilder, LdapError, SearchOptions,
};

mod common;
use crate::common::{bind_success, result_entry, search_done, spawn_mock, MockAction};

const UID_DEF: &str = "( 0.9.2342.19200300.100.1.1 NAME ( 'uid' 'userID' ) SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )";
const CN_DEF: &str = "( 2.5.4.3 NAME 'cn' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )";
const TOP_DEF: &str = "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )";

#[tokio::test]
async fn test_schema_fetch_and_memoize() {
    let server = spawn_mock(Arc::new(|_conn, msg| match &msg.op {
        LdapOp::BindRequest(_) => MockAction::Reply(vec![bind_success()]),
        LdapOp::SearchRequest(sr) if sr.base.is_empty() => MockAction::Reply(vec![
            result_entry("", &[("subschemaSubentry", &["cn=subschema"])]),
            search_done(),
        ]),
        LdapOp::SearchRequest(sr) if sr.base == "cn=subschema" => MockAction::Reply(vec![
            result_entry(
                "cn=subschema",
                &[
                    ("attributeTypes", &[UID_DEF, CN_DEF]),
                    ("objectClasses", &[TOP_DEF]),
                ],
            ),
            search_done(),
        ]),
        _ => MockAction::Ignore,
    }))
    .await;

    let mut client = LdapClientBuilder::new(&format!("ldap://{}", server.addr))
        .connect_timeout(5)
        .build()
        .expect("loopback url must resolve");
    client.bind("", "").await.expect("bind must work");

    let schema = client.schema().await.expect("schema must fetch");
    assert_eq!(schema.attr_count(), 2);
    assert_eq!(schema.class_count(), 1);
    // Alias identity came through the wire.
    assert!(schema.equate_attrs("uid", "userID"));

    // Memoized for the life of the manager.
    let again = client.schema().await.expect("schema is cached");
    assert!(Arc::ptr_eq(&schema, &again));
}

#[tokio::test]
async fn test_update_entry_modify_flushes_on_success() {
    let server = spawn_mock(Arc::new(|_conn, msg| match &msg.op {
        LdapOp::BindRequest(_) => MockAction::Reply(vec![bind_success()]),
        LdapOp::SearchRequest(_) => MockAction::Reply(vec![
            result_entry("cn=a,dc=x", &[("cn", &["a"])]),
            search_done(),
        ]),
        LdapOp::ModifyRequest(mr) => {
            assert_eq!(mr.dn, "cn=a,dc=x");
            assert_eq!(mr.changes.len(), 2);
            MockAction::Reply(vec![LdapOp::ModifyResponse(common::success_result())])
        }
        _ => MockAction::Ignore,
    }))
    .await;

    let mut client = LdapClientBuilder::new(&format!("ldap://{}", server.addr))
        .connect_timeout(5)
        .build()
        .expect("loopback url must resolve");
    client.bind("", "").await.expect("bind must work");

    let mut e = Entry::with_dn("cn=a,dc=x");
    e.set_changetype(ChangeType::Modify);
    e.add("mail", vec![b"a@x".to_vec()]);
    e.replace("cn", vec![b"A".to_vec()]);
    assert_eq!(e.changes().len(), 2);

    client
        .update_entry(&mut e)
        .await
        .expect("update must commit");
    assert!(e.changes().is_empty());
}

#[tokio::test]
async fn test_update_entry_rejection_keeps_change_log() {
    let server = spawn_mock(Arc::new(|_conn, msg| match &msg.op {
        LdapOp::BindRequest(_) => MockAction::Reply(vec![bind_success()]),
        LdapOp::SearchRequest(_) => MockAction::Reply(vec![
            result_entry("cn=a,dc=x", &[("cn", &["a"])]),
            search_done(),
        ]),
        LdapOp::ModifyRequest(_) => MockAction::Reply(vec![LdapOp::ModifyResponse(LdapResult {
            code: LdapResultCode::UnwillingToPerform,
            matcheddn: String::new(),
            message: "no".to_string(),
            referral: Vec::new(),
        })]),
        _ => MockAction::Ignore,
    }))
    .await;

    let mut client = LdapClientBuilder::new(&format!("ldap://{}", server.addr))
        .connect_timeout(5)
        .build()
        .expect("loopback url must resolve");
    client.bind("", "").await.expect("bind must work");

    let mut e = Entry::with_dn("cn=a,dc=x");
    e.set_changetype(ChangeType::Modify);
    e.replace("cn", vec![b"A".to_vec()]);

    match client.update_entry(&mut e).await {
        Err(LdapError::Failure { code, .. }) => {
            assert_eq!(code, LdapResultCode::UnwillingToPerform)
        }
        other => panic!("expected UnwillingToPerform, got {other:?}"),
    }
    // The caller can inspect, correct and retry.
    assert_eq!(e.changes().len(), 1);
}

#[tokio::test]
async fn test_update_entry_add_and_delete_paths() {
    let server = spawn_mock(Arc::new(|_conn, msg| match &msg.op {
        LdapOp::BindRequest(_) => MockAction::Reply(vec![bind_success()]),
        LdapOp::AddRequest(ar) => {
            assert_eq!(ar.dn, "cn=new,dc=x");
            assert!(ar.attributes.iter().any(|a| a.atype == "cn"));
            MockAction::Reply(vec![LdapOp::AddResponse(common::success_result())])
        }
        LdapOp::DelRequest(dn) => {
            assert_eq!(dn, "cn=old,dc=x");
            MockAction::Reply(vec![LdapOp::DelResponse(common::success_result())])
        }
        _ => MockAction::Ignore,
    }))
    .await;

    let mut client = LdapClientBuilder::new(&format!("ldap://{}", server.addr))
        .connect_timeout(5)
        .build()
        .expect("loopback url must resolve");
    client.bind("", "").await.expect("bind must work");

    let mut fresh = Entry::with_dn("cn=new,dc=x");
    fresh.add("objectClass", vec![b"person".to_vec()]);
    fresh.add("cn", vec![b"new".to_vec()]);
    client
        .update_entry(&mut fresh)
        .await
        .expect("add must commit");
    assert!(fresh.changes().is_empty());

    let mut doomed = Entry::with_dn("cn=old,dc=x");
    doomed.set_changetype(ChangeType::Delete);
    client
        .update_entry(&mut doomed)
        .await
        .expect("delete must commit");
}

#[tokio::test]
async fn test_search_folds_referrals_as_entries() {
    let server = spawn_mock(Arc::new(|_conn, msg| match &msg.op {
        LdapOp::BindRequest(_) => MockAction::Reply(vec![bind_success()]),
        LdapOp::SearchRequest(_) => MockAction::Reply(vec![
            result_entry("cn=a,dc=x", &[("cn", &["a"])]),
            LdapOp::SearchResultReference(ldap3_proto::proto::LdapSearchResultReference {
                uris: vec!["ldap://other.example/dc=x".to_string()],
            }),
            search_done(),
        ]),
        _ => MockAction::Ignore,
    }))
    .await;

    let mut client = LdapClientBuilder::new(&format!("ldap://{}", server.addr))
        .connect_timeout(5)
        .build()
        .expect("loopback url must resolve");
    client.bind("", "").await.expect("bind must work");

    let entries = client
        .search(&SearchOptions::new(LdapFilter::Present(
            "objectClass".to_string(),
        )))
        .await
        .expect("search must succeed");

    assert_eq!(entries.len(), 2);
    assert!(!entries[0].is_referral());
    assert!(entries[1].is_referral());
    assert!(entries[1]
        .get_value("ref")
        .expect("ref attr")
        .contains_str("ldap://other.example/dc=x"));
}
