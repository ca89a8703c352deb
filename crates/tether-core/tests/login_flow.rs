mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{expose, orchestrator, settings, services, single, LoginClient, MockInstalls};
use secrecy::SecretString;
use tether_core::codec::Node;
use tether_core::records::InstallationRecord;
use tether_core::shape::{decode_field, number, text, ToTree};
use tether_core::{
    decode, Envelope, HandshakeError, Orchestrator, PhaseRequest, SealedSlots, Trio,
};
use tether_crypto::{hash_session, verify_session, SecretEnvelope};
use tether_relay::{EnvMailbox, Installed, MemoryMailbox, MemorySlots};

const PEPPER: &str = "root pepper";

fn dev_store() -> Arc<MemorySlots> {
    Arc::new(MemorySlots::with([
        ("SERVERS", "srv-1,srv-2"),
        ("CLIENTS", "client-a"),
        ("SECRETS", "hunter2"),
    ]))
}

fn received_trio(pages: &str, token: &SecretString) -> Trio {
    let env = decode(pages).unwrap();
    assert_eq!(env.command, "mail__user");
    let mail: SecretEnvelope = decode_field(&env.tree, "mail").unwrap();
    let plain = tether_crypto::open(&mail, expose(token).as_bytes()).unwrap();
    Trio::from_text(std::str::from_utf8(&plain).unwrap()).unwrap()
}

#[tokio::test]
async fn test_login_open_close_delivers_inbox() {
    let store = dev_store();
    let orch = orchestrator(
        false,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        store.clone(),
    );
    let client = LoginClient::start("operator");

    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    assert_eq!(decode(&open.for_next).unwrap().command, "token__server_final");
    assert_eq!(store.snapshot().get("STATE"), Some(&open.for_next));

    let (token, close_relay) = client.finish(&open.for_pages);
    let close = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: Some(open.for_next),
        })
        .await
        .unwrap();

    assert_eq!(
        received_trio(&close.for_pages, &token),
        Trio::new("srv-1,srv-2", "client-a", "hunter2")
    );

    let session = decode(&close.for_next).unwrap();
    assert_eq!(session.command, "mail__session");
    assert_eq!(text(&session.tree, "sid").unwrap(), "operator");
    assert_eq!(number(&session.tree, "reset").unwrap(), 0);
    assert!(verify_session(&text(&session.tree, "hash").unwrap(), expose(&token)));
    assert!(store.snapshot().get("STATE").is_none());
}

#[tokio::test]
async fn test_forged_proof_rejected_then_genuine_accepted_once() {
    let orch = orchestrator(
        false,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        dev_store(),
    );
    let client = LoginClient::start("operator");
    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    let (_, close_relay) = client.finish(&open.for_pages);

    let mut forged = decode(&close_relay).unwrap();
    if let Some(Node::Tree(result)) = forged.tree.get_mut("client_auth_result") {
        if let Some(Node::Bytes(au)) = result.get_mut("Au") {
            au[0] ^= 1;
        }
    }
    let err = orch
        .run(PhaseRequest::LoginClose {
            relay: forged.encode().unwrap(),
            continuation: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::PakeRejected(_)));

    orch.run(PhaseRequest::LoginClose {
        relay: close_relay.clone(),
        continuation: None,
    })
    .await
    .unwrap();

    let replay = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(replay, HandshakeError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_stale_continuation_rejected() {
    let orch = orchestrator(
        false,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        dev_store(),
    );
    let first = LoginClient::start("operator");
    let first_open = orch
        .run(PhaseRequest::LoginOpen {
            relay: first.open_relay.clone(),
        })
        .await
        .unwrap();

    let second = LoginClient::start("operator");
    let second_open = orch
        .run(PhaseRequest::LoginOpen {
            relay: second.open_relay.clone(),
        })
        .await
        .unwrap();
    let (_, close_relay) = second.finish(&second_open.for_pages);

    let err = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: Some(first_open.for_next),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_proof_for_other_session_rejected() {
    let orch = orchestrator(
        false,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        dev_store(),
    );
    let client = LoginClient::start("operator");
    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    let (_, close_relay) = client.finish(&open.for_pages);
    let mut env = decode(&close_relay).unwrap();
    env.tree.insert("sid".into(), "intruder".into());

    let err = orch
        .run(PhaseRequest::LoginClose {
            relay: env.encode().unwrap(),
            continuation: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolMismatch(_)));
}

#[tokio::test]
async fn test_login_open_rejects_wrong_command_and_shape() {
    let orch = orchestrator(
        false,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        dev_store(),
    );
    let client = LoginClient::start("operator");

    let wrong = client
        .open_relay
        .replacen("op:pake__client_auth_data#", "app__in#", 1);
    assert!(matches!(
        orch.run(PhaseRequest::LoginOpen { relay: wrong }).await,
        Err(HandshakeError::ProtocolMismatch(_))
    ));

    let mut env = decode(&client.open_relay).unwrap();
    if let Some(Node::Tree(data)) = env.tree.get_mut("client_auth_data") {
        data.remove("alpha");
    }
    assert!(matches!(
        orch.run(PhaseRequest::LoginOpen {
            relay: env.encode().unwrap()
        })
        .await,
        Err(HandshakeError::Shape(_))
    ));

    assert!(matches!(
        orch.run(PhaseRequest::LoginOpen {
            relay: "no delimiter".into()
        })
        .await,
        Err(HandshakeError::Format(_))
    ));
}

#[tokio::test]
async fn test_login_open_requires_pepper() {
    let orch = orchestrator(
        false,
        None,
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        dev_store(),
    );
    let client = LoginClient::start("operator");
    let err = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Config(_)));
}

#[tokio::test]
async fn test_reset_flag_set_when_session_matches_old_hash() {
    let previous = "previous session token";
    let mut run_settings = settings(false, Some(PEPPER));
    run_settings.session = Some(SecretString::new(previous.to_string()));
    run_settings.old_hash = Some(hash_session(previous).unwrap());

    let orch = Orchestrator::new(
        services(
            Arc::new(MemoryMailbox::new()),
            Arc::new(MemoryMailbox::new()),
            dev_store(),
            None,
            Arc::new(MockInstalls::new(0, "unused")),
        ),
        run_settings,
    );
    let client = LoginClient::start("operator");
    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    let (_, close_relay) = client.finish(&open.for_pages);
    let close = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: None,
        })
        .await
        .unwrap();

    let session = decode(&close.for_next).unwrap();
    assert_eq!(number(&session.tree, "reset").unwrap(), 1);
}

#[tokio::test]
async fn test_production_login_reads_sealed_state_and_mail_table() {
    let shared_hex = "5a".repeat(32);
    let store = Arc::new(MemorySlots::new());
    let slots = SealedSlots::new(store.clone(), SecretString::new(PEPPER.to_string()));

    let record = InstallationRecord {
        installed: Installed {
            id: 77,
            token: SecretString::new("ghs_owner".to_string()),
            permissions: BTreeMap::new(),
        },
        shared: SecretString::new(shared_hex.clone()),
        app: common::app(),
    };
    slots
        .write(
            "INSTALLATION",
            &Envelope::new("installation", record.to_tree()).encode().unwrap(),
        )
        .await
        .unwrap();

    let trio = Trio::new("prod-servers", "prod-clients", "prod-secrets");
    let data = tether_crypto::seal(
        trio.to_text().as_bytes(),
        &hex::decode(&shared_hex).unwrap(),
    )
    .unwrap();
    let mail_table = Envelope::new("mail__table", single("data", data.to_tree()))
        .encode()
        .unwrap();

    let orch = orchestrator(
        true,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(EnvMailbox::new("MAIL__TABLE", Some(mail_table))),
        store.clone(),
    );
    let client = LoginClient::start("operator");
    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    let raw_state = store.snapshot().remove("STATE").unwrap();
    assert!(raw_state.starts_with("sealed#"));

    let (token, close_relay) = client.finish(&open.for_pages);
    let close = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: Some(open.for_next),
        })
        .await
        .unwrap();
    assert_eq!(received_trio(&close.for_pages, &token), trio);
}

#[tokio::test]
async fn test_missing_inbox_yields_empty_trio() {
    let orch = orchestrator(
        true,
        Some(PEPPER),
        Arc::new(MemoryMailbox::new()),
        Arc::new(EnvMailbox::new("MAIL__TABLE", None)),
        Arc::new(MemorySlots::new()),
    );
    let client = LoginClient::start("operator");
    let open = orch
        .run(PhaseRequest::LoginOpen {
            relay: client.open_relay.clone(),
        })
        .await
        .unwrap();
    let (token, close_relay) = client.finish(&open.for_pages);
    let close = orch
        .run(PhaseRequest::LoginClose {
            relay: close_relay,
            continuation: None,
        })
        .await
        .unwrap();
    assert_eq!(received_trio(&close.for_pages, &token), Trio::default());
}
