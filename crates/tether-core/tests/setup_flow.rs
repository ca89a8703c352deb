mod common;

use std::sync::{Arc, Mutex};

use common::{services, settings, MANIFEST_CODE};
use secrecy::{ExposeSecret, SecretString};
use tether_core::pake::{ClientAuthData, ClientAuthResult, PakeServer};
use tether_core::records::Pasted;
use tether_core::shape::{decode_field, FromTree, ToTree};
use tether_core::{
    decode, Envelope, HandshakeError, Orchestrator, PhaseRequest, SimulatedPake, WorkflowPhase,
    PAKE_ITERATIONS,
};
use tether_crypto::SecretEnvelope;
use tether_relay::{Mailbox, MemoryMailbox, MemorySlots, SlotAccess, SlotStore};

const COUNTERPART_PEPPER: &[u8] = b"counterpart pepper";

/// Remembers every token a store was opened with.
struct RecordingAccess {
    store: Arc<MemorySlots>,
    tokens: Mutex<Vec<String>>,
}

impl SlotAccess for RecordingAccess {
    fn for_token(&self, token: &SecretString) -> tether_relay::Result<Arc<dyn SlotStore>> {
        self.tokens
            .lock()
            .unwrap()
            .push(token.expose_secret().to_string());
        Ok(self.store.clone())
    }
}

/// Counterpart's answer to SETUP PUB: its PAKE response plus the
/// manifest code sealed under the shared token.
fn counterpart_paste(pub_pages: &str, code: &[u8]) -> (String, tether_core::pake::ServerFinal) {
    let env = decode(pub_pages).unwrap();
    assert_eq!(env.command, "app__in");
    let data: ClientAuthData = decode_field(&env.tree, "client_auth_data").unwrap();
    assert_eq!(data.sid, "root");

    let (server, last) = SimulatedPake::new()
        .server_auth(COUNTERPART_PEPPER, &data, PAKE_ITERATIONS)
        .unwrap();
    let sealed = tether_crypto::seal(code, last.token.expose_secret().as_bytes()).unwrap();
    let pasted = Pasted {
        code: sealed,
        server,
    };
    let text = Envelope::new("app__code", pasted.to_tree()).encode().unwrap();
    (text, last)
}

#[tokio::test(start_paused = true)]
async fn test_setup_delivers_installation_token() {
    let mailbox = Arc::new(MemoryMailbox::new());
    let store = Arc::new(MemorySlots::new());
    let installs = Arc::new(common::MockInstalls::new(2, "ghs_installation_token"));
    let orch = Orchestrator::new(
        services(
            mailbox.clone(),
            Arc::new(MemoryMailbox::new()),
            store.clone(),
            None,
            installs.clone(),
        ),
        settings(false, None),
    );

    let pub_out = orch.run(PhaseRequest::SetupPub).await.unwrap();
    assert!(decode(&pub_out.for_next).unwrap().command == "step");

    let (paste, last) = counterpart_paste(&pub_out.for_pages, MANIFEST_CODE.as_bytes());
    mailbox.write(&paste).await.unwrap();

    let app_out = orch
        .run(PhaseRequest::SetupApp {
            continuation: pub_out.for_next,
        })
        .await
        .unwrap();
    let env = decode(&app_out.for_pages).unwrap();
    assert_eq!(env.command, "app__out");
    let result: ClientAuthResult = decode_field(&env.tree, "client_auth_result").unwrap();
    SimulatedPake::new().server_finish(&last, &result).unwrap();

    let token_out = orch
        .run(PhaseRequest::SetupToken {
            continuation: app_out.for_next,
        })
        .await
        .unwrap();
    assert!(token_out.for_next.is_empty());
    assert_eq!(installs.lookups(), 3);

    let env = decode(&token_out.for_pages).unwrap();
    assert_eq!(env.command, "app__auth");
    let sealed = SecretEnvelope::from_tree(&env.tree).unwrap();
    let token = tether_crypto::open(&sealed, last.token.expose_secret().as_bytes()).unwrap();
    assert_eq!(&token[..], b"ghs_installation_token");

    let record = store.snapshot().remove("INSTALLATION").unwrap();
    assert!(record.starts_with("installation#"));
}

#[tokio::test(start_paused = true)]
async fn test_setup_app_skips_stale_relay_content() {
    let orch_pub = common::orchestrator(
        false,
        None,
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let pub_out = orch_pub.run(PhaseRequest::SetupPub).await.unwrap();
    let (paste, _) = counterpart_paste(&pub_out.for_pages, MANIFEST_CODE.as_bytes());

    let mailbox = Arc::new(MemoryMailbox::scripted([
        "".to_string(),
        "not an envelope".to_string(),
        "app__in#client_auth_data={".to_string(),
        paste,
    ]));
    let orch = common::orchestrator(
        false,
        None,
        mailbox.clone(),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let out = orch
        .run(PhaseRequest::SetupApp {
            continuation: pub_out.for_next,
        })
        .await
        .unwrap();
    assert_eq!(decode(&out.for_pages).unwrap().command, "app__out");
    assert_eq!(mailbox.reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_setup_app_times_out_after_budget() {
    let mailbox = Arc::new(MemoryMailbox::with_text("app__code#"));
    let orch = common::orchestrator(
        false,
        None,
        mailbox.clone(),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let pub_out = orch.run(PhaseRequest::SetupPub).await.unwrap();

    let err = orch
        .run(PhaseRequest::SetupApp {
            continuation: pub_out.for_next,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Timeout { tries: 5, .. }));
    assert_eq!(mailbox.reads(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_setup_app_rejects_response_for_other_client() {
    let mailbox = Arc::new(MemoryMailbox::new());
    let orch = common::orchestrator(
        false,
        None,
        mailbox.clone(),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let ours = orch.run(PhaseRequest::SetupPub).await.unwrap();
    let theirs = orch.run(PhaseRequest::SetupPub).await.unwrap();
    let (paste, _) = counterpart_paste(&theirs.for_pages, MANIFEST_CODE.as_bytes());
    mailbox.write(&paste).await.unwrap();

    let err = orch
        .run(PhaseRequest::SetupApp {
            continuation: ours.for_next,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::PakeRejected(_)));
    assert_eq!(
        WorkflowPhase::SetupApp.failure_message(&err),
        WorkflowPhase::SetupApp.failure_message(&HandshakeError::Decrypt)
    );
}

#[tokio::test(start_paused = true)]
async fn test_setup_app_rejects_bad_continuation() {
    let orch = common::orchestrator(
        false,
        None,
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let pub_out = orch.run(PhaseRequest::SetupPub).await.unwrap();

    let mut env = decode(&pub_out.for_next).unwrap();
    env.tree.remove("mask");
    let missing = env.encode().unwrap();
    let err = orch
        .run(PhaseRequest::SetupApp {
            continuation: missing,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Shape(_)));
    assert_eq!(WorkflowPhase::SetupApp.failure_message(&err), "Can't create App.");

    let wrong = pub_out.for_next.replacen("step#", "app__in#", 1);
    let err = orch
        .run(PhaseRequest::SetupApp { continuation: wrong })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::ProtocolMismatch(_)));
}

#[tokio::test(start_paused = true)]
async fn test_setup_app_wrong_code_is_upstream_error() {
    let mailbox = Arc::new(MemoryMailbox::new());
    let orch = common::orchestrator(
        false,
        None,
        mailbox.clone(),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemorySlots::new()),
    );
    let pub_out = orch.run(PhaseRequest::SetupPub).await.unwrap();
    let (paste, _) = counterpart_paste(&pub_out.for_pages, b"some-other-code");
    mailbox.write(&paste).await.unwrap();

    let err = orch
        .run(PhaseRequest::SetupApp {
            continuation: pub_out.for_next,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Upstream(_)));
}

#[tokio::test(start_paused = true)]
async fn test_setup_token_needs_pepper_in_production() {
    let store = Arc::new(MemorySlots::new());
    let orch = common::orchestrator(
        true,
        None,
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        store.clone(),
    );
    let inputs = tether_core::records::TokenInputs {
        shared: secrecy::SecretString::new("ab".repeat(32)),
        app: common::app(),
    };
    let continuation = Envelope::new("step", inputs.to_tree()).encode().unwrap();

    let err = orch
        .run(PhaseRequest::SetupToken { continuation })
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Config(_)));
    assert!(store.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_setup_token_installation_sealed_in_production() {
    let store = Arc::new(MemorySlots::new());
    let orch = common::orchestrator(
        true,
        Some("root pepper"),
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        store.clone(),
    );
    let inputs = tether_core::records::TokenInputs {
        shared: secrecy::SecretString::new("cd".repeat(32)),
        app: common::app(),
    };
    let continuation = Envelope::new("step", inputs.to_tree()).encode().unwrap();

    orch.run(PhaseRequest::SetupToken { continuation })
        .await
        .unwrap();

    let raw = store.snapshot().remove("INSTALLATION").unwrap();
    assert!(raw.starts_with("sealed#"));
    assert!(!raw.contains("ghs_unused"));
}

#[tokio::test(start_paused = true)]
async fn test_setup_token_writes_record_with_minted_token() {
    let startup = Arc::new(MemorySlots::new());
    let access = Arc::new(RecordingAccess {
        store: Arc::new(MemorySlots::new()),
        tokens: Mutex::new(Vec::new()),
    });
    let mut wired = services(
        Arc::new(MemoryMailbox::new()),
        Arc::new(MemoryMailbox::new()),
        startup.clone(),
        Some("root pepper"),
        Arc::new(common::MockInstalls::new(0, "ghs_installation_token")),
    );
    wired.owner_slots = access.clone();
    let orch = Orchestrator::new(wired, settings(true, Some("root pepper")));

    let inputs = tether_core::records::TokenInputs {
        shared: SecretString::new("ef".repeat(32)),
        app: common::app(),
    };
    let continuation = Envelope::new("step", inputs.to_tree()).encode().unwrap();
    orch.run(PhaseRequest::SetupToken { continuation })
        .await
        .unwrap();

    assert_eq!(*access.tokens.lock().unwrap(), ["ghs_installation_token"]);
    assert!(startup.snapshot().is_empty());
    let raw = access.store.snapshot().remove("INSTALLATION").unwrap();
    assert!(raw.starts_with("sealed#"));
}
