//! End-to-end pairing over the connection router
//!
//! A simulated controller runs Pair-Setup, Pair-Verify and pairing management
//! against an in-memory accessory, exchanging only wire bytes.

use std::sync::Arc;

use hap_pairing::protocol::pairing::tlv::errors;
use hap_pairing::protocol::pairing::{Permissions, TlvDecoder};
use hap_pairing::testing::{MockController, TEST_SETUP_CODE, test_accessory};
use hap_pairing::{
    ConnectionError, ConnectionState, Endpoint, HapConnection, HapError, LongTermIdentity,
    PairingError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_pair_then_verify_then_manage() {
    init_tracing();
    let accessory = test_accessory().unwrap();
    let mut admin = MockController::new();

    // Pair-Setup on its own connection
    let mut connection = HapConnection::new(accessory.clone());
    admin.pair(&mut connection, TEST_SETUP_CODE).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Plain);
    drop(connection);

    // Pair-Verify on a fresh connection switches it to the secure session
    let mut connection = HapConnection::new(accessory.clone());
    let mut session = admin.verify(&mut connection).await.unwrap();
    assert!(connection.is_encrypted());

    // Admin adds a second controller
    let mut user = MockController::new();
    let add = MockController::add_pairing_request(
        user.pairing_id(),
        &user.public_key(),
        Permissions::User,
    );
    let reply = MockController::request(&mut session, &mut connection, Endpoint::Pairings, &add)
        .await
        .unwrap();
    assert_eq!(TlvDecoder::decode(&reply).unwrap().get_error(), None);

    let list = MockController::list_pairings_request();
    let reply = MockController::request(&mut session, &mut connection, Endpoint::Pairings, &list)
        .await
        .unwrap();
    let records = admin.parse_list_response(&reply).unwrap();
    assert_eq!(records.len(), 2);

    // The added controller can verify using the accessory key the admin learned
    user.trust_accessory(
        admin.accessory_id().unwrap(),
        admin.accessory_public_key().unwrap().clone(),
    );
    let mut user_connection = HapConnection::new(accessory.clone());
    let mut user_session = user.verify(&mut user_connection).await.unwrap();

    // A user controller may not manage pairings
    let reply =
        MockController::request(&mut user_session, &mut user_connection, Endpoint::Pairings, &list)
            .await
            .unwrap();
    assert_eq!(
        TlvDecoder::decode(&reply).unwrap().get_error(),
        Some(errors::AUTHENTICATION)
    );
}

#[tokio::test]
async fn test_large_payload_over_session() {
    init_tracing();
    let accessory = test_accessory().unwrap();
    let mut controller = MockController::new();
    controller
        .pair(&mut HapConnection::new(accessory.clone()), TEST_SETUP_CODE)
        .await
        .unwrap();

    let mut connection = HapConnection::new(accessory);
    let mut session = controller.verify(&mut connection).await.unwrap();

    let body: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    let wire = connection.encrypt(&body).unwrap();
    assert_eq!(wire.len(), body.len() + 5 * 18);

    // Deliver in uneven pieces
    let mut received = Vec::new();
    for piece in wire.chunks(700) {
        session.feed(piece);
        received.extend(session.decrypt_all().unwrap());
    }
    assert_eq!(received, body);
}

#[tokio::test]
async fn test_wrong_code_then_right_code() {
    init_tracing();
    let accessory = test_accessory().unwrap();
    let mut controller = MockController::new();
    let mut connection = HapConnection::new(accessory.clone());

    let err = controller
        .pair(&mut connection, "010-20-304")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HapError::Pairing(PairingError::PeerError {
            code: errors::AUTHENTICATION
        })
    ));
    assert_eq!(accessory.failed_setup_attempts(), 1);

    controller.pair(&mut connection, TEST_SETUP_CODE).await.unwrap();
    assert!(accessory.is_paired().await.unwrap());
    assert_eq!(accessory.failed_setup_attempts(), 0);
}

#[tokio::test]
async fn test_unpaired_controller_cannot_verify() {
    init_tracing();
    let accessory = test_accessory().unwrap();
    let mut controller = MockController::new();
    controller.trust_accessory(accessory.pairing_id(), accessory.identity().public_key());

    let mut connection = HapConnection::new(accessory);
    let err = controller.verify(&mut connection).await.unwrap_err();

    assert!(matches!(
        err,
        HapError::Pairing(PairingError::PeerError {
            code: errors::AUTHENTICATION
        })
    ));
    assert!(!connection.is_encrypted());
}

#[tokio::test]
async fn test_concurrent_verifies() {
    init_tracing();
    let accessory = test_accessory().unwrap();
    let identity = LongTermIdentity::generate();
    let stored = identity.to_stored();

    let mut controller = MockController::with_identity(identity);
    controller
        .pair(&mut HapConnection::new(accessory.clone()), TEST_SETUP_CODE)
        .await
        .unwrap();
    let accessory_id = controller.accessory_id().unwrap().to_string();
    let accessory_ltpk = controller.accessory_public_key().unwrap().clone();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let accessory = Arc::clone(&accessory);
        let accessory_id = accessory_id.clone();
        let accessory_ltpk = accessory_ltpk.clone();
        let stored = stored.clone();
        handles.push(tokio::spawn(async move {
            // Same long-term keys, separate handshake state per connection
            let mut controller =
                MockController::with_identity(LongTermIdentity::from_stored(&stored).unwrap());
            controller.trust_accessory(accessory_id, accessory_ltpk);

            let mut connection = HapConnection::new(accessory);
            let mut session = controller.verify(&mut connection).await.unwrap();
            let reply = MockController::request(
                &mut session,
                &mut connection,
                Endpoint::Pairings,
                &MockController::list_pairings_request(),
            )
            .await
            .unwrap();
            controller.parse_list_response(&reply).unwrap().len()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_unknown_path() {
    assert!(matches!(
        Endpoint::from_path("/characteristics"),
        Err(ConnectionError::UnknownEndpoint(_))
    ));
}
