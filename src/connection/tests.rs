use super::*;
use crate::net::SessionError;
use crate::protocol::pairing::tlv::errors;
use crate::protocol::pairing::{Permissions, TlvDecoder, TlvType};
use crate::testing::{MockController, TEST_SETUP_CODE, test_accessory};

async fn verified_connection() -> (HapConnection, MockController, crate::net::SecureSession) {
    let accessory = test_accessory().unwrap();
    let mut controller = MockController::new();

    let mut setup_conn = HapConnection::new(accessory.clone());
    controller
        .pair(&mut setup_conn, TEST_SETUP_CODE)
        .await
        .unwrap();

    let mut connection = HapConnection::new(accessory);
    let session = controller.verify(&mut connection).await.unwrap();
    (connection, controller, session)
}

fn error_code(body: &[u8]) -> Option<u8> {
    TlvDecoder::decode(body).unwrap().get_error()
}

#[test]
fn test_endpoint_from_path() {
    assert_eq!(Endpoint::from_path("/pair-setup").unwrap(), Endpoint::PairSetup);
    assert_eq!(
        "/pair-verify".parse::<Endpoint>().unwrap(),
        Endpoint::PairVerify
    );
    assert_eq!(Endpoint::Pairings.path(), "/pairings");
    assert!(matches!(
        Endpoint::from_path("/accessories"),
        Err(ConnectionError::UnknownEndpoint(path)) if path == "/accessories"
    ));
}

#[test]
fn test_state_helpers() {
    assert!(ConnectionState::Encrypted.is_encrypted());
    assert!(!ConnectionState::Plain.is_closed());
    assert!(ConnectionState::Closed(DisconnectReason::Requested).is_closed());
}

#[tokio::test]
async fn test_new_connection_is_plain() {
    let mut connection = HapConnection::new(test_accessory().unwrap());
    assert_eq!(connection.state(), ConnectionState::Plain);
    assert!(!connection.is_encrypted());
    assert!(connection.controller().is_none());
    assert!(matches!(
        connection.encrypt(b"data"),
        Err(ConnectionError::NotEncrypted)
    ));
    assert!(matches!(
        connection.decrypt(b"data"),
        Err(ConnectionError::NotEncrypted)
    ));
}

#[tokio::test]
async fn test_verify_installs_session() {
    let (connection, controller, _session) = verified_connection().await;

    assert_eq!(connection.state(), ConnectionState::Encrypted);
    assert!(connection.is_encrypted());
    assert_eq!(
        connection.controller().unwrap().controller_id,
        controller.pairing_id()
    );
}

#[tokio::test]
async fn test_reverify_on_encrypted_connection_rejected() {
    let (mut connection, mut controller, mut session) = verified_connection().await;

    let m1 = controller.verify_m1();
    let reply = MockController::request(&mut session, &mut connection, Endpoint::PairVerify, &m1)
        .await
        .unwrap();

    let tlv = TlvDecoder::decode(&reply).unwrap();
    assert_eq!(tlv.get_state().unwrap(), 2);
    assert_eq!(tlv.get_error(), Some(errors::UNKNOWN));
    assert_eq!(connection.state(), ConnectionState::Encrypted);
}

#[tokio::test]
async fn test_pairings_requires_verified_admin() {
    let mut connection = HapConnection::new(test_accessory().unwrap());
    let reply = connection
        .handle(Endpoint::Pairings, &MockController::list_pairings_request())
        .await
        .unwrap();

    assert!(!reply.encrypt);
    assert_eq!(error_code(&reply.body), Some(errors::AUTHENTICATION));
}

#[tokio::test]
async fn test_list_over_session() {
    let (mut connection, controller, mut session) = verified_connection().await;

    let reply = MockController::request(
        &mut session,
        &mut connection,
        Endpoint::Pairings,
        &MockController::list_pairings_request(),
    )
    .await
    .unwrap();

    let records = controller.parse_list_response(&reply).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].controller_id, controller.pairing_id());
    assert_eq!(records[0].public_key, controller.public_key());
    assert_eq!(records[0].permissions, Permissions::Admin);
}

#[tokio::test]
async fn test_removing_own_pairing_closes_connection() {
    let (mut connection, controller, mut session) = verified_connection().await;

    let request = MockController::remove_pairing_request(controller.pairing_id());
    let wire = session.encrypt(&request).unwrap();
    let plaintext = connection.decrypt(&wire).unwrap();
    let reply = connection
        .handle(Endpoint::Pairings, &plaintext)
        .await
        .unwrap();

    assert!(reply.close_after);
    assert!(reply.encrypt);
    assert_eq!(
        connection.state(),
        ConnectionState::Closed(DisconnectReason::PairingRemoved)
    );

    // The final reply still goes out through the session.
    let wire = connection.encrypt(&reply.body).unwrap();
    session.feed(&wire);
    let body = session.decrypt_all().unwrap();
    assert_eq!(TlvDecoder::decode(&body).unwrap().get_state().unwrap(), 2);

    assert!(matches!(
        connection.handle(Endpoint::Pairings, &request).await,
        Err(ConnectionError::Closed(DisconnectReason::PairingRemoved))
    ));
}

#[tokio::test]
async fn test_removing_other_pairing_keeps_connection() {
    let (mut connection, _controller, mut session) = verified_connection().await;
    let other = MockController::new();

    let add = MockController::add_pairing_request(
        other.pairing_id(),
        &other.public_key(),
        Permissions::User,
    );
    MockController::request(&mut session, &mut connection, Endpoint::Pairings, &add)
        .await
        .unwrap();

    let remove = MockController::remove_pairing_request(other.pairing_id());
    let reply = MockController::request(&mut session, &mut connection, Endpoint::Pairings, &remove)
        .await
        .unwrap();

    assert_eq!(error_code(&reply), None);
    assert_eq!(connection.state(), ConnectionState::Encrypted);
}

#[tokio::test]
async fn test_tampered_frame_closes_connection() {
    let (mut connection, _controller, mut session) = verified_connection().await;

    let mut wire = session.encrypt(b"hello").unwrap();
    let last = wire.len() - 1;
    wire[last] ^= 0x01;

    assert!(matches!(
        connection.decrypt(&wire),
        Err(ConnectionError::Session(SessionError::DecryptionFailed { counter: 0 }))
    ));
    assert_eq!(
        connection.state(),
        ConnectionState::Closed(DisconnectReason::SessionFailure)
    );
    assert!(matches!(
        connection.decrypt(&[]),
        Err(ConnectionError::Closed(DisconnectReason::SessionFailure))
    ));
}

#[tokio::test]
async fn test_close_drops_session() {
    let (mut connection, _controller, _session) = verified_connection().await;

    connection.close();
    assert!(connection.is_closed());
    assert!(!connection.is_encrypted());
    assert!(matches!(
        connection.handle(Endpoint::PairSetup, &[]).await,
        Err(ConnectionError::Closed(DisconnectReason::Requested))
    ));
}

#[tokio::test]
async fn test_second_setup_busy_until_first_connection_dropped() {
    let accessory = test_accessory().unwrap();
    let mut first_controller = MockController::new();
    let mut second_controller = MockController::new();

    let mut first = HapConnection::new(accessory.clone());
    let m2 = first
        .handle(Endpoint::PairSetup, &first_controller.setup_m1())
        .await
        .unwrap();
    assert_eq!(error_code(&m2.body), None);

    let mut second = HapConnection::new(accessory.clone());
    let busy = second
        .handle(Endpoint::PairSetup, &second_controller.setup_m1())
        .await
        .unwrap();
    assert_eq!(error_code(&busy.body), Some(errors::BUSY));

    drop(first);
    assert!(!accessory.setup_in_progress());

    let m2 = second
        .handle(Endpoint::PairSetup, &second_controller.setup_m1())
        .await
        .unwrap();
    let tlv = TlvDecoder::decode(&m2.body).unwrap();
    assert_eq!(tlv.get_state().unwrap(), 2);
    assert_eq!(tlv.get(TlvType::Salt).map(<[u8]>::len), Some(16));
}
