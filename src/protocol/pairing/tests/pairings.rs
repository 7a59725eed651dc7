use super::paired_controller;
use crate::config::AccessoryConfig;
use crate::protocol::pairing::pairings::{self, PairingsRequest, parse_list_response};
use crate::protocol::pairing::tlv::errors;
use crate::protocol::pairing::{PairingError, Permissions, TlvDecoder, TlvEncoder, TlvType};
use crate::testing::{MockController, test_accessory, test_accessory_with};

fn error_code(body: &[u8]) -> Option<u8> {
    let tlv = TlvDecoder::decode(body).unwrap();
    assert_eq!(tlv.get_state().unwrap(), 2);
    tlv.get_error()
}

#[test]
fn test_parse_requests() {
    let add = MockController::add_pairing_request("C1", &[7; 32], Permissions::User);
    assert_eq!(
        PairingsRequest::parse(&add).unwrap(),
        PairingsRequest::Add {
            identifier: "C1".to_string(),
            public_key: [7; 32],
            permissions: Permissions::User,
        }
    );

    assert_eq!(
        PairingsRequest::parse(&MockController::remove_pairing_request("C1")).unwrap(),
        PairingsRequest::Remove {
            identifier: "C1".to_string()
        }
    );
    assert_eq!(
        PairingsRequest::parse(&MockController::list_pairings_request()).unwrap(),
        PairingsRequest::List
    );

    let bad_permissions = TlvEncoder::new()
        .add_state(1)
        .add_method(3)
        .add(TlvType::Identifier, b"C1")
        .add(TlvType::PublicKey, &[7; 32])
        .add_byte(TlvType::Permissions, 9)
        .build();
    assert!(matches!(
        PairingsRequest::parse(&bad_permissions),
        Err(PairingError::Tlv(_))
    ));

    let wrong_state = TlvEncoder::new().add_state(3).add_method(5).build();
    assert!(matches!(
        PairingsRequest::parse(&wrong_state),
        Err(PairingError::UnexpectedState {
            expected: 1,
            actual: 3
        })
    ));

    let unknown_method = TlvEncoder::new().add_state(1).add_method(9).build();
    assert!(matches!(
        PairingsRequest::parse(&unknown_method),
        Err(PairingError::UnsupportedMethod(9))
    ));
}

#[tokio::test]
async fn test_requires_admin() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;
    let user = MockController::new();

    let add = MockController::add_pairing_request(
        user.pairing_id(),
        &user.public_key(),
        Permissions::User,
    );
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;
    assert_eq!(error_code(&reply.body), None);

    let list = MockController::list_pairings_request();
    let reply = pairings::handle(&accessory, Some(user.pairing_id()), &list).await;
    assert_eq!(error_code(&reply.body), Some(errors::AUTHENTICATION));

    let reply = pairings::handle(&accessory, None, &list).await;
    assert_eq!(error_code(&reply.body), Some(errors::AUTHENTICATION));
}

#[tokio::test]
async fn test_add_and_list() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;
    let other = MockController::new();

    let add = MockController::add_pairing_request(
        other.pairing_id(),
        &other.public_key(),
        Permissions::User,
    );
    pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;

    let reply = pairings::handle(
        &accessory,
        Some(admin.pairing_id()),
        &MockController::list_pairings_request(),
    )
    .await;
    let records = parse_list_response(accessory.pairing_id(), &reply.body).unwrap();

    assert_eq!(records, accessory.store().list().await.unwrap());
    assert_eq!(records.len(), 2);
    let listed = records
        .iter()
        .find(|r| r.controller_id == other.pairing_id())
        .unwrap();
    assert_eq!(listed.public_key, other.public_key());
    assert_eq!(listed.permissions, Permissions::User);
}

#[tokio::test]
async fn test_add_existing_updates_permissions() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;
    let other = MockController::new();

    for permissions in [Permissions::User, Permissions::Admin] {
        let add =
            MockController::add_pairing_request(other.pairing_id(), &other.public_key(), permissions);
        let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;
        assert_eq!(error_code(&reply.body), None);
    }

    let record = accessory
        .store()
        .lookup(other.pairing_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.permissions, Permissions::Admin);
}

#[tokio::test]
async fn test_add_conflicting_key() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;

    let add = MockController::add_pairing_request(admin.pairing_id(), &[1; 32], Permissions::Admin);
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;

    assert_eq!(error_code(&reply.body), Some(errors::UNKNOWN));
    let record = accessory
        .store()
        .lookup(admin.pairing_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.public_key, admin.public_key());
}

#[tokio::test]
async fn test_add_over_capacity() {
    let accessory = test_accessory_with(AccessoryConfig::new("Test").with_max_pairings(1)).unwrap();
    let admin = paired_controller(&accessory).await;

    let add = MockController::add_pairing_request("C2", &[3; 32], Permissions::User);
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;

    assert_eq!(error_code(&reply.body), Some(errors::MAX_PEERS));
}

#[tokio::test]
async fn test_remove_missing_is_success() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;

    let remove = MockController::remove_pairing_request("nobody");
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &remove).await;

    assert_eq!(error_code(&reply.body), None);
    assert!(reply.removed.is_empty());
    assert!(accessory.is_paired().await.unwrap());
}

#[tokio::test]
async fn test_remove_last_admin_clears_all() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;

    let add = MockController::add_pairing_request("user", &[5; 32], Permissions::User);
    pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;

    let remove = MockController::remove_pairing_request(admin.pairing_id());
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &remove).await;

    assert_eq!(error_code(&reply.body), None);
    assert_eq!(
        reply.removed,
        vec![admin.pairing_id().to_string(), "user".to_string()]
    );
    assert!(!accessory.is_paired().await.unwrap());
}

#[tokio::test]
async fn test_remove_admin_with_other_admin_left() {
    let accessory = test_accessory().unwrap();
    let admin = paired_controller(&accessory).await;

    let add = MockController::add_pairing_request("second-admin", &[5; 32], Permissions::Admin);
    pairings::handle(&accessory, Some(admin.pairing_id()), &add).await;

    let remove = MockController::remove_pairing_request(admin.pairing_id());
    let reply = pairings::handle(&accessory, Some(admin.pairing_id()), &remove).await;

    assert_eq!(reply.removed, vec![admin.pairing_id().to_string()]);
    let remaining = accessory.store().list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].controller_id, "second-admin");
}

#[test]
fn test_parse_list_response_errors() {
    let empty = TlvEncoder::new().add_state(2).build();
    assert!(parse_list_response("A", &empty).unwrap().is_empty());

    let refused = TlvEncoder::new()
        .add_state(2)
        .add_error(errors::AUTHENTICATION)
        .build();
    assert!(matches!(
        parse_list_response("A", &refused),
        Err(PairingError::PeerError {
            code: errors::AUTHENTICATION
        })
    ));
}
