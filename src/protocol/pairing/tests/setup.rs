use super::{CapturedLogs, paired_controller};
use crate::config::AccessoryConfig;
use crate::protocol::pairing::tlv::{errors, methods};
use crate::protocol::pairing::{
    PairSetup, PairSetupRequest, PairingError, Permissions, TlvDecoder, TlvEncoder, TlvType,
};
use crate::testing::{MockController, TEST_SETUP_CODE, test_accessory, test_accessory_with};

fn state_and_error(body: &[u8]) -> (u8, Option<u8>) {
    let tlv = TlvDecoder::decode(body).unwrap();
    (tlv.get_state().unwrap(), tlv.get_error())
}

#[test]
fn test_parse_requests() {
    let m1 = TlvEncoder::new().add_state(1).add_method(0).build();
    assert_eq!(
        PairSetupRequest::parse(&m1).unwrap(),
        PairSetupRequest::Start { method: 0 }
    );

    // Method defaults to plain Pair-Setup when absent
    let m1 = TlvEncoder::new().add_state(1).build();
    assert_eq!(
        PairSetupRequest::parse(&m1).unwrap(),
        PairSetupRequest::Start { method: 0 }
    );

    let m3 = TlvEncoder::new().add_state(3).add(TlvType::PublicKey, &[1; 384]).build();
    assert!(matches!(
        PairSetupRequest::parse(&m3),
        Err(PairingError::Tlv(_))
    ));

    let m2 = TlvEncoder::new().add_state(2).build();
    assert!(matches!(
        PairSetupRequest::parse(&m2),
        Err(PairingError::UnexpectedState { actual: 2, .. })
    ));
}

#[tokio::test]
async fn test_pair_setup_flow() {
    let accessory = test_accessory().unwrap();
    let controller = paired_controller(&accessory).await;

    let record = accessory
        .store()
        .lookup(controller.pairing_id())
        .await
        .unwrap()
        .expect("pairing persisted");
    assert_eq!(record.public_key, controller.public_key());
    assert_eq!(record.permissions, Permissions::Admin);
    assert_eq!(record.accessory_id, accessory.pairing_id());

    assert_eq!(controller.accessory_id(), Some(accessory.pairing_id()));
    assert_eq!(
        controller.accessory_public_key(),
        Some(&accessory.identity().public_key())
    );
    assert!(!accessory.setup_in_progress());
}

#[tokio::test]
async fn test_m2_contents() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let tlv = TlvDecoder::decode(&m2).unwrap();

    assert_eq!(tlv.get_state().unwrap(), 2);
    assert_eq!(tlv.get(TlvType::Salt).unwrap().len(), 16);
    assert_eq!(tlv.get(TlvType::PublicKey).unwrap().len(), 384);
    assert!(accessory.setup_in_progress());
}

#[tokio::test]
async fn test_wrong_setup_code() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, "999-88-777").unwrap();
    let m4 = setup.handle(&accessory, &m3).await;

    assert_eq!(state_and_error(&m4), (4, Some(errors::AUTHENTICATION)));
    assert_eq!(accessory.failed_setup_attempts(), 1);
    assert!(!accessory.setup_in_progress());
    assert!(!accessory.is_paired().await.unwrap());

    assert!(matches!(
        controller.setup_process_m4(&m4),
        Err(PairingError::PeerError {
            code: errors::AUTHENTICATION
        })
    ));
}

#[tokio::test]
async fn test_failure_log_names_stage() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, "999-88-777").unwrap();
    setup.handle(&accessory, &m3).await;

    let output = logs.contents();
    assert!(output.contains("Pair-Setup failed"), "{output}");
    assert!(output.contains("state=3"), "{output}");
    assert!(output.contains(accessory.pairing_id()), "{output}");
}

#[tokio::test]
async fn test_max_tries() {
    let config = AccessoryConfig::new("Test").with_max_setup_attempts(1);
    let accessory = test_accessory_with(config).unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, "999-88-777").unwrap();
    setup.handle(&accessory, &m3).await;

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    assert_eq!(state_and_error(&m2), (2, Some(errors::MAX_TRIES)));
}

#[tokio::test]
async fn test_success_resets_failed_attempts() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, "999-88-777").unwrap();
    setup.handle(&accessory, &m3).await;
    assert_eq!(accessory.failed_setup_attempts(), 1);

    paired_controller(&accessory).await;
    assert_eq!(accessory.failed_setup_attempts(), 0);
}

#[tokio::test]
async fn test_already_paired() {
    let accessory = test_accessory().unwrap();
    paired_controller(&accessory).await;

    let mut setup = PairSetup::new();
    let mut other = MockController::new();
    let m2 = setup.handle(&accessory, &other.setup_m1()).await;

    assert_eq!(state_and_error(&m2), (2, Some(errors::UNAVAILABLE)));
    assert!(!accessory.setup_in_progress());
}

#[tokio::test]
async fn test_busy_while_other_setup_holds_lease() {
    let accessory = test_accessory().unwrap();
    let mut first = PairSetup::new();
    let mut second = PairSetup::new();
    let mut controller = MockController::new();

    first.handle(&accessory, &controller.setup_m1()).await;
    let m2 = second.handle(&accessory, &controller.setup_m1()).await;
    assert_eq!(state_and_error(&m2), (2, Some(errors::BUSY)));

    drop(first);
    let m2 = second.handle(&accessory, &controller.setup_m1()).await;
    assert_eq!(state_and_error(&m2), (2, None));
}

#[tokio::test]
async fn test_restart_on_same_connection() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    setup.handle(&accessory, &controller.setup_m1()).await;
    // A second M1 replaces the attempt instead of reporting Busy
    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    assert_eq!(state_and_error(&m2), (2, None));

    let m3 = controller.setup_process_m2(&m2, TEST_SETUP_CODE).unwrap();
    let m4 = setup.handle(&accessory, &m3).await;
    assert_eq!(state_and_error(&m4), (4, None));
}

#[tokio::test]
async fn test_unsupported_method() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();

    let m1 = TlvEncoder::new()
        .add_state(1)
        .add_method(methods::PAIR_SETUP_AUTH)
        .build();
    let m2 = setup.handle(&accessory, &m1).await;

    assert_eq!(state_and_error(&m2), (2, Some(errors::UNKNOWN)));
    assert!(!accessory.setup_in_progress());
}

#[tokio::test]
async fn test_out_of_order_request() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();

    let m5 = TlvEncoder::new()
        .add_state(5)
        .add(TlvType::EncryptedData, &[0u8; 64])
        .build();
    let m6 = setup.handle(&accessory, &m5).await;

    assert_eq!(state_and_error(&m6), (6, Some(errors::UNKNOWN)));
    assert!(matches!(
        setup
            .process(
                &accessory,
                PairSetupRequest::VerifyProof {
                    public_key: vec![1; 384],
                    proof: vec![0; 64],
                },
            )
            .await,
        Err(PairingError::UnexpectedState {
            expected: 1,
            actual: 3
        })
    ));
}

#[tokio::test]
async fn test_garbage_body() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();

    let response = setup.handle(&accessory, &[0x06, 0x09]).await;
    assert_eq!(state_and_error(&response), (2, Some(errors::UNKNOWN)));
}

#[tokio::test]
async fn test_tampered_m5_persists_nothing() {
    let accessory = test_accessory().unwrap();
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(&accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, TEST_SETUP_CODE).unwrap();
    let m4 = setup.handle(&accessory, &m3).await;
    let m5 = controller.setup_process_m4(&m4).unwrap();

    let mut tlv = TlvDecoder::decode(&m5)
        .unwrap()
        .get(TlvType::EncryptedData)
        .unwrap()
        .to_vec();
    tlv[0] ^= 0x80;
    let tampered = TlvEncoder::new()
        .add_state(5)
        .add(TlvType::EncryptedData, &tlv)
        .build();

    let m6 = setup.handle(&accessory, &tampered).await;
    assert_eq!(state_and_error(&m6), (6, Some(errors::AUTHENTICATION)));
    assert!(!accessory.is_paired().await.unwrap());
    assert!(!accessory.setup_in_progress());
    assert!(!setup.is_complete());
}
