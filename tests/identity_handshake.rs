mod common;

use common::{quantum, ScriptedDevice};
use quantum_link_lib::device::identity::perform_handshake;
use quantum_link_lib::serial::{NumericMode, SerialError, SerialInterface, TransportTiming};

fn interface(device: ScriptedDevice) -> SerialInterface {
    SerialInterface::from_io(Box::new(device), TransportTiming::default())
}

#[tokio::test]
async fn test_handshake_reads_identity_in_order() {
    let device = quantum();
    let writes = device.writes();
    let mut interface = interface(device);

    let handshake = perform_handshake(&mut interface, false).await.expect("handshake");
    let identity = &handshake.identity;

    assert_eq!(identity.firmware_version, "v2.00");
    assert!(!identity.old_firmware);
    assert_eq!(handshake.mode, NumericMode::Hex);
    assert_eq!(identity.serial_number, "Q1234");
    assert_eq!(identity.body_style, 2);
    assert_eq!(identity.design_wavelength, "6562.8");
    assert_eq!(identity.model_name, "Quantum SE");
    assert_eq!(identity.bandwidth, "0.5");

    assert!(handshake.status.on_band);
    assert!(!handshake.status.dual_heaters);
    assert!(handshake.status.boot_info.is_none());

    assert_eq!(writes.commands(), vec!["GI", "GS", "GA", "GX", "GN", "GB"]);
}

#[tokio::test]
async fn test_old_firmware_uses_decimal_fields() {
    let telegram = "v1.20 000 001 0000065628 -5 0000000038 0000000925 0000010399 0000001160 0000000000";
    let device = quantum()
        .reply("GI", telegram)
        .reply("GA", "10")
        .reply("GX", "65628");
    let mut interface = interface(device);

    let handshake = perform_handshake(&mut interface, false).await.expect("handshake");
    assert!(handshake.identity.old_firmware);
    assert_eq!(handshake.mode, NumericMode::Decimal);
    assert_eq!(handshake.identity.body_style, 10);
    assert_eq!(handshake.identity.design_wavelength, "6562.8");
    assert!((handshake.status.wing_shift + 0.5).abs() < 1e-3);
    assert!((handshake.status.center_wavelength - 6562.8).abs() < 1e-2);
}

#[tokio::test]
async fn test_short_info_telegram_aborts_handshake() {
    let device = quantum().reply("GI", "v2.00 00 01 0001005C 00 0026 039D");
    let writes = device.writes();
    let mut interface = interface(device);

    let err = perform_handshake(&mut interface, false).await.unwrap_err();
    assert!(matches!(err, SerialError::MalformedTelegram(_)), "unexpected {:?}", err);
    assert_eq!(writes.commands(), vec!["GI"]);
}

#[tokio::test]
async fn test_any_identity_failure_aborts_handshake() {
    let device = ScriptedDevice::new()
        .reply("GI", common::INFO_TELEGRAM)
        .reply("GS", "Q1234")
        .reply("GA", "0002")
        .reply("GX", "1005C");
    let writes = device.writes();
    let mut interface = interface(device);

    let err = perform_handshake(&mut interface, false).await.unwrap_err();
    assert!(matches!(err, SerialError::Timeout));
    assert_eq!(writes.count("GN"), 3);
    assert_eq!(writes.count("GB"), 0, "bandwidth must not be requested after a failure");
}

#[tokio::test]
async fn test_boot_info_is_optional() {
    let mut silent = interface(quantum());
    let handshake = perform_handshake(&mut silent, true).await.expect("silent GY is not fatal");
    assert!(handshake.status.boot_info.is_none());

    let mut answering = interface(quantum().reply("GY", "0000002A 00001E61"));
    let handshake = perform_handshake(&mut answering, true).await.expect("handshake");
    let boot_info = handshake.status.boot_info.expect("boot info");
    assert_eq!(boot_info.boot_count, 42);
    assert_eq!(boot_info.run_minutes, 7777);
}

#[tokio::test]
async fn test_identity_numbers_accept_trailing_text() {
    let device = quantum().reply("GA", "0002 SE").reply("GX", "1005C nm");
    let mut interface = interface(device);

    let handshake = perform_handshake(&mut interface, false).await.expect("handshake");
    assert_eq!(handshake.identity.body_style, 2);
    assert_eq!(handshake.identity.design_wavelength, "6562.8");
}

#[tokio::test]
async fn test_info_telegram_length_boundary() {
    let short = &common::INFO_TELEGRAM[..common::INFO_TELEGRAM.len() - 1];
    assert_eq!(short.len(), 73);
    let mut truncated = interface(quantum().reply("GI", short));
    match perform_handshake(&mut truncated, false).await {
        Err(SerialError::MalformedTelegram(detail)) => assert!(detail.contains("73")),
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(common::INFO_TELEGRAM.len(), 74);
    let mut exact = interface(quantum());
    assert!(perform_handshake(&mut exact, false).await.is_ok());
}
