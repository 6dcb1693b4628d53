use alloy::{
    consensus::{Transaction as _, TxEip1559, TxLegacy},
    primitives::{eip191_hash_message, Address, Bytes, TxKind, U256},
};
use hwkeyring::{
    device::{
        emulator::EmulatorDevice, ConnectSettings, DeviceErrorCode, DeviceFailure,
        PublicKeyBatchRequest, PublicKeyRequest, SigningDevice as _, UiEvent,
    },
    hdpath,
    signing::{LegacyTransaction, ModernTransaction},
    snapshot::KeyringSnapshot,
    verify::{address_from_public_key, parse_signature, recover_from_prehash},
    KeyringController, KeyringError, KeyringTransaction, TypedDataVersion,
};
use serde_json::json;

const PHRASE: &str = "test test test test test test test test test test test junk";
const ADDR0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
const ADDR1: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

async fn keyring() -> eyre::Result<KeyringController<EmulatorDevice>> {
    keyring_with(EmulatorDevice::new(PHRASE)?).await
}

async fn keyring_with(device: EmulatorDevice) -> eyre::Result<KeyringController<EmulatorDevice>> {
    let mut k = KeyringController::new(device);
    k.init(&ConnectSettings::default()).await?;
    Ok(k)
}

#[tokio::test]
async fn first_account_comes_from_first_public_key() -> eyre::Result<()> {
    let mut k = keyring().await?;

    let pk1 = k
        .device()
        .derive_public_keys(PublicKeyBatchRequest {
            bundle: vec![PublicKeyRequest {
                path: "m/44'/60'/0'/0/0".to_owned(),
                show_on_device: false,
            }],
            passphrase_state: None,
            use_empty_passphrase: true,
        })
        .await?
        .remove(0)
        .public_key
        .unwrap_or_default();

    let added = k.add_accounts(1).await?;
    assert_eq!(added, vec![address_from_public_key(&pk1)?.to_checksum(None)]);
    assert_eq!(added, vec![ADDR0.to_owned()]);

    let details = k.account_details(&ADDR0.to_lowercase())?;
    assert_eq!(details.derivation_path, "m/44'/60'/0'/0/0");
    assert_eq!(details.index, 0);
    assert_eq!(k.page(), 1);
    Ok(())
}

#[tokio::test]
async fn first_page_is_one_batched_call() -> eyre::Result<()> {
    let mut k = keyring().await?;
    let page = k.first_page().await?;

    assert_eq!(k.device().call_count("derive_public_keys"), 1);
    let indices: Vec<u32> = page.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(page.first().map(|e| e.address.as_str()), Some(ADDR0));
    assert_eq!(page.get(1).map(|e| e.address.as_str()), Some(ADDR1));
    assert!(page.iter().all(|e| e.balance.is_none()));
    Ok(())
}

#[tokio::test]
async fn cursor_never_drops_below_page_one() -> eyre::Result<()> {
    let mut k = keyring().await?;
    assert_eq!(k.page(), 0);

    k.previous_page().await?;
    assert_eq!(k.page(), 1);

    let second = k.next_page().await?;
    assert_eq!(k.page(), 2);
    assert_eq!(second.first().map(|e| e.index), Some(5));

    k.previous_page().await?;
    k.previous_page().await?;
    assert_eq!(k.page(), 1);
    Ok(())
}

#[tokio::test]
async fn adding_twice_does_not_duplicate() -> eyre::Result<()> {
    let mut k = keyring().await?;
    let first = k.add_accounts(3).await?;
    let second = k.add_accounts(3).await?;

    assert_eq!(first.len(), 3);
    assert!(second.is_empty());
    assert_eq!(k.accounts().len(), 3);

    k.set_unlock_index(2);
    let third = k.add_accounts(2).await?;
    assert_eq!(third.len(), 1);
    assert_eq!(k.accounts().len(), 4);
    Ok(())
}

#[tokio::test]
async fn snapshot_round_trips() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.set_base_path(hdpath::LEDGER_LIVE_TEMPLATE);
    k.add_accounts(2).await?;
    k.next_page().await?;
    let snap = k.serialize();

    let json = serde_json::to_string(&snap)?;
    let parsed: KeyringSnapshot = serde_json::from_str(&json)?;

    let mut restored = keyring().await?;
    restored.deserialize(parsed)?;
    assert_eq!(restored.serialize(), snap);
    assert_eq!(restored.base_path(), hdpath::LEDGER_LIVE_TEMPLATE);
    assert_eq!(
        restored.account_details(ADDR0)?.derivation_path,
        "m/44'/60'/0'/0/0"
    );
    assert_eq!(restored.page(), 2);
    Ok(())
}

#[tokio::test]
async fn restored_page_zero_clamps_on_next_move() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.deserialize(serde_json::from_value(json!({ "accounts": [] }))?)?;
    assert_eq!(k.page(), 0);
    k.previous_page().await?;
    assert_eq!(k.page(), 1);
    Ok(())
}

#[tokio::test]
async fn ledger_live_layout_varies_the_account_level() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.set_base_path(hdpath::LEDGER_LIVE_TEMPLATE);
    let added = k.add_accounts(2).await?;

    let paths: Vec<String> = added
        .iter()
        .map(|a| k.account_details(a).map(|d| d.derivation_path.clone()))
        .collect::<Result<_, _>>()?;
    assert_eq!(paths, vec!["m/44'/60'/0'/0/0", "m/44'/60'/1'/0/0"]);
    Ok(())
}

#[tokio::test]
async fn removing_is_case_insensitive_and_unknown_is_an_error() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(2).await?;
    let before = k.serialize();

    let err = k
        .remove_account("0x0000000000000000000000000000000000000001")
        .err();
    assert!(matches!(err, Some(KeyringError::AddressNotFound(_))));
    assert_eq!(k.serialize(), before);

    k.remove_account(&ADDR0.to_lowercase())?;
    assert_eq!(k.accounts(), [ADDR1.to_owned()]);
    assert!(k.account_details(ADDR0).is_err());
    Ok(())
}

#[tokio::test]
async fn signs_personal_messages() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(1).await?;

    let sig = k.sign_message(&ADDR0.to_lowercase(), "0x68656c6c6f").await?;
    assert!(sig.starts_with("0x"));
    let recovered = recover_from_prehash(&parse_signature(&sig)?, &eip191_hash_message(b"hello"))?;
    assert_eq!(recovered.to_checksum(None), ADDR0);

    // Plain text signs the same bytes.
    assert_eq!(k.sign_personal_message(ADDR0, "hello").await?, sig);
    // So does the hex without its prefix.
    assert_eq!(k.sign_message(ADDR0, "68656c6c6f").await?, sig);

    let raw = k.sign_message(ADDR0, "deadbeef").await?;
    let recovered = recover_from_prehash(
        &parse_signature(&raw)?,
        &eip191_hash_message([0xde_u8, 0xad, 0xbe, 0xef]),
    )?;
    assert_eq!(recovered.to_checksum(None), ADDR0);
    Ok(())
}

#[tokio::test]
async fn signs_typed_data_v3_and_v4() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(1).await?;
    let data = json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "chainId", "type": "uint256" }
            ],
            "Greeting": [ { "name": "text", "type": "string" } ]
        },
        "primaryType": "Greeting",
        "domain": { "name": "hwkeyring", "chainId": 1 },
        "message": { "text": "gm" }
    });

    let v4 = k.sign_typed_data(ADDR0, &data, TypedDataVersion::V4).await?;
    let v3 = k.sign_typed_data(ADDR0, &data, TypedDataVersion::V3).await?;
    assert!(v4.starts_with("0x"));
    // Without arrays both encodings agree.
    assert_eq!(v3, v4);
    Ok(())
}

#[tokio::test]
async fn typed_data_reaches_the_device_unsanitized() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(1).await?;
    let data = json!({
        "types": {
            "EIP712Domain": [ { "name": "name", "type": "string" } ],
            "Ping": [
                { "name": "n", "type": "uint256" },
                { "name": "note", "type": "string" }
            ]
        },
        "primaryType": "Ping",
        "domain": { "name": "hwkeyring" },
        "message": { "n": 1 },
        "dappOrigin": "https://example.org"
    });

    // V3 accepts a message that leaves a declared field out.
    let sig = k.sign_typed_data(ADDR0, &data, TypedDataVersion::V3).await?;
    assert!(sig.starts_with("0x"));
    assert_eq!(k.device().last_typed_data(), Some(data));
    Ok(())
}

#[tokio::test]
async fn signs_legacy_transactions_in_place() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(1).await?;

    let mut tx = LegacyTransaction::new(137);
    tx.nonce = 7;
    tx.gas_price = 1_000_000_000;
    tx.gas_limit = 21_000;
    tx.to = Some(Address::repeat_byte(0x22));
    tx.value = U256::from(5_u64);
    let signed = k.sign_transaction(ADDR0, tx.into()).await?;

    let KeyringTransaction::Legacy(inner) = &signed else {
        eyre::bail!("expected a legacy transaction back");
    };
    assert_eq!(inner.chain_id(), 137);
    assert!(inner.signature.is_some_and(|s| s.v == 137 * 2 + 35 || s.v == 137 * 2 + 36));
    assert_eq!(signed.sender()?.to_checksum(None), ADDR0);
    Ok(())
}

#[tokio::test]
async fn signs_modern_transactions_with_chain_context() -> eyre::Result<()> {
    let mut k = keyring().await?;
    k.add_accounts(1).await?;

    let inner = TxEip1559 {
        chain_id: 5,
        nonce: 0,
        gas_limit: 21_000,
        max_fee_per_gas: 2_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(Address::repeat_byte(0x33)),
        value: U256::from(1_u64),
        access_list: Default::default(),
        input: Bytes::new(),
    };
    let tx = ModernTransaction::new(inner, 10);
    let signed = k.sign_transaction(ADDR0, tx.clone().into()).await?;

    let KeyringTransaction::Modern(m) = &signed else {
        eyre::bail!("expected a modern transaction back");
    };
    assert!(m.is_frozen());
    assert_eq!(m.transaction().chain_id(), Some(10));
    assert!(tx.signature().is_none());
    assert_eq!(signed.sender()?.to_checksum(None), ADDR0);
    assert!(m.envelope().is_ok());

    let legacy_shape = ModernTransaction::new(
        TxLegacy {
            chain_id: None,
            nonce: 1,
            gas_price: 1,
            gas_limit: 21_000,
            to: TxKind::Create,
            value: U256::ZERO,
            input: Bytes::from_static(&[0x60, 0x00]),
        },
        1,
    )
    .unfrozen();
    let signed = k.sign_transaction(ADDR0, legacy_shape.into()).await?;
    assert_eq!(signed.sender()?.to_checksum(None), ADDR0);
    Ok(())
}

#[tokio::test]
async fn passphrase_state_selects_hidden_wallet() -> eyre::Result<()> {
    let device = EmulatorDevice::new(PHRASE)?.with_passphrase_state(Some("hidden-1".to_owned()));
    let mut k = keyring_with(device).await?;
    k.enable_passphrase_support();

    let hidden = k.add_accounts(1).await?;
    let first = hidden.first().cloned().unwrap_or_default();
    assert_ne!(first, ADDR0);
    assert_eq!(
        k.account_details(&first)?.passphrase_state.as_deref(),
        Some("hidden-1")
    );
    assert_eq!(k.device().call_count("get_passphrase_state"), 1);

    // Cached: paging does not ask again.
    k.first_page().await?;
    assert_eq!(k.device().call_count("get_passphrase_state"), 1);

    // Signing uses the token recorded with the account.
    k.sign_message(&first, "hi").await?;

    k.device().set_passphrase_state(Some("hidden-2".to_owned()));
    k.request_passphrase_reset();
    let page = k.first_page().await?;
    assert_eq!(k.device().call_count("get_passphrase_state"), 2);
    assert_ne!(page.first().map(|e| e.address.clone()), Some(first));
    Ok(())
}

#[tokio::test]
async fn device_events_and_blocking_errors_reach_subscribers() -> eyre::Result<()> {
    let mut k = KeyringController::new(EmulatorDevice::new(PHRASE)?);
    let mut rx = k.subscribe();
    k.init(&ConnectSettings::default()).await?;

    let connected = rx.recv().await?;
    assert!(matches!(connected, UiEvent::Device { ref payload } if payload["type"] == "device-connect"));

    k.device().fail_next(DeviceFailure::new(
        "Bridge is not installed",
        Some(DeviceErrorCode::BridgeNotInstalled),
    ));
    let err = k.first_page().await.err();
    assert!(matches!(
        err,
        Some(KeyringError::DeviceRejected { code: Some(712), .. })
    ));
    assert_eq!(
        rx.recv().await?,
        UiEvent::Blocked {
            code: DeviceErrorCode::BridgeNotInstalled,
            message: "Bridge is not installed".to_owned(),
        }
    );

    // Busy is reported to the caller but does not block.
    k.device()
        .fail_next(DeviceFailure::new("busy", Some(DeviceErrorCode::DeviceBusy)));
    assert!(k.first_page().await.is_err());
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn calls_before_init_are_unavailable() -> eyre::Result<()> {
    let mut k = KeyringController::new(EmulatorDevice::new(PHRASE)?);
    let err = k.add_accounts(1).await.err();
    assert!(matches!(
        err,
        Some(KeyringError::DeviceUnavailable(ref m)) if m == "SDK not initialized"
    ));
    assert!(k.accounts().is_empty());

    k.init(&ConnectSettings::default()).await?;
    k.add_accounts(1).await?;
    k.destroy().await;
    assert!(matches!(
        k.first_page().await.err(),
        Some(KeyringError::DeviceUnavailable(_))
    ));
    Ok(())
}
