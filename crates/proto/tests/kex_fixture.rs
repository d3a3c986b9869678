//! Key exchange against precomputed values.

mod common;

use common::{big, host_key, server_kexinit, SERVER_ID};
use keel_proto::ssh::hostkey::DssSignature;
use keel_proto::ssh::kex::KexInit;
use keel_proto::ssh::kex_dh::{DhGroup1Exchange, KexState, KexTranscript, KexdhReply};
use num_bigint::BigUint;

const X_HEX: &str = "3acbedba9c04ef828253f7053637f5a3d2df1f48d27765af03f90494b87ea3d7baee0aef39b1cb0486be03ef211baaddd9195473ed4401a4e14154edc58370109b69e27b636fd2050522af32d26e4fd0f8b6cc43ab107a54922cb0770c512c35ad765a95c0d4232c8cfbf2787df3cbb1415a9e11faa45dff9983a43465aab739";
const E_HEX: &str = "5989166c64c7ed058be901503b1a045826848930ceac0677d9f94b240b3a4d0aad6ecfeb81ab7cc41c713687f51df9769d61760fc6409180c7cb9e9efff829244d56c8f6cccf8f286f74e4113fad17eb0b2cc70710884a18419469e4a01bad10448ed7fbba578b1ce7987192ca260ee4582a14f73fece7e5acbf88b3bc4ee9cf";
const F_HEX: &str = "f98d9d56304d5739f8499ba540717bcf749805ea8f1cbebc0f8f8afc1c8dc92ffe132a085c5f0679ef3d0bd072cd38e431c0ca4452a072d64ae4f94bb8b943b67f3fcebbea19fe36ae4658344c4854b4d711334e7f4f83f53e3fa7856acdd9e530e8aaab9e97a75b3a8e942254dd85866253edcc7116729beb26e35036278db";
const R_HEX: &str = "4225b1db432d4378847d028f6766e9997b67c101";
const S_HEX: &str = "76947ca727cccb8942211c2d04399bf90fcc1c7f";

const IC_HEX: &str = "14111111111111111111111111111111110000001a6469666669652d68656c6c6d616e2d67726f7570312d73686131000000077373682d64737300000008336465732d63626300000008336465732d63626300000009686d61632d7368613100000009686d61632d73686131000000046e6f6e65000000046e6f6e6500000000000000000000000000";
const IS_HEX: &str = "14222222222222222222222222222222220000001a6469666669652d68656c6c6d616e2d67726f7570312d73686131000000077373682d647373000000136165733132382d6362632c336465732d636263000000136165733132382d6362632c336465732d63626300000012686d61632d6d64352c686d61632d7368613100000012686d61632d6d64352c686d61632d73686131000000046e6f6e65000000046e6f6e6500000000000000000000000000";

const H_HEX: &str = "5613f432bb1036e6dfeb9366ef19a1ea212b121c";
const H2_HEX: &str = "ddfa441d4224dd8e1197c26274d6d0e5c8c4ac8a";

fn transcript() -> KexTranscript {
    KexTranscript {
        client_version: "SSH-2.0-keel_fixture".to_string(),
        server_version: SERVER_ID.to_string(),
        client_kexinit: KexInit::with_cookie([0x11; 16]).to_bytes(),
        server_kexinit: server_kexinit(),
    }
}

fn reply(r_hex: &str) -> KexdhReply {
    let signature = DssSignature::new(big(r_hex), big(S_HEX));
    KexdhReply {
        host_key_blob: host_key().blob().to_vec(),
        f: big(F_HEX),
        signature_blob: signature.to_blob().unwrap(),
    }
}

#[test]
fn test_negotiation_payloads_match_fixture() {
    let t = transcript();
    assert_eq!(hex::encode(&t.client_kexinit), IC_HEX);
    assert_eq!(hex::encode(&t.server_kexinit), IS_HEX);
}

#[test]
fn test_exchange_hash_and_keys() {
    let mut kex = DhGroup1Exchange::with_private_exponent(transcript(), &big(X_HEX)).unwrap();
    assert_eq!(kex.e(), &big(E_HEX));

    let init = kex.init_message().unwrap();
    assert_eq!(init.e, big(E_HEX));

    let outcome = kex.process_reply(&reply(R_HEX)).unwrap();
    assert_eq!(kex.state(), KexState::Verified);
    assert!(outcome.signature_valid());
    assert_eq!(hex::encode(outcome.exchange_hash()), H_HEX);
    assert_eq!(hex::encode(outcome.signed_digest()), H2_HEX);
    assert_eq!(outcome.host_key().fingerprint(), host_key().fingerprint());

    let keys = outcome.session_keys();
    assert_eq!(hex::encode(&*keys.iv_out), "4d7815a74c03db35");
    assert_eq!(hex::encode(&*keys.iv_in), "144940edcf462114");
    assert_eq!(hex::encode(&*keys.key_out), "a79f9002070a9d42d82ab51961ec6d977cf721f01ab3b476");
    assert_eq!(hex::encode(&*keys.key_in), "2a16e5865b325314bf7fca4e5022474cc4d159124d4c6cfa");
    assert_eq!(hex::encode(&*keys.mac_out), "2e8305b9e7cd56f3593613be17da2509032434ce");
    assert_eq!(hex::encode(&*keys.mac_in), "55901a2ac50b95a16ef7e0f8b0ec0f423ef2177f");
}

#[test]
fn test_shared_secret_is_mpint_of_k() {
    let mut kex = DhGroup1Exchange::with_private_exponent(transcript(), &big(X_HEX)).unwrap();
    kex.init_message().unwrap();
    let outcome = kex.process_reply(&reply(R_HEX)).unwrap();

    // 1024-bit K with the top bit set needs a leading zero byte.
    let k = outcome.shared_secret_mpint();
    assert_eq!(k.len(), 133);
    let declared = u32::from_be_bytes([k[0], k[1], k[2], k[3]]) as usize;
    assert_eq!(declared, k.len() - 4);
}

#[test]
fn test_wrong_signature_is_reported_not_raised() {
    let mut kex = DhGroup1Exchange::with_private_exponent(transcript(), &big(X_HEX)).unwrap();
    kex.init_message().unwrap();

    // Swapping r for s breaks the signature but not the parse.
    let outcome = kex.process_reply(&reply(S_HEX)).unwrap();
    assert!(!outcome.signature_valid());
    assert_eq!(kex.state(), KexState::Failed);
    assert_eq!(hex::encode(outcome.exchange_hash()), H_HEX);
}

#[test]
fn test_f_out_of_range_is_rejected() {
    let mut kex = DhGroup1Exchange::with_private_exponent(transcript(), &big(X_HEX)).unwrap();
    kex.init_message().unwrap();

    let mut bad = reply(R_HEX);
    bad.f = BigUint::from(0u32);
    assert!(kex.process_reply(&bad).is_err());
    assert_eq!(kex.state(), KexState::Failed);
}

#[test]
fn test_reply_before_init_is_rejected() {
    let mut kex = DhGroup1Exchange::with_private_exponent(transcript(), &big(X_HEX)).unwrap();
    assert!(kex.process_reply(&reply(R_HEX)).is_err());
}
