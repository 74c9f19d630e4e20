//! Full key exchange against a scripted server with fixed randomness.

use num_bigint::BigUint;
use tgwire_crypto::{AuthKey, aes, bigint, generate_key_data_from_nonce, sha1};
use tgwire_mtproto::authentication::{self, Error, Finished};
use tgwire_tl_types::Serializable;
use tgwire_tl_types::mtproto::{
    ClientDhInnerData, DhGenOk, DhGenRetry, ResPq, ServerDhInnerData, ServerDhParams, ServerDhParamsFail,
    ServerDhParamsOk,
};
use tgwire_tl_types::{Cursor, Deserializable};

const NONCE: [u8; 16] = [0x3e; 16];
const SERVER_NONCE: [u8; 16] = [0x55; 16];
const PQ: u64 = 1470626929934143021;
const SERVER_TIME: i32 = 1_700_000_000;

const EXPECTED_AUTH_KEY: &str = concat!(
    "860d88e252f98e40454a3325c8762a362cb6fb775c850e1e4b1ab56b958089b9",
    "78312343cd7b4ffbd493bd41468875fee559488685c9d10d4bae309b0dc81ca7",
    "838fb5491405c657b44131635f09f2e12ec2f74c592985bb6049258481917b2f",
    "e1c52a2d0b014a9dc997b42995bf79b954cae01d686cb90a4d69537e1ec732de",
    "2663bfba99e10299ad8cd0e0e5edb21cafd3b2696360fa3a4d81bb54fe4f364e",
    "870a6f0a87ad3f06a41effb18a4941728e0df721c95a71e815556e383b6b73ea",
    "831594e6547ccf240d7a61ece1cd7112b64c8606ad4bb4f0789ebd76b278d2a8",
    "8d9e28a8aaac95daeb0afc7b94710010eb3e095168175dcfe8b8dae74327e1a2",
);

fn hex(s: &str) -> Vec<u8> {
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
}

fn new_nonce() -> [u8; 32] {
    std::array::from_fn(|i| ((i * 17 + 1) % 256) as u8)
}

// Server's secret exponent.
fn a() -> BigUint {
    BigUint::from_bytes_be(&std::array::from_fn::<u8, 256, _>(|i| ((i * 7 + 3) % 256) as u8))
}

// Client's `b` followed by 16 bytes of padding.
fn step3_random() -> [u8; 272] {
    std::array::from_fn(|i| if i < 256 { ((i * 13 + 5) % 256) as u8 } else { 0xaa })
}

fn res_pq() -> ResPq {
    ResPq {
        nonce: NONCE,
        server_nonce: SERVER_NONCE,
        pq: PQ.to_be_bytes().to_vec(),
        server_public_key_fingerprints: vec![0x1234, -3414540481677951611],
    }
}

fn server_dh_params(g: i32, tamper_hash: bool) -> ServerDhParams {
    let prime = bigint::known_dh_prime();
    let g_a = BigUint::from(g as u32).modpow(&a(), &prime);
    let inner = ServerDhInnerData {
        nonce: NONCE,
        server_nonce: SERVER_NONCE,
        g,
        dh_prime: prime.to_bytes_be(),
        g_a: g_a.to_bytes_be(),
        server_time: SERVER_TIME,
    }
    .to_bytes();

    let mut answer = sha1!(&inner).to_vec();
    if tamper_hash {
        answer[0] ^= 1;
    }
    answer.extend_from_slice(&inner);
    answer.resize(answer.len().next_multiple_of(16), 0);

    let (key, iv) = generate_key_data_from_nonce(&SERVER_NONCE, &new_nonce());
    aes::ige_encrypt(&mut answer, &key, &iv);

    ServerDhParams::Ok(ServerDhParamsOk { nonce: NONCE, server_nonce: SERVER_NONCE, encrypted_answer: answer })
}

fn through_step2() -> authentication::Step2 {
    let (req, state) = authentication::do_step1(&NONCE).unwrap();
    assert_eq!(req.nonce, NONCE);

    let mut random = [0x77u8; 256];
    random[..32].copy_from_slice(&new_nonce());
    let (req, state) =
        authentication::do_step2(state, res_pq(), 2, &authentication::builtin_keys(), &random).unwrap();

    assert_eq!(req.p, bigint::u64_to_be_trimmed(1206429347));
    assert_eq!(req.q, bigint::u64_to_be_trimmed(1218991343));
    assert_eq!(req.public_key_fingerprint, -3414540481677951611);
    assert_eq!(req.encrypted_data.len(), 256);
    state
}

#[test]
fn handshake_produces_expected_key() {
    let state = through_step2();
    let (req, state) =
        authentication::do_step3(state, server_dh_params(3, false), &step3_random(), SERVER_TIME).unwrap();

    // The server can read g_b back out of set_client_DH_params.
    let mut data = req.encrypted_data.clone();
    assert_eq!(data.len() % 16, 0);
    let (key, iv) = generate_key_data_from_nonce(&SERVER_NONCE, &new_nonce());
    aes::ige_decrypt(&mut data, &key, &iv);
    let client_inner = ClientDhInnerData::deserialize(&mut Cursor::from_slice(&data[20..])).unwrap();
    let b = BigUint::from_bytes_be(&step3_random()[..256]);
    let expected_g_b = BigUint::from(3u32).modpow(&b, &bigint::known_dh_prime());
    assert_eq!(client_inner.g_b, expected_g_b.to_bytes_be());
    assert_eq!(client_inner.retry_id, 0);

    let expected: [u8; 256] = hex(EXPECTED_AUTH_KEY).try_into().unwrap();
    let answer = DhGenOk {
        nonce: NONCE,
        server_nonce: SERVER_NONCE,
        new_nonce_hash1: AuthKey::from_bytes(expected).calc_new_nonce_hash(&new_nonce(), 1),
    };

    let finished = authentication::finish(state, answer.into_answer()).unwrap();
    assert_eq!(finished, Finished { auth_key: expected, time_offset: 0, first_salt: 3256668849431791444 });
    assert_eq!(AuthKey::from_bytes(finished.auth_key).key_id(), hex("fc231920bee463e9")[..]);
}

#[test]
fn time_offset_is_server_minus_local() {
    let state = through_step2();
    let (_, state) =
        authentication::do_step3(state, server_dh_params(3, false), &step3_random(), SERVER_TIME - 30).unwrap();

    let expected: [u8; 256] = hex(EXPECTED_AUTH_KEY).try_into().unwrap();
    let answer = DhGenOk {
        nonce: NONCE,
        server_nonce: SERVER_NONCE,
        new_nonce_hash1: AuthKey::from_bytes(expected).calc_new_nonce_hash(&new_nonce(), 1),
    };
    assert_eq!(authentication::finish(state, answer.into_answer()).unwrap().time_offset, 30);
}

#[test]
fn tampered_answer_hash_is_rejected() {
    let state = through_step2();
    let result = authentication::do_step3(state, server_dh_params(3, true), &step3_random(), SERVER_TIME);
    assert!(matches!(result, Err(Error::InvalidAnswerHash { .. })));
}

#[test]
fn wrong_generator_is_rejected() {
    // The known prime is 3 mod 8, so 2 does not generate the right subgroup.
    let state = through_step2();
    let result = authentication::do_step3(state, server_dh_params(2, false), &step3_random(), SERVER_TIME);
    assert_eq!(result.err(), Some(Error::InvalidGenerator { g: 2 }));
}

#[test]
fn server_dh_params_fail_is_verified_then_fatal() {
    let digest = sha1!(new_nonce());
    let mut new_nonce_hash = [0u8; 16];
    new_nonce_hash.copy_from_slice(&digest[4..]);

    let fail = ServerDhParams::Fail(ServerDhParamsFail { nonce: NONCE, server_nonce: SERVER_NONCE, new_nonce_hash });
    let result = authentication::do_step3(through_step2(), fail, &step3_random(), SERVER_TIME);
    assert_eq!(result.err(), Some(Error::DhParamsFail));

    let forged =
        ServerDhParams::Fail(ServerDhParamsFail { nonce: NONCE, server_nonce: SERVER_NONCE, new_nonce_hash: [0; 16] });
    let result = authentication::do_step3(through_step2(), forged, &step3_random(), SERVER_TIME);
    assert!(matches!(result, Err(Error::InvalidNewNonceHash { .. })));
}

#[test]
fn dh_gen_retry_and_bad_hash_are_fatal() {
    let expected: [u8; 256] = hex(EXPECTED_AUTH_KEY).try_into().unwrap();
    let key = AuthKey::from_bytes(expected);

    let (_, state) =
        authentication::do_step3(through_step2(), server_dh_params(3, false), &step3_random(), SERVER_TIME).unwrap();
    let retry = DhGenRetry {
        nonce: NONCE,
        server_nonce: SERVER_NONCE,
        new_nonce_hash2: key.calc_new_nonce_hash(&new_nonce(), 2),
    };
    assert_eq!(authentication::finish(state, retry.into_answer()).err(), Some(Error::DhGenRetry));

    let (_, state) =
        authentication::do_step3(through_step2(), server_dh_params(3, false), &step3_random(), SERVER_TIME).unwrap();
    let forged = DhGenOk { nonce: NONCE, server_nonce: SERVER_NONCE, new_nonce_hash1: [0; 16] };
    assert!(matches!(
        authentication::finish(state, forged.into_answer()),
        Err(Error::InvalidNewNonceHash { .. })
    ));
}

trait IntoAnswer {
    fn into_answer(self) -> tgwire_tl_types::mtproto::SetClientDhParamsAnswer;
}

impl IntoAnswer for DhGenOk {
    fn into_answer(self) -> tgwire_tl_types::mtproto::SetClientDhParamsAnswer {
        tgwire_tl_types::mtproto::SetClientDhParamsAnswer::DhGenOk(self)
    }
}

impl IntoAnswer for DhGenRetry {
    fn into_answer(self) -> tgwire_tl_types::mtproto::SetClientDhParamsAnswer {
        tgwire_tl_types::mtproto::SetClientDhParamsAnswer::DhGenRetry(self)
    }
}
