//! Sans-IO MTProto authorization key generation.
//!
//! Each step consumes the previous step's state plus the server's response
//! and produces the next request. No I/O happens here.
//!
//! # Flow
//!
//! ```text
//! let (req, s1) = authentication::step1()?;
//! // send req, receive resPQ
//! let (req, s2) = authentication::step2(s1, res_pq, dc_id)?;
//! // send req, receive Server_DH_Params
//! let (req, s3) = authentication::step3(s2, dh_params)?;
//! // send req, receive Set_client_DH_params_answer
//! let done = authentication::finish(s3, answer)?;
//! // done.auth_key is ready
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use num_traits::One;
use tgwire_crypto::{AuthKey, aes, bigint, factorize, generate_key_data_from_nonce, random, rsa, sha1};
use tgwire_tl_types::mtproto::{
    ClientDhInnerData, PQInnerDataDc, ReqDhParams, ReqPqMulti, ResPq, ServerDhInnerData, ServerDhParams,
    SetClientDhParams, SetClientDhParamsAnswer,
};
use tgwire_tl_types::{Cursor, Deserializable, Serializable};

/// Miller-Rabin rounds for a `dh_prime` that is not the well-known one.
const PRIME_CHECK_ROUNDS: usize = 20;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors that can occur during auth key generation.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    FactorizationFailed { pq: u64 },
    UnknownFingerprints { fingerprints: Vec<i64> },
    InnerDataTooLarge { len: usize },
    DhParamsFail,
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    EncryptedResponseNotPadded { len: usize },
    InvalidDhInnerData { error: tgwire_tl_types::deserialize::Error },
    InvalidDhPrime,
    InvalidGenerator { g: i32 },
    GParameterOutOfRange { value: BigUint, low: BigUint, high: BigUint },
    DhGenRetry,
    DhGenFail,
    InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => write!(f, "nonce mismatch: got {got:?}, expected {expected:?}"),
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::FactorizationFailed { pq } => write!(f, "could not factorize pq={pq}"),
            Self::UnknownFingerprints { fingerprints } => write!(f, "no known fingerprint in {fingerprints:?}"),
            Self::InnerDataTooLarge { len } => write!(f, "p_q_inner_data of {len} bytes is too large for RSA_PAD"),
            Self::DhParamsFail => write!(f, "server returned DH params failure"),
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::EncryptedResponseNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::InvalidDhInnerData { error } => write!(f, "DH inner data deserialization error: {error}"),
            Self::InvalidDhPrime => write!(f, "dh_prime is not a 2048-bit safe prime"),
            Self::InvalidGenerator { g } => write!(f, "g={g} is not a valid generator for dh_prime"),
            Self::GParameterOutOfRange { value, low, high } => write!(f, "g={value} not in range ({low}, {high})"),
            Self::DhGenRetry => write!(f, "DH gen retry requested"),
            Self::DhGenFail => write!(f, "DH gen failed"),
            Self::InvalidAnswerHash { got, expected } => {
                write!(f, "answer hash mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "new nonce hash mismatch: got {got:?}, expected {expected:?}")
            }
        }
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State after step 1.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State after step 2.
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// State after step 3.
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    auth_key: [u8; 256],
    time_offset: i32,
}

/// The final output of a successful auth key handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
    /// Initial server salt.
    pub first_salt: i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

/// Generate a `req_pq_multi` request. Returns the request + opaque state.
pub fn step1() -> Result<(ReqPqMulti, Step1), Error> {
    do_step1(&random::bytes())
}

#[doc(hidden)]
pub fn do_step1(random: &[u8; 16]) -> Result<(ReqPqMulti, Step1), Error> {
    let nonce = *random;
    Ok((ReqPqMulti { nonce }, Step1 { nonce }))
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `resPQ` and generate `req_DH_params` using the built-in server keys.
///
/// `dc_id` goes into `p_q_inner_data_dc`; test servers expect it offset by
/// 10000.
pub fn step2(data: Step1, response: ResPq, dc_id: i32) -> Result<(ReqDhParams, Step2), Error> {
    step2_with_keys(data, response, dc_id, &builtin_keys())
}

/// [`step2`] with a caller-provided RSA key table.
pub fn step2_with_keys(
    data: Step1,
    response: ResPq,
    dc_id: i32,
    keys: &[rsa::Key],
) -> Result<(ReqDhParams, Step2), Error> {
    do_step2(data, response, dc_id, keys, &random::bytes())
}

#[doc(hidden)]
pub fn do_step2(
    data: Step1,
    response: ResPq,
    dc_id: i32,
    keys: &[rsa::Key],
    random: &[u8; 256],
) -> Result<(ReqDhParams, Step2), Error> {
    let Step1 { nonce } = data;
    let res_pq = response;

    check_nonce(&res_pq.nonce, &nonce)?;

    if res_pq.pq.len() != 8 {
        return Err(Error::InvalidPqSize { size: res_pq.pq.len() });
    }
    let pq = bigint::u64_from_be(&res_pq.pq).ok_or(Error::InvalidPqSize { size: res_pq.pq.len() })?;
    let (p, q) = factorize(pq).ok_or(Error::FactorizationFailed { pq })?;
    log::debug!("factorized pq={pq} into p={p} q={q}");

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);

    let mut rsa_random = [0u8; 224];
    rsa_random.copy_from_slice(&random[32..]);

    let p_bytes = bigint::u64_to_be_trimmed(p);
    let q_bytes = bigint::u64_to_be_trimmed(q);

    let pq_inner = PQInnerDataDc {
        pq: res_pq.pq.clone(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
        dc: dc_id,
    }
    .to_bytes();

    let (fingerprint, key) = res_pq
        .server_public_key_fingerprints
        .iter()
        .find_map(|&fp| keys.iter().find(|key| key.fingerprint() == fp).map(|key| (fp, key)))
        .ok_or_else(|| Error::UnknownFingerprints { fingerprints: res_pq.server_public_key_fingerprints.clone() })?;

    let ciphertext = rsa::encrypt_hashed(&pq_inner, key, &rsa_random)
        .ok_or(Error::InnerDataTooLarge { len: pq_inner.len() })?;

    Ok((
        ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: fingerprint,
            encrypted_data: ciphertext,
        },
        Step2 { nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `Server_DH_Params` and generate `set_client_DH_params`.
pub fn step3(data: Step2, response: ServerDhParams) -> Result<(SetClientDhParams, Step3), Error> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i32).unwrap_or_default();
    do_step3(data, response, &random::bytes(), now)
}

/// `random` supplies the 256-byte exponent `b` followed by 16 bytes of padding.
#[doc(hidden)]
pub fn do_step3(
    data: Step2,
    response: ServerDhParams,
    random: &[u8; 272],
    now: i32,
) -> Result<(SetClientDhParams, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = data;

    let mut server_dh_ok = match response {
        ServerDhParams::Fail(fail) => {
            check_nonce(&fail.nonce, &nonce)?;
            check_server_nonce(&fail.server_nonce, &server_nonce)?;
            let digest = sha1!(new_nonce);
            let mut expected_hash = [0u8; 16];
            expected_hash.copy_from_slice(&digest[4..]);
            check_new_nonce_hash(&fail.new_nonce_hash, &expected_hash)?;
            return Err(Error::DhParamsFail);
        }
        ServerDhParams::Ok(ok) => ok,
    };

    check_nonce(&server_dh_ok.nonce, &nonce)?;
    check_server_nonce(&server_dh_ok.server_nonce, &server_nonce)?;

    let len = server_dh_ok.encrypted_answer.len();
    if len % 16 != 0 || len < 32 {
        return Err(Error::EncryptedResponseNotPadded { len });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut server_dh_ok.encrypted_answer, &key, &iv);
    let plain = server_dh_ok.encrypted_answer;

    let mut got_hash = [0u8; 20];
    got_hash.copy_from_slice(&plain[..20]);

    let mut cursor = Cursor::from_slice(&plain[20..]);
    let inner =
        ServerDhInnerData::deserialize(&mut cursor).map_err(|error| Error::InvalidDhInnerData { error })?;

    let expected_hash = sha1!(&plain[20..20 + cursor.pos()]);
    if got_hash != expected_hash {
        return Err(Error::InvalidAnswerHash { got: got_hash, expected: expected_hash });
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    check_dh_prime(&dh_prime)?;
    check_generator(inner.g, &dh_prime)?;

    let g = BigUint::from(inner.g as u32);
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let time_offset = inner.server_time - now;

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);

    let one = BigUint::one();
    let safety = &one << (2048 - 64);
    check_g_in_range(&g_a, &one, &(&dh_prime - &one))?;
    check_g_in_range(&g_b, &one, &(&dh_prime - &one))?;
    check_g_in_range(&g_a, &safety, &(&dh_prime - &safety))?;
    check_g_in_range(&g_b, &safety, &(&dh_prime - &safety))?;

    let auth_key = bigint::to_fixed_be::<256>(&gab).ok_or(Error::InvalidDhPrime)?;

    let client_dh_inner = ClientDhInnerData { nonce, server_nonce, retry_id: 0, g_b: g_b.to_bytes_be() }.to_bytes();

    let digest = sha1!(&client_dh_inner);
    let pad_len = (16 - ((20 + client_dh_inner.len()) % 16)) % 16;

    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_dh_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    aes::ige_encrypt(&mut hashed, &key, &iv);

    Ok((
        SetClientDhParams { nonce, server_nonce, encrypted_data: hashed },
        Step3 { nonce, server_nonce, new_nonce, auth_key, time_offset },
    ))
}

// ─── finish: create_key ──────────────────────────────────────────────────────

/// Finalise the handshake. Returns the ready [`Finished`] on success.
pub fn finish(data: Step3, response: SetClientDhParamsAnswer) -> Result<Finished, Error> {
    let Step3 { nonce, server_nonce, new_nonce, auth_key, time_offset } = data;

    struct DhData {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        hash: [u8; 16],
        num: u8,
    }

    let dh = match response {
        SetClientDhParamsAnswer::DhGenOk(x) => {
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash1, num: 1 }
        }
        SetClientDhParamsAnswer::DhGenRetry(x) => {
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash2, num: 2 }
        }
        SetClientDhParamsAnswer::DhGenFail(x) => {
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash3, num: 3 }
        }
    };

    check_nonce(&dh.nonce, &nonce)?;
    check_server_nonce(&dh.server_nonce, &server_nonce)?;

    let key = AuthKey::from_bytes(auth_key);
    let expected_hash = key.calc_new_nonce_hash(&new_nonce, dh.num);
    check_new_nonce_hash(&dh.hash, &expected_hash)?;

    let first_salt = {
        let mut buf = [0u8; 8];
        for ((dst, a), b) in buf.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
            *dst = a ^ b;
        }
        i64::from_le_bytes(buf)
    };

    match dh.num {
        1 => {
            log::debug!("auth key generated: {key:?}, time offset {time_offset}s");
            Ok(Finished { auth_key, time_offset, first_salt })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else { Err(Error::InvalidNonce { got: *got, expected: *expected }) }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else { Err(Error::InvalidServerNonce { got: *got, expected: *expected }) }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else { Err(Error::InvalidNewNonceHash { got: *got, expected: *expected }) }
}

fn check_g_in_range(val: &BigUint, lo: &BigUint, hi: &BigUint) -> Result<(), Error> {
    if lo < val && val < hi {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange { value: val.clone(), low: lo.clone(), high: hi.clone() })
    }
}

fn check_dh_prime(dh_prime: &BigUint) -> Result<(), Error> {
    if dh_prime.bits() != 2048 {
        return Err(Error::InvalidDhPrime);
    }
    if *dh_prime == bigint::known_dh_prime() {
        return Ok(());
    }
    log::warn!("server sent an unfamiliar dh_prime; running primality checks");
    if bigint::is_safe_prime(dh_prime, PRIME_CHECK_ROUNDS) { Ok(()) } else { Err(Error::InvalidDhPrime) }
}

/// `g` generates the subgroup of order `(p - 1) / 2` only if `p` falls in the
/// matching residue class.
fn check_generator(g: i32, dh_prime: &BigUint) -> Result<(), Error> {
    let residue = |m: u32| (dh_prime % m).try_into().unwrap_or(u32::MAX);
    let ok = match g {
        2 => residue(8) == 7,
        3 => residue(3) == 2,
        4 => true,
        5 => matches!(residue(5), 1 | 4),
        6 => matches!(residue(24), 19 | 23),
        7 => matches!(residue(7), 3 | 5 | 6),
        _ => false,
    };
    if ok { Ok(()) } else { Err(Error::InvalidGenerator { g }) }
}

/// RSA keys for production and test data centers.
pub fn builtin_keys() -> Vec<rsa::Key> {
    [
        // Production, fingerprint -3414540481677951611.
        "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
        // Test, fingerprint -5595554452916591101.
        "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
    ]
    .into_iter()
    .filter_map(|n| rsa::Key::new(n, "65537"))
    .collect()
}
