//! Drives the DH key exchange over a [`PlainSender`].

use tgwire_crypto::rsa;
use tgwire_mtproto::authentication::{self, Finished};

use crate::errors::ConnectionError;
use crate::plain_sender::PlainSender;

/// Run all three round trips and return the new key, clock offset and salt.
///
/// `dc_id` goes into `p_q_inner_data_dc`; test servers use `10000 + id`.
/// `keys` are the server RSA keys we are willing to encrypt to.
pub async fn do_authentication(
    sender: &mut PlainSender<'_>,
    dc_id: i32,
    keys: &[rsa::Key],
) -> Result<Finished, ConnectionError> {
    let (request, data) = authentication::step1()?;
    tracing::debug!("[auth] req_pq_multi sent");
    let res_pq = sender.send(&request).await?;

    let (request, data) = authentication::step2_with_keys(data, res_pq, dc_id, keys)?;
    tracing::debug!("[auth] req_DH_params sent");
    let dh_params = sender.send(&request).await?;

    let (request, data) = authentication::step3(data, dh_params)?;
    tracing::debug!("[auth] set_client_DH_params sent");
    let answer = sender.send(&request).await?;

    let finished = authentication::finish(data, answer)?;
    tracing::info!("[auth] key exchange complete (time offset {}s)", finished.time_offset);
    Ok(finished)
}
