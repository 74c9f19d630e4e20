//! A scripted server speaking the server side of MTProto over in-memory
//! pipes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use tgwire_client::socket::{BoxFuture, BoxSocket, Connector};
use tgwire_crypto::{
    AuthKey, Side, aes, bigint, decrypt_data_v2, encrypt_data_v2, generate_key_data_from_nonce, rsa, sha1, sha256,
};
use tgwire_mtproto::message::{decode_plain, encode_plain};
use tgwire_mtproto::transport::{Abridged, Transport};
use tgwire_tl_types::envelope::RpcResult;
use tgwire_tl_types::mtproto::{
    ClientDhInnerData, DhGenOk, MsgsAck, Object, PQInnerDataDc, ReqDhParams, ReqPqMulti, ResPq, ServerDhInnerData,
    ServerDhParamsOk, SetClientDhParams,
};
use tgwire_tl_types::{Deserializable, Identifiable, Serializable};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{Mutex, mpsc};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn auth_key() -> AuthKey {
    AuthKey::from_bytes(std::array::from_fn(|i| (i as u8).wrapping_mul(151).wrapping_add(7)))
}

// A 2048-bit key the fake server signs the key exchange with.
const SERVER_N: &str = concat!(
    "226607247663058981859102441465938177683447297130714252176416928336533633653391976894622926691143",
    "053069149532524071472983208544227405055558382795900860667062125932104773480248097158130943568494",
    "627391548819617310552948115720463160316671963501639868528295659969336908770853780005643745376312",
    "389324319107936044946323935852133645488271757730093982921876227996824675111929714945520931707807",
    "809937820887581930611643639758898091032873848728361232692929533227928584634568973973163608790336",
    "267737263131363978206634328932495570857445487461576926418165929710985142766017675519246322084672",
    "28052132532784344536788017867406351570053",
);
const SERVER_D: &str = concat!(
    "989973924323823444711836367488788923089976587904463090172420628836122261490496313604520959777548",
    "064821828931091855035015677225044605970015725136859719205739616943420017625613511411026907748229",
    "195240464814450343842632024839797479748330711966591555279251879180018163025209358887588091287242",
    "323991726868687444157038308907372588742464266815633844142266628070017309083884448069922583443328",
    "804181827883567252334575936057640955661552168637803888713315468374003737527096143895010878678811",
    "879132574822543273929965348229571744492404131599694000458729236017970525364447796831901017736831",
    "7033323215514270435485382950198048140417",
);

// 1206429347 * 1218991343
const PQ: u64 = 1470626929934143021;
const SERVER_NONCE: [u8; 16] = [0x55; 16];

pub fn server_rsa_key() -> rsa::Key {
    rsa::Key::new(SERVER_N, "65537").unwrap()
}

pub fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

// ─── Connector ────────────────────────────────────────────────────────────────

/// Hands the server end of every new pipe to the test.
pub struct DuplexConnector {
    accepted: mpsc::UnboundedSender<(String, DuplexStream)>,
}

pub struct Listener {
    incoming: Mutex<mpsc::UnboundedReceiver<(String, DuplexStream)>>,
}

pub fn duplex_connector() -> (Arc<DuplexConnector>, Listener) {
    let (accepted, incoming) = mpsc::unbounded_channel();
    (Arc::new(DuplexConnector { accepted }), Listener { incoming: Mutex::new(incoming) })
}

impl Connector for DuplexConnector {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<BoxSocket>> {
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(1 << 20);
            self.accepted
                .send((addr.to_string(), server))
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
            Ok(Box::new(client) as BoxSocket)
        })
    }
}

impl Listener {
    /// Wait for the next connection and its abridged init byte.
    pub async fn accept(&self, key: AuthKey) -> FakeServer {
        let (addr, mut stream) = tokio::time::timeout(TIMEOUT, async {
            self.incoming.lock().await.recv().await.expect("connector dropped")
        })
        .await
        .expect("no connection");
        let mut init = [0u8; 1];
        stream.read_exact(&mut init).await.unwrap();
        assert_eq!(init, [0xef], "expected the abridged init byte");
        FakeServer {
            addr,
            stream,
            key,
            buffer: Vec::new(),
            framing: Abridged::new(),
            session_id: 0,
            msg_counter: 0,
            queued: VecDeque::new(),
        }
    }

    /// Accept a client that has no key yet and run the key exchange with it,
    /// signed by [`server_rsa_key`]. Returns the server and the DC the client
    /// named in `p_q_inner_data_dc`.
    pub async fn accept_new_key(&self) -> (FakeServer, i32) {
        let mut server = self.accept(AuthKey::from_bytes([0; 256])).await;
        let dc = server.exchange_key().await;
        (server, dc)
    }
}

// ─── FakeServer ───────────────────────────────────────────────────────────────

/// One message from the client, taken out of its container if it had one.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub salt: i64,
    pub msg_id: i64,
    pub seq_no: i32,
    pub container_id: Option<i64>,
    pub body: Vec<u8>,
}

impl ClientMessage {
    pub fn constructor(&self) -> u32 {
        u32::from_le_bytes(self.body[..4].try_into().unwrap())
    }
}

pub struct FakeServer {
    pub addr: String,
    stream: DuplexStream,
    key: AuthKey,
    buffer: Vec<u8>,
    framing: Abridged,
    session_id: i64,
    msg_counter: i64,
    queued: VecDeque<ClientMessage>,
}

impl FakeServer {
    async fn read_packet(&mut self) -> Vec<u8> {
        loop {
            if let Ok(offset) = self.framing.unpack(&self.buffer) {
                let packet = self.buffer[offset.data_start..offset.data_end].to_vec();
                self.buffer.drain(..offset.next_offset);
                return packet;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("client went quiet")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// The next content message from the client. Acks are skipped and
    /// containers are flattened.
    pub async fn recv(&mut self) -> ClientMessage {
        loop {
            if let Some(message) = self.queued.pop_front() {
                if message.constructor() == MsgsAck::CONSTRUCTOR_ID {
                    continue;
                }
                return message;
            }

            let mut packet = self.read_packet().await;
            let plain = decrypt_data_v2(&mut packet, &self.key, Side::Client).unwrap();
            let salt = i64::from_le_bytes(plain[..8].try_into().unwrap());
            self.session_id = i64::from_le_bytes(plain[8..16].try_into().unwrap());
            let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
            let seq_no = i32::from_le_bytes(plain[24..28].try_into().unwrap());
            let len = i32::from_le_bytes(plain[28..32].try_into().unwrap()) as usize;
            let body = plain[32..32 + len].to_vec();

            match Object::from_bytes(&body) {
                Ok(Object::MessageContainer(container)) => {
                    for inner in container.messages {
                        self.queued.push_back(ClientMessage {
                            salt,
                            msg_id: inner.msg_id,
                            seq_no: inner.seq_no,
                            container_id: Some(msg_id),
                            body: inner.body,
                        });
                    }
                }
                _ => self.queued.push_back(ClientMessage { salt, msg_id, seq_no, container_id: None, body }),
            }
        }
    }

    pub fn next_msg_id(&mut self) -> i64 {
        self.msg_counter += 1;
        (now_secs() << 32) | (self.msg_counter << 2) | 1
    }

    /// Send `body` as one encrypted server message.
    pub async fn send(&mut self, body: &[u8]) {
        let msg_id = self.next_msg_id();
        self.send_as(msg_id, body).await;
    }

    pub async fn send_as(&mut self, msg_id: i64, body: &[u8]) {
        let mut plain = Vec::new();
        plain.extend_from_slice(&0i64.to_le_bytes());
        plain.extend_from_slice(&self.session_id.to_le_bytes());
        plain.extend_from_slice(&msg_id.to_le_bytes());
        plain.extend_from_slice(&1i32.to_le_bytes());
        plain.extend_from_slice(&(body.len() as i32).to_le_bytes());
        plain.extend_from_slice(body);
        let packet = encrypt_data_v2(&plain, &self.key, Side::Server);
        self.write_packet(&packet).await;
    }

    /// Answer `request` with a `rpc_result` around `result`.
    pub async fn reply(&mut self, request: &ClientMessage, result: impl Serializable) {
        let body = RpcResult { req_msg_id: request.msg_id, result: result.to_bytes() }.to_bytes();
        self.send(&body).await;
    }

    /// A bare transport status, e.g. 404 when the key is unknown.
    pub async fn send_status(&mut self, code: i32) {
        self.write_packet(&(-code).to_le_bytes()).await;
    }

    async fn write_packet(&mut self, packet: &[u8]) {
        let mut wire = Vec::new();
        self.framing.pack(packet, &mut wire);
        self.stream.write_all(&wire).await.unwrap();
    }

    /// Drop the connection.
    pub fn hang_up(self) {}

    pub fn key(&self) -> &AuthKey {
        &self.key
    }

    /// Wait until the client closes its end, ignoring whatever it still
    /// sends.
    pub async fn closed(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            let n = tokio::time::timeout(TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("client kept the connection open")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }

    // ── Key exchange, server side ──────────────────────────────────────────

    async fn recv_plain<T: Deserializable>(&mut self) -> T {
        let packet = self.read_packet().await;
        let (_, body) = decode_plain(&packet).unwrap();
        T::from_bytes(body).unwrap()
    }

    async fn send_plain(&mut self, body: &[u8]) {
        let msg_id = self.next_msg_id();
        self.write_packet(&encode_plain(msg_id, body)).await;
    }

    async fn exchange_key(&mut self) -> i32 {
        let req_pq: ReqPqMulti = self.recv_plain().await;
        let res_pq = ResPq {
            nonce: req_pq.nonce,
            server_nonce: SERVER_NONCE,
            pq: PQ.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![server_rsa_key().fingerprint()],
        };
        self.send_plain(&res_pq.to_bytes()).await;

        let req_dh: ReqDhParams = self.recv_plain().await;
        assert_eq!(req_dh.public_key_fingerprint, server_rsa_key().fingerprint());
        let inner = rsa_pad_decrypt(&req_dh.encrypted_data);
        assert_eq!(inner.nonce, req_pq.nonce);
        assert_eq!(inner.pq, PQ.to_be_bytes());
        let new_nonce = inner.new_nonce;

        let prime = bigint::known_dh_prime();
        let a = BigUint::from_bytes_be(&std::array::from_fn::<u8, 256, _>(|i| ((i * 7 + 3) % 256) as u8));
        let g_a = BigUint::from(3u32).modpow(&a, &prime);
        let dh_inner = ServerDhInnerData {
            nonce: req_pq.nonce,
            server_nonce: SERVER_NONCE,
            g: 3,
            dh_prime: prime.to_bytes_be(),
            g_a: g_a.to_bytes_be(),
            server_time: now_secs() as i32,
        }
        .to_bytes();
        let mut answer = sha1!(&dh_inner).to_vec();
        answer.extend_from_slice(&dh_inner);
        answer.resize(answer.len().next_multiple_of(16), 0);
        let (tmp_key, tmp_iv) = generate_key_data_from_nonce(&SERVER_NONCE, &new_nonce);
        aes::ige_encrypt(&mut answer, &tmp_key, &tmp_iv);
        let params = ServerDhParamsOk { nonce: req_pq.nonce, server_nonce: SERVER_NONCE, encrypted_answer: answer };
        self.send_plain(&params.to_bytes()).await;

        let set_params: SetClientDhParams = self.recv_plain().await;
        let mut data = set_params.encrypted_data;
        aes::ige_decrypt(&mut data, &tmp_key, &tmp_iv);
        let client_inner = ClientDhInnerData::from_bytes(&data[20..]).unwrap();
        let g_b = BigUint::from_bytes_be(&client_inner.g_b);
        let key = AuthKey::from_bytes(bigint::to_fixed_be::<256>(&g_b.modpow(&a, &prime)).unwrap());

        let ok = DhGenOk {
            nonce: req_pq.nonce,
            server_nonce: SERVER_NONCE,
            new_nonce_hash1: key.calc_new_nonce_hash(&new_nonce, 1),
        };
        self.send_plain(&ok.to_bytes()).await;
        self.key = key;
        inner.dc
    }
}

/// Undo `RSA_PAD` with the server's private exponent.
fn rsa_pad_decrypt(encrypted: &[u8]) -> PQInnerDataDc {
    let n = BigUint::parse_bytes(SERVER_N.as_bytes(), 10).unwrap();
    let d = BigUint::parse_bytes(SERVER_D.as_bytes(), 10).unwrap();
    let block = bigint::to_fixed_be::<256>(&BigUint::from_bytes_be(encrypted).modpow(&d, &n)).unwrap();

    let (key_xor, aes_part) = block.split_at(32);
    let hash = sha256!(aes_part);
    let temp_key: [u8; 32] = std::array::from_fn(|i| key_xor[i] ^ hash[i]);
    let mut data_with_hash = aes_part.to_vec();
    aes::ige_decrypt(&mut data_with_hash, &temp_key, &[0; 32]);

    let data_with_padding: Vec<u8> = data_with_hash[..192].iter().rev().copied().collect();
    assert_eq!(data_with_hash[192..], sha256!(&temp_key, &data_with_padding)[..], "RSA_PAD hash mismatch");
    PQInnerDataDc::from_bytes(&data_with_padding).unwrap()
}
