//! Shared fixtures for the integration tests: a scripted in-process SSH
//! server, a DSA signer for its host key, and recording terminal/operator
//! doubles.

#![allow(dead_code)]

use std::collections::VecDeque;

use keel_platform::{KeelError, KeelResult, Operator, Terminal, TerminalSize};
use keel_proto::ssh::crypto::sha1;
use keel_proto::ssh::hostkey::{DssPublicKey, DssSignature};
use keel_proto::ssh::kex_dh::{exchange_hash, group1, KexTranscript, KexdhInit, KexdhReply, SessionKeys};
use keel_proto::ssh::message::MessageType;
use keel_proto::ssh::mpint;
use keel_proto::ssh::transport::TransportState;
use keel_proto::ssh::wire::WireWriter;
use num_bigint::{BigUint, RandBigInt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// 1024-bit DSA domain and host key (private exponent `HX`).
pub const P_HEX: &str = "fbf56a3f3b05cb4c7cba6364fc414abb1c741886e20bf1013dfc6e8d15f866b63706d0f90cb2d4e9af86ead0a890ebbc3e0c5641c181e1cbd2bac64d27045912eb90a165ac2932495bedde6419e4919045772891787d099a0d87cf86396825ce19106750b29502859ca39db4b6f3ccb99fcf8733e91b6efb26a5f08f3ec89531";
pub const Q_HEX: &str = "c6aa34b8a93753e647c710ee79090529d0d7536d";
pub const G_HEX: &str = "40421baf62066e024bef4be680278aa7f03b56d13b91f97a59806f7ccba1417cab99f7eea18924e04f16c4882e5830f8800a45c2231b379ce0e7ab3abe66d3ee6b7da27564bf332646d569b430fd377453e6827d2687a746c47e64d4e4c1ca157f7c8c9793aaae6e69992a318759e863d388bc1886b7231eb66861f0af673f3c";
pub const Y_HEX: &str = "32601242720e3eba097be16e63aa2b0eea283e9794c41dba19568b4cece09dc7836547266f52d6e0a5fa3ea81279d241d494f5d032b1aabb6d1db94bc277234f3cb99aa94dfcd1bd94dd0dd3d893f96c4986e348b3ba5e1c529df45421c3fd6179cda7fb44b59c529245a637e78a32785fba76353164d331b47f5abddd52ed88";
pub const HX_HEX: &str = "bc732b073e70b051a995624c941157b7ab8d1b96";

pub const SERVER_ID: &str = "SSH-2.0-OpenSSH_3.9p1";

pub fn big(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
}

pub fn host_key() -> DssPublicKey {
    DssPublicKey::from_parts(big(P_HEX), big(Q_HEX), big(G_HEX), big(Y_HEX)).unwrap()
}

/// Signs `digest` with the fixture host key.
pub fn dss_sign(digest: &[u8]) -> DssSignature {
    let p = big(P_HEX);
    let q = big(Q_HEX);
    let g = big(G_HEX);
    let x = big(HX_HEX);
    let h = BigUint::from_bytes_be(digest);
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);

    let mut rng = rand::thread_rng();
    loop {
        let k = rng.gen_biguint_range(&one, &q);
        let r = g.modpow(&k, &p) % &q;
        if r.bits() == 0 {
            continue;
        }
        let k_inv = k.modpow(&(&q - &two), &q);
        let s = (k_inv * ((&h + &x * &r) % &q)) % &q;
        if s.bits() == 0 {
            continue;
        }
        return DssSignature::new(r, s);
    }
}

/// Server KEXINIT offering more than the client needs.
pub fn server_kexinit() -> Vec<u8> {
    kexinit_with(&["diffie-hellman-group1-sha1"], false)
}

/// Server KEXINIT that prefers group14 and announces a guessed packet.
pub fn guessing_kexinit() -> Vec<u8> {
    kexinit_with(&["diffie-hellman-group14-sha1", "diffie-hellman-group1-sha1"], true)
}

fn kexinit_with(kex: &[&str], first_kex_packet_follows: bool) -> Vec<u8> {
    let mut w = WireWriter::message(MessageType::KexInit);
    w.put_raw(&[0x22; 16])
        .put_name_list(kex)
        .put_name_list(&["ssh-dss"])
        .put_name_list(&["aes128-cbc", "3des-cbc"])
        .put_name_list(&["aes128-cbc", "3des-cbc"])
        .put_name_list(&["hmac-md5", "hmac-sha1"])
        .put_name_list(&["hmac-md5", "hmac-sha1"])
        .put_name_list(&["none"])
        .put_name_list(&["none"])
        .put_name_list(&[])
        .put_name_list(&[])
        .put_bool(first_kex_packet_follows)
        .put_u32(0);
    w.finish()
}

/// How the server signs the exchange hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signing {
    /// A valid signature over `SHA1(H)`.
    Valid,
    /// A signature over the wrong digest.
    Forged,
}

/// Server end of a duplex pipe, scripted step by step by each test.
pub struct ScriptedServer {
    stream: DuplexStream,
    pub state: TransportState,
    pub client_line: String,
    /// Sent right after a guessing KEXINIT when set.
    pub guessed_packet: Option<Vec<u8>>,
    pending: Option<Vec<u8>>,
}

impl ScriptedServer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            state: TransportState::new(),
            client_line: String::new(),
            guessed_packet: None,
            pending: None,
        }
    }

    async fn fill(&mut self) -> KeelResult<()> {
        let mut buf = [0u8; 4096];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(KeelError::ConnectionClosed);
        }
        self.state.feed(&buf[..n]);
        Ok(())
    }

    /// Exchanges identification lines, with one banner line before ours.
    pub async fn exchange_versions(&mut self) -> KeelResult<()> {
        self.stream
            .write_all(format!("Welcome to the test host\r\n{}\r\n", SERVER_ID).as_bytes())
            .await?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await?;
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.client_line = String::from_utf8_lossy(&line).into_owned();
        Ok(())
    }

    pub async fn send(&mut self, payload: &[u8]) -> KeelResult<()> {
        let wire = self.state.seal_payload(payload)?;
        self.stream.write_all(&wire).await?;
        Ok(())
    }

    /// Sends raw bytes, bypassing the framer.
    pub async fn send_raw(&mut self, wire: &[u8]) -> KeelResult<()> {
        self.stream.write_all(wire).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> KeelResult<Vec<u8>> {
        if let Some(payload) = self.pending.take() {
            return Ok(payload);
        }
        loop {
            if let Some(packet) = self.state.next_packet()? {
                return Ok(packet.into_payload());
            }
            self.fill().await?;
        }
    }

    /// Receives a payload and checks its type byte.
    pub async fn expect(&mut self, msg_type: MessageType) -> Vec<u8> {
        let payload = self.recv().await.unwrap();
        assert_eq!(
            payload.first().copied(),
            Some(msg_type.as_u8()),
            "expected {}, got {:?}",
            msg_type,
            payload.first().and_then(|b| MessageType::from_u8(*b))
        );
        payload
    }

    /// Runs KEXINIT, DH and NEWKEYS from the server side.
    ///
    /// Returns `None` when the client stops after the DH reply (e.g. on a
    /// forged signature), in which case the next payload is left unread.
    pub async fn key_exchange(&mut self, signing: Signing) -> Option<[u8; 20]> {
        let server_kexinit = match self.guessed_packet.take() {
            Some(guessed) => {
                let kexinit = guessing_kexinit();
                self.send(&kexinit).await.unwrap();
                self.send(&guessed).await.unwrap();
                kexinit
            }
            None => {
                let kexinit = server_kexinit();
                self.send(&kexinit).await.unwrap();
                kexinit
            }
        };
        let client_kexinit = self.expect(MessageType::KexInit).await;

        let init = KexdhInit::from_bytes(&self.expect(MessageType::KexdhInit).await).unwrap();

        let p = &*group1::P;
        let y = rand::thread_rng().gen_biguint_range(&BigUint::from(2u32), &group1::Q);
        let f = group1::G.modpow(&y, p);
        let k = init.e.modpow(&y, p);
        let k_mpint = mpint::encode(&k);

        let key = host_key();
        let transcript = KexTranscript {
            client_version: self.client_line.clone(),
            server_version: SERVER_ID.to_string(),
            client_kexinit,
            server_kexinit,
        };
        let h = exchange_hash(&transcript, key.blob(), &init.e, &f, &k_mpint);
        let signed = match signing {
            Signing::Valid => sha1(&h),
            Signing::Forged => sha1(b"not the exchange hash"),
        };
        let signature = dss_sign(&signed);

        let reply = KexdhReply {
            host_key_blob: key.blob().to_vec(),
            f,
            signature_blob: signature.to_blob().unwrap(),
        };
        self.send(&reply.to_bytes()).await.unwrap();

        let keys = SessionKeys::derive(&k_mpint, &h).mirrored();
        self.state.install_keys(&keys, &h).unwrap();

        let next = self.recv().await.unwrap();
        if next.first() != Some(&MessageType::NewKeys.as_u8()) {
            // Leave the client's DISCONNECT for the test to inspect.
            self.pending = Some(next);
            return None;
        }

        self.send(&[MessageType::NewKeys.as_u8()]).await.unwrap();
        self.state.newkeys_sent().unwrap();
        assert!(self.state.newkeys_received().unwrap());
        Some(h)
    }
}

/// Terminal that records everything written to it.
#[derive(Debug, Default)]
pub struct RecordingTerminal {
    pub output: Vec<u8>,
    pub echo_changes: Vec<bool>,
    pub raw_mode: bool,
    pub raw_mode_entered: u32,
}

impl Terminal for RecordingTerminal {
    fn dimensions(&self) -> TerminalSize {
        TerminalSize {
            rows: 24,
            cols: 80,
            pixel_width: 640,
            pixel_height: 480,
        }
    }

    fn set_echo(&mut self, enabled: bool) -> KeelResult<()> {
        self.echo_changes.push(enabled);
        Ok(())
    }

    fn enter_raw_mode(&mut self) -> KeelResult<()> {
        self.raw_mode = true;
        self.raw_mode_entered += 1;
        Ok(())
    }

    fn restore_mode(&mut self) -> KeelResult<()> {
        self.raw_mode = false;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> KeelResult<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }
}

/// Operator answering from a script.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    pub user: String,
    pub passwords: VecDeque<String>,
    pub accept_insecure: bool,
    pub insecure_prompts: Vec<String>,
    pub banners: Vec<String>,
    pub notices: Vec<String>,
}

impl ScriptedOperator {
    pub fn new(user: &str, passwords: &[&str]) -> Self {
        Self {
            user: user.to_string(),
            passwords: passwords.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Operator for ScriptedOperator {
    fn username(&mut self) -> KeelResult<String> {
        Ok(self.user.clone())
    }

    fn password(&mut self, _username: &str) -> KeelResult<String> {
        self.passwords
            .pop_front()
            .ok_or_else(|| KeelError::Config("no more scripted passwords".to_string()))
    }

    fn confirm_insecure(&mut self, reason: &str) -> KeelResult<bool> {
        self.insecure_prompts.push(reason.to_string());
        Ok(self.accept_insecure)
    }

    fn show_banner(&mut self, message: &str) {
        self.banners.push(message.to_string());
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}
