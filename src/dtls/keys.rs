//! Key exchange, key schedule and record protection.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes128Gcm;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use super::GCM_TAG_LEN;
use crate::rng::SeededRng;
use crate::Role;

pub const RANDOM_LEN: usize = 32;
pub const KEY_SHARE_LEN: usize = 32;
pub const VERIFY_DATA_LEN: usize = 12;

const MASTER_SECRET_LEN: usize = 48;
const KEY_LEN: usize = 16;
const IV_LEN: usize = 12;

/// TLS 1.2 PRF with SHA-256.
///
/// PRF(secret, label, seed) = P_SHA256(secret, label + seed)
pub fn prf(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut full_seed = Vec::with_capacity(label.len() + seed.len());
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);

    p_sha256(secret, &full_seed, output_len)
}

fn p_sha256(
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .map_err(|_| "Invalid HMAC key length".to_string())?;

    let mut out = Zeroizing::new(Vec::with_capacity(output_len));

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a = {
        let mut ctx = mac.clone();
        ctx.update(full_seed);
        ctx.finalize().into_bytes()
    };

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut ctx = mac.clone();
        ctx.update(&a);
        ctx.update(full_seed);
        let output = ctx.finalize().into_bytes();

        let remaining = output_len - out.len();
        let to_copy = remaining.min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut next = mac.clone();
            next.update(&a);
            a = next.finalize().into_bytes();
        }
    }

    Ok(out)
}

/// Our half of an X25519 exchange.
pub struct KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl KeyExchange {
    pub fn new(rng: &mut SeededRng) -> Self {
        let secret = EphemeralSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        KeyExchange { secret, public }
    }

    pub fn public_key(&self) -> [u8; KEY_SHARE_LEN] {
        self.public.to_bytes()
    }

    /// Combine with the peer's share. Low order peer points are refused.
    pub fn complete(self, peer: &[u8; KEY_SHARE_LEN]) -> Result<Zeroizing<Vec<u8>>, String> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));

        if !shared.was_contributory() {
            return Err("Non-contributory X25519 key share".to_string());
        }

        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange").finish_non_exhaustive()
    }
}

/// Pre-master secret. With a pre-shared key both secrets are mixed in as
/// `len(ecdhe) ecdhe len(psk) psk` with 16 bit lengths.
pub fn pre_master_secret(ecdhe: &[u8], psk: Option<&[u8]>) -> Zeroizing<Vec<u8>> {
    let Some(psk) = psk else {
        return Zeroizing::new(ecdhe.to_vec());
    };

    let mut out = Zeroizing::new(Vec::with_capacity(4 + ecdhe.len() + psk.len()));
    out.extend_from_slice(&(ecdhe.len() as u16).to_be_bytes());
    out.extend_from_slice(ecdhe);
    out.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    out.extend_from_slice(psk);
    out
}

pub struct MasterSecret(Zeroizing<Vec<u8>>);

impl MasterSecret {
    pub fn derive(
        pre_master: &[u8],
        client_random: &[u8; RANDOM_LEN],
        server_random: &[u8; RANDOM_LEN],
    ) -> Result<Self, String> {
        let mut seed = [0; RANDOM_LEN * 2];
        seed[..RANDOM_LEN].copy_from_slice(client_random);
        seed[RANDOM_LEN..].copy_from_slice(server_random);

        prf(pre_master, "master secret", &seed, MASTER_SECRET_LEN).map(MasterSecret)
    }

    /// Expand into the record keys for `role`.
    pub fn record_keys(
        &self,
        role: Role,
        client_random: &[u8; RANDOM_LEN],
        server_random: &[u8; RANDOM_LEN],
    ) -> Result<RecordKeys, String> {
        let mut seed = [0; RANDOM_LEN * 2];
        seed[..RANDOM_LEN].copy_from_slice(server_random);
        seed[RANDOM_LEN..].copy_from_slice(client_random);

        let block = prf(&self.0, "key expansion", &seed, 2 * (KEY_LEN + IV_LEN))?;

        let (client_key, rest) = block.split_at(KEY_LEN);
        let (server_key, rest) = rest.split_at(KEY_LEN);
        let (client_iv, server_iv) = rest.split_at(IV_LEN);

        let client = DirectionKeys::new(client_key, client_iv)?;
        let server = DirectionKeys::new(server_key, server_iv)?;

        Ok(match role {
            Role::Client => RecordKeys {
                write: client,
                read: server,
            },
            Role::Server => RecordKeys {
                write: server,
                read: client,
            },
        })
    }

    /// Verify data of a Finished message.
    pub fn verify_data(
        &self,
        label: &str,
        transcript: &[u8],
    ) -> Result<[u8; VERIFY_DATA_LEN], String> {
        let hash = Sha256::digest(transcript);
        let out = prf(&self.0, label, &hash, VERIFY_DATA_LEN)?;

        let mut verify_data = [0; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(&out);
        Ok(verify_data)
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RecordKeys {
    pub write: DirectionKeys,
    pub read: DirectionKeys,
}

pub struct DirectionKeys {
    cipher: Aes128Gcm,
    iv: Zeroizing<[u8; IV_LEN]>,
}

impl DirectionKeys {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, String> {
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|_| format!("Invalid key size for AES-GCM: {}", key.len()))?;

        let mut fixed = Zeroizing::new([0; IV_LEN]);
        fixed.copy_from_slice(iv);

        Ok(DirectionKeys { cipher, iv: fixed })
    }

    // iv XOR (epoch << 48 | seq), right aligned
    fn nonce(&self, epoch: u16, seq: u64) -> [u8; IV_LEN] {
        let counter = ((epoch as u64) << 48) | seq;
        let mut nonce = *self.iv;
        for (n, c) in nonce[IV_LEN - 8..].iter_mut().zip(counter.to_be_bytes()) {
            *n ^= c;
        }
        nonce
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(
        &self,
        epoch: u16,
        seq: u64,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, String> {
        let nonce = self.nonce(epoch, seq);

        let mut buf = Vec::with_capacity(plaintext.len() + GCM_TAG_LEN);
        buf.extend_from_slice(plaintext);

        self.cipher
            .encrypt_in_place(GenericArray::from_slice(&nonce), aad, &mut buf)
            .map_err(|_| "AES-GCM encryption failed".to_string())?;

        Ok(buf)
    }

    /// Authenticate and decrypt `ciphertext` (tag included).
    pub fn open(
        &self,
        epoch: u16,
        seq: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, String> {
        if ciphertext.len() < GCM_TAG_LEN {
            return Err(format!("Ciphertext too short: {}", ciphertext.len()));
        }

        let nonce = self.nonce(epoch, seq);
        let mut buf = ciphertext.to_vec();

        // decrypt_in_place strips the tag
        self.cipher
            .decrypt_in_place(GenericArray::from_slice(&nonce), aad, &mut buf)
            .map_err(|_| "AES-GCM decryption failed".to_string())?;

        Ok(buf)
    }
}

impl std::fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionKeys").finish_non_exhaustive()
    }
}
