use crate::error::{Result, TrailError};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest as _, Md5};
use sha2::Sha512;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALT_MAGIC: &[u8; 8] = b"Salted__";

/// Symmetric cipher and digest used for the shared log
///
/// The algorithms are fixed by the remote store's other clients; this trait
/// only lets tests and alternative stores swap them out.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, passphrase: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str, passphrase: &str) -> Result<String>;
    /// Lowercase hex digest
    fn hash(&self, text: &str) -> String;
}

/// OpenSSL/CryptoJS passphrase format
///
/// # Format
/// ```text
/// base64( "Salted__" | salt[8] | AES-256-CBC(PKCS7) )
/// ```
/// Key and IV come from `EVP_BytesToKey` with MD5 and one iteration.
/// Digest is SHA-512.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryptoJsCipher;

impl CryptoJsCipher {
    fn derive_key_iv(passphrase: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
        let mut material = Vec::with_capacity(48);
        let mut block: Vec<u8> = Vec::new();
        while material.len() < 48 {
            let mut hasher = Md5::new();
            hasher.update(&block);
            hasher.update(passphrase);
            hasher.update(salt);
            block = hasher.finalize().to_vec();
            material.extend_from_slice(&block);
        }

        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&material[..32]);
        iv.copy_from_slice(&material[32..48]);
        (key, iv)
    }

    pub fn encrypt_with_salt(&self, plaintext: &str, passphrase: &str, salt: [u8; 8]) -> Result<String> {
        let (key, iv) = Self::derive_key_iv(passphrase.as_bytes(), &salt);
        let encryptor = Aes256CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| TrailError::decode(format!("cipher init: {}", e)))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut payload = Vec::with_capacity(16 + ciphertext.len());
        payload.extend_from_slice(SALT_MAGIC);
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }
}

impl Cipher for CryptoJsCipher {
    fn encrypt(&self, plaintext: &str, passphrase: &str) -> Result<String> {
        self.encrypt_with_salt(plaintext, passphrase, rand::random::<[u8; 8]>())
    }

    fn decrypt(&self, ciphertext: &str, passphrase: &str) -> Result<String> {
        let payload = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| TrailError::decode(format!("base64: {}", e)))?;
        if payload.len() < 32 || &payload[..8] != SALT_MAGIC {
            return Err(TrailError::decode("payload too short or unsalted"));
        }

        let (key, iv) = Self::derive_key_iv(passphrase.as_bytes(), &payload[8..16]);
        let decryptor = Aes256CbcDec::new_from_slices(&key, &iv)
            .map_err(|e| TrailError::decode(format!("cipher init: {}", e)))?;
        let plain = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&payload[16..])
            .map_err(|_| TrailError::decode("bad padding, wrong passphrase?"))?;
        String::from_utf8(plain).map_err(|_| TrailError::decode("plaintext is not UTF-8"))
    }

    fn hash(&self, text: &str) -> String {
        let digest = Sha512::digest(text.as_bytes());
        let mut s = String::with_capacity(128);
        for b in digest {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}
