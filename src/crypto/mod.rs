//! Payload encryption: PBKDF2-HMAC-SHA-256 key derivation + AES-256-CBC.
//!
//! Encrypted payload layout: `salt (16 B) | iv (16 B) | ciphertext`, where
//! the ciphertext is PKCS#7-padded and therefore always a positive multiple
//! of the AES block size. Wrong password and corruption are
//! indistinguishable here; both fail the padding check.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{Error, Result};

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const AES_BLOCK: usize = 16;

/// On-disk invariant: changing the count invalidates existing archives.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HMAC-SHA-256 of `msg` under `key` (RFC 2104).
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Derives the AES-256 key from a password and salt.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Fills `buf` from the OS entropy source. Failure surfaces as `Io`.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::Io(format!("entropy source failure: {e}")))
}

/// Encrypts `plaintext` under `password`, returning
/// `salt | iv | AES-256-CBC(PKCS7(plaintext))` with fresh salt and IV.
pub fn encrypt(password: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    random_bytes(&mut salt)?;
    random_bytes(&mut iv)?;

    let mut key = derive_key(password.as_bytes(), &salt);
    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    key.zeroize();

    let mut out = Vec::new();
    out.try_reserve_exact(SALT_LEN + IV_LEN + ciphertext.len())
        .map_err(|_| Error::Memory("encrypted payload buffer".into()))?;
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`encrypt`]. Any deviation (short input,
/// misaligned ciphertext, bad padding, wrong password) fails with `Format`.
pub fn decrypt(password: &str, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < SALT_LEN + IV_LEN + AES_BLOCK {
        return Err(Error::Format("encrypted payload too short".into()));
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);
    if ciphertext.len() % AES_BLOCK != 0 {
        return Err(Error::Format("ciphertext not block-aligned".into()));
    }

    let salt: [u8; SALT_LEN] = salt.try_into().unwrap();
    let iv: [u8; IV_LEN] = iv.try_into().unwrap();

    let mut key = derive_key(password.as_bytes(), &salt);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Format("decryption failed: wrong password or corrupted data".into()));
    key.zeroize();
    plaintext
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    #[test]
    fn sha256_fips_vectors() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(sha256(
                b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq"
            )),
            "248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_vectors() {
        // Test case 1
        assert_eq!(
            hex::encode(hmac_sha256(&[0x0b; 20], b"Hi There")),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
        // Test case 2
        assert_eq!(
            hex::encode(hmac_sha256(b"Jefe", b"what do ya want for nothing?")),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn aes256_fips197_c3_vector() {
        let key = hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .unwrap();
        let cipher = Aes256::new(GenericArray::from_slice(&key));
        let mut block =
            GenericArray::clone_from_slice(&hex::decode("00112233445566778899aabbccddeeff").unwrap());
        cipher.encrypt_block(&mut block);
        assert_eq!(hex::encode(block), "8ea2b7ca516745bfeafc49904b496089");
    }

    #[test]
    fn pbkdf2_sha256_rfc7914_vectors() {
        let mut dk = [0u8; 64];
        pbkdf2_hmac::<Sha256>(b"passwd", b"salt", 1, &mut dk);
        assert_eq!(
            hex::encode(dk),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc\
             49ca9cccf179b645991664b39d77ef317c71b845b1e30bd509112041d3a19783"
        );

        pbkdf2_hmac::<Sha256>(b"Password", b"NaCl", 80_000, &mut dk);
        assert_eq!(
            hex::encode(dk),
            "4ddcd8f60b98be21830cee5ef22701f9641a4418d04c0414aeff08876b34ab56\
             a1d425a1225833549adb841b51c9b3176a272bdebba1d078478f62b397f33c8d"
        );
    }

    #[test]
    fn encrypt_layout_and_round_trip() {
        let plaintext = b"attack at dawn";
        let blob = encrypt("correct horse", plaintext).unwrap();

        // salt + iv + one padded block
        assert_eq!(blob.len(), SALT_LEN + IV_LEN + 16);
        assert_eq!(decrypt("correct horse", &blob).unwrap(), plaintext);
    }

    #[test]
    fn ciphertext_always_gains_a_padding_block() {
        for len in [0usize, 1, 15, 16, 17, 32, 1000] {
            let data = vec![0xA5u8; len];
            let blob = encrypt("pw", &data).unwrap();
            let ct_len = blob.len() - SALT_LEN - IV_LEN;
            assert_eq!(ct_len, (len / AES_BLOCK + 1) * AES_BLOCK, "len {len}");
        }
    }

    #[test]
    fn wrong_password_is_a_format_error() {
        let blob = encrypt("right", b"payload bytes").unwrap();
        let err = decrypt("wrong", &blob).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let blob = encrypt("pw", b"payload bytes").unwrap();
        assert!(decrypt("pw", &blob[..SALT_LEN + IV_LEN]).is_err());
        assert!(decrypt("pw", &blob[..blob.len() - 1]).is_err());
    }

    #[test]
    fn fresh_salt_and_iv_per_call() {
        let a = encrypt("pw", b"same input").unwrap();
        let b = encrypt("pw", b"same input").unwrap();
        assert_ne!(a[..SALT_LEN + IV_LEN], b[..SALT_LEN + IV_LEN]);
    }
}
