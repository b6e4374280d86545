//! AES-CBC with PKCS#7 padding.
//!
//! The key size selects the AES variant (16/24/32 bytes). Documents written
//! by the current scheme always use AES-256; the shorter variants exist so
//! legacy key candidates (e.g. an MD5 digest) can be tried as-is.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::{CipherError, Result};

/// CBC initialization vector length (one AES block)
pub const IV_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIvLength(iv.len()));
    }
    Ok(())
}

/// Encrypt `plaintext` under `key` and `iv`.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv)?;
    let bad_key = |_| CipherError::InvalidKeyLength(key.len());
    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(CipherError::InvalidKeyLength(n)),
    };
    Ok(ciphertext)
}

/// Decrypt `ciphertext` under `key` and `iv`.
///
/// `Ok` only means the padding was well-formed. It does not mean the key was
/// right.
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    check_iv(iv)?;
    let bad_key = |_| CipherError::InvalidKeyLength(key.len());
    let unpadded = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        n => return Err(CipherError::InvalidKeyLength(n)),
    };
    unpadded.map_err(|_| CipherError::Padding)
}
