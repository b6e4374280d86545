//! Minimal contract ABI encoding for the custody registry.
//!
//! Only the types the registry uses are supported: `string` (dynamic) and
//! `address` (static). Every head slot and length word is 32 bytes; string
//! bodies are right-padded to a multiple of 32.

use sha3::{Digest, Keccak256};

const WORD: usize = 32;

/// `storeDocument(string documentHash, string storageAddress, string keyRef, address owner)`
pub const STORE_DOCUMENT_SIGNATURE: &str = "storeDocument(string,string,string,address)";

/// `DocumentStored(uint256 indexed documentId, address indexed owner, string documentHash)`
pub const DOCUMENT_STORED_EVENT: &str = "DocumentStored(uint256,address,string)";

/// A single ABI argument
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    String(&'a str),
    Address([u8; 20]),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First 4 bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `0x`-prefixed event topic for a signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// ABI-encode a tuple of arguments (no selector).
pub fn encode(tokens: &[Token<'_>]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(address) => {
                let mut word = [0u8; WORD];
                word[WORD - 20..].copy_from_slice(address);
                head.extend_from_slice(&word);
            }
            Token::String(s) => {
                head.extend_from_slice(&usize_word(head_len + tail.len()));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&usize_word(bytes.len()));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token<'_>]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

/// Calldata for the registry's `storeDocument`.
pub fn store_document_call(
    content_hash: &str,
    storage_address: &str,
    key_material_ref: &str,
    owner: [u8; 20],
) -> Vec<u8> {
    encode_call(
        STORE_DOCUMENT_SIGNATURE,
        &[
            Token::String(content_hash),
            Token::String(storage_address),
            Token::String(key_material_ref),
            Token::Address(owner),
        ],
    )
}
