// Onion Layers: nested per-hop encryption for a relay path
//
// Layers are built from the last hop outwards. Each hop gets a fresh X25519
// layer keypair; the running message (the fragment id, then each previous
// ciphertext) is sealed to that hop's public key. Only the holder of a hop's
// layer key can peel its layer and learn the next ciphertext to forward.
//
// Sealed layer format:
//   sender ephemeral public key (32) || XChaCha20 nonce (24) || AEAD ciphertext

use crate::routing::path::Path;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Size of X25519 public key (bytes)
const X25519_KEY_SIZE: usize = 32;

/// Size of XChaCha20-Poly1305 nonce (bytes)
const XCHACHA_NONCE_SIZE: usize = 24;

/// Size of Poly1305 authentication tag (bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Bytes a single layer adds on top of its plaintext
pub const LAYER_OVERHEAD: usize = X25519_KEY_SIZE + XCHACHA_NONCE_SIZE + POLY1305_TAG_SIZE;

/// KDF context for layer keys. Changing this breaks every in-flight onion.
const KDF_CONTEXT: &str = "veilroute onion layer key v1";

#[derive(Debug, Error)]
pub enum OnionError {
    #[error("Crypto backend failure: {0}")]
    CryptoBackend(String),
    #[error("Invalid onion layer")]
    InvalidLayer,
    #[error("Invalid layer key")]
    InvalidLayerKey,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Path has no relays")]
    EmptyPath,
}

/// Builds onion layers for a path
#[derive(Debug, Default, Clone, Copy)]
pub struct OnionEncryptor;

impl OnionEncryptor {
    pub fn new() -> Self {
        OnionEncryptor
    }

    /// Build one layer per hop, innermost first
    ///
    /// Stores each hop's layer private key into `path.keys[hop].layer_key`.
    /// The last ciphertext returned is the outermost layer, handed to the
    /// first relay.
    pub fn build_layers(&self, path: &mut Path) -> Result<Vec<Vec<u8>>, OnionError> {
        if path.keys.is_empty() {
            return Err(OnionError::EmptyPath);
        }

        let mut layers: Vec<Vec<u8>> = Vec::with_capacity(path.keys.len());
        for key in path.keys.iter_mut().rev() {
            let layer_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
            let layer_public = PublicKey::from(&layer_secret);

            let message: &[u8] = match layers.last() {
                Some(previous) => previous,
                None => path.fragment_id.as_bytes(),
            };
            let ciphertext = seal(&layer_public, message)?;
            layers.push(ciphertext);

            key.layer_key.zeroize();
            key.layer_key = layer_secret.to_bytes().to_vec();
        }

        Ok(layers)
    }
}

/// Seal `plaintext` to `recipient`
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, OnionError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(recipient);
    if !shared_secret.was_contributory() {
        return Err(OnionError::CryptoBackend("non-contributory key exchange".to_string()));
    }

    let mut key = derive_layer_key(shared_secret.as_bytes(), &ephemeral_public, recipient);
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| OnionError::CryptoBackend(e.to_string()));
    key.zeroize();
    let cipher = cipher?;

    let mut nonce_bytes = [0u8; XCHACHA_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let aad = binding(&ephemeral_public, recipient);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad: &aad })
        .map_err(|e| OnionError::CryptoBackend(e.to_string()))?;

    let mut sealed = Vec::with_capacity(X25519_KEY_SIZE + XCHACHA_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Peel one layer with the hop's layer key
///
/// Returns the next layer to forward, or the fragment id bytes at the final
/// hop.
pub fn peel_layer(layer: &[u8], layer_key: &[u8]) -> Result<Vec<u8>, OnionError> {
    if layer.len() < LAYER_OVERHEAD {
        return Err(OnionError::InvalidLayer);
    }
    let mut secret_bytes: [u8; X25519_KEY_SIZE] =
        layer_key.try_into().map_err(|_| OnionError::InvalidLayerKey)?;
    let secret = StaticSecret::from(secret_bytes);
    secret_bytes.zeroize();
    let own_public = PublicKey::from(&secret);

    let (ephemeral_bytes, rest) = layer.split_at(X25519_KEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(XCHACHA_NONCE_SIZE);
    let ephemeral_array: [u8; X25519_KEY_SIZE] =
        ephemeral_bytes.try_into().map_err(|_| OnionError::InvalidLayer)?;
    let ephemeral_public = PublicKey::from(ephemeral_array);

    let shared_secret = secret.diffie_hellman(&ephemeral_public);
    if !shared_secret.was_contributory() {
        return Err(OnionError::DecryptionFailed);
    }

    let mut key = derive_layer_key(shared_secret.as_bytes(), &ephemeral_public, &own_public);
    let cipher = XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| OnionError::CryptoBackend(e.to_string()));
    key.zeroize();
    let cipher = cipher?;
    let aad = binding(&ephemeral_public, &own_public);

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad: &aad })
        .map_err(|_| OnionError::DecryptionFailed)
}

/// Peel every layer of an encrypted path in hop order
///
/// Returns what the final hop recovers.
pub fn peel_path(path: &Path) -> Result<Vec<u8>, OnionError> {
    let mut current = path.outermost_layer().ok_or(OnionError::EmptyPath)?.to_vec();
    for key in &path.keys {
        current = peel_layer(&current, &key.layer_key)?;
    }
    Ok(current)
}

fn derive_layer_key(shared_secret: &[u8], ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(shared_secret);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    *hasher.finalize().as_bytes()
}

fn binding(ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; 2 * X25519_KEY_SIZE] {
    let mut aad = [0u8; 2 * X25519_KEY_SIZE];
    aad[..X25519_KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    aad[X25519_KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Amount;
    use crate::relay::Relay;

    fn test_path(hops: usize) -> Path {
        let relays = (0..hops)
            .map(|i| Relay {
                id: format!("relay_{}", i),
                address: format!("10.{}.0.1", i),
                bandwidth: 0,
                reputation: 0.9,
                last_active: 0,
                stake: Amount::from_whole(150),
                connections: 0,
                failed_attempts: 0,
            })
            .collect();
        Path::new("fragment-abc123", relays, 0, 600)
    }

    #[test]
    fn test_build_layers_one_per_hop() {
        for hops in 1..=5 {
            let mut path = test_path(hops);
            let layers = OnionEncryptor::new().build_layers(&mut path).unwrap();
            assert_eq!(layers.len(), hops);
            assert!(path.keys.iter().all(|k| k.layer_key.len() == X25519_KEY_SIZE));
        }
    }

    #[test]
    fn test_layers_grow_outwards() {
        let mut path = test_path(3);
        let layers = OnionEncryptor::new().build_layers(&mut path).unwrap();
        let id_len = path.fragment_id.len();
        for (i, layer) in layers.iter().enumerate() {
            assert_eq!(layer.len(), id_len + (i + 1) * LAYER_OVERHEAD);
        }
    }

    #[test]
    fn test_peel_path_recovers_fragment_id() {
        let mut path = test_path(4);
        path.onion_layers = OnionEncryptor::new().build_layers(&mut path).unwrap();
        let recovered = peel_path(&path).unwrap();
        assert_eq!(recovered, b"fragment-abc123");
    }

    #[test]
    fn test_each_hop_reveals_next_layer() {
        let mut path = test_path(3);
        path.onion_layers = OnionEncryptor::new().build_layers(&mut path).unwrap();

        // First hop peels the outermost layer and learns the middle one.
        let middle = peel_layer(&path.onion_layers[2], &path.keys[0].layer_key).unwrap();
        assert_eq!(middle, path.onion_layers[1]);
        let inner = peel_layer(&middle, &path.keys[1].layer_key).unwrap();
        assert_eq!(inner, path.onion_layers[0]);
        let id = peel_layer(&inner, &path.keys[2].layer_key).unwrap();
        assert_eq!(id, path.fragment_id.as_bytes());
    }

    #[test]
    fn test_wrong_hop_key_fails() {
        let mut path = test_path(3);
        path.onion_layers = OnionEncryptor::new().build_layers(&mut path).unwrap();
        let result = peel_layer(&path.onion_layers[2], &path.keys[1].layer_key);
        assert!(matches!(result, Err(OnionError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_layer_fails() {
        let mut path = test_path(3);
        path.onion_layers = OnionEncryptor::new().build_layers(&mut path).unwrap();
        let mut outer = path.onion_layers[2].clone();
        let last = outer.len() - 1;
        outer[last] ^= 0x01;
        assert!(peel_layer(&outer, &path.keys[0].layer_key).is_err());
    }

    #[test]
    fn test_peel_rejects_short_input() {
        assert!(matches!(
            peel_layer(&[0u8; 10], &[1u8; 32]),
            Err(OnionError::InvalidLayer)
        ));
        assert!(matches!(
            peel_layer(&[0u8; LAYER_OVERHEAD], &[1u8; 7]),
            Err(OnionError::InvalidLayerKey)
        ));
    }

    #[test]
    fn test_layer_keys_unique_per_build() {
        let mut path = test_path(2);
        OnionEncryptor::new().build_layers(&mut path).unwrap();
        let first = path.keys[0].layer_key.clone();
        OnionEncryptor::new().build_layers(&mut path).unwrap();
        assert_ne!(first, path.keys[0].layer_key);
    }

    #[test]
    fn test_build_layers_empty_path() {
        let mut path = test_path(0);
        assert!(matches!(
            OnionEncryptor::new().build_layers(&mut path),
            Err(OnionError::EmptyPath)
        ));
    }
}
