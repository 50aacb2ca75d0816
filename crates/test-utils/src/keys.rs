//! Key generation helpers.

use bitcoin::{
    key::{Keypair, Secp256k1},
    secp256k1::SecretKey,
    XOnlyPublicKey,
};
use rand::RngCore;

/// Fresh random keypair.
pub fn gen_keypair(rng: &mut impl RngCore) -> (Keypair, XOnlyPublicKey) {
    let mut bytes = [0u8; 32];
    loop {
        rng.fill_bytes(&mut bytes);
        if let Ok(sk) = SecretKey::from_slice(&bytes) {
            let secp = Secp256k1::new();
            let keypair = Keypair::from_secret_key(&secp, &sk);
            let (pk, _) = keypair.x_only_public_key();
            return (keypair, pk);
        }
    }
}

/// Deterministic keypair from fixed bytes; handy for stable fixtures.
pub fn keypair_from_bytes(bytes: [u8; 32]) -> (Keypair, XOnlyPublicKey) {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&bytes).expect("nonzero test key bytes");
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (pk, _) = keypair.x_only_public_key();
    (keypair, pk)
}
