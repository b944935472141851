// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Pairing identity for the mobile verification relay
//!
//! Each pairing session uses a fresh secp256k1 keypair. The relay channel
//! is addressed by a public channel ID, the base58check encoding of
//! `0x00 || RIPEMD160(SHA256(compressed pubkey))`, and payloads are sealed
//! under a symmetric [PairingKey] computed as `SHA256(private key bytes)`.
//!
//! Both values are handed to the verification app out of band via
//! [PairingIdentity::pairing_data].

use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand_core::{CryptoRng, OsRng, RngCore};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    envelope::{self, Key, KEY_LEN},
    Error,
};

/// Version byte prefixed to the channel ID hash
pub const CHANNEL_VERSION: u8 = 0x00;

/// Compressed SEC1 public key length
pub const PUBKEY_LEN: usize = 33;

/// Pairing session identity
pub struct PairingIdentity {
    secret: SecretKey,
    public: PublicKey,
    channel_id: String,
    key: PairingKey,
}

/// Pairing information exchanged with the verification app
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PairingData {
    /// Relay channel ID
    pub id: String,
    /// Base58check encoded pairing key
    pub key: String,
}

impl PairingIdentity {
    /// Generate a fresh identity using the OS RNG
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a fresh identity with the provided RNG
    ///
    /// Candidate scalars outside `[1, n)` are rejected and redrawn
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut b = Zeroizing::new([0u8; 32]);

        loop {
            rng.fill_bytes(&mut b[..]);

            if let Ok(s) = SecretKey::from_slice(&b[..]) {
                return Self::from_secret(s);
            }

            #[cfg(feature = "log")]
            log::debug!("rejected out of range pairing scalar, retrying");
        }
    }

    /// Restore an identity from raw private key bytes
    pub fn from_secret_bytes(b: &[u8]) -> Result<Self, Error> {
        let s = SecretKey::from_slice(b).map_err(|_| Error::InvalidKey)?;
        Ok(Self::from_secret(s))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        let channel_id = channel_id_for(&public);

        let mut k = Zeroizing::new([0u8; KEY_LEN]);
        k.copy_from_slice(&Sha256::digest(secret.to_bytes()));

        Self {
            secret,
            public,
            channel_id,
            key: PairingKey(k),
        }
    }

    /// Relay channel ID
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Compressed SEC1 public key
    pub fn public_key(&self) -> [u8; PUBKEY_LEN] {
        let p = self.public.to_encoded_point(true);

        let mut b = [0u8; PUBKEY_LEN];
        b.copy_from_slice(p.as_bytes());
        b
    }

    /// Raw private key bytes
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut b = Zeroizing::new([0u8; 32]);
        b.copy_from_slice(&self.secret.to_bytes());
        b
    }

    /// Symmetric pairing key
    pub fn key(&self) -> &PairingKey {
        &self.key
    }

    /// Pairing data for the verification app
    pub fn pairing_data(&self) -> PairingData {
        PairingData {
            id: self.channel_id.clone(),
            key: self.key.to_b58(),
        }
    }
}

impl core::fmt::Debug for PairingIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PairingIdentity")
            .field("channel_id", &self.channel_id)
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

/// Compute the relay channel ID for a public key
pub fn channel_id_for(public: &PublicKey) -> String {
    let p = public.to_encoded_point(true);
    let h = Ripemd160::digest(Sha256::digest(p.as_bytes()));

    let mut b = Vec::with_capacity(1 + h.len());
    b.push(CHANNEL_VERSION);
    b.extend_from_slice(&h);

    bs58::encode(b).with_check().into_string()
}

/// Symmetric key sealing relay payloads
#[derive(Clone, PartialEq)]
pub struct PairingKey(Key);

impl PairingKey {
    /// Decode a base58check encoded key
    pub fn from_b58(s: &str) -> Result<Self, Error> {
        let b = Zeroizing::new(
            bs58::decode(s)
                .with_check(None)
                .into_vec()
                .map_err(|_| Error::InvalidKey)?,
        );
        if b.len() != KEY_LEN {
            return Err(Error::InvalidKey);
        }

        let mut k = Zeroizing::new([0u8; KEY_LEN]);
        k.copy_from_slice(&b);
        Ok(Self(k))
    }

    /// Encode as base58check
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0[..]).with_check().into_string()
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Seal a relay payload, returning `IV || ciphertext`
    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        envelope::seal(&self.0, payload)
    }

    /// Open a sealed relay payload
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
        envelope::open(&self.0, blob)
    }
}

impl core::fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PairingKey(..)")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Identity for private key scalar `1`
    fn one() -> PairingIdentity {
        let mut s = [0u8; 32];
        s[31] = 1;
        PairingIdentity::from_secret_bytes(&s).unwrap()
    }

    #[test]
    fn pairing_vector() {
        let i = one();

        assert_eq!(
            hex::encode_upper(i.public_key()),
            "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798"
        );
        assert_eq!(i.channel_id(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(
            hex::encode(i.key().as_bytes()),
            "ec4916dd28fc4c10d78e287ca5d9cc51ee1ae73cbfde08c6b37324cbfaac8bc5"
        );

        let d = i.pairing_data();
        assert_eq!(d.key, "2o4baHDMeZHVe1kRfxG4DwFHCSKiYkwMdKRP2qVV3SAXkkCUkJ");
        assert_eq!(
            serde_json::to_string(&d).unwrap(),
            r#"{"id":"1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH","key":"2o4baHDMeZHVe1kRfxG4DwFHCSKiYkwMdKRP2qVV3SAXkkCUkJ"}"#
        );
    }

    #[test]
    fn key_b58_round_trip() {
        let i = one();

        let k = PairingKey::from_b58(&i.key().to_b58()).unwrap();
        assert_eq!(&k, i.key());

        // Checksum mismatch
        assert!(matches!(
            PairingKey::from_b58("2o4baHDMeZHVe1kRfxG4DwFHCSKiYkwMdKRP2qVV3SAXkkCUkK"),
            Err(Error::InvalidKey)
        ));

        // Valid base58check, wrong length
        assert!(matches!(
            PairingKey::from_b58("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"),
            Err(Error::InvalidKey)
        ));
    }

    #[test]
    fn rejects_out_of_range_secrets() {
        let tests: &[[u8; 32]] = &[
            [0u8; 32],
            [0xffu8; 32],
            // Curve order n
            [
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c,
                0xd0, 0x36, 0x41, 0x41,
            ],
        ];

        for s in tests {
            assert!(matches!(
                PairingIdentity::from_secret_bytes(s),
                Err(Error::InvalidKey)
            ));
        }
    }

    /// RNG yielding a zero scalar before falling back to the OS RNG
    struct ZeroFirst(bool);

    impl RngCore for ZeroFirst {
        fn next_u32(&mut self) -> u32 {
            OsRng.next_u32()
        }
        fn next_u64(&mut self) -> u64 {
            OsRng.next_u64()
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            match core::mem::replace(&mut self.0, false) {
                true => dest.fill(0),
                false => OsRng.fill_bytes(dest),
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for ZeroFirst {}

    #[test]
    fn generate_retries_invalid_scalar() {
        let i = PairingIdentity::generate_with_rng(&mut ZeroFirst(true));
        assert!(i.secret_bytes().iter().any(|b| *b != 0));
    }

    #[test]
    fn generated_identities_differ() {
        let a = PairingIdentity::generate();
        let b = PairingIdentity::generate();

        assert_ne!(a.channel_id(), b.channel_id());
        assert_ne!(a.key(), b.key());
        assert!(a.channel_id().starts_with('1'));
    }

    #[test]
    fn payload_seal_open() {
        let i = one();

        let blob = i.key().seal(b"{\"sign\":\"confirm\"}").unwrap();
        assert_eq!(i.key().open(&blob).unwrap(), b"{\"sign\":\"confirm\"}");

        let other = PairingIdentity::generate();
        match other.key().open(&blob) {
            Ok(v) => assert_ne!(v, b"{\"sign\":\"confirm\"}"),
            Err(e) => assert!(e.decrypt_error().is_some()),
        }
    }
}
