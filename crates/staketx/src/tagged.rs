//! OP_RETURN identification payload of a staking transaction.
//!
//! Fixed 71-byte layout: `tag(4) ‖ version(1) ‖ staker_pk(32) ‖ fp_pk(32) ‖
//! staking_time(2, big-endian)`.

use bitcoin::{
    opcodes::all::OP_RETURN,
    script::{Instruction, PushBytesBuf},
    Script, ScriptBuf, XOnlyPublicKey,
};
use thiserror::Error;

/// Wire size of the payload.
pub const TAGGED_DATA_LEN: usize = 71;

/// Payload format version this indexer understands.
pub const TAGGED_DATA_VERSION: u8 = 0;

/// Errors parsing an OP_RETURN payload as staking identification data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaggedDataError {
    #[error("payload is {0} bytes, expected {TAGGED_DATA_LEN}")]
    BadLength(usize),

    #[error("tag mismatch")]
    TagMismatch,

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid public key encoding")]
    BadPublicKey,

    #[error("script is not a single-push OP_RETURN")]
    NotOpReturn,
}

/// Decoded identification payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaggedStakingData {
    pub tag: [u8; 4],
    pub staker_pk: XOnlyPublicKey,
    pub finality_provider_pk: XOnlyPublicKey,
    pub staking_time: u16,
}

impl TaggedStakingData {
    pub fn encode(&self) -> [u8; TAGGED_DATA_LEN] {
        let mut out = [0u8; TAGGED_DATA_LEN];
        out[0..4].copy_from_slice(&self.tag);
        out[4] = TAGGED_DATA_VERSION;
        out[5..37].copy_from_slice(&self.staker_pk.serialize());
        out[37..69].copy_from_slice(&self.finality_provider_pk.serialize());
        out[69..71].copy_from_slice(&self.staking_time.to_be_bytes());
        out
    }

    /// Parses a payload, requiring `expected_tag` to open it.
    pub fn parse(bytes: &[u8], expected_tag: &[u8; 4]) -> Result<Self, TaggedDataError> {
        if bytes.len() != TAGGED_DATA_LEN {
            return Err(TaggedDataError::BadLength(bytes.len()));
        }
        if &bytes[0..4] != expected_tag {
            return Err(TaggedDataError::TagMismatch);
        }
        if bytes[4] != TAGGED_DATA_VERSION {
            return Err(TaggedDataError::UnsupportedVersion(bytes[4]));
        }

        let staker_pk = XOnlyPublicKey::from_slice(&bytes[5..37])
            .map_err(|_| TaggedDataError::BadPublicKey)?;
        let finality_provider_pk = XOnlyPublicKey::from_slice(&bytes[37..69])
            .map_err(|_| TaggedDataError::BadPublicKey)?;
        let staking_time = u16::from_be_bytes([bytes[69], bytes[70]]);

        Ok(Self {
            tag: *expected_tag,
            staker_pk,
            finality_provider_pk,
            staking_time,
        })
    }

    /// Builds the OP_RETURN script pubkey carrying this payload.
    pub fn op_return_script(&self) -> ScriptBuf {
        let push =
            PushBytesBuf::try_from(self.encode().to_vec()).expect("71 bytes fits a push");
        ScriptBuf::new_op_return(push)
    }

    /// Extracts and parses the payload from an OP_RETURN script pubkey.
    pub fn parse_from_script(
        script: &Script,
        expected_tag: &[u8; 4],
    ) -> Result<Self, TaggedDataError> {
        if !script.is_op_return() {
            return Err(TaggedDataError::NotOpReturn);
        }

        let mut instructions = script.instructions();
        match instructions.next() {
            Some(Ok(Instruction::Op(OP_RETURN))) => {}
            _ => return Err(TaggedDataError::NotOpReturn),
        }
        let payload = match instructions.next() {
            Some(Ok(Instruction::PushBytes(push))) => push.as_bytes().to_vec(),
            _ => return Err(TaggedDataError::NotOpReturn),
        };
        if instructions.next().is_some() {
            return Err(TaggedDataError::NotOpReturn);
        }

        Self::parse(&payload, expected_tag)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::key::Secp256k1;

    use super::*;

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn sample() -> TaggedStakingData {
        TaggedStakingData {
            tag: *b"tidx",
            staker_pk: key(1),
            finality_provider_pk: key(2),
            staking_time: 1_008,
        }
    }

    #[test]
    fn encode_layout() {
        let data = sample();
        let bytes = data.encode();
        assert_eq!(bytes.len(), TAGGED_DATA_LEN);
        assert_eq!(&bytes[0..4], b"tidx");
        assert_eq!(bytes[4], 0);
        assert_eq!(&bytes[69..71], &1_008u16.to_be_bytes());
    }

    #[test]
    fn script_round_trip() {
        let data = sample();
        let script = data.op_return_script();
        let parsed = TaggedStakingData::parse_from_script(&script, b"tidx").unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn wrong_tag_rejected() {
        let script = sample().op_return_script();
        assert_eq!(
            TaggedStakingData::parse_from_script(&script, b"nope"),
            Err(TaggedDataError::TagMismatch)
        );
    }

    #[test]
    fn truncated_payload_rejected() {
        assert_eq!(
            TaggedStakingData::parse(&[0u8; 20], b"tidx"),
            Err(TaggedDataError::BadLength(20))
        );
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = sample().encode();
        bytes[4] = 1;
        assert_eq!(
            TaggedStakingData::parse(&bytes, b"tidx"),
            Err(TaggedDataError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn non_op_return_rejected() {
        let script = ScriptBuf::new_p2tr_tweaked(
            crate::scripts::staking_taproot(
                &key(1),
                &key(2),
                100,
                &test_params(),
            )
            .unwrap()
            .output_key(),
        );
        assert_eq!(
            TaggedStakingData::parse_from_script(&script, b"tidx"),
            Err(TaggedDataError::NotOpReturn)
        );
    }

    fn test_params() -> stakeidx_params::StakingParams {
        stakeidx_params::StakingParams {
            version: 0,
            activation_height: 100,
            tag: *b"tidx",
            covenant_pks: vec![key(9)],
            covenant_quorum: 1,
            unbonding_time: 10,
            unbonding_fee: bitcoin::Amount::from_sat(1_000),
            min_staking_amount: bitcoin::Amount::from_sat(10_000),
            max_staking_amount: bitcoin::Amount::from_sat(10_000_000),
            min_staking_time: 10,
            max_staking_time: 65_000,
            confirmation_depth: 6,
            staking_cap: bitcoin::Amount::from_sat(50_000_000),
            cap_height: 0,
        }
    }
}
