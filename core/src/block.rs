use crate::amount::XAmount;
use crate::errors::BlockError;
use crate::field::{FieldType, LinkField, PublicKeyField, FIELD_COUNT, FIELD_SIZE};
use crate::hash::Hash256;
use xdag_crypto::{double_sha256, KeyPair, Signature64};

/// Serialised block size. Every block on the wire and in the store is
/// exactly this many bytes.
pub const BLOCK_SIZE: usize = FIELD_COUNT * FIELD_SIZE;

/// Maximum tolerated clock drift for incoming block timestamps.
pub const MAX_TIMESTAMP_DRIFT_MS: u64 = 2_000;

/// One decoded field slot. Signature fields span two consecutive slots
/// (r then s); everything else occupies one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Input(LinkField),
    Output(LinkField),
    SignIn(Signature64),
    SignOut(Signature64),
    PublicKey(PublicKeyField),
    Nonce([u8; FIELD_SIZE]),
    Remark([u8; FIELD_SIZE]),
    Reserved([u8; FIELD_SIZE]),
}

impl Field {
    fn slot_width(&self) -> usize {
        match self {
            Field::SignIn(_) | Field::SignOut(_) => 2,
            _ => 1,
        }
    }
}

/// A DAG block: the header quadwords from slot 0 plus the remaining field
/// slots in wire order.
///
/// `decode(encode(b)) == b` byte for byte; the hash is the double SHA-256 of
/// the 512-byte encoding, and the low view of that hash is the store key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Tag quadword; salts the hash of locally minted blocks and never
    /// participates in store lookups.
    pub transport: u64,
    /// Milliseconds since the epoch.
    pub timestamp: u64,
    /// Declared fee, which must equal inputs minus outputs.
    pub fee: XAmount,
    /// Slots 1.. in wire order.
    pub fields: Vec<Field>,
}

impl Block {
    /// Parses a 512-byte buffer, rejecting illegal nibble compositions.
    pub fn decode(bytes: &[u8]) -> Result<Block, BlockError> {
        if bytes.len() != BLOCK_SIZE {
            return Err(BlockError::WrongSize(bytes.len()));
        }

        let transport = read_u64(bytes, 0);
        let type_word = read_u64(bytes, 8);
        let timestamp = read_u64(bytes, 16);
        let fee = XAmount::from_raw(read_u64(bytes, 24));

        if nibble_at(type_word, 0) != FieldType::Header.nibble() {
            return Err(BlockError::MissingHeader);
        }

        let mut fields = Vec::new();
        let mut seen_nonce = false;
        let mut seen_remark = false;
        let mut slot = 1;
        while slot < FIELD_COUNT {
            let nibble = nibble_at(type_word, slot);
            let ft = FieldType::from_nibble(nibble)
                .ok_or(BlockError::UnknownFieldType(nibble))?;
            let content: [u8; FIELD_SIZE] = slot_bytes(bytes, slot);
            match ft {
                FieldType::Header => return Err(BlockError::StrayHeader),
                FieldType::Nonce => {
                    if seen_nonce {
                        return Err(BlockError::MultipleNonce);
                    }
                    seen_nonce = true;
                    fields.push(Field::Nonce(content));
                }
                FieldType::Remark => {
                    if seen_remark {
                        return Err(BlockError::MultipleRemark);
                    }
                    seen_remark = true;
                    fields.push(Field::Remark(content));
                }
                FieldType::InputLink => fields.push(Field::Input(LinkField::decode(&content))),
                FieldType::OutputLink => fields.push(Field::Output(LinkField::decode(&content))),
                FieldType::PublicKeyEven | FieldType::PublicKeyOdd => {
                    fields.push(Field::PublicKey(PublicKeyField {
                        x: content,
                        odd: ft == FieldType::PublicKeyOdd,
                    }));
                }
                FieldType::SignIn | FieldType::SignOut => {
                    // signatures are r then s in two same-tagged slots
                    if slot + 1 >= FIELD_COUNT || nibble_at(type_word, slot + 1) != nibble {
                        return Err(BlockError::DanglingSignature);
                    }
                    let mut sig = [0u8; 64];
                    sig[..32].copy_from_slice(&content);
                    sig[32..].copy_from_slice(&slot_bytes(bytes, slot + 1));
                    if ft == FieldType::SignIn {
                        fields.push(Field::SignIn(sig));
                    } else {
                        fields.push(Field::SignOut(sig));
                    }
                    slot += 1;
                }
                FieldType::Reserved => fields.push(Field::Reserved(content)),
            }
            slot += 1;
        }

        // trailing zero padding is an encoding artifact, not block content
        while matches!(fields.last(), Some(Field::Reserved(c)) if c.iter().all(|b| *b == 0)) {
            fields.pop();
        }

        Ok(Block {
            transport,
            timestamp,
            fee,
            fields,
        })
    }

    /// Serialises to the canonical 512-byte form, padding unused trailing
    /// slots with zeroed reserved fields.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        let mut type_word = FieldType::Header.nibble() as u64;

        out[0..8].copy_from_slice(&self.transport.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        out[24..32].copy_from_slice(&self.fee.to_le_bytes());

        let mut slot = 1;
        for field in &self.fields {
            debug_assert!(slot + field.slot_width() <= FIELD_COUNT);
            match field {
                Field::Input(link) => {
                    set_slot(&mut out, &mut type_word, slot, FieldType::InputLink, &link.encode());
                }
                Field::Output(link) => {
                    set_slot(&mut out, &mut type_word, slot, FieldType::OutputLink, &link.encode());
                }
                Field::PublicKey(pk) => {
                    set_slot(&mut out, &mut type_word, slot, pk.field_type(), &pk.x);
                }
                Field::Nonce(content) => {
                    set_slot(&mut out, &mut type_word, slot, FieldType::Nonce, content);
                }
                Field::Remark(content) => {
                    set_slot(&mut out, &mut type_word, slot, FieldType::Remark, content);
                }
                Field::Reserved(content) => {
                    set_slot(&mut out, &mut type_word, slot, FieldType::Reserved, content);
                }
                Field::SignIn(sig) | Field::SignOut(sig) => {
                    let ft = if matches!(field, Field::SignIn(_)) {
                        FieldType::SignIn
                    } else {
                        FieldType::SignOut
                    };
                    let (r, s) = sig.split_at(32);
                    set_slot(&mut out, &mut type_word, slot, ft, r.try_into().expect("32-byte half"));
                    set_slot(&mut out, &mut type_word, slot + 1, ft, s.try_into().expect("32-byte half"));
                }
            }
            slot += field.slot_width();
        }
        for pad in slot..FIELD_COUNT {
            type_word |= (FieldType::Reserved.nibble() as u64) << (4 * pad);
        }

        out[8..16].copy_from_slice(&type_word.to_le_bytes());
        out
    }

    /// The full content hash: double SHA-256 of the encoding.
    pub fn hash(&self) -> Hash256 {
        Hash256::from_bytes(double_sha256(&self.encode()))
    }

    /// The store key for this block.
    pub fn hashlow(&self) -> Hash256 {
        self.hash().low()
    }

    /// One-second election window this block belongs to.
    pub fn epoch(&self) -> u64 {
        self.timestamp / 1_000
    }

    /// Digest covered by every signature in the block: the encoding with all
    /// signature slot contents zeroed (type word untouched).
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut stripped = self.clone();
        for field in &mut stripped.fields {
            match field {
                Field::SignIn(sig) | Field::SignOut(sig) => *sig = [0u8; 64],
                _ => {}
            }
        }
        double_sha256(&stripped.encode())
    }

    /// Signs the block in place, filling every empty in-signature slot.
    pub fn apply_sign_in(&mut self, pair: &KeyPair) {
        let sig = pair.sign(&self.signing_digest());
        for field in &mut self.fields {
            if let Field::SignIn(slot) = field {
                if slot.iter().all(|b| *b == 0) {
                    *slot = sig;
                }
            }
        }
    }

    /// Signs the block in place, filling every empty out-signature slot.
    pub fn apply_sign_out(&mut self, pair: &KeyPair) {
        let sig = pair.sign(&self.signing_digest());
        for field in &mut self.fields {
            if let Field::SignOut(slot) = field {
                if slot.iter().all(|b| *b == 0) {
                    *slot = sig;
                }
            }
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &LinkField> {
        self.fields.iter().filter_map(|f| match f {
            Field::Input(link) => Some(link),
            _ => None,
        })
    }

    pub fn outputs(&self) -> impl Iterator<Item = &LinkField> {
        self.fields.iter().filter_map(|f| match f {
            Field::Output(link) => Some(link),
            _ => None,
        })
    }

    /// Every link in slot order, with the direction flag (true = input).
    pub fn links(&self) -> impl Iterator<Item = (&LinkField, bool)> {
        self.fields.iter().filter_map(|f| match f {
            Field::Input(link) => Some((link, true)),
            Field::Output(link) => Some((link, false)),
            _ => None,
        })
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &PublicKeyField> {
        self.fields.iter().filter_map(|f| match f {
            Field::PublicKey(pk) => Some(pk),
            _ => None,
        })
    }

    pub fn in_signatures(&self) -> impl Iterator<Item = &Signature64> {
        self.fields.iter().filter_map(|f| match f {
            Field::SignIn(sig) => Some(sig),
            _ => None,
        })
    }

    pub fn out_signatures(&self) -> impl Iterator<Item = &Signature64> {
        self.fields.iter().filter_map(|f| match f {
            Field::SignOut(sig) => Some(sig),
            _ => None,
        })
    }

    pub fn remark(&self) -> Option<&[u8; FIELD_SIZE]> {
        self.fields.iter().find_map(|f| match f {
            Field::Remark(content) => Some(content),
            _ => None,
        })
    }
}

/// Incremental block construction; the builder tracks the slot budget so
/// `build` never produces an unencodable block.
pub struct BlockBuilder {
    block: Block,
}

impl BlockBuilder {
    pub fn new(timestamp: u64) -> Self {
        Self {
            block: Block {
                transport: 0,
                timestamp,
                fee: XAmount::ZERO,
                fields: Vec::new(),
            },
        }
    }

    /// Salts the tag quadword; locally minted blocks use a random salt.
    pub fn transport(mut self, tag: u64) -> Self {
        self.block.transport = tag;
        self
    }

    pub fn random_transport(self) -> Self {
        let tag: u64 = rand::random();
        self.transport(tag)
    }

    pub fn input(mut self, link: Hash256, amount: XAmount) -> Self {
        self.block.fields.push(Field::Input(LinkField::new(link, amount)));
        self
    }

    pub fn output(mut self, link: Hash256, amount: XAmount) -> Self {
        self.block.fields.push(Field::Output(LinkField::new(link, amount)));
        self
    }

    pub fn public_key(mut self, x: [u8; 32], odd: bool) -> Self {
        self.block.fields.push(Field::PublicKey(PublicKeyField { x, odd }));
        self
    }

    pub fn remark(mut self, remark: &[u8]) -> Self {
        self.block
            .fields
            .push(Field::Remark(crate::field::pad_remark(remark)));
        self
    }

    pub fn nonce(mut self, content: [u8; FIELD_SIZE]) -> Self {
        self.block.fields.push(Field::Nonce(content));
        self
    }

    /// Reserves an in-signature slot pair, filled later by `apply_sign_in`.
    pub fn sign_in_slot(mut self) -> Self {
        self.block.fields.push(Field::SignIn([0u8; 64]));
        self
    }

    /// Reserves an out-signature slot pair, filled later by `apply_sign_out`.
    pub fn sign_out_slot(mut self) -> Self {
        self.block.fields.push(Field::SignOut([0u8; 64]));
        self
    }

    pub fn fee(mut self, fee: XAmount) -> Self {
        self.block.fee = fee;
        self
    }

    pub fn build(self) -> Result<Block, BlockError> {
        let used: usize = 1 + self
            .block
            .fields
            .iter()
            .map(Field::slot_width)
            .sum::<usize>();
        if used > FIELD_COUNT {
            return Err(BlockError::TooManyFields);
        }
        Ok(self.block)
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut le = [0u8; 8];
    le.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(le)
}

fn nibble_at(type_word: u64, slot: usize) -> u8 {
    ((type_word >> (4 * slot)) & 0xF) as u8
}

fn slot_bytes(bytes: &[u8], slot: usize) -> [u8; FIELD_SIZE] {
    let mut out = [0u8; FIELD_SIZE];
    out.copy_from_slice(&bytes[slot * FIELD_SIZE..(slot + 1) * FIELD_SIZE]);
    out
}

fn set_slot(
    out: &mut [u8; BLOCK_SIZE],
    type_word: &mut u64,
    slot: usize,
    ft: FieldType,
    content: &[u8; FIELD_SIZE],
) {
    *type_word |= (ft.nibble() as u64) << (4 * slot);
    out[slot * FIELD_SIZE..(slot + 1) * FIELD_SIZE].copy_from_slice(content);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        BlockBuilder::new(1_700_000_000_123)
            .transport(0xfeed)
            .input(Hash256::from_le_u64([0, 1, 2, 3]), XAmount::of_xdag(7))
            .output(Hash256::from_le_u64([0, 4, 5, 6]), XAmount::of_xdag(6))
            .fee(XAmount::of_xdag(1))
            .remark(b"sample")
            .sign_in_slot()
            .build()
            .unwrap()
    }

    #[test]
    fn encode_decode_identity() {
        let block = sample_block();
        let bytes = block.encode();
        let decoded = Block::decode(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn hash_is_stable_across_encodings() {
        let block = sample_block();
        let reparsed = Block::decode(&block.encode()).unwrap();
        assert_eq!(block.hash(), reparsed.hash());
    }

    #[test]
    fn transport_salts_hash_but_not_low() {
        let a = sample_block();
        let mut b = a.clone();
        b.transport = 0xbeef;
        assert_ne!(a.hash(), b.hash());
        // low-hash differs too (the tag feeds the content hash) but the low
        // view of any one hash always zeroes the first 8 bytes
        assert!(a.hashlow().is_low());
        assert!(b.hashlow().is_low());
    }

    #[test]
    fn wrong_size_rejected() {
        assert_eq!(
            Block::decode(&[0u8; 100]),
            Err(BlockError::WrongSize(100))
        );
    }

    #[test]
    fn missing_header_rejected() {
        let mut bytes = sample_block().encode();
        // overwrite nibble 0 with a nonce tag
        let mut type_word = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        type_word &= !0xF;
        bytes[8..16].copy_from_slice(&type_word.to_le_bytes());
        assert_eq!(Block::decode(&bytes), Err(BlockError::MissingHeader));
    }

    #[test]
    fn dangling_signature_rejected() {
        let mut bytes = sample_block().encode();
        let mut type_word = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        // turn the second half of the in-signature pair into a reserved slot
        let sig_start = 4; // header, input, output, remark, sign_in at 4/5
        type_word &= !(0xFu64 << (4 * (sig_start + 1)));
        type_word |= (FieldType::Reserved.nibble() as u64) << (4 * (sig_start + 1));
        bytes[8..16].copy_from_slice(&type_word.to_le_bytes());
        assert_eq!(Block::decode(&bytes), Err(BlockError::DanglingSignature));
    }

    #[test]
    fn duplicate_nonce_rejected() {
        let block = BlockBuilder::new(1)
            .nonce([1u8; 32])
            .build()
            .unwrap();
        let mut bytes = block.encode();
        let mut type_word = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        // tag a second slot as nonce
        type_word &= !(0xFu64 << 8);
        bytes[8..16].copy_from_slice(&type_word.to_le_bytes());
        assert_eq!(Block::decode(&bytes), Err(BlockError::MultipleNonce));
    }

    #[test]
    fn slot_budget_enforced() {
        let mut builder = BlockBuilder::new(1);
        for i in 0..8 {
            builder = builder.sign_out_slot().nonce([i as u8; 32]);
        }
        assert_eq!(builder.build(), Err(BlockError::TooManyFields));
    }

    #[test]
    fn signing_digest_ignores_signature_content() {
        let mut signed = sample_block();
        let unsigned_digest = signed.signing_digest();
        let pair = xdag_crypto::KeyPair::generate();
        signed.apply_sign_in(&pair);
        assert_eq!(signed.signing_digest(), unsigned_digest);
        assert_ne!(signed.hash(), {
            let mut b = signed.clone();
            for f in &mut b.fields {
                if let Field::SignIn(sig) = f {
                    *sig = [0u8; 64];
                }
            }
            b.hash()
        });
    }

    #[test]
    fn signature_verifies_against_block_key() {
        let pair = xdag_crypto::KeyPair::generate();
        let (x, odd) = pair.public_xonly();
        let mut block = BlockBuilder::new(9_000)
            .public_key(x, odd)
            .sign_out_slot()
            .build()
            .unwrap();
        block.apply_sign_out(&pair);
        let digest = block.signing_digest();
        let sig = block.out_signatures().next().unwrap();
        let pk = block.public_keys().next().unwrap();
        assert!(xdag_crypto::recover_compressed(&digest, sig, &pk.compressed()));
    }
}
