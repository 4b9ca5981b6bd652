//! OCB2-AES128 authenticated UDP crypto
//!
//! Mumble's voice channel is encrypted with OCB2 (Offset Codebook Mode
//! v2) over a raw AES-128 block cipher — an authenticated mode that
//! produces ciphertext the same length as the plaintext plus a 16-byte
//! tag/checksum, with no separate nonce transmitted: only the low byte
//! of the 16-byte IV rides on the wire, the other 15 bytes are inferred
//! from the receiver's own IV state. [`CryptState`] also tracks a small
//! anti-replay history.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use murmur_core::MurmurError;
use rand::RngCore;

const BLOCK_SIZE: usize = 16;
/// Width of the anti-replay / late-packet history window.
const HISTORY_SIZE: usize = 0x100;

type Block = [u8; BLOCK_SIZE];

fn xor_block(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Doubles a block in GF(2^128), the standard OCB `S2` operation.
fn s2(block: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    let carry = block[0] & 0x80 != 0;
    for i in 0..BLOCK_SIZE - 1 {
        out[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    out[BLOCK_SIZE - 1] = block[BLOCK_SIZE - 1] << 1;
    if carry {
        out[BLOCK_SIZE - 1] ^= 0x87;
    }
    out
}

/// `S3(x) = S2(x) xor x`, OCB's other block-doubling helper.
fn s3(block: &Block) -> Block {
    xor_block(&s2(block), block)
}

fn aes_encrypt(cipher: &Aes128, block: &Block) -> Block {
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

fn zero_block() -> Block {
    [0u8; BLOCK_SIZE]
}

/// Running OCB2 encrypt/decrypt state for one direction of a connection.
///
/// Nonce resynchronization after a dropped/out-of-order packet always
/// carries its borrow/carry into `decrypt_iv`, never `encrypt_iv`, on
/// both the "late" and "lost many" branches; `decrypt` copies the IV
/// into a local before mutating it and only commits that local back to
/// `self.decrypt_iv` once the tag has verified, rather than
/// speculatively mutating shared state and rolling it back on failure.
pub struct CryptState {
    key: [u8; BLOCK_SIZE],
    encrypt_iv: [u8; BLOCK_SIZE],
    decrypt_iv: [u8; BLOCK_SIZE],
    has_key: bool,
    has_encrypt_iv: bool,
    has_decrypt_iv: bool,

    decrypt_history: [u8; HISTORY_SIZE],
    stats: CryptStats,
}

/// Counters tracking packet delivery health for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptStats {
    pub good: u64,
    pub late: u64,
    pub lost: u64,
}

impl CryptState {
    pub fn new() -> Self {
        Self {
            key: zero_block(),
            encrypt_iv: zero_block(),
            decrypt_iv: zero_block(),
            has_key: false,
            has_encrypt_iv: false,
            has_decrypt_iv: false,
            decrypt_history: [0u8; HISTORY_SIZE],
            stats: CryptStats::default(),
        }
    }

    /// Generates a fresh random key and pair of IVs: 48 random bytes
    /// partitioned as `key[0..16] | decrypt_iv[16..32] | encrypt_iv[32..48]`.
    pub fn generate_key(&mut self) {
        let mut material = [0u8; 3 * BLOCK_SIZE];
        rand::rng().fill_bytes(&mut material);
        self.key.copy_from_slice(&material[0..BLOCK_SIZE]);
        self.decrypt_iv
            .copy_from_slice(&material[BLOCK_SIZE..2 * BLOCK_SIZE]);
        self.encrypt_iv
            .copy_from_slice(&material[2 * BLOCK_SIZE..3 * BLOCK_SIZE]);
        self.has_key = true;
        self.has_encrypt_iv = true;
        self.has_decrypt_iv = true;
        self.decrypt_history = [0u8; HISTORY_SIZE];
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<(), MurmurError> {
        self.key = to_block(key)?;
        self.has_key = true;
        Ok(())
    }

    pub fn set_encrypt_iv(&mut self, iv: &[u8]) -> Result<(), MurmurError> {
        self.encrypt_iv = to_block(iv)?;
        self.has_encrypt_iv = true;
        Ok(())
    }

    pub fn set_decrypt_iv(&mut self, iv: &[u8]) -> Result<(), MurmurError> {
        self.decrypt_iv = to_block(iv)?;
        self.has_decrypt_iv = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.has_key && self.has_encrypt_iv && self.has_decrypt_iv
    }

    pub fn stats(&self) -> CryptStats {
        self.stats
    }

    /// Current encrypt-direction IV, exposed so `CryptSetup` resync
    /// messages can tell a peer which IV to expect next.
    pub fn encrypt_iv(&self) -> [u8; BLOCK_SIZE] {
        self.encrypt_iv
    }

    /// Encrypts `plaintext`, producing `1 (nonce byte) + plaintext.len() + 3 (tag)` bytes.
    ///
    /// Mumble only transmits 3 bytes of the 16-byte OCB tag, trading
    /// authentication strength for per-packet overhead.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, MurmurError> {
        if !self.is_ready() {
            return Err(MurmurError::NotReady);
        }
        increment_iv(&mut self.encrypt_iv);
        let cipher = Aes128::new(&GenericArray::from(self.key));

        let (ciphertext, tag) = ocb_encrypt(&cipher, &self.encrypt_iv, plaintext);

        let mut out = Vec::with_capacity(1 + ciphertext.len() + 3);
        out.push(self.encrypt_iv[0]);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag[0..3]);
        Ok(out)
    }

    /// Decrypts a packet produced by [`encrypt`](Self::encrypt).
    ///
    /// Reconstructs the full 16-byte nonce from the wire's single nonce
    /// byte and the receiver's own `decrypt_iv`, in a local copy; only
    /// on a verified tag is any state committed back into `self` (see
    /// the struct-level doc comment). Late packets (`restore == true`)
    /// are authenticated against a nonce built from the local copy, but
    /// never advance `self.decrypt_iv` — only their replay-history
    /// entry and the `late`/`lost` stat counters are committed.
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, MurmurError> {
        if !self.is_ready() {
            return Err(MurmurError::NotReady);
        }
        if packet.len() < 4 {
            return Err(MurmurError::Truncated {
                needed: 4,
                have: packet.len(),
            });
        }

        let nonce_byte = packet[0];
        let ciphertext = &packet[1..packet.len() - 3];
        let received_tag = &packet[packet.len() - 3..];

        let saveiv = self.decrypt_iv;
        let mut local_iv = self.decrypt_iv;

        let expected = local_iv[0].wrapping_add(1);
        let mut late = 0u64;
        let mut lost: i64 = 0;
        let mut restore = false;

        if nonce_byte == expected {
            // The straightforward in-order case; the unreachable
            // "nonce_byte == local_iv[0]" branch is omitted.
            if nonce_byte > local_iv[0] {
                local_iv[0] = nonce_byte;
            } else {
                local_iv[0] = nonce_byte;
                increment_iv_bytes(&mut local_iv, 1);
            }
        } else {
            let diff = normalized_diff(nonce_byte, local_iv[0]);
            if nonce_byte < local_iv[0] && diff > -30 && diff < 0 {
                // Late, no wraparound.
                late = 1;
                lost = -1;
                local_iv[0] = nonce_byte;
                restore = true;
            } else if nonce_byte > local_iv[0] && diff > -30 && diff < 0 {
                // Late, across a wraparound: the packet's true upper bytes
                // are one less than ours, not one more.
                late = 1;
                lost = -1;
                local_iv[0] = nonce_byte;
                decrement_iv_bytes(&mut local_iv, 1);
                restore = true;
            } else if nonce_byte > local_iv[0] && diff > 0 {
                // Lost some packets, no wraparound.
                lost = nonce_byte as i64 - local_iv[0] as i64 - 1;
                local_iv[0] = nonce_byte;
            } else if nonce_byte < local_iv[0] && diff > 0 {
                // Lost some packets, across a wraparound.
                lost = 256 - local_iv[0] as i64 + nonce_byte as i64 - 1;
                local_iv[0] = nonce_byte;
                increment_iv_bytes(&mut local_iv, 1);
            } else if diff == 0 {
                // An exact repeat of the last accepted nonce: neither late
                // nor lost, `local_iv` already matches `saveiv`. Fall
                // through to the replay-history check below, which is what
                // actually rejects it.
            } else {
                return Err(MurmurError::OutOfRange);
            }

            // The anti-replay history only applies to Case B: an in-order
            // packet (Case A) always carries a nonce byte this slot has
            // never seen, so checking it there would reject the very first
            // in-order decrypt against an all-zero history.
            if self.decrypt_history[local_iv[0] as usize] == local_iv[1] {
                return Err(MurmurError::Replay);
            }
        }

        let cipher = Aes128::new(&GenericArray::from(self.key));
        let (plaintext, tag) = ocb_decrypt(&cipher, &local_iv, ciphertext);

        if tag[0..3] != *received_tag {
            return Err(MurmurError::AuthFailure);
        }

        self.decrypt_history[local_iv[0] as usize] = local_iv[1];
        self.decrypt_iv = if restore { saveiv } else { local_iv };
        self.stats.good += 1;
        self.stats.late += late;
        if lost >= 0 {
            self.stats.lost += lost as u64;
        } else {
            self.stats.lost = self.stats.lost.saturating_sub((-lost) as u64);
        }

        Ok(plaintext)
    }
}

impl Default for CryptState {
    fn default() -> Self {
        Self::new()
    }
}

fn to_block(bytes: &[u8]) -> Result<Block, MurmurError> {
    bytes
        .try_into()
        .map_err(|_| MurmurError::BadKeyLength(bytes.len()))
}

/// Increments a 16-byte big-endian counter in place, carrying as needed.
fn increment_iv(iv: &mut Block) {
    increment_iv_bytes(iv, 0);
}

/// Increments `iv` starting from byte index `start` (used when byte 0
/// alone already wrapped and the carry must propagate into byte 1+).
fn increment_iv_bytes(iv: &mut Block, start: usize) {
    for i in start..BLOCK_SIZE {
        iv[i] = iv[i].wrapping_add(1);
        if iv[i] != 0 {
            break;
        }
    }
}

/// Decrements `iv` starting from byte index `start`, borrowing into
/// higher bytes on underflow: used when a late packet's low byte
/// wrapped past zero, meaning its true upper bytes are one less than ours.
fn decrement_iv_bytes(iv: &mut Block, start: usize) {
    for i in start..BLOCK_SIZE {
        if iv[i] == 0 {
            iv[i] = 0xFF;
        } else {
            iv[i] = iv[i].wrapping_sub(1);
            break;
        }
    }
}

/// Normalizes `ivbyte - current` into `(-128, 128]`.
fn normalized_diff(ivbyte: u8, current: u8) -> i32 {
    let mut diff = ivbyte as i32 - current as i32;
    if diff > 128 {
        diff -= 256;
    } else if diff < -128 {
        diff += 256;
    }
    diff
}

/// Splits `data` into its "all but possibly the last" full 16-byte
/// blocks and a final block of `0..=BLOCK_SIZE` bytes. The last block —
/// even when it happens to be exactly `BLOCK_SIZE` bytes long, or
/// `data` is empty — always goes through the length-dependent
/// final-block formula, never the plain per-block one.
fn split_final_block(data: &[u8]) -> (&[u8], &[u8]) {
    let full_block_count = if data.is_empty() {
        0
    } else if data.len() % BLOCK_SIZE == 0 {
        data.len() / BLOCK_SIZE - 1
    } else {
        data.len() / BLOCK_SIZE
    };
    data.split_at(full_block_count * BLOCK_SIZE)
}

/// 16 zero bytes with the last byte set to `r * 8` (bit-length of the final block).
fn length_block(r: usize) -> Block {
    let mut block = zero_block();
    block[BLOCK_SIZE - 1] = (r * 8) as u8;
    block
}

/// OCB2 encryption over one message, returning `(ciphertext, full 16-byte tag)`.
fn ocb_encrypt(cipher: &Aes128, nonce: &Block, plaintext: &[u8]) -> (Vec<u8>, Block) {
    let mut delta = aes_encrypt(cipher, nonce);
    let mut checksum = zero_block();
    let mut ciphertext = Vec::with_capacity(plaintext.len());

    let (full_blocks, final_block) = split_final_block(plaintext);
    for chunk in full_blocks.chunks_exact(BLOCK_SIZE) {
        delta = s2(&delta);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        checksum = xor_block(&checksum, &block);
        let encrypted = aes_encrypt(cipher, &xor_block(&block, &delta));
        ciphertext.extend_from_slice(&xor_block(&encrypted, &delta));
    }

    let r = final_block.len();
    delta = s2(&delta);
    let pad = aes_encrypt(cipher, &xor_block(&length_block(r), &delta));
    let mut tmp = pad;
    tmp[..r].copy_from_slice(final_block);
    checksum = xor_block(&checksum, &tmp);
    let c_final = xor_block(&pad, &tmp);
    ciphertext.extend_from_slice(&c_final[..r]);

    let offset_star = s3(&delta);
    let tag = aes_encrypt(cipher, &xor_block(&checksum, &offset_star));

    (ciphertext, tag)
}

/// OCB2 decryption over one message, returning `(plaintext, full 16-byte tag)`.
fn ocb_decrypt(cipher: &Aes128, nonce: &Block, ciphertext: &[u8]) -> (Vec<u8>, Block) {
    let mut delta = aes_encrypt(cipher, nonce);
    let mut checksum = zero_block();
    let mut plaintext = Vec::with_capacity(ciphertext.len());

    let (full_blocks, final_block) = split_final_block(ciphertext);
    for chunk in full_blocks.chunks_exact(BLOCK_SIZE) {
        delta = s2(&delta);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        let decrypted = aes_decrypt(cipher, &xor_block(&block, &delta));
        let plain = xor_block(&decrypted, &delta);
        checksum = xor_block(&checksum, &plain);
        plaintext.extend_from_slice(&plain);
    }

    let r = final_block.len();
    delta = s2(&delta);
    let pad = aes_encrypt(cipher, &xor_block(&length_block(r), &delta));
    // `(C_final || zero-padding) XOR pad` recovers the final plaintext block.
    let mut zero_padded_cipher = zero_block();
    zero_padded_cipher[..r].copy_from_slice(final_block);
    let tmp = xor_block(&zero_padded_cipher, &pad);
    plaintext.extend_from_slice(&tmp[..r]);
    checksum = xor_block(&checksum, &tmp);

    let offset_star = s3(&delta);
    let tag = aes_encrypt(cipher, &xor_block(&checksum, &offset_star));

    (plaintext, tag)
}

fn aes_decrypt(cipher: &Aes128, block: &Block) -> Block {
    use aes::cipher::BlockDecrypt;
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    buf.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_pair() -> (CryptState, CryptState) {
        let mut a = CryptState::new();
        a.generate_key();
        let mut b = CryptState::new();
        b.set_key(&a.key).unwrap();
        // a encrypts with its encrypt_iv, so b must decrypt with the same IV.
        b.set_decrypt_iv(&a.encrypt_iv).unwrap();
        b.set_encrypt_iv(&a.decrypt_iv).unwrap();
        (a, b)
    }

    /// Scenario K1's fixed zero key/IV pair: key = 16 zero bytes,
    /// sender's `encrypt_iv` = 16 zero bytes, receiver's `decrypt_iv` =
    /// 16 zero bytes.
    fn zero_pair() -> (CryptState, CryptState) {
        let zero = [0u8; BLOCK_SIZE];
        let mut a = CryptState::new();
        a.set_key(&zero).unwrap();
        a.set_encrypt_iv(&zero).unwrap();
        a.set_decrypt_iv(&zero).unwrap();
        let mut b = CryptState::new();
        b.set_key(&zero).unwrap();
        b.set_decrypt_iv(&zero).unwrap();
        b.set_encrypt_iv(&zero).unwrap();
        (a, b)
    }

    #[test]
    fn scenario_k1_round_trips_a_short_message() {
        let (mut sender, mut receiver) = zero_pair();
        let plaintext = b"Hello";
        let encrypted = sender.encrypt(plaintext).unwrap();
        assert_eq!(encrypted.len(), 1 + plaintext.len() + 3);
        let decrypted = receiver.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
        assert_eq!(receiver.stats().good, 1);
        assert_eq!(receiver.stats().late, 0);
        assert_eq!(receiver.stats().lost, 0);

        // The second decrypt of the same ciphertext must fail as a replay.
        assert!(matches!(receiver.decrypt(&encrypted), Err(MurmurError::Replay)));
    }

    #[test]
    fn round_trips_multi_block_and_partial_final_block() {
        let (mut sender, mut receiver) = ready_pair();
        for len in [0, 1, 15, 16, 17, 31, 32, 33, 100] {
            let plaintext = vec![0xABu8; len];
            let encrypted = sender.encrypt(&plaintext).unwrap();
            let decrypted = receiver.decrypt(&encrypted).unwrap();
            assert_eq!(decrypted, plaintext, "length {len}");
        }
    }

    #[test]
    fn rejects_a_tampered_tag() {
        let (mut sender, mut receiver) = ready_pair();
        let mut encrypted = sender.encrypt(b"authenticate me").unwrap();
        *encrypted.last_mut().unwrap() ^= 0xFF;
        assert!(matches!(
            receiver.decrypt(&encrypted),
            Err(MurmurError::AuthFailure)
        ));
    }

    #[test]
    fn rejects_replayed_packets() {
        let (mut sender, mut receiver) = ready_pair();
        let encrypted = sender.encrypt(b"one packet").unwrap();
        receiver.decrypt(&encrypted).unwrap();
        assert!(matches!(
            receiver.decrypt(&encrypted),
            Err(MurmurError::Replay)
        ));
    }

    #[test]
    fn counts_late_and_lost_packets_across_a_run() {
        let (mut sender, mut receiver) = ready_pair();
        let p1 = sender.encrypt(b"one").unwrap();
        let p2 = sender.encrypt(b"two").unwrap();
        let p3 = sender.encrypt(b"three").unwrap();
        let p4 = sender.encrypt(b"four").unwrap();

        // p2 is lost in transit; receiver sees p1, p3, p4, then a late p2.
        // p3 registers p2 as lost (lost += 1); p2's later, late arrival
        // compensates that count back out (lost += -1) — the net lost
        // count is 0, not 1.
        receiver.decrypt(&p1).unwrap();
        receiver.decrypt(&p3).unwrap();
        receiver.decrypt(&p4).unwrap();
        receiver.decrypt(&p2).unwrap();

        let stats = receiver.stats();
        assert_eq!(stats.good, 4);
        assert_eq!(stats.lost, 0);
        assert_eq!(stats.late, 1);
    }

    #[test]
    fn late_packet_does_not_regress_decrypt_iv() {
        let (mut sender, mut receiver) = ready_pair();
        let p1 = sender.encrypt(b"one").unwrap();
        let p2 = sender.encrypt(b"two").unwrap();
        let p3 = sender.encrypt(b"three").unwrap();

        receiver.decrypt(&p1).unwrap();
        receiver.decrypt(&p3).unwrap();
        let iv_after_p3 = receiver.decrypt_iv;
        receiver.decrypt(&p2).unwrap(); // late
        assert_eq!(
            receiver.decrypt_iv, iv_after_p3,
            "a late packet must not move decrypt_iv backwards"
        );
    }

    #[test]
    fn failed_decrypt_leaves_decrypt_iv_untouched() {
        let (mut sender, mut receiver) = ready_pair();
        let iv_before = receiver.decrypt_iv;
        let mut tampered = sender.encrypt(b"hi").unwrap();
        *tampered.last_mut().unwrap() ^= 0xFF;
        assert!(receiver.decrypt(&tampered).is_err());
        assert_eq!(receiver.decrypt_iv, iv_before);
    }

    #[test]
    fn rejects_use_before_key_material_is_set() {
        let mut state = CryptState::new();
        assert!(matches!(
            state.encrypt(b"x"),
            Err(MurmurError::NotReady)
        ));
    }

    #[test]
    fn set_key_rejects_wrong_length() {
        let mut state = CryptState::new();
        assert!(matches!(
            state.set_key(&[0u8; 10]),
            Err(MurmurError::BadKeyLength(10))
        ));
    }

    #[test]
    fn split_final_block_always_routes_the_last_block_through_the_final_formula() {
        assert_eq!(split_final_block(&[]), (&[][..], &[][..]));
        let one = [1u8];
        assert_eq!(split_final_block(&one), (&[][..], &one[..]));
        let exactly_one_block = [1u8; BLOCK_SIZE];
        assert_eq!(
            split_final_block(&exactly_one_block),
            (&[][..], &exactly_one_block[..])
        );
        let two_blocks = [2u8; BLOCK_SIZE * 2];
        let (full, last) = split_final_block(&two_blocks);
        assert_eq!(full.len(), BLOCK_SIZE);
        assert_eq!(last.len(), BLOCK_SIZE);
    }

    #[test]
    fn length_block_encodes_bit_length_in_the_final_byte() {
        assert_eq!(length_block(0)[BLOCK_SIZE - 1], 0);
        assert_eq!(length_block(1)[BLOCK_SIZE - 1], 8);
        assert_eq!(length_block(16)[BLOCK_SIZE - 1], 128);
    }

    #[test]
    fn s2_doubles_with_the_expected_carry_polynomial() {
        let block = [0x80; BLOCK_SIZE];
        let doubled = s2(&block);
        let mut expected = [0x01u8; BLOCK_SIZE];
        expected[BLOCK_SIZE - 1] = 0x87;
        assert_eq!(doubled, expected);
    }

    #[test]
    fn s3_is_s2_xor_identity() {
        let block = [0x80; BLOCK_SIZE];
        let s3_result = s3(&block);
        assert_eq!(s3_result, xor_block(&s2(&block), &block));
    }
}
