//! Pastry node Id or a routing target, and the metric of the Id ring.
use rand::Rng;
use sha1_smol::Sha1;
use std::{
    fmt::{self, Debug, Display, Formatter},
    net::SocketAddrV4,
};

/// Default width of Ids in bits (`M`).
pub const DEFAULT_ID_BITS: u8 = 16;
/// Default width of a single digit in bits (`b`), giving a radix of 16.
pub const DEFAULT_DIGIT_BITS: u8 = 4;
/// The size of Ids on the wire in bytes.
pub const ID_SIZE: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
/// Pastry node Id or a routing target.
///
/// Only the lowest [IdSpace::bits] bits are meaningful, see [IdSpace::contains].
pub struct Id(pub u64);

impl Id {
    /// Generate a random Id inside the given [IdSpace].
    pub fn random(space: &IdSpace) -> Id {
        let mut rng = rand::thread_rng();

        Id(rng.gen::<u64>() & space.mask())
    }

    /// Big endian bytes of this Id as sent on the wire.
    pub fn to_bytes(&self) -> [u8; ID_SIZE] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Id {
        Id(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:x})", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Invalid combination of Id width and digit width.
#[error("Invalid Id space: {bits} bits with {digit_bits} bit digits")]
pub struct InvalidIdSpace {
    pub bits: u8,
    pub digit_bits: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The circular space of size `2^bits` all node Ids and keys live in.
///
/// Ids are read as a sequence of `bits / digit_bits` digits of radix `2^digit_bits`,
/// most significant digit first. The number of digits is the number of rows in the
/// [crate::RoutingTable], the radix is the number of columns.
pub struct IdSpace {
    bits: u8,
    digit_bits: u8,
}

impl IdSpace {
    /// Create a new [IdSpace].
    ///
    /// `digit_bits` must be between 1 and 8 and divide `bits`, and `bits` must not exceed 64.
    pub fn new(bits: u8, digit_bits: u8) -> Result<Self, InvalidIdSpace> {
        if bits == 0
            || bits > 64
            || digit_bits == 0
            || digit_bits > 8
            || bits % digit_bits != 0
        {
            return Err(InvalidIdSpace { bits, digit_bits });
        }

        Ok(Self { bits, digit_bits })
    }

    // === Getters ===

    /// Width of Ids in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Width of a digit in bits.
    pub fn digit_bits(&self) -> u8 {
        self.digit_bits
    }

    /// Number of digits in an Id, which is also the number of rows of the routing table.
    pub fn digits(&self) -> usize {
        (self.bits / self.digit_bits) as usize
    }

    /// Number of possible values of a single digit.
    pub fn radix(&self) -> usize {
        1 << self.digit_bits
    }

    fn mask(&self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1 << self.bits) - 1
        }
    }

    /// Half of the ring size.
    fn half(&self) -> u64 {
        1 << (self.bits - 1)
    }

    // === Public Methods ===

    /// Returns true if this Id fits in this space.
    pub fn contains(&self, id: &Id) -> bool {
        id.0 & !self.mask() == 0
    }

    /// Derive a node Id from its address, hashing the `ip:port` string.
    pub fn id_from_address(&self, address: SocketAddrV4) -> Id {
        self.hash_key(address.to_string().as_bytes())
    }

    /// Hash arbitrary bytes with SHA-1 and fold the digest into this space.
    ///
    /// Keeps the `bits` most significant bits of the digest.
    pub fn hash_key(&self, key: &[u8]) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(key);

        let digest = hasher.digest().bytes();

        let mut prefix = [0; ID_SIZE];
        prefix.copy_from_slice(&digest[..ID_SIZE]);

        Id(u64::from_be_bytes(prefix) >> (64 - self.bits as u32))
    }

    /// Clockwise offset from `from` to `to`, `(to - from) mod 2^bits`.
    pub fn clockwise_offset(&self, from: &Id, to: &Id) -> u64 {
        to.0.wrapping_sub(from.0) & self.mask()
    }

    /// Ring distance, the shorter of both arcs between `a` and `b`.
    ///
    /// Symmetric, and zero only if `a == b`.
    pub fn distance(&self, a: &Id, b: &Id) -> u64 {
        self.clockwise_offset(a, b).min(self.clockwise_offset(b, a))
    }

    /// Returns true if `to` is reached from `from` going clockwise within half the ring.
    ///
    /// Exactly opposite Ids count as clockwise.
    pub fn is_clockwise(&self, from: &Id, to: &Id) -> bool {
        self.clockwise_offset(from, to) <= self.half()
    }

    /// Strict total order of closeness to a `target`.
    ///
    /// Returns true if `candidate` is closer to `target` than `incumbent`, ties in ring
    /// distance go to the lower Id, so all nodes agree on who owns a key.
    pub fn is_closer(&self, candidate: &Id, incumbent: &Id, target: &Id) -> bool {
        (self.distance(candidate, target), candidate) < (self.distance(incumbent, target), incumbent)
    }

    /// The digit at `index`, counting from the most significant digit.
    pub fn digit(&self, id: &Id, index: usize) -> usize {
        let shift = self.bits as usize - (index + 1) * self.digit_bits as usize;

        ((id.0 >> shift) & (self.radix() as u64 - 1)) as usize
    }

    /// Number of leading digits `a` and `b` have in common.
    ///
    /// Equal Ids share all [Self::digits].
    pub fn shared_prefix_len(&self, a: &Id, b: &Id) -> usize {
        let diff = (a.0 ^ b.0) & self.mask();

        if diff == 0 {
            return self.digits();
        }

        let leading_zeros = diff.leading_zeros() as usize - (64 - self.bits as usize);

        leading_zeros / self.digit_bits as usize
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        Self {
            bits: DEFAULT_ID_BITS,
            digit_bits: DEFAULT_DIGIT_BITS,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_spaces() {
        assert!(IdSpace::new(16, 3).is_err());
        assert!(IdSpace::new(0, 4).is_err());
        assert!(IdSpace::new(72, 8).is_err());
        assert!(IdSpace::new(16, 16).is_err());
        assert!(IdSpace::new(64, 4).is_ok());
        assert!(IdSpace::new(8, 1).is_ok());
    }

    #[test]
    fn dimensions() {
        let space = IdSpace::default();

        assert_eq!(space.digits(), 4);
        assert_eq!(space.radix(), 16);
    }

    #[test]
    fn id_from_address_matches_leading_digest_bytes() {
        let space = IdSpace::default();
        let address: SocketAddrV4 = "127.0.0.1:5000".parse().unwrap();

        let mut hasher = Sha1::new();
        hasher.update(b"127.0.0.1:5000");
        let digest = hasher.digest().bytes();

        let expected = u16::from_be_bytes([digest[0], digest[1]]) as u64;

        assert_eq!(space.id_from_address(address), Id(expected));
        assert_eq!(space.id_from_address(address), space.id_from_address(address));
    }

    #[test]
    fn wide_space_keeps_the_whole_prefix() {
        let space = IdSpace::new(64, 4).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(b"apple");
        let digest = hasher.digest().bytes();

        let mut prefix = [0; 8];
        prefix.copy_from_slice(&digest[..8]);

        assert_eq!(space.hash_key(b"apple"), Id(u64::from_be_bytes(prefix)));
    }

    #[test]
    fn distance() {
        let space = IdSpace::new(8, 4).unwrap();

        assert_eq!(space.distance(&Id(10), &Id(10)), 0);
        assert_eq!(space.distance(&Id(95), &Id(100)), 5);
        assert_eq!(space.distance(&Id(100), &Id(95)), 5);
        assert_eq!(space.distance(&Id(250), &Id(4)), 10);
        assert_eq!(space.distance(&Id(0), &Id(128)), 128);

        let wide = IdSpace::new(64, 8).unwrap();
        assert_eq!(wide.distance(&Id(u64::MAX), &Id(1)), 2);
    }

    #[test]
    fn closeness_breaks_ties_with_lower_id() {
        let space = IdSpace::new(8, 4).unwrap();

        // Both are 15 away from 55.
        assert!(space.is_closer(&Id(40), &Id(70), &Id(55)));
        assert!(!space.is_closer(&Id(70), &Id(40), &Id(55)));

        assert!(space.is_closer(&Id(100), &Id(70), &Id(95)));
        assert!(!space.is_closer(&Id(70), &Id(70), &Id(95)));
    }

    #[test]
    fn clockwise() {
        let space = IdSpace::new(8, 4).unwrap();

        assert!(space.is_clockwise(&Id(70), &Id(100)));
        assert!(!space.is_clockwise(&Id(70), &Id(40)));
        assert!(space.is_clockwise(&Id(250), &Id(3)));
        assert!(space.is_clockwise(&Id(0), &Id(128)));
    }

    #[test]
    fn digits_and_prefix() {
        let space = IdSpace::default();

        let a = Id(0xa3f1);
        let b = Id(0xa3c2);

        assert_eq!(space.digit(&a, 0), 0xa);
        assert_eq!(space.digit(&a, 3), 0x1);
        assert_eq!(space.shared_prefix_len(&a, &b), 2);
        assert_eq!(space.shared_prefix_len(&a, &a), 4);
        assert_eq!(space.shared_prefix_len(&Id(0x0fff), &Id(0x8fff)), 0);

        let binary = IdSpace::new(8, 1).unwrap();
        assert_eq!(binary.shared_prefix_len(&Id(0b1010_0000), &Id(0b1011_0000)), 3);
    }

    #[test]
    fn random_ids_fit_the_space() {
        let space = IdSpace::new(12, 4).unwrap();

        for _ in 0..100 {
            assert!(space.contains(&Id::random(&space)));
        }

        assert!(!space.contains(&Id(1 << 12)));
    }
}
