//! The 128-bit TM-index: space-filling-curve keys for grid tetrahedra.
//!
//! A key records, for every level from the root down to its own, the 6-bit group
//! `(cube_id << 3) | type`. Groups for levels 1..=10 live in `low` (bits 0..59, deepest
//! level at the bottom), groups for levels 11..=20 in `high` (bits 0..59). The level-21
//! group does not fit and is split: its low 4 bits go to `low[60..63]`, its high 2 bits
//! to `high[60..61]`; `high[62..63]` must stay zero.
//!
//! Keys order level first, then by the root-first group sequence, which makes same-level
//! keys follow the curve and stratifies levels. Note that the group sequence comparison
//! reads `low` (levels 1..=10) before `high`: the coarse groups are the significant ones.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::connectivity::{CHILD_TYPE_TM, CID_TYPE_TO_PARENT_TYPE, LOCAL_INDEX_TO_CID, MAX_LEVEL};
use crate::error::{Result, TetreeError};
use crate::tet::Tet;

const M60: u64 = (1 << 60) - 1;

const DECODE_CACHE_CAP: usize = 1024;

static DECODE_CACHE: Lazy<Mutex<FxHashMap<TmKey, Tet>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Spreads the low byte over every third bit; three lookups interleave a 21-bit
/// coordinate.
static SPREAD3: Lazy<[u64; 256]> = Lazy::new(|| {
    let mut table = [0u64; 256];
    for (b, entry) in table.iter_mut().enumerate() {
        let mut v = 0u64;
        for k in 0..8 {
            if (b >> k) & 1 == 1 {
                v |= 1 << (3 * k);
            }
        }
        *entry = v;
    }
    table
});

/// Gathers every third bit of a 9-bit chunk; the inverse of [`SPREAD3`].
static EXTRACT3: Lazy<[u8; 512]> = Lazy::new(|| {
    let mut table = [0u8; 512];
    for (m, entry) in table.iter_mut().enumerate() {
        let mut v = 0u8;
        for k in 0..3 {
            if (m >> (3 * k)) & 1 == 1 {
                v |= 1 << k;
            }
        }
        *entry = v;
    }
    table
});

#[inline]
fn spread_coord(c: u32) -> u64 {
    SPREAD3[(c & 0xFF) as usize]
        | (SPREAD3[((c >> 8) & 0xFF) as usize] << 24)
        | (SPREAD3[((c >> 16) & 0xFF) as usize] << 48)
}

#[inline]
fn extract_coord(m: u64) -> u32 {
    let mut c = 0u32;
    for k in 0..7 {
        c |= u32::from(EXTRACT3[((m >> (9 * k)) & 0x1FF) as usize]) << (3 * k);
    }
    c
}

/// A TM-index key. Total order = (level, curve position).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TmKey {
    level: u8,
    low: u64,
    high: u64,
}

impl TmKey {
    /// The root key.
    pub const ROOT: TmKey = TmKey {
        level: 0,
        low: 0,
        high: 0,
    };

    /// Builds a key from raw words, rejecting malformed bit patterns.
    pub fn from_raw(level: u8, low: u64, high: u64) -> Result<Self> {
        let key = TmKey { level, low, high };
        if key.is_valid() {
            Ok(key)
        } else {
            Err(TetreeError::InvalidKey {
                level,
                reason: "bit pattern fails validity checks",
            })
        }
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    #[inline]
    pub fn low_bits(&self) -> u64 {
        self.low
    }

    #[inline]
    pub fn high_bits(&self) -> u64 {
        self.high
    }

    /// The 6-bit group of `level` (1-based, <= self.level).
    #[inline]
    fn group(&self, level: u8) -> u8 {
        debug_assert!(level >= 1 && level <= self.level);
        if level <= 10 {
            let top = self.level.min(10);
            ((self.low >> (6 * (top - level))) & 0x3F) as u8
        } else if level <= 20 {
            let top = self.level.min(20);
            ((self.high >> (6 * (top - level))) & 0x3F) as u8
        } else {
            ((((self.high >> 60) & 0x3) << 4) | ((self.low >> 60) & 0xF)) as u8
        }
    }

    /// Encodes a tetrahedron: interleaves its cube-id and type trajectories.
    pub fn encode(tet: &Tet) -> Self {
        let level = tet.level();
        let morton =
            spread_coord(tet.x()) | (spread_coord(tet.y()) << 1) | (spread_coord(tet.z()) << 2);
        // Type trajectory, deepest to root.
        let mut kinds = [0u8; MAX_LEVEL as usize + 1];
        kinds[level as usize] = tet.kind();
        let mut cids = [0u8; MAX_LEVEL as usize + 1];
        for l in (1..=level).rev() {
            let cid = ((morton >> (3 * (MAX_LEVEL - l))) & 0x7) as u8;
            cids[l as usize] = cid;
            kinds[l as usize - 1] = CID_TYPE_TO_PARENT_TYPE[cid as usize][kinds[l as usize] as usize];
        }
        let mut low = 0u64;
        let mut high = 0u64;
        for l in 1..=level {
            let g = u64::from((cids[l as usize] << 3) | kinds[l as usize]);
            if l <= 10 {
                low |= g << (6 * (level.min(10) - l));
            } else if l <= 20 {
                high |= g << (6 * (level.min(20) - l));
            } else {
                low |= (g & 0xF) << 60;
                high |= (g >> 4) << 60;
            }
        }
        TmKey { level, low, high }
    }

    /// Decodes back to the tetrahedron. Authoritative inverse of [`TmKey::encode`].
    pub fn decode(&self) -> Tet {
        let mut morton = 0u64;
        let mut kind = 0u8;
        for l in 1..=self.level {
            let g = self.group(l);
            kind = g & 0x7;
            morton |= u64::from(g >> 3) << (3 * (MAX_LEVEL - l));
        }
        let x = extract_coord(morton);
        let y = extract_coord(morton >> 1);
        let z = extract_coord(morton >> 2);
        Tet::new_unchecked(x, y, z, self.level, kind)
    }

    /// Decode through a bounded process-wide cache. Purely advisory: scan-heavy paths
    /// revisit the same keys, everything else should call [`TmKey::decode`] directly.
    pub fn cached_decode(&self) -> Tet {
        if let Ok(cache) = DECODE_CACHE.lock()
            && let Some(tet) = cache.get(self)
        {
            return *tet;
        }
        let tet = self.decode();
        if let Ok(mut cache) = DECODE_CACHE.lock() {
            if cache.len() >= DECODE_CACHE_CAP {
                cache.clear();
            }
            cache.insert(*self, tet);
        }
        tet
    }

    /// The parent key, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        match self.level {
            0 => None,
            1..=10 => Some(TmKey {
                level: self.level - 1,
                low: self.low >> 6,
                high: self.high,
            }),
            11..=20 => Some(TmKey {
                level: self.level - 1,
                low: self.low,
                high: self.high >> 6,
            }),
            _ => Some(TmKey {
                level: 20,
                low: self.low & M60,
                high: self.high & M60,
            }),
        }
    }

    /// Type of the deepest group; the level-0 root is canonically type 0.
    #[inline]
    fn deepest_kind(&self) -> u8 {
        if self.level == 0 {
            0
        } else {
            self.group(self.level) & 0x7
        }
    }

    /// The key of child `i` in TM order: appends one 6-bit group without touching the
    /// prefix. Constant time, unlike a decode/subdivide/encode round trip.
    pub fn child(&self, i: usize) -> Result<Self> {
        if self.level >= MAX_LEVEL {
            return Err(TetreeError::MaxLevelExceeded);
        }
        if i > 7 {
            return Err(TetreeError::InvalidIndex {
                what: "child",
                index: i,
                bound: 8,
            });
        }
        let kind = self.deepest_kind() as usize;
        let g = u64::from((LOCAL_INDEX_TO_CID[kind][i] << 3) | CHILD_TYPE_TM[kind][i]);
        let (mut low, mut high) = (self.low, self.high);
        let level = self.level + 1;
        if level <= 10 {
            low = (low << 6) | g;
        } else if level <= 20 {
            high = (high << 6) | g;
        } else {
            low |= (g & 0xF) << 60;
            high |= (g >> 4) << 60;
        }
        Ok(TmKey { level, low, high })
    }

    /// The smallest descendant key at `level`: the chain of first children.
    ///
    /// Together with [`TmKey::last_descendant`] this brackets a subtree's keys at one
    /// level, which is what per-level prefix scans of the store sub-scan.
    pub fn first_descendant(&self, level: u8) -> Result<Self> {
        self.descendant_chain(level, 0)
    }

    /// The largest descendant key at `level`: the chain of last children.
    pub fn last_descendant(&self, level: u8) -> Result<Self> {
        self.descendant_chain(level, 7)
    }

    fn descendant_chain(&self, level: u8, i: usize) -> Result<Self> {
        if level < self.level || level > MAX_LEVEL {
            return Err(TetreeError::InvalidLevel {
                level: u32::from(level),
                max: MAX_LEVEL,
            });
        }
        let mut key = *self;
        while key.level < level {
            key = key.child(i)?;
        }
        Ok(key)
    }

    /// Structural and trajectory validity.
    ///
    /// Checks the unused-bit rules of every level band (at level 21 the reserved
    /// `high[62..63]` must be clear) and that the stored type trajectory is the one the
    /// cube-id trajectory implies.
    pub fn is_valid(&self) -> bool {
        if self.level > MAX_LEVEL {
            return false;
        }
        let bits_ok = match self.level {
            0 => self.low == 0 && self.high == 0,
            1..=10 => self.high == 0 && (self.low >> (6 * u32::from(self.level))) == 0,
            11..=20 => {
                (self.low >> 60) == 0 && (self.high >> (6 * u32::from(self.level - 10))) == 0
            }
            _ => (self.high >> 62) == 0,
        };
        if !bits_ok {
            return false;
        }
        // Consecutive groups must agree on the type trajectory. The level-0 type is not
        // encoded: each of the six level-0 tetrahedra roots its own subtree.
        let mut prev_kind: Option<u8> = None;
        for l in 1..=self.level {
            let g = self.group(l);
            let (cid, kind) = (g >> 3, g & 0x7);
            if kind > 5 {
                return false;
            }
            let parent = CID_TYPE_TO_PARENT_TYPE[cid as usize][kind as usize];
            if let Some(expected) = prev_kind
                && parent != expected
            {
                return false;
            }
            prev_kind = Some(kind);
        }
        true
    }

    /// The next key of the same level along the curve, in raw key space. `None` past the
    /// end. Used to fuse adjacent query ranges.
    pub fn sfc_successor(&self) -> Option<Self> {
        let mut low = self.low;
        let mut high = self.high;
        match self.level {
            0 => return None,
            1..=10 => {
                low += 1;
                if (low >> (6 * u32::from(self.level))) != 0 {
                    return None;
                }
            }
            11..=20 => {
                high += 1;
                if (high >> (6 * u32::from(self.level - 10))) != 0 {
                    high = 0;
                    low += 1;
                    if (low >> 60) != 0 {
                        return None;
                    }
                }
            }
            _ => {
                let g = ((((high >> 60) & 0x3) << 4) | ((low >> 60) & 0xF)) as u8;
                if g < 63 {
                    let g = u64::from(g + 1);
                    low = (low & M60) | ((g & 0xF) << 60);
                    high = (high & M60) | ((g >> 4) << 60);
                } else {
                    low &= M60;
                    high = (high & M60) + 1;
                    if (high >> 60) != 0 {
                        high = 0;
                        low += 1;
                        if (low >> 60) != 0 {
                            return None;
                        }
                    }
                }
            }
        }
        Some(TmKey {
            level: self.level,
            low,
            high,
        })
    }

    /// Serializes to the 17-byte wire layout: level, low (LE), high (LE).
    pub fn to_bytes(&self) -> [u8; 17] {
        let mut buf = [0u8; 17];
        buf[0] = self.level;
        buf[1..9].copy_from_slice(&self.low.to_le_bytes());
        buf[9..17].copy_from_slice(&self.high.to_le_bytes());
        buf
    }

    /// Deserializes from the wire layout, validating the key.
    pub fn from_bytes(buf: &[u8; 17]) -> Result<Self> {
        let low = u64::from_le_bytes(buf[1..9].try_into().expect("slice length"));
        let high = u64::from_le_bytes(buf[9..17].try_into().expect("slice length"));
        Self::from_raw(buf[0], low, high)
    }

    #[inline]
    fn split_group(&self) -> u8 {
        ((((self.high >> 60) & 0x3) << 4) | ((self.low >> 60) & 0xF)) as u8
    }

    /// Smallest bit pattern of `level`. An ordering bound for range scans; not
    /// necessarily a decodable key.
    pub(crate) const fn level_floor(level: u8) -> Self {
        TmKey {
            level,
            low: 0,
            high: 0,
        }
    }

    /// Largest bit pattern of `level`; ordering bound counterpart of
    /// [`TmKey::level_floor`].
    pub(crate) const fn level_ceil(level: u8) -> Self {
        TmKey {
            level,
            low: u64::MAX,
            high: u64::MAX,
        }
    }
}

impl Ord for TmKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| (self.low & M60).cmp(&(other.low & M60)))
            .then_with(|| (self.high & M60).cmp(&(other.high & M60)))
            .then_with(|| self.split_group().cmp(&other.split_group()))
    }
}

impl PartialOrd for TmKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A key that may not have been encoded yet.
///
/// Hot paths that produce many tetrahedra but compare few of them keep the `Tet` around
/// and only pay for interleaving when a comparison against an encoded key forces it.
#[derive(Clone, Copy, Debug)]
pub enum LazyKey {
    Encoded(TmKey),
    Deferred(Tet),
}

impl LazyKey {
    /// The encoded form, computing it if deferred.
    pub fn force(&self) -> TmKey {
        match self {
            LazyKey::Encoded(k) => *k,
            LazyKey::Deferred(t) => TmKey::encode(t),
        }
    }

    fn tet(&self) -> Tet {
        match self {
            LazyKey::Encoded(k) => k.decode(),
            LazyKey::Deferred(t) => *t,
        }
    }
}

impl From<Tet> for LazyKey {
    fn from(t: Tet) -> Self {
        LazyKey::Deferred(t)
    }
}

impl From<TmKey> for LazyKey {
    fn from(k: TmKey) -> Self {
        LazyKey::Encoded(k)
    }
}

impl PartialEq for LazyKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Deferred pairs never pay for encoding.
            (LazyKey::Deferred(a), LazyKey::Deferred(b)) => a == b,
            (LazyKey::Encoded(a), LazyKey::Encoded(b)) => a == b,
            _ => self.force() == other.force(),
        }
    }
}

impl Eq for LazyKey {}

impl Hash for LazyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Coordinate-based, never the encoded bits, so both forms agree.
        let t = self.tet();
        (t.x(), t.y(), t.z(), t.level(), t.kind()).hash(state);
    }
}

impl Ord for LazyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.force().cmp(&other.force())
    }
}

impl PartialOrd for LazyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
