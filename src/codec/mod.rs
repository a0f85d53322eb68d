//! Fixed-width wire encoding for coordinates and identities.
//!
//! Requests to the execution backend address tiles in batches of four
//! coordinates per 256-bit word; single-coordinate identities widen each
//! component to 128 bits. Both directions are exact inverses for all
//! in-range values, which the single-flight registry relies on.

use sha2::{Digest, Sha256};

use crate::core::errors::{GridflowError, Result};
use crate::world::{Coord, UnitId};

/// One 256-bit wire word
pub type Word = [u8; 32];

/// Padding coordinate for short final batches. Reserved; never a real tile.
pub const PAD_COORD: Coord = Coord {
    x: i32::MAX,
    y: i32::MAX,
};

/// Pack four coordinates into one word as consecutive big-endian
/// 32-bit two's-complement pairs (x,y,x,y,x,y,x,y).
pub fn pack_coord_batch(coords: [Coord; 4]) -> Word {
    let mut word = [0u8; 32];
    for (i, c) in coords.iter().enumerate() {
        word[i * 8..i * 8 + 4].copy_from_slice(&c.x.to_be_bytes());
        word[i * 8 + 4..i * 8 + 8].copy_from_slice(&c.y.to_be_bytes());
    }
    word
}

/// Inverse of [`pack_coord_batch`]
pub fn unpack_coord_batch(word: &Word) -> [Coord; 4] {
    let mut coords = [Coord::new(0, 0); 4];
    for (i, c) in coords.iter_mut().enumerate() {
        let x = i32::from_be_bytes(word[i * 8..i * 8 + 4].try_into().unwrap());
        let y = i32::from_be_bytes(word[i * 8 + 4..i * 8 + 8].try_into().unwrap());
        *c = Coord::new(x, y);
    }
    coords
}

/// Pack a coordinate list into words, chunked by four, the short final
/// group padded with [`PAD_COORD`] so unpacking can detect the end.
pub fn pack_coord_list(coords: &[Coord]) -> Result<Vec<Word>> {
    if coords.contains(&PAD_COORD) {
        return Err(GridflowError::codec(format!(
            "coordinate {PAD_COORD} is reserved for padding"
        )));
    }
    let words = coords
        .chunks(4)
        .map(|chunk| {
            let mut batch = [PAD_COORD; 4];
            batch[..chunk.len()].copy_from_slice(chunk);
            pack_coord_batch(batch)
        })
        .collect();
    Ok(words)
}

/// Inverse of [`pack_coord_list`]; stops at the first padding coordinate
pub fn unpack_coord_list(words: &[Word]) -> Vec<Coord> {
    let mut coords = Vec::with_capacity(words.len() * 4);
    for word in words {
        for coord in unpack_coord_batch(word) {
            if coord == PAD_COORD {
                return coords;
            }
            coords.push(coord);
        }
    }
    coords
}

/// Pack a single coordinate as an identity word: x then y, each a
/// 128-bit big-endian two's-complement integer.
pub fn coord_to_id(coord: Coord) -> Word {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&(coord.x as i128).to_be_bytes());
    word[16..].copy_from_slice(&(coord.y as i128).to_be_bytes());
    word
}

/// Inverse of [`coord_to_id`]; rejects words whose components exceed
/// the 32-bit signed range.
pub fn id_to_coord(word: &Word) -> Result<Coord> {
    let x = i128::from_be_bytes(word[..16].try_into().unwrap());
    let y = i128::from_be_bytes(word[16..].try_into().unwrap());
    let x = i32::try_from(x).map_err(|_| out_of_range(word))?;
    let y = i32::try_from(y).map_err(|_| out_of_range(word))?;
    Ok(Coord::new(x, y))
}

fn out_of_range(word: &Word) -> GridflowError {
    GridflowError::Codec {
        message: "identity component outside 32-bit signed range".to_string(),
        word: Some(hex::encode(word)),
    }
}

/// Deduplication key for single-flight enforcement
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(pub Word);

impl Identity {
    /// Identity of a tile-targeted action
    pub fn from_coord(coord: Coord) -> Self {
        Self(coord_to_id(coord))
    }

    /// Identity of a movement order over a unit set. Sorted before
    /// digesting so overlapping squads serialize regardless of order.
    pub fn from_units(units: &[UnitId]) -> Self {
        let mut sorted: Vec<UnitId> = units.to_vec();
        sorted.sort();
        let mut hasher = Sha256::new();
        for unit in sorted {
            hasher.update(unit.0.to_be_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Identity of a composite action, derived from its leaf action ids
    pub fn from_action_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        sorted.sort();
        let mut hasher = Sha256::new();
        for id in sorted {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        Self(hasher.finalize().into())
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({self})")
    }
}
