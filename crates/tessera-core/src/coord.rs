//! Cell and section coordinates, and their packed 64-bit keys.
//!
//! A cell `(x, z)` packs into a `u64` as `(z as u32) << 32 | (x as u32)`.
//! Section coordinates are the cell coordinates arithmetically shifted
//! right by the regionizer's section shift, and pack the same way.

use std::fmt;

/// Pack a coordinate pair into a 64-bit key.
#[inline]
pub fn pack(x: i32, z: i32) -> u64 {
    ((z as u32 as u64) << 32) | (x as u32 as u64)
}

/// Unpack a 64-bit key into `(x, z)`.
#[inline]
pub fn unpack(key: u64) -> (i32, i32) {
    (key as i32, (key >> 32) as i32)
}

/// Section key of the section holding cell `(x, z)` under `shift`.
#[inline]
pub fn section_key_of(x: i32, z: i32, shift: u32) -> u64 {
    pack(x >> shift, z >> shift)
}

/// Section key of the section holding the packed cell `cell_key`.
#[inline]
pub fn section_key_of_cell(cell_key: u64, shift: u32) -> u64 {
    let (x, z) = unpack(cell_key);
    section_key_of(x, z, shift)
}

/// Position of a cell, the smallest addressable unit of the world grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    /// Cell x coordinate.
    pub x: i32,
    /// Cell z coordinate.
    pub z: i32,
}

impl CellPos {
    /// Create a cell position.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packed 64-bit key of this cell.
    pub fn key(self) -> u64 {
        pack(self.x, self.z)
    }

    /// Rebuild a cell position from its packed key.
    pub fn from_key(key: u64) -> Self {
        let (x, z) = unpack(key);
        Self { x, z }
    }

    /// The section containing this cell under `shift`.
    pub fn section(self, shift: u32) -> SectionPos {
        SectionPos {
            x: self.x >> shift,
            z: self.z >> shift,
        }
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Position of a regionizer section: a `2^shift × 2^shift` block of cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionPos {
    /// Section x coordinate.
    pub x: i32,
    /// Section z coordinate.
    pub z: i32,
}

impl SectionPos {
    /// Create a section position.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packed 64-bit key of this section.
    pub fn key(self) -> u64 {
        pack(self.x, self.z)
    }

    /// Rebuild a section position from its packed key.
    pub fn from_key(key: u64) -> Self {
        let (x, z) = unpack(key);
        Self { x, z }
    }

    /// Chebyshev distance to `other`, in sections.
    pub fn chebyshev(self, other: SectionPos) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz) as u32
    }

    /// All section positions within `radius` (Chebyshev) of this one,
    /// including itself, in row-major order.
    pub fn square(self, radius: i32) -> impl Iterator<Item = SectionPos> {
        let Self { x, z } = self;
        (-radius..=radius).flat_map(move |dz| {
            (-radius..=radius).map(move |dx| SectionPos {
                x: x.wrapping_add(dx),
                z: z.wrapping_add(dz),
            })
        })
    }
}

impl fmt::Display for SectionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_places_z_in_high_word() {
        assert_eq!(pack(1, 0), 1);
        assert_eq!(pack(0, 1), 1 << 32);
        assert_eq!(pack(-1, 0), 0x0000_0000_FFFF_FFFF);
        assert_eq!(pack(0, -1), 0xFFFF_FFFF_0000_0000);
    }

    #[test]
    fn unpack_restores_negative_coordinates() {
        for &(x, z) in &[(0, 0), (-1, -1), (i32::MIN, i32::MAX), (123, -456)] {
            assert_eq!(unpack(pack(x, z)), (x, z));
        }
    }

    #[test]
    fn section_shift_is_arithmetic() {
        // -1 >> 4 == -1: cells -16..=-1 share section -1.
        assert_eq!(CellPos::new(-1, -16).section(4), SectionPos::new(-1, -1));
        assert_eq!(CellPos::new(-17, 15).section(4), SectionPos::new(-2, 0));
        assert_eq!(section_key_of(31, 32, 4), pack(1, 2));
        assert_eq!(section_key_of_cell(pack(31, 32), 4), pack(1, 2));
    }

    #[test]
    fn chebyshev_is_max_axis_distance() {
        let a = SectionPos::new(0, 0);
        assert_eq!(a.chebyshev(SectionPos::new(2, -1)), 2);
        assert_eq!(a.chebyshev(SectionPos::new(-3, 3)), 3);
        assert_eq!(a.chebyshev(a), 0);
    }

    #[test]
    fn square_enumerates_full_neighbourhood() {
        let s: Vec<_> = SectionPos::new(5, 5).square(1).collect();
        assert_eq!(s.len(), 9);
        assert!(s.contains(&SectionPos::new(4, 4)));
        assert!(s.contains(&SectionPos::new(6, 6)));
        assert_eq!(SectionPos::new(0, 0).square(0).count(), 1);
    }
}
