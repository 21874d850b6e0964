//! Nips, network ids and the level geometry.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use rand::Rng;

use crate::error::{Error, Result};
use crate::{IPV4_GSIZE, IPV4_LEVELS};

/// A slot number inside one level of a gnode.
pub type SlotId = u16;

/// Hierarchical node address. Index 0 is the lowest level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Nip(Vec<SlotId>);

impl Nip {
    /// Build a nip from its per-level slots, lowest level first.
    pub fn new(slots: Vec<SlotId>) -> Self {
        Self(slots)
    }

    /// Number of levels in this nip.
    pub fn levels(&self) -> usize {
        self.0.len()
    }

    /// Slot at `lvl`.
    pub fn get(&self, lvl: usize) -> SlotId {
        self.0[lvl]
    }

    /// Replace the slot at `lvl`.
    pub fn set(&mut self, lvl: usize, id: SlotId) {
        self.0[lvl] = id;
    }

    /// The raw slots, lowest level first.
    pub fn slots(&self) -> &[SlotId] {
        &self.0
    }
}

impl From<Vec<SlotId>> for Nip {
    fn from(slots: Vec<SlotId>) -> Self {
        Self(slots)
    }
}

impl fmt::Display for Nip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Highest level first, like a dotted address
        let parts: Vec<String> = self.0.iter().rev().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Random identifier of the broadcast domain a node believes it is in.
///
/// The empty value means "no network yet" and is never equal to a joined
/// network, not even another empty one, for the purpose of
/// [`NetId::same_network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetId(Option<u32>);

impl NetId {
    /// The "isolated" netid.
    pub const NONE: NetId = NetId(None);

    /// A joined netid.
    pub const fn new(id: u32) -> Self {
        Self(Some(id))
    }

    /// Draw a fresh random netid.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(Some(rng.gen()))
    }

    /// True if this is the isolated netid.
    pub const fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// The raw value, if any.
    pub const fn get(&self) -> Option<u32> {
        self.0
    }

    /// Both sides hold the same valid netid.
    pub fn same_network(&self, other: &NetId) -> bool {
        self.0.is_some() && self.0 == other.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "-1"),
        }
    }
}

/// Level geometry of the mesh: how many levels, how many slots per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Topology {
    levels: usize,
    gsize: u16,
}

impl Default for Topology {
    fn default() -> Self {
        Self::ipv4()
    }
}

impl Topology {
    /// Create a topology. Every level must fit one IPv4 address byte.
    pub fn new(levels: usize, gsize: u16) -> Result<Self> {
        if levels == 0 || levels > IPV4_LEVELS {
            return Err(Error::InvalidTopology(format!(
                "levels must be in 1..={}, got {}",
                IPV4_LEVELS, levels
            )));
        }
        if !(2..=IPV4_GSIZE).contains(&gsize) {
            return Err(Error::InvalidTopology(format!(
                "gsize must be in 2..={}, got {}",
                IPV4_GSIZE, gsize
            )));
        }
        Ok(Self { levels, gsize })
    }

    /// The full IPv4 geometry: 4 levels of 256 slots.
    pub const fn ipv4() -> Self {
        Self {
            levels: IPV4_LEVELS,
            gsize: IPV4_GSIZE,
        }
    }

    pub const fn levels(&self) -> usize {
        self.levels
    }

    pub const fn gsize(&self) -> u16 {
        self.gsize
    }

    /// Divergence level of two nips: the highest level at which they differ.
    ///
    /// `None` means the nips are equal. `Some(0)` means they share the gnode
    /// of level 1.
    pub fn nip_cmp(&self, a: &Nip, b: &Nip) -> Option<usize> {
        (0..self.levels).rev().find(|&lvl| a.get(lvl) != b.get(lvl))
    }

    /// Slot ids usable at `lvl`.
    ///
    /// In a full IPv4 gnode the host ids 0 and 255 of level 0 are the network
    /// and broadcast addresses and are never assigned.
    pub fn valid_ids(&self, lvl: usize) -> Vec<SlotId> {
        (0..self.gsize)
            .filter(|&id| !(lvl == 0 && self.gsize == IPV4_GSIZE && (id == 0 || id == IPV4_GSIZE - 1)))
            .collect()
    }

    /// Check that a nip belongs to this topology.
    pub fn check(&self, nip: &Nip) -> Result<()> {
        if nip.levels() != self.levels {
            return Err(Error::InvalidNip {
                nip: nip.to_string(),
                reason: "wrong number of levels",
            });
        }
        if nip.slots().iter().any(|&s| s >= self.gsize) {
            return Err(Error::InvalidNip {
                nip: nip.to_string(),
                reason: "slot out of range",
            });
        }
        Ok(())
    }

    /// Project `nip` onto its gnode of level `lvl`: every slot below `lvl`
    /// becomes zero.
    pub fn project(&self, lvl: usize, nip: &Nip) -> Nip {
        let mut out = nip.clone();
        for l in 0..lvl.min(self.levels) {
            out.set(l, 0);
        }
        out
    }

    /// Random nip with every slot drawn from its valid ids.
    pub fn random_nip<R: Rng + ?Sized>(&self, rng: &mut R) -> Nip {
        let slots = (0..self.levels)
            .map(|lvl| {
                let ids = self.valid_ids(lvl);
                ids[rng.gen_range(0..ids.len())]
            })
            .collect();
        Nip(slots)
    }

    /// IPv4 address of a nip. Level `l` is address byte `l`, counted from the
    /// least significant one.
    pub fn nip_to_ip(&self, nip: &Nip) -> IpAddr {
        let raw = nip
            .slots()
            .iter()
            .enumerate()
            .fold(0u32, |acc, (lvl, &slot)| acc | (u32::from(slot) << (8 * lvl)));
        IpAddr::V4(Ipv4Addr::from(raw))
    }

    /// Nip of an IPv4 address.
    pub fn ip_to_nip(&self, ip: IpAddr) -> Result<Nip> {
        let raw = match ip {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => return Err(Error::NotInAddressSpace(ip)),
        };
        let used_bits = 8 * self.levels;
        if used_bits < 32 && raw >> used_bits != 0 {
            return Err(Error::NotInAddressSpace(ip));
        }
        let slots: Vec<SlotId> = (0..self.levels)
            .map(|lvl| ((raw >> (8 * lvl)) & 0xff) as SlotId)
            .collect();
        if slots.iter().any(|&s| s >= self.gsize) {
            return Err(Error::NotInAddressSpace(ip));
        }
        Ok(Nip(slots))
    }
}

/// The nip among `candidates` closest to `target`.
///
/// Closeness is compared from the highest level down: a candidate that
/// matches more high levels always wins, and inside a level the smaller slot
/// distance wins. Ties keep the first candidate.
pub fn nearest_nip<'a, I>(target: &Nip, candidates: I) -> Option<Nip>
where
    I: IntoIterator<Item = &'a Nip>,
{
    let distance = |nip: &Nip| -> Vec<u16> {
        (0..target.levels())
            .rev()
            .map(|lvl| target.get(lvl).abs_diff(nip.get(lvl)))
            .collect()
    };

    let mut best: Option<(Vec<u16>, &Nip)> = None;
    for nip in candidates {
        if nip.levels() != target.levels() {
            continue;
        }
        let d = distance(nip);
        match &best {
            Some((best_d, _)) if *best_d <= d => {}
            _ => best = Some((d, nip)),
        }
    }
    best.map(|(_, nip)| nip.clone())
}
