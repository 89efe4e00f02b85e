//! Parameter addressing.
//!
//! Every settable value of every instrument has a stable 16-bit ID and a
//! dotted name. The ID is what travels in events and project files, so the
//! layouts below are a file format and must not change.
//!
//! ```text
//!   0..=7     event fields (inum chnl start dur pitch frq vol veloc)
//!  16..=19    shared LFO block  (lfo.frq lfo.wt lfo.atk lfo.amp)
//!  20..=25    shared pitch-bend (pb.on pb.r1 pb.r2 pb.a1 pb.a2 pb.a3)
//!  32..       instrument globals
//!  0x1000..   indexed instrument addresses (partials, generators, ...)
//! ```
//!
//! Flat names resolve through sorted static tables with binary search.
//! Indexed names (`p1s0.rt`, `gen2.egmr1`) are parsed into each instrument's
//! typed address and packed by its own `encode`/`decode`.

use crate::dsp::{lfo::LfoParams, pitch_bend::PitchBendParams};

pub const P_USER: i16 = 16;

pub const P_LFO_FRQ: i16 = 16;
pub const P_LFO_WT: i16 = 17;
pub const P_LFO_ATK: i16 = 18;
pub const P_LFO_AMP: i16 = 19;

pub const P_PB_ON: i16 = 20;
pub const P_PB_R1: i16 = 21;
pub const P_PB_R2: i16 = 22;
pub const P_PB_A1: i16 = 23;
pub const P_PB_A2: i16 = 24;
pub const P_PB_A3: i16 = 25;

/// First ID of instrument-specific globals.
pub const P_GLOBAL: i16 = 32;

/// Base of the indexed address spaces.
pub const P_INDEXED: i16 = 0x1000;

/// A sorted `(name, id)` table.
#[derive(Debug, Clone, Copy)]
pub struct ParamTable {
    entries: &'static [(&'static str, i16)],
}

impl ParamTable {
    /// `entries` must be sorted by name.
    pub const fn new(entries: &'static [(&'static str, i16)]) -> Self {
        Self { entries }
    }

    pub fn id(&self, name: &str) -> Option<i16> {
        self.entries
            .binary_search_by(|(n, _)| (*n).cmp(name))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn name(&self, id: i16) -> Option<&'static str> {
        self.entries.iter().find(|(_, i)| *i == id).map(|(n, _)| *n)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].0 < w[1].0)
    }
}

pub static EVENT_PARAMS: ParamTable = ParamTable::new(&[
    ("chnl", 1),
    ("dur", 3),
    ("frq", 5),
    ("inum", 0),
    ("pitch", 4),
    ("start", 2),
    ("veloc", 7),
    ("vol", 6),
]);

pub static LFO_PB_PARAMS: ParamTable = ParamTable::new(&[
    ("lfo.amp", P_LFO_AMP),
    ("lfo.atk", P_LFO_ATK),
    ("lfo.frq", P_LFO_FRQ),
    ("lfo.wt", P_LFO_WT),
    ("pb.a1", P_PB_A1),
    ("pb.a2", P_PB_A2),
    ("pb.a3", P_PB_A3),
    ("pb.on", P_PB_ON),
    ("pb.r1", P_PB_R1),
    ("pb.r2", P_PB_R2),
]);

/// Look a name up in the given tables, then the event fields. `-1` if unknown.
pub fn lookup(tables: &[&ParamTable], name: &str) -> i16 {
    tables
        .iter()
        .copied()
        .chain(std::iter::once(&EVENT_PARAMS))
        .find_map(|t| t.id(name))
        .unwrap_or(-1)
}

/// Reverse of [`lookup`].
pub fn reverse(tables: &[&ParamTable], id: i16) -> Option<String> {
    tables
        .iter()
        .copied()
        .chain(std::iter::once(&EVENT_PARAMS))
        .find_map(|t| t.name(id))
        .map(str::to_string)
}

/// All names in the given tables (event fields excluded).
pub fn table_names(tables: &[&ParamTable]) -> Vec<String> {
    tables
        .iter()
        .flat_map(|t| t.names())
        .map(str::to_string)
        .collect()
}

pub fn lfo_get(lfo: &LfoParams, id: i16) -> Option<f32> {
    Some(match id {
        P_LFO_FRQ => lfo.rate,
        P_LFO_WT => lfo.wt as f32,
        P_LFO_ATK => lfo.attack,
        P_LFO_AMP => lfo.depth,
        _ => return None,
    })
}

pub fn lfo_set(lfo: &mut LfoParams, id: i16, value: f32) -> bool {
    match id {
        P_LFO_FRQ => lfo.rate = value,
        P_LFO_WT => lfo.wt = value.max(0.0) as usize,
        P_LFO_ATK => lfo.attack = value.max(0.0),
        P_LFO_AMP => lfo.depth = value,
        _ => return false,
    }
    true
}

pub fn pb_get(pb: &PitchBendParams, id: i16) -> Option<f32> {
    Some(match id {
        P_PB_ON => f32::from(u8::from(pb.on)),
        P_PB_R1 => pb.r1,
        P_PB_R2 => pb.r2,
        P_PB_A1 => pb.a1,
        P_PB_A2 => pb.a2,
        P_PB_A3 => pb.a3,
        _ => return None,
    })
}

pub fn pb_set(pb: &mut PitchBendParams, id: i16, value: f32) -> bool {
    match id {
        P_PB_ON => pb.on = value != 0.0,
        P_PB_R1 => pb.r1 = value.max(0.0),
        P_PB_R2 => pb.r2 = value.max(0.0),
        P_PB_A1 => pb.a1 = value,
        P_PB_A2 => pb.a2 = value,
        P_PB_A3 => pb.a3 = value,
        _ => return false,
    }
    true
}

/// Split `prefix{n}{rest}` into `(n, rest)`, e.g. `gen2.egmr1` → `(2, ".egmr1")`.
pub fn split_indexed<'a>(name: &'a str, prefix: &str) -> Option<(usize, &'a str)> {
    let rest = name.strip_prefix(prefix)?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let n = rest[..digits].parse().ok()?;
    Some((n, &rest[digits..]))
}
