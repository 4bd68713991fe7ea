//! Melting temperature of primers and amplicons.
//!
//! Oligos up to [`MAX_NN_LENGTH`] use the SantaLucia (1998) unified
//! nearest-neighbour table; longer products use the GC-content formula.
//! Divalent cations are folded into a sodium equivalent (von Ahsen 2001)
//! before any salt correction is applied.

use serde::{Deserialize, Serialize};

pub const MAX_NN_LENGTH: usize = 60;

const GAS_CONSTANT: f64 = 1.987;
const KELVIN: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThermodynamicTable {
    #[default]
    SantaLucia1998,
}

impl ThermodynamicTable {
    /// primer3 `PRIMER_TM_FORMULA` value.
    pub fn primer3_code(self) -> u8 {
        match self {
            Self::SantaLucia1998 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaltCorrection {
    Schildkraut,
    #[default]
    SantaLucia,
    Owczarzy,
}

impl SaltCorrection {
    /// primer3 `PRIMER_SALT_CORRECTIONS` value.
    pub fn primer3_code(self) -> u8 {
        match self {
            Self::Schildkraut => 0,
            Self::SantaLucia => 1,
            Self::Owczarzy => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaltConditions {
    pub monovalent_mm: f64,
    pub divalent_mm: f64,
    pub dntp_mm: f64,
    pub dna_nm: f64,
    pub correction: SaltCorrection,
}

impl Default for SaltConditions {
    fn default() -> Self {
        Self {
            monovalent_mm: 50.0,
            divalent_mm: 1.5,
            dntp_mm: 0.6,
            dna_nm: 50.0,
            correction: SaltCorrection::SantaLucia,
        }
    }
}

impl SaltConditions {
    /// Sodium-equivalent concentration in mM.
    pub fn sodium_equivalent_mm(&self) -> f64 {
        let dntp = if self.divalent_mm <= 0.0 { 0.0 } else { self.dntp_mm };
        if self.divalent_mm < dntp {
            return self.monovalent_mm;
        }
        self.monovalent_mm + 120.0 * (self.divalent_mm - dntp).sqrt()
    }
}

/// (dH kcal/mol, dS cal/K/mol) for a 5'->3' dinucleotide.
fn nearest_neighbor(pair: [u8; 2]) -> Option<(f64, f64)> {
    let value = match &pair {
        b"AA" | b"TT" => (-7.9, -22.2),
        b"AT" => (-7.2, -20.4),
        b"TA" => (-7.2, -21.3),
        b"CA" | b"TG" => (-8.5, -22.7),
        b"GT" | b"AC" => (-8.4, -22.4),
        b"CT" | b"AG" => (-7.8, -21.0),
        b"GA" | b"TC" => (-8.2, -22.2),
        b"CG" => (-10.6, -27.2),
        b"GC" => (-9.8, -24.4),
        b"GG" | b"CC" => (-8.0, -19.9),
        _ => return None,
    };
    Some(value)
}

fn terminal_penalty(base: u8) -> (f64, f64) {
    match base {
        b'A' | b'T' => (2.3, 4.1),
        _ => (0.1, -2.8),
    }
}

fn is_self_complementary(seq: &[u8]) -> bool {
    seq.iter()
        .zip(seq.iter().rev())
        .all(|(a, b)| complement(*a) == Some(*b))
}

fn complement(base: u8) -> Option<u8> {
    match base {
        b'A' => Some(b'T'),
        b'T' => Some(b'A'),
        b'C' => Some(b'G'),
        b'G' => Some(b'C'),
        _ => None,
    }
}

fn normalized(seq: &str) -> Vec<u8> {
    seq.bytes()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c.to_ascii_uppercase() {
            b'U' => b'T',
            other => other,
        })
        .collect()
}

/// GC content as a fraction of all bases.
pub fn gc_fraction(seq: &[u8]) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let gc = seq
        .iter()
        .filter(|c| matches!(c.to_ascii_uppercase(), b'G' | b'C'))
        .count();
    gc as f64 / seq.len() as f64
}

pub fn gc_percent(seq: &str) -> f64 {
    100.0 * gc_fraction(&normalized(seq))
}

/// Nearest-neighbour Tm of a perfectly matched duplex.
///
/// Returns `None` for sequences shorter than two bases or containing
/// anything but A/C/G/T.
pub fn oligo_tm(seq: &str, salt: &SaltConditions) -> Option<f64> {
    let seq = normalized(seq);
    if seq.len() < 2 {
        return None;
    }
    let (h0, s0) = terminal_penalty(seq[0]);
    let (h1, s1) = terminal_penalty(seq[seq.len() - 1]);
    let mut dh = h0 + h1;
    let mut ds = s0 + s1;
    for window in seq.windows(2) {
        let (h, s) = nearest_neighbor([window[0], window[1]])?;
        dh += h;
        ds += s;
    }

    let symmetric = is_self_complementary(&seq);
    if symmetric {
        ds += -1.4;
    }
    let sodium_m = salt.sodium_equivalent_mm() / 1000.0;
    if salt.correction == SaltCorrection::SantaLucia {
        ds += 0.368 * (seq.len() - 1) as f64 * sodium_m.ln();
    }
    let strand_conc = salt.dna_nm * 1e-9 / if symmetric { 1.0 } else { 4.0 };
    let mut tm = dh * 1000.0 / (ds + GAS_CONSTANT * strand_conc.ln()) - KELVIN;

    match salt.correction {
        SaltCorrection::SantaLucia => {}
        SaltCorrection::Schildkraut => tm += 16.6 * sodium_m.log10(),
        SaltCorrection::Owczarzy => {
            let gc = gc_fraction(&seq);
            let ln_na = sodium_m.ln();
            let correction = (4.29 * gc - 3.95) * 1e-5 * ln_na + 9.4e-6 * ln_na * ln_na;
            tm = 1.0 / (1.0 / (tm + KELVIN) + correction) - KELVIN;
        }
    }
    Some(tm)
}

/// Tm of a long duplex from its GC content and length.
pub fn long_sequence_tm(seq: &str, salt: &SaltConditions) -> Option<f64> {
    let seq = normalized(seq);
    if seq.is_empty() {
        return None;
    }
    let len = seq.len() as f64;
    let sodium_m = salt.sodium_equivalent_mm() / 1000.0;
    Some(81.5 + 16.6 * sodium_m.log10() + 41.0 * gc_fraction(&seq) - 600.0 / len)
}

/// Tm of an amplicon, switching model at [`MAX_NN_LENGTH`].
pub fn amplicon_tm(seq: &str, salt: &SaltConditions) -> Option<f64> {
    let len = seq.bytes().filter(|c| !c.is_ascii_whitespace()).count();
    if len > MAX_NN_LENGTH {
        long_sequence_tm(seq, salt)
    } else {
        oligo_tm(seq, salt)
    }
}
