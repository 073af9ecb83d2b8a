//! Residue coder shared by a graph and all graphs derived from it.
//!
//! Residues are mapped to dense codes in order of first appearance.

const NUM_SYMBOLS: usize = 256;

#[derive(Debug, Clone)]
pub struct Coder {
    coder: Vec<Option<u8>>,
    decoder: Vec<u8>,
}

impl Default for Coder {
    fn default() -> Self {
        Self::new()
    }
}

impl Coder {
    pub fn new() -> Self {
        Coder {
            coder: vec![None; NUM_SYMBOLS],
            decoder: Vec::with_capacity(NUM_SYMBOLS),
        }
    }

    /// Return the code for `residue`, assigning a new one if it was not seen before.
    pub fn learn(&mut self, residue: u8) -> u8 {
        if let Some(code) = self.coder[residue as usize] {
            return code;
        }

        // At most 256 distinct residues exist, so the code always fits in a u8
        let code = self.decoder.len() as u8;
        self.coder[residue as usize] = Some(code);
        self.decoder.push(residue);

        code
    }

    #[inline]
    pub fn encode(&self, residue: u8) -> Option<u8> {
        self.coder[residue as usize]
    }

    #[inline]
    pub fn decode(&self, code: u8) -> u8 {
        self.decoder[code as usize]
    }

    pub fn num_codes(&self) -> usize {
        self.decoder.len()
    }
}
