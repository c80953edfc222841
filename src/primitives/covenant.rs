use crate::encoding::{Reader, Writer};
use crate::error::ChainResult;

/// Name-system operation carried by an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CovenantType {
    None = 0,
    Claim = 1,
    Open = 2,
    Bid = 3,
    Reveal = 4,
    Redeem = 5,
    Register = 6,
    Update = 7,
    Renew = 8,
    Transfer = 9,
    Finalize = 10,
    Revoke = 11,
}

impl CovenantType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::Claim,
            2 => Self::Open,
            3 => Self::Bid,
            4 => Self::Reveal,
            5 => Self::Redeem,
            6 => Self::Register,
            7 => Self::Update,
            8 => Self::Renew,
            9 => Self::Transfer,
            10 => Self::Finalize,
            11 => Self::Revoke,
            _ => return None,
        })
    }
}

/// Typed side-data on an output encoding a name-system operation.
///
/// Items are opaque byte strings whose meaning depends on the type; numeric
/// items are u32-LE.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Covenant {
    pub kind: CovenantType,
    pub items: Vec<Vec<u8>>,
}

impl Default for CovenantType {
    fn default() -> Self {
        CovenantType::None
    }
}

impl Covenant {
    pub fn new(kind: CovenantType, items: Vec<Vec<u8>>) -> Self {
        Self { kind, items }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.kind == CovenantType::None
    }

    pub fn is_claim(&self) -> bool {
        self.kind == CovenantType::Claim
    }

    pub fn is_register(&self) -> bool {
        self.kind == CovenantType::Register
    }

    /// The `REGISTER..=REVOKE` range carries locked value: such outputs are
    /// bookkeeping-only and never enter the spendable coin set or the value
    /// counter.
    pub fn is_locked(&self) -> bool {
        self.kind >= CovenantType::Register && self.kind <= CovenantType::Revoke
    }

    /// u32-LE item at `index`, if present and well-formed.
    pub fn get_u32(&self, index: usize) -> Option<u32> {
        let item = self.items.get(index)?;
        if item.len() != 4 {
            return None;
        }
        Some(u32::from_le_bytes([item[0], item[1], item[2], item[3]]))
    }

    pub fn encode_into(&self, w: &mut Writer) {
        w.put_u8(self.kind as u8);
        debug_assert!(self.items.len() <= u8::MAX as usize);
        w.put_u8(self.items.len() as u8);
        for item in &self.items {
            w.put_var_bytes(item);
        }
    }

    pub fn decode_from(r: &mut Reader<'_>) -> ChainResult<Self> {
        let kind = r.get_u8()?;
        let kind = CovenantType::from_u8(kind).ok_or_else(|| r.corrupt("bad covenant type"))?;
        let count = r.get_u8()? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(r.get_var_bytes()?);
        }
        Ok(Self { kind, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_range_covers_register_through_revoke() {
        let locked = [
            CovenantType::Register,
            CovenantType::Update,
            CovenantType::Renew,
            CovenantType::Transfer,
            CovenantType::Finalize,
            CovenantType::Revoke,
        ];
        for kind in locked {
            assert!(Covenant::new(kind, vec![]).is_locked(), "{kind:?}");
        }
        let open = [
            CovenantType::None,
            CovenantType::Claim,
            CovenantType::Open,
            CovenantType::Bid,
            CovenantType::Reveal,
            CovenantType::Redeem,
        ];
        for kind in open {
            assert!(!Covenant::new(kind, vec![]).is_locked(), "{kind:?}");
        }
    }

    #[test]
    fn u32_item_requires_exact_width() {
        let cov = Covenant::new(
            CovenantType::Claim,
            vec![vec![0; 32], 7u32.to_le_bytes().to_vec(), vec![1, 2, 3]],
        );
        assert_eq!(cov.get_u32(1), Some(7));
        assert_eq!(cov.get_u32(2), None);
        assert_eq!(cov.get_u32(9), None);
    }

    #[test]
    fn encode_round_trip() {
        let cov = Covenant::new(
            CovenantType::Register,
            vec![vec![0xaa; 32], vec![], b"example".to_vec()],
        );
        let mut w = Writer::new();
        cov.encode_into(&mut w);
        let buf = w.into_vec();
        let mut r = Reader::new(&buf, "covenant");
        let back = Covenant::decode_from(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(back, cov);
    }
}
