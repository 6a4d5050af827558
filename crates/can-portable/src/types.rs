use core::fmt;
use time::OffsetDateTime;

/// Largest classic CAN payload.
pub const MAX_DLC: u8 = 8;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub fn standard(id11: u16) -> Option<Self> {
        if id11 <= 0x7FF {
            Some(Self {
                raw: id11 as u32,
                extended: false,
            })
        } else {
            None
        }
    }

    pub fn extended(id29: u32) -> Option<Self> {
        if id29 <= 0x1FFF_FFFF {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    /// Pick the narrowest identifier format that holds `raw`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw <= 0x7FF {
            Self::standard(raw as u16)
        } else {
            Self::extended(raw)
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A classic CAN data frame.
///
/// Plain value type: queues copy it in and out, so a caller's buffer never
/// aliases a queue slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CanMessage {
    pub id: CanId,
    pub dlc: u8,
    pub data: [u8; 8],
    pub timestamp: Option<Timestamp>,
}

impl CanMessage {
    pub fn new(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC as usize {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            dlc: data.len() as u8,
            data: buf,
            timestamp: None,
        })
    }

    /// The first `dlc` bytes of the payload.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.dlc.min(MAX_DLC));
        &self.data[..len]
    }

    /// Stamp with the current wall-clock time unless already stamped.
    pub fn stamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Timestamp::now());
        }
    }
}

/// Acceptance filter: a frame passes when the bits selected by `mask` match.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CanFilter {
    pub id: u32,
    pub mask: u32,
}

impl CanFilter {
    pub fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }

    pub fn accepts(&self, id: CanId) -> bool {
        (id.raw() & self.mask) == (self.id & self.mask)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

/// Identity a driver reports when it is bound to an interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ranges() {
        assert!(CanId::standard(0x7FF).is_some());
        assert!(CanId::standard(0x800).is_none());
        assert!(CanId::extended(0x1FFF_FFFF).is_some());
        assert!(CanId::extended(0x2000_0000).is_none());
    }

    #[test]
    fn test_from_raw_picks_format() {
        let std_id = CanId::from_raw(0x123).unwrap();
        assert!(!std_id.is_extended());
        let ext_id = CanId::from_raw(0x18FF_0001).unwrap();
        assert!(ext_id.is_extended());
        assert_eq!(ext_id.to_string(), "0x18FF0001");
        assert_eq!(std_id.to_string(), "0x123");
    }

    #[test]
    fn test_message_payload() {
        let id = CanId::standard(0x10).unwrap();
        let msg = CanMessage::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(msg.dlc, 3);
        assert_eq!(msg.payload(), &[1, 2, 3]);
        assert!(CanMessage::new(id, &[0; 9]).is_none());
    }

    #[test]
    fn test_filter_mask_match() {
        let filter = CanFilter::new(0x100, 0x700);
        assert!(filter.accepts(CanId::standard(0x123).unwrap()));
        assert!(!filter.accepts(CanId::standard(0x223).unwrap()));
        // zero mask accepts everything
        assert!(CanFilter::default().accepts(CanId::standard(0x7FF).unwrap()));
    }
}
