use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Permission bitmask granted on a calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Cruds(u8);

impl Cruds {
    pub const NONE: Cruds = Cruds(0);
    pub const CREATE: Cruds = Cruds(1);
    pub const READ: Cruds = Cruds(2);
    pub const UPDATE: Cruds = Cruds(4);
    pub const DELETE: Cruds = Cruds(8);
    pub const SHARE: Cruds = Cruds(16);
    pub const ALL: Cruds = Cruds(31);

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Cruds(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Cruds) -> bool {
        self.0 & other.0 == other.0
    }
}

impl TryFrom<u8> for Cruds {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Cruds::from_bits(bits).ok_or_else(|| format!("invalid permission bits {}", bits))
    }
}

impl From<Cruds> for u8 {
    fn from(cruds: Cruds) -> u8 {
        cruds.0
    }
}

impl BitOr for Cruds {
    type Output = Cruds;

    fn bitor(self, rhs: Cruds) -> Cruds {
        Cruds(self.0 | rhs.0)
    }
}

impl fmt::Display for Cruds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flags = [
            (Cruds::CREATE, 'c'),
            (Cruds::READ, 'r'),
            (Cruds::UPDATE, 'u'),
            (Cruds::DELETE, 'd'),
            (Cruds::SHARE, 's'),
        ];
        for (flag, letter) in flags {
            let shown = if self.contains(flag) { letter } else { '-' };
            write!(f, "{}", shown)?;
        }
        Ok(())
    }
}

/// Component kinds a calendar can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Components(u8);

impl Components {
    pub const EVENT: Components = Components(1);
    pub const TODO: Components = Components(2);
    pub const JOURNAL: Components = Components(4);
    pub const ALL: Components = Components(7);

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Components(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Components) -> bool {
        self.0 & other.0 == other.0
    }
}

impl TryFrom<u8> for Components {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Components::from_bits(bits).ok_or_else(|| format!("invalid component bits {}", bits))
    }
}

impl From<Components> for u8 {
    fn from(components: Components) -> u8 {
        components.0
    }
}

impl BitOr for Components {
    type Output = Components;

    fn bitor(self, rhs: Components) -> Components {
        Components(self.0 | rhs.0)
    }
}
