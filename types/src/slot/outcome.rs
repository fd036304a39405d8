use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A symbol printed on a reel strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "bell")]
    Bell,
    #[serde(rename = "clown")]
    Clown,
    #[serde(rename = "grape")]
    Grape,
    #[serde(rename = "replay")]
    Replay,
    #[serde(rename = "cherry")]
    Cherry,
}

impl Symbol {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Seven => "7",
            Self::Bar => "bar",
            Self::Bell => "bell",
            Self::Clown => "clown",
            Self::Grape => "grape",
            Self::Replay => "replay",
            Self::Cherry => "cherry",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the three reels, left to right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reel {
    Left,
    Middle,
    Right,
}

impl Reel {
    pub const ALL: [Reel; 3] = [Reel::Left, Reel::Middle, Reel::Right];

    pub const fn index(&self) -> usize {
        match self {
            Self::Left => 0,
            Self::Middle => 1,
            Self::Right => 2,
        }
    }
}

impl fmt::Display for Reel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Middle => f.write_str("middle"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Bonus category counted when a bonus-tier outcome is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusKind {
    Big,
    Reg,
}

/// A drawn outcome.
///
/// Labels are stable: they appear in probability table files, history records and
/// notifications. `Miss` is the no-win sentinel returned when no table entry claims the draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Outcome {
    #[serde(rename = "BIG")]
    Big = 0,
    #[serde(rename = "REG")]
    Reg = 1,
    #[serde(rename = "CHERRY+BIG")]
    CherryBig = 2,
    #[serde(rename = "CHERRY+REG")]
    CherryReg = 3,
    #[serde(rename = "GRAPE")]
    Grape = 4,
    #[serde(rename = "CLOWN")]
    Clown = 5,
    #[serde(rename = "BELL")]
    Bell = 6,
    #[serde(rename = "REPLAY")]
    Replay = 7,
    #[serde(rename = "CHERRY")]
    Cherry = 8,
    #[serde(rename = "MISS")]
    Miss = 9,
}

impl Outcome {
    pub const ALL: [Outcome; 10] = [
        Outcome::Big,
        Outcome::Reg,
        Outcome::CherryBig,
        Outcome::CherryReg,
        Outcome::Grape,
        Outcome::Clown,
        Outcome::Bell,
        Outcome::Replay,
        Outcome::Cherry,
        Outcome::Miss,
    ];

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Big => "BIG",
            Self::Reg => "REG",
            Self::CherryBig => "CHERRY+BIG",
            Self::CherryReg => "CHERRY+REG",
            Self::Grape => "GRAPE",
            Self::Clown => "CLOWN",
            Self::Bell => "BELL",
            Self::Replay => "REPLAY",
            Self::Cherry => "CHERRY",
            Self::Miss => "MISS",
        }
    }

    /// Direct payout in credits. Bonus-tier outcomes pay nothing here; they only trigger
    /// the bonus counters.
    pub const fn payout(&self) -> u64 {
        match self {
            Self::Bell => 14,
            Self::Clown => 10,
            Self::Grape => 8,
            Self::Replay => 3,
            Self::Cherry => 2,
            Self::Big | Self::Reg | Self::CherryBig | Self::CherryReg | Self::Miss => 0,
        }
    }

    pub const fn bonus(&self) -> Option<BonusKind> {
        match self {
            Self::Big | Self::CherryBig => Some(BonusKind::Big),
            Self::Reg | Self::CherryReg => Some(BonusKind::Reg),
            _ => None,
        }
    }

    pub const fn is_bonus(&self) -> bool {
        self.bonus().is_some()
    }

    /// Outcomes that only constrain the left reel to a cherry.
    pub const fn is_cherry_family(&self) -> bool {
        matches!(self, Self::Cherry | Self::CherryBig | Self::CherryReg)
    }

    /// Symbol the reels must show for this outcome.
    pub const fn defining_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Big => Some(Symbol::Seven),
            Self::Reg => Some(Symbol::Bar),
            Self::Bell => Some(Symbol::Bell),
            Self::Clown => Some(Symbol::Clown),
            Self::Grape => Some(Symbol::Grape),
            Self::Replay => Some(Symbol::Replay),
            Self::Cherry | Self::CherryBig | Self::CherryReg => Some(Symbol::Cherry),
            Self::Miss => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Write for Outcome {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Outcome {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(Error::InvalidEnum(value))
    }
}

impl EncodeSize for Outcome {
    fn encode_size(&self) -> usize {
        1
    }
}

/// Stop index on each reel (left, middle, right). Indices wrap modulo reel length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReelStops(pub [usize; 3]);

impl ReelStops {
    pub fn get(&self, reel: Reel) -> usize {
        self.0[reel.index()]
    }
}

/// The line that justifies a payout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinLine {
    pub line: String,
    pub symbols: Vec<Symbol>,
    /// `(reel, row)` cells making up the line; row 1 is the middle row.
    pub positions: Vec<(u8, u8)>,
}

/// Result of evaluating a set of reel stops against a drawn outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub outcome: Outcome,
    pub payout: u64,
    pub is_bonus_trigger: bool,
    pub win_line: Option<WinLine>,
    /// One row per reel: the symbols above, at and below the stop index.
    pub display_symbols: [[Symbol; 3]; 3],
}

impl JudgeResult {
    /// Middle-row symbols, left to right.
    pub fn middle_row(&self) -> [Symbol; 3] {
        [
            self.display_symbols[0][1],
            self.display_symbols[1][1],
            self.display_symbols[2][1],
        ]
    }
}
