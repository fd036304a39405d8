use slotfloor_types::{Reel, Symbol};

use Symbol::{Bar, Bell, Cherry, Clown, Grape, Replay, Seven};

const LEFT: [Symbol; 21] = [
    Bell, Replay, Grape, Cherry, Grape, Replay, Grape, Clown, Grape, Replay, Grape, Cherry, Grape,
    Replay, Grape, Bar, Grape, Replay, Grape, Seven, Grape,
];

const MIDDLE: [Symbol; 21] = [
    Replay, Seven, Grape, Replay, Grape, Cherry, Grape, Replay, Grape, Bar, Grape, Replay, Grape,
    Clown, Grape, Replay, Grape, Bell, Grape, Replay, Grape,
];

const RIGHT: [Symbol; 21] = [
    Grape, Seven, Bar, Grape, Replay, Grape, Cherry, Grape, Replay, Grape, Clown, Grape, Replay,
    Grape, Bell, Grape, Replay, Grape, Replay, Grape, Replay,
];

#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    #[error("reel {0} is empty")]
    Empty(Reel),
}

/// The three cyclic reel strips. Immutable once built and shared by every engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReelSet {
    reels: [Vec<Symbol>; 3],
}

impl ReelSet {
    pub fn new(
        left: Vec<Symbol>,
        middle: Vec<Symbol>,
        right: Vec<Symbol>,
    ) -> Result<Self, ReelError> {
        let reels = [left, middle, right];
        for reel in Reel::ALL {
            if reels[reel.index()].is_empty() {
                return Err(ReelError::Empty(reel));
            }
        }
        Ok(Self { reels })
    }

    /// The strips shipped with the machine.
    pub fn reference() -> Self {
        Self {
            reels: [LEFT.to_vec(), MIDDLE.to_vec(), RIGHT.to_vec()],
        }
    }

    pub fn len(&self, reel: Reel) -> usize {
        self.reels[reel.index()].len()
    }

    pub fn symbol_at(&self, reel: Reel, index: usize) -> Symbol {
        let strip = &self.reels[reel.index()];
        strip[index % strip.len()]
    }

    /// First index at which `symbol` appears on `reel`.
    pub fn position_of(&self, reel: Reel, symbol: Symbol) -> Option<usize> {
        self.reels[reel.index()].iter().position(|s| *s == symbol)
    }

    /// Symbols above, at and below `index`, wrapping around the strip.
    pub fn window(&self, reel: Reel, index: usize) -> [Symbol; 3] {
        let len = self.len(reel);
        let index = index % len;
        [
            self.symbol_at(reel, index + len - 1),
            self.symbol_at(reel, index),
            self.symbol_at(reel, index + 1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotfloor_types::Outcome;

    #[test]
    fn reference_reels_carry_every_defining_symbol() {
        let reels = ReelSet::reference();
        for outcome in Outcome::ALL {
            let Some(symbol) = outcome.defining_symbol() else {
                continue;
            };
            let reels_needed: &[Reel] = if outcome.is_cherry_family() {
                &[Reel::Left]
            } else {
                &Reel::ALL
            };
            for reel in reels_needed {
                assert!(
                    reels.position_of(*reel, symbol).is_some(),
                    "{reel} lacks {symbol} for {outcome}"
                );
            }
        }
    }

    #[test]
    fn window_wraps_both_ends() {
        let reels = ReelSet::reference();
        assert_eq!(reels.window(Reel::Left, 0), [Grape, Bell, Replay]);
        assert_eq!(reels.window(Reel::Left, 20), [Seven, Grape, Bell]);
        assert_eq!(reels.window(Reel::Right, 41), reels.window(Reel::Right, 20));
    }

    #[test]
    fn first_occurrence_is_used() {
        let reels = ReelSet::reference();
        assert_eq!(reels.position_of(Reel::Left, Cherry), Some(3));
        assert_eq!(reels.position_of(Reel::Middle, Seven), Some(1));
        assert_eq!(reels.position_of(Reel::Right, Bell), Some(14));
    }

    #[test]
    fn empty_reel_is_rejected() {
        let err = ReelSet::new(vec![Bell], Vec::new(), vec![Bell]).unwrap_err();
        assert!(matches!(err, ReelError::Empty(Reel::Middle)));
    }
}
