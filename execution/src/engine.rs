//! Outcome engine: draw an outcome, stop the reels consistently with it, judge the result.

use crate::reels::ReelSet;
use crate::table::{ProbabilityTable, ProbabilityTables};
use rand::Rng;
use slotfloor_types::{JudgeResult, Outcome, Reel, ReelStops, Symbol, WinLine};
use std::sync::Arc;
use tracing::error;

const PAY_LINE: &str = "middle";
const MIDDLE_ROW: u8 = 1;

/// A reel that cannot show the symbol its outcome requires. The stop falls back to a
/// uniform index, so the reels no longer justify the payout.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("reel {reel} has no {symbol} required by {outcome}")]
pub struct MissingSymbol {
    pub reel: Reel,
    pub symbol: Symbol,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Synthesis {
    pub stops: ReelStops,
    pub violations: Vec<MissingSymbol>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spin {
    pub outcome: Outcome,
    pub stops: ReelStops,
    pub judge: JudgeResult,
    pub violations: Vec<MissingSymbol>,
}

/// Walk `table` in order and return the first outcome whose cumulative probability
/// exceeds `r`; `Outcome::Miss` when no entry claims it.
pub fn draw(table: &ProbabilityTable, r: f64) -> Outcome {
    let mut cumulative = 0.0;
    for entry in table.entries() {
        cumulative += entry.probability;
        if r < cumulative {
            return entry.outcome;
        }
    }
    Outcome::Miss
}

/// Stateless apart from its immutable reels and tables; safe to share across tasks.
#[derive(Clone, Debug)]
pub struct OutcomeEngine {
    reels: Arc<ReelSet>,
    tables: Arc<ProbabilityTables>,
}

impl Default for OutcomeEngine {
    fn default() -> Self {
        Self::new(ReelSet::reference(), ProbabilityTables::reference())
    }
}

impl OutcomeEngine {
    pub fn new(reels: ReelSet, tables: ProbabilityTables) -> Self {
        Self {
            reels: Arc::new(reels),
            tables: Arc::new(tables),
        }
    }

    pub fn reels(&self) -> &ReelSet {
        &self.reels
    }

    pub fn tables(&self) -> &ProbabilityTables {
        &self.tables
    }

    pub fn draw<R: Rng + ?Sized>(&self, level: u8, rng: &mut R) -> Outcome {
        draw(self.tables.for_level(level), rng.gen::<f64>())
    }

    pub fn synthesize_positions<R: Rng + ?Sized>(
        &self,
        outcome: Outcome,
        rng: &mut R,
    ) -> Synthesis {
        let mut violations = Vec::new();
        let mut stops = [0usize; 3];
        for reel in Reel::ALL {
            let constrained = match outcome.defining_symbol() {
                Some(_) if outcome.is_cherry_family() && reel != Reel::Left => None,
                symbol => symbol,
            };
            stops[reel.index()] = match constrained {
                None => rng.gen_range(0..self.reels.len(reel)),
                Some(symbol) => match self.reels.position_of(reel, symbol) {
                    Some(index) => index,
                    None => {
                        let violation = MissingSymbol {
                            reel,
                            symbol,
                            outcome,
                        };
                        error!(%violation, "reel/table mismatch; stopping at random index");
                        violations.push(violation);
                        rng.gen_range(0..self.reels.len(reel))
                    }
                },
            };
        }
        Synthesis {
            stops: ReelStops(stops),
            violations,
        }
    }

    pub fn evaluate(&self, stops: ReelStops, outcome: Outcome) -> JudgeResult {
        let display_symbols = Reel::ALL.map(|reel| self.reels.window(reel, stops.get(reel)));
        let win_line = match outcome {
            Outcome::Miss => None,
            outcome if outcome.is_cherry_family() => Some(WinLine {
                line: PAY_LINE.to_string(),
                symbols: vec![display_symbols[0][1]],
                positions: vec![(0, MIDDLE_ROW)],
            }),
            _ => Some(WinLine {
                line: PAY_LINE.to_string(),
                symbols: display_symbols.iter().map(|column| column[1]).collect(),
                positions: (0..3).map(|reel| (reel, MIDDLE_ROW)).collect(),
            }),
        };
        JudgeResult {
            outcome,
            payout: outcome.payout(),
            is_bonus_trigger: outcome.is_bonus(),
            win_line,
            display_symbols,
        }
    }

    pub fn spin<R: Rng + ?Sized>(&self, level: u8, rng: &mut R) -> Spin {
        let outcome = self.draw(level, rng);
        let Synthesis { stops, violations } = self.synthesize_positions(outcome, rng);
        let judge = self.evaluate(stops, outcome);
        Spin {
            outcome,
            stops,
            judge,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::GameRng;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn rng(sequence: u64) -> GameRng {
        GameRng::new(&[3u8; 32], "engine-test", sequence)
    }

    #[test]
    fn zero_draw_yields_first_entry() {
        assert_eq!(draw(&ProbabilityTable::reference(), 0.0), Outcome::Big);
    }

    #[test]
    fn draw_past_total_mass_misses() {
        let table = ProbabilityTable::reference();
        let r = table.total_probability() + 1e-9;
        assert_eq!(draw(&table, r), Outcome::Miss);
        assert_eq!(draw(&table, 0.999_999), Outcome::Miss);
    }

    #[test]
    fn draw_boundaries_are_exclusive() {
        let table = ProbabilityTable::reference();
        assert_eq!(draw(&table, 0.00257 - 1e-9), Outcome::Big);
        assert_eq!(draw(&table, 0.00257 + 1e-9), Outcome::Reg);
    }

    #[test]
    fn triple_outcomes_line_up_on_middle_row() {
        let engine = OutcomeEngine::default();
        for outcome in [
            Outcome::Big,
            Outcome::Reg,
            Outcome::Bell,
            Outcome::Clown,
            Outcome::Grape,
            Outcome::Replay,
        ] {
            let synthesis = engine.synthesize_positions(outcome, &mut rng(1));
            assert!(synthesis.violations.is_empty(), "{outcome}: {:?}", synthesis.violations);
            let judge = engine.evaluate(synthesis.stops, outcome);
            let symbol = outcome.defining_symbol().unwrap();
            let line = judge.win_line.clone().expect("winning line");
            assert_eq!(line.symbols, judge.middle_row().to_vec());
            assert_eq!(judge.middle_row(), [symbol; 3]);
            assert_eq!(line.positions, vec![(0, 1), (1, 1), (2, 1)]);
        }
    }

    #[test]
    fn cherry_family_constrains_left_reel_only() {
        let engine = OutcomeEngine::default();
        for outcome in [Outcome::Cherry, Outcome::CherryBig, Outcome::CherryReg] {
            for sequence in 0..50 {
                let synthesis = engine.synthesize_positions(outcome, &mut rng(sequence));
                assert!(synthesis.violations.is_empty());
                assert_eq!(synthesis.stops.get(Reel::Left), 3);
                let judge = engine.evaluate(synthesis.stops, outcome);
                assert_eq!(judge.display_symbols[0][1], Symbol::Cherry);
                let line = judge.win_line.expect("cherry line");
                assert_eq!(line.symbols, vec![Symbol::Cherry]);
                assert_eq!(line.positions, vec![(0, 1)]);
            }
        }
    }

    #[test]
    fn judge_reports_payout_and_bonus() {
        let engine = OutcomeEngine::default();
        let judge = engine.evaluate(ReelStops([19, 1, 1]), Outcome::Big);
        assert_eq!(judge.payout, 0);
        assert!(judge.is_bonus_trigger);

        let judge = engine.evaluate(ReelStops([0, 17, 14]), Outcome::Bell);
        assert_eq!(judge.payout, 14);
        assert!(!judge.is_bonus_trigger);
    }

    #[test]
    fn miss_has_no_line() {
        let engine = OutcomeEngine::default();
        let synthesis = engine.synthesize_positions(Outcome::Miss, &mut rng(9));
        let judge = engine.evaluate(synthesis.stops, Outcome::Miss);
        assert_eq!(judge.win_line, None);
        assert_eq!(judge.payout, 0);
        for reel in Reel::ALL {
            assert!(synthesis.stops.get(reel) < engine.reels().len(reel));
        }
    }

    #[test]
    fn missing_symbol_is_flagged() {
        use Symbol::*;
        let reels = ReelSet::new(
            vec![Bell, Grape],
            vec![Grape, Replay],
            vec![Bell, Grape, Replay],
        )
        .unwrap();
        let engine = OutcomeEngine::new(reels, ProbabilityTables::reference());
        let synthesis = engine.synthesize_positions(Outcome::Bell, &mut rng(2));
        assert_eq!(
            synthesis.violations,
            vec![MissingSymbol {
                reel: Reel::Middle,
                symbol: Bell,
                outcome: Outcome::Bell,
            }]
        );
        assert_eq!(synthesis.stops.get(Reel::Left), 0);
        assert!(synthesis.stops.get(Reel::Middle) < 2);
        assert_eq!(synthesis.stops.get(Reel::Right), 0);
    }

    #[test]
    fn long_run_frequencies_match_table() {
        let engine = OutcomeEngine::default();
        let mut rng = rng(42);
        let draws = 200_000;
        let mut counts: HashMap<Outcome, u64> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(engine.draw(1, &mut rng)).or_default() += 1;
        }
        for entry in ProbabilityTable::reference().entries() {
            let observed = *counts.get(&entry.outcome).unwrap_or(&0) as f64 / draws as f64;
            let sigma = (entry.probability * (1.0 - entry.probability) / draws as f64).sqrt();
            assert!(
                (observed - entry.probability).abs() < 5.0 * sigma + 1e-4,
                "{}: observed {observed}, expected {}",
                entry.outcome,
                entry.probability
            );
        }
    }

    #[test]
    fn unpopulated_levels_draw_from_base_table() {
        let engine = OutcomeEngine::default();
        for level in 1..=6 {
            assert_eq!(engine.draw(level, &mut rng(5)), engine.draw(1, &mut rng(5)));
        }
    }

    proptest! {
        #[test]
        fn spins_are_visually_consistent(seed in any::<[u8; 32]>(), sequence in any::<u64>()) {
            let engine = OutcomeEngine::default();
            let spin = engine.spin(1, &mut GameRng::new(&seed, "prop", sequence));
            prop_assert!(spin.violations.is_empty());
            prop_assert_eq!(spin.judge.payout, spin.outcome.payout());
            match spin.outcome {
                Outcome::Miss => prop_assert!(spin.judge.win_line.is_none()),
                outcome if outcome.is_cherry_family() => {
                    prop_assert_eq!(spin.judge.display_symbols[0][1], Symbol::Cherry);
                }
                outcome => {
                    let symbol = outcome.defining_symbol().unwrap();
                    prop_assert_eq!(spin.judge.middle_row(), [symbol; 3]);
                }
            }
        }
    }
}
