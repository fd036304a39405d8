use super::*;
use commonware_codec::{DecodeExt, Encode, EncodeSize, ReadExt};
use proptest::prelude::*;

fn entry(sequence: u64, outcome: Outcome) -> PlayHistoryEntry {
    let payout = outcome.payout();
    PlayHistoryEntry {
        sequence,
        outcome,
        payout,
        bet: BET,
        delta: payout as i64 - BET as i64,
        balance: 0,
        is_win: payout > 0,
        is_bonus: outcome.is_bonus(),
        timestamp: 1_700_000_000_000 + sequence,
    }
}

#[test]
fn test_outcome_labels_match_serde() {
    for outcome in Outcome::ALL {
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, format!("\"{}\"", outcome.label()));
        let parsed: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }
    assert!(serde_json::from_str::<Outcome>("\"JACKPOT\"").is_err());
}

#[test]
fn test_payout_table() {
    assert_eq!(Outcome::Big.payout(), 0);
    assert_eq!(Outcome::Reg.payout(), 0);
    assert_eq!(Outcome::Bell.payout(), 14);
    assert_eq!(Outcome::Clown.payout(), 10);
    assert_eq!(Outcome::Grape.payout(), 8);
    assert_eq!(Outcome::Replay.payout(), 3);
    assert_eq!(Outcome::Cherry.payout(), 2);
    assert_eq!(Outcome::Miss.payout(), 0);
}

#[test]
fn bonus_trigger_covers_cherry_combinations() {
    assert_eq!(Outcome::CherryBig.bonus(), Some(BonusKind::Big));
    assert_eq!(Outcome::CherryReg.bonus(), Some(BonusKind::Reg));
    assert!(Outcome::CherryBig.is_cherry_family());
    assert!(!Outcome::Cherry.is_bonus());
    assert!(!Outcome::Miss.is_bonus());
}

#[test]
fn test_outcome_serializes_as_label() {
    let json = serde_json::to_string(&Outcome::CherryBig).unwrap();
    assert_eq!(json, "\"CHERRY+BIG\"");
    let symbol = serde_json::to_string(&Symbol::Seven).unwrap();
    assert_eq!(symbol, "\"7\"");
}

#[test]
fn test_outcome_rejects_unknown_tag() {
    let bytes = [42u8];
    let err = Outcome::read(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, commonware_codec::Error::InvalidEnum(42)));
}

#[test]
fn history_keeps_last_hundred_in_order() {
    let mut player = PlayerAggregate::new("p1".into(), "Player".into(), 1, 0);
    for sequence in 1..=105 {
        player.record_play(entry(sequence, Outcome::Miss));
    }
    assert_eq!(player.history.len(), HISTORY_LIMIT);
    assert_eq!(player.play_count, 105);
    let sequences: Vec<u64> = player.history.iter().map(|entry| entry.sequence).collect();
    assert_eq!(sequences, (6..=105).collect::<Vec<_>>());
}

#[test]
fn record_play_counts_bonus_categories() {
    let mut player = PlayerAggregate::new("p1".into(), "Player".into(), 1, 0);
    player.record_play(entry(1, Outcome::Big));
    player.record_play(entry(2, Outcome::CherryReg));
    player.record_play(entry(3, Outcome::Grape));
    assert_eq!(player.big_count, 1);
    assert_eq!(player.reg_count, 1);
    assert_eq!(player.next_sequence(), 4);
}

#[test]
fn balance_delta_moves_total_and_period() {
    let mut balance = BalanceSnapshot::new(10);
    balance.apply_delta(-3).unwrap();
    balance.apply_delta(11).unwrap();
    assert_eq!(balance.total, 8);
    assert_eq!(balance.period, 8);

    balance.reset_period(20);
    balance.apply_delta(-3).unwrap();
    assert_eq!(balance.total, 5);
    assert_eq!(balance.period, -3);
    assert_eq!(balance.period_started_at, 20);
}

#[test]
fn balance_overflow_leaves_snapshot_untouched() {
    let mut balance = BalanceSnapshot {
        total: i64::MAX - 1,
        period: 0,
        period_started_at: 0,
    };
    let err = balance.apply_delta(2).unwrap_err();
    assert_eq!(err.delta, 2);
    assert_eq!(balance.total, i64::MAX - 1);
}

#[test]
fn test_player_roundtrip() {
    let mut player = PlayerAggregate::new("p1".into(), "Player".into(), 3, 1_000);
    player.team_id = Some("team-1".into());
    player.balance = BalanceSnapshot {
        total: -42,
        period: 7,
        period_started_at: 1_234,
    };
    player.record_play(entry(1, Outcome::Bell));
    player.validate_invariants().expect("valid invariants");

    let encoded = player.encode();
    assert_eq!(encoded.len(), player.encode_size());
    let decoded = PlayerAggregate::decode(encoded).unwrap();
    assert_eq!(player, decoded);
}

#[test]
fn test_team_profile_roundtrip() {
    let mut profile = TeamProfile::new(
        "team-1".into(),
        "Lucky".into(),
        "weekend crew".into(),
        "p1".into(),
        true,
        5,
    );
    profile.members.push("p2".into());
    profile.validate_invariants().expect("valid invariants");

    let decoded = TeamProfile::decode(profile.encode()).unwrap();
    assert_eq!(profile, decoded);
}

#[test]
fn test_team_validate_rejects_absent_owner() {
    let mut profile = TeamProfile::new(
        "team-1".into(),
        "Lucky".into(),
        String::new(),
        "p1".into(),
        true,
        5,
    );
    profile.members.clear();
    assert!(matches!(
        profile.validate_invariants(),
        Err(AggregateInvariantError::OwnerNotMember { .. })
    ));
}

#[test]
fn test_player_validate_rejects_setting_out_of_range() {
    let player = PlayerAggregate::new("p1".into(), "Player".into(), 7, 0);
    assert!(matches!(
        player.validate_invariants(),
        Err(AggregateInvariantError::SettingOutOfRange { got: 7 })
    ));
}

proptest! {
    #[test]
    fn decoding_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = PlayerAggregate::decode(bytes.as_slice());
        let _ = TeamProfile::decode(bytes.as_slice());
    }

    #[test]
    fn balance_totals_match_delta_sum(deltas in prop::collection::vec(-3i64..=11, 0..200)) {
        let mut balance = BalanceSnapshot::new(0);
        for delta in &deltas {
            balance.apply_delta(*delta).unwrap();
        }
        let sum: i64 = deltas.iter().sum();
        prop_assert_eq!(balance.total, sum);
        prop_assert_eq!(balance.period, sum);
    }
}
